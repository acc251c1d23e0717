//! Domain error types

use thiserror::Error;

/// Errors raised while constructing or parsing domain values
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Invalid relative path (absolute, empty, or escaping the backup root)
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// Invalid media item identifier
    #[error("Invalid media item ID: {0}")]
    InvalidId(String),

    /// Unknown media type name
    #[error("Invalid media type: {0}")]
    InvalidMediaType(String),

    /// Date range whose start lies after its end
    #[error("Invalid date range: start {start} is after end {end}")]
    InvalidRange {
        /// Lower bound
        start: String,
        /// Upper bound
        end: String,
    },
}
