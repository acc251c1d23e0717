//! gpbackup Sync - Reconciliation of the remote library against the backup
//!
//! Provides:
//! - Snapshot diffing of remote items against the backup index
//! - Collision-free placement of downloaded files under dated folders
//! - Crash-safe streaming downloads with timeout and retry
//! - Orphan sweep for files the index does not know about
//!
//! ## Modules
//!
//! - [`engine`] - Reconciliation engine driving the remove and add phases
//! - [`placement`] - Destination resolution, download, deletion with pruning
//! - [`sweep`] - Detection and cleanup of untracked files

pub mod engine;
pub mod placement;
pub mod sweep;

use std::path::PathBuf;
use std::time::Duration;

use gpbackup_core::domain::DomainError;
use gpbackup_core::ports::IndexError;
use thiserror::Error;

/// Errors raised by [`placement::FilePlacement`]
#[derive(Debug, Error)]
pub enum PlacementError {
    /// The remote filename cannot be used as a local file name
    #[error("Invalid filename: {0:?}")]
    InvalidFilename(String),

    /// The path does not live under the backup root
    #[error("{path} is not under backup root {root}")]
    OutsideRoot { root: PathBuf, path: PathBuf },

    /// The download request could not be opened or the body stream failed
    #[error("Download failed: {0:#}")]
    Fetch(anyhow::Error),

    /// Fewer bytes arrived than the server declared
    #[error("Short transfer: expected {expected} bytes, received {received}")]
    ShortTransfer { expected: u64, received: u64 },

    /// More bytes arrived than the server declared
    #[error("Length mismatch: expected {expected} bytes, received {received}")]
    LengthMismatch { expected: u64, received: u64 },

    /// The download did not finish in time
    #[error("Download timed out after {0:?}")]
    Timeout(Duration),

    /// A file system operation failed
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A domain-level error propagated from gpbackup-core
    #[error("Domain error: {0}")]
    Domain(#[from] DomainError),
}

impl PlacementError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PlacementError::Io {
            path: path.into(),
            source,
        }
    }

    /// True for failures of the transfer itself, as opposed to local file system problems
    pub fn is_download_failure(&self) -> bool {
        matches!(
            self,
            PlacementError::Fetch(_)
                | PlacementError::ShortTransfer { .. }
                | PlacementError::LengthMismatch { .. }
                | PlacementError::Timeout(_)
        )
    }
}

/// Run-level errors that abort a reconciliation
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// The requested window is malformed
    #[error("Invalid request: {0}")]
    InvalidRequest(#[from] DomainError),

    /// The remote library could not be listed
    #[error("Failed to list remote library: {0:#}")]
    Listing(anyhow::Error),

    /// The index could not be read or written
    #[error(transparent)]
    Index(IndexError),

    /// The index contradicted the plan computed from it
    #[error("Index consistency violation: {0}")]
    Consistency(IndexError),

    /// A worker task panicked or was cancelled
    #[error("Worker task failed: {0}")]
    Worker(String),
}

impl From<IndexError> for ReconcileError {
    fn from(e: IndexError) -> Self {
        if e.is_consistency_error() {
            ReconcileError::Consistency(e)
        } else {
            ReconcileError::Index(e)
        }
    }
}
