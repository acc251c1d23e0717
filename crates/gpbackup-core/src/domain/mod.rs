//! Domain entities
//!
//! This module contains the core domain types for gpbackup:
//! - Newtypes for item identifiers and backup-relative paths
//! - The immutable `MediaItemRecord` persisted by the backup index
//! - Date range filtering helpers
//! - Domain-specific error types

pub mod errors;
pub mod media_item;
pub mod newtypes;
pub mod range;

pub use errors::DomainError;
pub use media_item::{MediaItemRecord, MediaType};
pub use newtypes::{MediaItemId, RelativePath};
pub use range::DateRange;
