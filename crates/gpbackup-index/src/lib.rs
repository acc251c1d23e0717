//! gpbackup Index - Durable record of downloaded media
//!
//! ## Architecture
//!
//! This crate implements the `IBackupIndex` port from `gpbackup-core`. It is
//! a driven (secondary) adapter in the hexagonal architecture and ships two
//! backends with identical semantics:
//!
//! - [`SqliteBackupIndex`] - Production backend over a [`DatabasePool`]
//! - [`InMemoryBackupIndex`] - Map-backed backend for tests and dry runs
//!
//! ## Usage
//!
//! ```no_run
//! use std::path::Path;
//! use gpbackup_index::SqliteBackupIndex;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let index = SqliteBackupIndex::open(Path::new("backup/.data_store/index.db")).await?;
//! // Use index as IBackupIndex...
//! # Ok(())
//! # }
//! ```

pub mod memory;
pub mod pool;
pub mod sqlite;

use gpbackup_core::ports::IndexError;

pub use memory::InMemoryBackupIndex;
pub use pool::DatabasePool;
pub use sqlite::SqliteBackupIndex;

/// Errors raised by the SQLite storage layer
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Failed to establish a database connection
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// A database query failed
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Schema migration failed
    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    /// A stored row could not be turned back into a domain value
    #[error("Corrupt row: {0}")]
    CorruptRow(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        StoreError::QueryFailed(e.to_string())
    }
}

impl From<StoreError> for IndexError {
    fn from(e: StoreError) -> Self {
        IndexError::Unavailable(e.to_string())
    }
}
