//! SQLite connection setup for the backup index
//!
//! The index file lives in the data store under the backup root. Opening it
//! creates the data store directory and the schema on first use; a record
//! counts as written only once SQLite has synced it, so the file always agrees
//! with the media files that finished before a crash.

use std::path::Path;
use std::time::Duration;

use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use tracing::{debug, info};

use crate::StoreError;

/// Download workers insert concurrently; this bounds how long one waits for
/// another's write lock.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Connections kept open against an index file
const FILE_CONNECTIONS: u32 = 5;

const SCHEMA: &str = include_str!("migrations/20260201_media_items.sql");

/// Connection pool over the index database
pub struct DatabasePool {
    pool: SqlitePool,
}

impl DatabasePool {
    /// Open the index at `db_path`, creating the file and its directory when
    /// they do not exist yet
    pub async fn new(db_path: &Path) -> Result<Self, StoreError> {
        if let Some(data_store) = db_path.parent() {
            std::fs::create_dir_all(data_store).map_err(|e| {
                StoreError::ConnectionFailed(format!(
                    "cannot create data store {}: {e}",
                    data_store.display()
                ))
            })?;
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(FILE_CONNECTIONS)
            .connect_with(file_options(db_path))
            .await
            .map_err(|e| {
                StoreError::ConnectionFailed(format!("cannot open index {}: {e}", db_path.display()))
            })?;

        ensure_schema(&pool).await?;
        info!(path = %db_path.display(), "Backup index ready");
        Ok(Self { pool })
    }

    /// A private index that disappears with the pool
    ///
    /// SQLite gives each connection its own `:memory:` database, so the pool
    /// is capped at one connection.
    pub async fn in_memory() -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| StoreError::ConnectionFailed(format!("cannot open in-memory index: {e}")))?;

        ensure_schema(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn file_options(db_path: &Path) -> SqliteConnectOptions {
    SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Full)
        .busy_timeout(BUSY_TIMEOUT)
}

/// Create the `media_items` table and its indexes if missing
async fn ensure_schema(pool: &SqlitePool) -> Result<(), StoreError> {
    sqlx::raw_sql(SCHEMA)
        .execute(pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("media_items schema: {e}")))?;
    debug!("Index schema in place");
    Ok(())
}
