//! SQLite implementation of IBackupIndex
//!
//! ## Type Mapping
//!
//! | Domain Type   | SQL Type | Strategy                                   |
//! |---------------|----------|--------------------------------------------|
//! | MediaItemId   | TEXT     | `.as_str()` / `MediaItemId::new()`         |
//! | MediaType     | TEXT     | `"PHOTO"` / `"VIDEO"` via `as_str()` / `FromStr` |
//! | NaiveDate     | TEXT     | `YYYY-MM-DD`, compared lexically in range filters |
//! | RelativePath  | TEXT     | `/`-separated via `.as_str()` / `RelativePath::new()` |
//!
//! Every trait method opens its own transaction and commits before returning.

use std::path::Path;

use chrono::NaiveDate;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use gpbackup_core::domain::{MediaItemId, MediaItemRecord, MediaType, RelativePath};
use gpbackup_core::ports::{IBackupIndex, IndexError, IndexResult, MediaFilter};

use crate::{DatabasePool, StoreError};

const DATE_FORMAT: &str = "%Y-%m-%d";

/// SQLite-based implementation of the backup index port
pub struct SqliteBackupIndex {
    pool: SqlitePool,
}

impl SqliteBackupIndex {
    /// Creates a new index over an existing connection pool
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Opens (creating if needed) the index database at `db_path`
    pub async fn open(db_path: &Path) -> Result<Self, StoreError> {
        let pool = DatabasePool::new(db_path).await?;
        Ok(Self::new(pool.pool().clone()))
    }
}

// ============================================================================
// Helper functions for type conversion
// ============================================================================

fn store_err(e: sqlx::Error) -> IndexError {
    StoreError::from(e).into()
}

fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

/// Rebuild a record from a `media_items` row
fn record_from_row(row: &SqliteRow) -> Result<MediaItemRecord, StoreError> {
    let id: String = row.get("id");
    let media_type: String = row.get("media_type");
    let creation_date: String = row.get("creation_date");
    let file_path: String = row.get("file_path");

    let id = MediaItemId::new(id).map_err(|e| StoreError::CorruptRow(e.to_string()))?;
    let media_type = media_type
        .parse::<MediaType>()
        .map_err(|e| StoreError::CorruptRow(format!("{id}: {e}")))?;
    let creation_date = NaiveDate::parse_from_str(&creation_date, DATE_FORMAT).map_err(|e| {
        StoreError::CorruptRow(format!("{id}: bad creation_date {creation_date:?}: {e}"))
    })?;
    let file_path =
        RelativePath::new(file_path).map_err(|e| StoreError::CorruptRow(format!("{id}: {e}")))?;

    Ok(MediaItemRecord::new(id, media_type, creation_date, file_path))
}

/// Build the WHERE clause and its bind values for a filter
fn filter_clause(filter: &MediaFilter) -> (String, Vec<String>) {
    let mut sql = String::from(" WHERE 1=1");
    let mut binds = Vec::new();

    if let Some(media_type) = filter.media_type {
        sql.push_str(" AND media_type = ?");
        binds.push(media_type.as_str().to_string());
    }

    if let Some(start) = filter.range.start() {
        sql.push_str(" AND creation_date >= ?");
        binds.push(format_date(start));
    }

    if let Some(end) = filter.range.end() {
        sql.push_str(" AND creation_date <= ?");
        binds.push(format_date(end));
    }

    (sql, binds)
}

// ============================================================================
// IBackupIndex implementation
// ============================================================================

#[async_trait::async_trait]
impl IBackupIndex for SqliteBackupIndex {
    async fn get(&self, id: &MediaItemId) -> IndexResult<Option<MediaItemRecord>> {
        let mut tx = self.pool.begin().await.map_err(store_err)?;

        let row = sqlx::query(
            "SELECT id, media_type, creation_date, file_path FROM media_items WHERE id = ?",
        )
        .bind(id.as_str())
        .fetch_optional(&mut *tx)
        .await
        .map_err(store_err)?;

        tx.commit().await.map_err(store_err)?;

        match row {
            Some(ref row) => Ok(Some(record_from_row(row)?)),
            None => Ok(None),
        }
    }

    async fn insert(&self, record: &MediaItemRecord) -> IndexResult<()> {
        let mut tx = self.pool.begin().await.map_err(store_err)?;

        let result = sqlx::query(
            "INSERT INTO media_items (id, media_type, creation_date, file_path) \
             VALUES (?, ?, ?, ?)",
        )
        .bind(record.id().as_str())
        .bind(record.media_type().as_str())
        .bind(format_date(record.creation_date()))
        .bind(record.file_path().as_str())
        .execute(&mut *tx)
        .await;

        match result {
            Ok(_) => {}
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                // "UNIQUE constraint failed: media_items.file_path"
                return Err(if db.message().contains("file_path") {
                    IndexError::DuplicatePath(record.file_path().clone())
                } else {
                    IndexError::DuplicateKey(record.id().clone())
                });
            }
            Err(e) => return Err(store_err(e)),
        }

        tx.commit().await.map_err(store_err)?;

        tracing::trace!(item_id = %record.id(), path = %record.file_path(), "Indexed media item");
        Ok(())
    }

    async fn delete(&self, record: &MediaItemRecord) -> IndexResult<()> {
        let mut tx = self.pool.begin().await.map_err(store_err)?;

        let result = sqlx::query("DELETE FROM media_items WHERE id = ?")
            .bind(record.id().as_str())
            .execute(&mut *tx)
            .await
            .map_err(store_err)?;

        if result.rows_affected() == 0 {
            return Err(IndexError::NotFound(record.id().clone()));
        }

        tx.commit().await.map_err(store_err)?;

        tracing::trace!(item_id = %record.id(), "Removed media item from index");
        Ok(())
    }

    async fn find(&self, filter: &MediaFilter) -> IndexResult<Vec<MediaItemRecord>> {
        let (clause, binds) = filter_clause(filter);
        let sql = format!(
            "SELECT id, media_type, creation_date, file_path FROM media_items{clause} \
             ORDER BY creation_date, id"
        );

        let mut query = sqlx::query(&sql);
        for bind in &binds {
            query = query.bind(bind);
        }

        let mut tx = self.pool.begin().await.map_err(store_err)?;
        let rows = query.fetch_all(&mut *tx).await.map_err(store_err)?;
        tx.commit().await.map_err(store_err)?;

        let mut records = Vec::with_capacity(rows.len());
        for row in &rows {
            records.push(record_from_row(row)?);
        }

        Ok(records)
    }

    async fn count(&self, filter: &MediaFilter) -> IndexResult<u64> {
        let (clause, binds) = filter_clause(filter);
        let sql = format!("SELECT COUNT(*) AS count FROM media_items{clause}");

        let mut query = sqlx::query(&sql);
        for bind in &binds {
            query = query.bind(bind);
        }

        let mut tx = self.pool.begin().await.map_err(store_err)?;
        let row = query.fetch_one(&mut *tx).await.map_err(store_err)?;
        tx.commit().await.map_err(store_err)?;

        let count: i64 = row.get("count");
        Ok(count.max(0) as u64)
    }

    async fn all_paths(&self) -> IndexResult<Vec<RelativePath>> {
        let mut tx = self.pool.begin().await.map_err(store_err)?;
        let rows = sqlx::query("SELECT file_path FROM media_items ORDER BY file_path")
            .fetch_all(&mut *tx)
            .await
            .map_err(store_err)?;
        tx.commit().await.map_err(store_err)?;

        let mut paths = Vec::with_capacity(rows.len());
        for row in &rows {
            let path: String = row.get("file_path");
            let path = RelativePath::new(path)
                .map_err(|e| IndexError::from(StoreError::CorruptRow(e.to_string())))?;
            paths.push(path);
        }
        Ok(paths)
    }

    async fn close(&self) {
        self.pool.close().await;
        tracing::debug!("Index database closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn test_format_date_is_zero_padded() {
        assert_eq!(format_date(d(2021, 3, 5)), "2021-03-05");
        assert_eq!(format_date(d(1, 1, 1)), "0001-01-01");
    }

    #[test]
    fn test_filter_clause_empty() {
        let (sql, binds) = filter_clause(&MediaFilter::new());
        assert_eq!(sql, " WHERE 1=1");
        assert!(binds.is_empty());
    }

    #[test]
    fn test_filter_clause_full() {
        let filter = MediaFilter::new()
            .with_media_type(MediaType::Video)
            .with_start(d(2020, 10, 30))
            .with_end(d(2020, 11, 15));
        let (sql, binds) = filter_clause(&filter);
        assert_eq!(
            sql,
            " WHERE 1=1 AND media_type = ? AND creation_date >= ? AND creation_date <= ?"
        );
        assert_eq!(binds, vec!["VIDEO", "2020-10-30", "2020-11-15"]);
    }
}
