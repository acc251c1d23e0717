//! In-memory implementation of IBackupIndex
//!
//! Mirrors the SQLite backend's semantics (id and path uniqueness, inclusive
//! date filters, `(creation_date, id)` ordering) without touching disk. Used
//! by engine tests, and by `gpbackup backup --dry-run` when the backup
//! directory has no index yet.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::RwLock;

use gpbackup_core::domain::{MediaItemId, MediaItemRecord, RelativePath};
use gpbackup_core::ports::{IBackupIndex, IndexError, IndexResult, MediaFilter};

/// Map-backed backup index
#[derive(Default)]
pub struct InMemoryBackupIndex {
    records: RwLock<BTreeMap<MediaItemId, MediaItemRecord>>,
    closed: AtomicBool,
}

impl InMemoryBackupIndex {
    /// Creates an empty index
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an index pre-populated with `records`
    ///
    /// Later duplicates of an id replace earlier ones.
    pub fn with_records(records: impl IntoIterator<Item = MediaItemRecord>) -> Self {
        let map = records
            .into_iter()
            .map(|r| (r.id().clone(), r))
            .collect::<BTreeMap<_, _>>();
        Self {
            records: RwLock::new(map),
            closed: AtomicBool::new(false),
        }
    }

    /// Snapshot of every stored record, ordered by id
    pub async fn snapshot(&self) -> Vec<MediaItemRecord> {
        self.records.read().await.values().cloned().collect()
    }

    fn ensure_open(&self) -> IndexResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(IndexError::Unavailable("index is closed".to_string()));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl IBackupIndex for InMemoryBackupIndex {
    async fn get(&self, id: &MediaItemId) -> IndexResult<Option<MediaItemRecord>> {
        self.ensure_open()?;
        Ok(self.records.read().await.get(id).cloned())
    }

    async fn insert(&self, record: &MediaItemRecord) -> IndexResult<()> {
        self.ensure_open()?;
        let mut records = self.records.write().await;

        if records.contains_key(record.id()) {
            return Err(IndexError::DuplicateKey(record.id().clone()));
        }
        if records
            .values()
            .any(|existing| existing.file_path() == record.file_path())
        {
            return Err(IndexError::DuplicatePath(record.file_path().clone()));
        }

        records.insert(record.id().clone(), record.clone());
        tracing::trace!(item_id = %record.id(), path = %record.file_path(), "Indexed media item");
        Ok(())
    }

    async fn delete(&self, record: &MediaItemRecord) -> IndexResult<()> {
        self.ensure_open()?;
        match self.records.write().await.remove(record.id()) {
            Some(_) => {
                tracing::trace!(item_id = %record.id(), "Removed media item from index");
                Ok(())
            }
            None => Err(IndexError::NotFound(record.id().clone())),
        }
    }

    async fn find(&self, filter: &MediaFilter) -> IndexResult<Vec<MediaItemRecord>> {
        self.ensure_open()?;
        let mut matching: Vec<MediaItemRecord> = self
            .records
            .read()
            .await
            .values()
            .filter(|r| filter.matches(r.media_type(), r.creation_date()))
            .cloned()
            .collect();
        matching.sort_by(|a, b| {
            a.creation_date()
                .cmp(&b.creation_date())
                .then_with(|| a.id().cmp(b.id()))
        });
        Ok(matching)
    }

    async fn count(&self, filter: &MediaFilter) -> IndexResult<u64> {
        self.ensure_open()?;
        Ok(self
            .records
            .read()
            .await
            .values()
            .filter(|r| filter.matches(r.media_type(), r.creation_date()))
            .count() as u64)
    }

    async fn all_paths(&self) -> IndexResult<Vec<RelativePath>> {
        self.ensure_open()?;
        let mut paths: Vec<RelativePath> = self
            .records
            .read()
            .await
            .values()
            .map(|r| r.file_path().clone())
            .collect();
        paths.sort();
        Ok(paths)
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use gpbackup_core::domain::MediaType;

    use super::*;

    fn record(id: &str, path: &str) -> MediaItemRecord {
        MediaItemRecord::new(
            MediaItemId::new(id).unwrap(),
            MediaType::Photo,
            NaiveDate::from_ymd_opt(2021, 3, 5).unwrap(),
            RelativePath::new(path).unwrap(),
        )
    }

    #[tokio::test]
    async fn test_with_records_and_snapshot() {
        let index = InMemoryBackupIndex::with_records([record("B", "b.jpg"), record("A", "a.jpg")]);
        let ids: Vec<_> = index
            .snapshot()
            .await
            .into_iter()
            .map(|r| r.id().to_string())
            .collect();
        assert_eq!(ids, vec!["A", "B"]);
    }

    #[tokio::test]
    async fn test_closed_index_is_unavailable() {
        let index = InMemoryBackupIndex::new();
        index.close().await;
        let err = index.find(&MediaFilter::new()).await.unwrap_err();
        assert!(matches!(err, IndexError::Unavailable(_)));
    }
}
