//! Backup index port (driven/secondary port)
//!
//! This module defines the interface for persisting and querying the set of
//! media items that have been downloaded into the backup directory.
//!
//! ## Design Notes
//!
//! - Unlike the remote-facing ports this one returns a typed [`IndexError`]:
//!   the engine has to tell a duplicate key or a missing record (consistency
//!   bugs that abort the run) apart from an unavailable store.
//! - Every operation is its own transaction. There is no cross-call batching.
//! - The [`MediaFilter`] struct is shared with the media library port so both
//!   sides of a reconciliation are queried with identical criteria.

use chrono::NaiveDate;
use thiserror::Error;

use crate::domain::{DateRange, MediaItemId, MediaItemRecord, MediaType, RelativePath};

// ============================================================================
// MediaFilter
// ============================================================================

/// Filter criteria for querying media items
///
/// `media_type: None` matches every type. The date range is inclusive on both
/// ends and an absent bound is unbounded.
///
/// # Example
///
/// ```
/// use chrono::NaiveDate;
/// use gpbackup_core::domain::MediaType;
/// use gpbackup_core::ports::MediaFilter;
///
/// let filter = MediaFilter::new()
///     .with_media_type(MediaType::Photo)
///     .with_start(NaiveDate::from_ymd_opt(2020, 10, 30).unwrap());
/// assert!(filter.matches(MediaType::Photo, NaiveDate::from_ymd_opt(2020, 10, 30).unwrap()));
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MediaFilter {
    /// Filter by media type
    pub media_type: Option<MediaType>,
    /// Inclusive creation date range
    pub range: DateRange,
}

impl MediaFilter {
    /// Creates a new empty filter (matches all items)
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the media type filter
    pub fn with_media_type(mut self, media_type: MediaType) -> Self {
        self.media_type = Some(media_type);
        self
    }

    /// Replaces the date range
    pub fn with_range(mut self, range: DateRange) -> Self {
        self.range = range;
        self
    }

    /// Sets the inclusive lower bound, keeping the upper bound
    pub fn with_start(mut self, start: NaiveDate) -> Self {
        self.range = self.range.with_start(start);
        self
    }

    /// Sets the inclusive upper bound, keeping the lower bound
    pub fn with_end(mut self, end: NaiveDate) -> Self {
        self.range = self.range.with_end(end);
        self
    }

    /// Returns true if an item of `media_type` created on `date` matches
    pub fn matches(&self, media_type: MediaType, date: NaiveDate) -> bool {
        self.media_type.map_or(true, |t| t == media_type) && self.range.contains(date)
    }

    /// Returns true if no filters are set
    pub fn is_empty(&self) -> bool {
        self.media_type.is_none() && self.range == DateRange::unbounded()
    }
}

// ============================================================================
// IndexError
// ============================================================================

/// Errors returned by [`IBackupIndex`] implementations
#[derive(Debug, Error)]
pub enum IndexError {
    /// A record with this id is already present
    #[error("Media item already indexed: {0}")]
    DuplicateKey(MediaItemId),

    /// Another record already owns this relative path
    #[error("File path already indexed: {0}")]
    DuplicatePath(RelativePath),

    /// No record with this id exists
    #[error("Media item not in index: {0}")]
    NotFound(MediaItemId),

    /// The underlying store could not be opened, read or written
    #[error("Backup index unavailable: {0}")]
    Unavailable(String),
}

impl IndexError {
    /// Duplicate-id and not-found errors indicate that the index disagrees
    /// with the plan computed from it moments earlier.
    ///
    /// [`IndexError::DuplicatePath`] is not one of them: destinations are
    /// resolved against the disk, so a record whose file was deleted by hand
    /// can still own the chosen path.
    pub fn is_consistency_error(&self) -> bool {
        matches!(self, IndexError::DuplicateKey(_) | IndexError::NotFound(_))
    }
}

/// Result alias for index operations
pub type IndexResult<T> = Result<T, IndexError>;

// ============================================================================
// IBackupIndex trait
// ============================================================================

/// Port trait for the durable backup index
///
/// ## Implementation Notes
///
/// - `insert` and `delete` must be durable before they return.
/// - `find` returns records ordered by `(creation_date, id)`.
/// - Implementations must tolerate being reopened after a crash.
#[async_trait::async_trait]
pub trait IBackupIndex: Send + Sync {
    /// Retrieves a record by id
    async fn get(&self, id: &MediaItemId) -> IndexResult<Option<MediaItemRecord>>;

    /// Inserts a new record
    ///
    /// Fails with [`IndexError::DuplicateKey`] if the id is already present.
    async fn insert(&self, record: &MediaItemRecord) -> IndexResult<()>;

    /// Deletes an existing record
    ///
    /// Fails with [`IndexError::NotFound`] if no record has this id.
    async fn delete(&self, record: &MediaItemRecord) -> IndexResult<()>;

    /// Returns every record matching the filter
    async fn find(&self, filter: &MediaFilter) -> IndexResult<Vec<MediaItemRecord>>;

    /// Counts records matching the filter
    async fn count(&self, filter: &MediaFilter) -> IndexResult<u64>;

    /// Returns the relative path of every record, regardless of type or date
    async fn all_paths(&self) -> IndexResult<Vec<RelativePath>>;

    /// Releases the underlying resources
    async fn close(&self);
}
