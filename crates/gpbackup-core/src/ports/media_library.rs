//! Media library port (driven/secondary port)
//!
//! Abstracts the remote photo library. The reconciliation engine only needs a
//! flat snapshot of the items matching a filter; paging, authentication and
//! wire formats are the adapter's concern.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::backup_index::MediaFilter;
use crate::domain::{MediaItemId, MediaType};

/// A media item as reported by the remote library
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteMediaItem {
    /// Stable remote identifier
    pub id: MediaItemId,
    /// Photo or video
    pub media_type: MediaType,
    /// Creation date in the local calendar
    pub creation_date: NaiveDate,
    /// Original file name as uploaded, e.g. `IMG_1.jpg`
    pub filename: String,
    /// URL that yields the original bytes
    pub download_url: String,
}

/// Port trait for listing the remote library
///
/// Uses `anyhow::Result` because failures are adapter-specific (HTTP, auth,
/// quota) and all of them are fatal for a reconciliation run.
#[async_trait::async_trait]
pub trait IMediaLibrary: Send + Sync {
    /// Returns every remote item matching `filter`
    ///
    /// The date range is inclusive and `media_type: None` lists all types.
    async fn list_items(&self, filter: &MediaFilter) -> anyhow::Result<Vec<RemoteMediaItem>>;
}
