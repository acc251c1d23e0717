//! GooglePhotosLibrary - IMediaLibrary implementation for the Library API
//!
//! Wraps the [`PhotosClient`] and delegates to the [`search`] module to
//! fulfil the [`IMediaLibrary`] port contract.
//!
//! ## Design Notes
//!
//! - Authentication is handled separately by
//!   [`GooglePhotosAuth`](crate::auth::GooglePhotosAuth); this provider takes
//!   a client that already carries a valid access token.
//! - Creation dates are read in the local time zone, so the same item lands
//!   in the folder of the day it was taken where the backup runs.

use anyhow::Result;
use chrono::Local;
use tracing::info;

use gpbackup_core::ports::{IMediaLibrary, MediaFilter, RemoteMediaItem};

use crate::client::PhotosClient;
use crate::search::{self, MAX_PAGE_SIZE};

/// Remote media library backed by Google Photos
pub struct GooglePhotosLibrary {
    client: PhotosClient,
    page_size: u32,
}

impl GooglePhotosLibrary {
    /// Creates a new library adapter from an authenticated client
    pub fn new(client: PhotosClient) -> Self {
        Self {
            client,
            page_size: MAX_PAGE_SIZE,
        }
    }

    /// Sets the search page size (clamped to 1..=100 when used)
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn client(&self) -> &PhotosClient {
        &self.client
    }
}

#[async_trait::async_trait]
impl IMediaLibrary for GooglePhotosLibrary {
    #[tracing::instrument(skip(self))]
    async fn list_items(&self, filter: &MediaFilter) -> Result<Vec<RemoteMediaItem>> {
        let items = search::search_media_items(&self.client, filter, self.page_size, &Local).await?;
        info!(count = items.len(), "Listed remote media items");
        Ok(items)
    }
}
