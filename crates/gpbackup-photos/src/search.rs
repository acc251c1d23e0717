//! Media item search
//!
//! Lists the library through `POST /v1/mediaItems:search`, which accepts a
//! media-type filter and a date-range filter and pages with `nextPageToken`.
//!
//! ## Search Flow
//!
//! 1. Translate the [`MediaFilter`] into the API's `filters` object. Open
//!    bounds become `0001-01-01` and `9999-12-31`.
//! 2. Request pages until the response carries no `nextPageToken`.
//! 3. Convert every API item into a [`RemoteMediaItem`], skipping items that
//!    lack the fields a backup needs.
//!
//! See: <https://developers.google.com/photos/library/reference/rest/v1/mediaItems/search>

use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use gpbackup_core::domain::{MediaItemId, MediaType};
use gpbackup_core::ports::{MediaFilter, RemoteMediaItem};

use crate::client::PhotosClient;
use crate::PhotosError;

/// Path for the search endpoint relative to the API base URL
const SEARCH_PATH: &str = "/v1/mediaItems:search";

/// Largest page size the API accepts
pub const MAX_PAGE_SIZE: u32 = 100;

/// Lower bound sent when the filter has no start date
const DATE_MIN: ApiDate = ApiDate {
    year: 1,
    month: 1,
    day: 1,
};

/// Upper bound sent when the filter has no end date
const DATE_MAX: ApiDate = ApiDate {
    year: 9999,
    month: 12,
    day: 31,
};

// ============================================================================
// Request types (JSON serialization)
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SearchRequest {
    page_size: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    page_token: Option<String>,
    filters: Filters,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct Filters {
    media_type_filter: MediaTypeFilter,
    date_filter: DateFilter,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct MediaTypeFilter {
    media_types: Vec<&'static str>,
}

#[derive(Debug, Clone, Serialize)]
struct DateFilter {
    ranges: Vec<ApiDateRange>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct ApiDateRange {
    start_date: ApiDate,
    end_date: ApiDate,
}

/// Calendar date as the API spells it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
struct ApiDate {
    year: i32,
    month: u32,
    day: u32,
}

impl From<NaiveDate> for ApiDate {
    fn from(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
            day: date.day(),
        }
    }
}

impl Filters {
    fn from_filter(filter: &MediaFilter) -> Self {
        let media_type = match filter.media_type {
            Some(media_type) => media_type.as_str(),
            None => "ALL_MEDIA",
        };
        let start = filter.range.start().map_or(DATE_MIN, ApiDate::from);
        let end = filter.range.end().map_or(DATE_MAX, ApiDate::from);

        Self {
            media_type_filter: MediaTypeFilter {
                media_types: vec![media_type],
            },
            date_filter: DateFilter {
                ranges: vec![ApiDateRange {
                    start_date: start,
                    end_date: end,
                }],
            },
        }
    }
}

// ============================================================================
// Response types (JSON deserialization)
// ============================================================================

/// One page of search results
///
/// An empty result is returned as `{}`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchResponse {
    #[serde(default)]
    media_items: Vec<ApiMediaItem>,
    next_page_token: Option<String>,
}

/// A media item from the search response
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiMediaItem {
    id: String,
    /// Base URL; `=d` / `=dv` is appended to download the original
    base_url: Option<String>,
    /// Original file name
    filename: Option<String>,
    media_metadata: Option<ApiMediaMetadata>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiMediaMetadata {
    /// When the media was captured, not when it was uploaded
    creation_time: Option<DateTime<Utc>>,
    /// Photo facet
    photo: Option<serde_json::Value>,
    /// Video facet
    video: Option<serde_json::Value>,
}

// ============================================================================
// MediaItemParser
// ============================================================================

/// Converts API items into port-level [`RemoteMediaItem`]s
pub struct MediaItemParser;

impl MediaItemParser {
    /// Parse one item, reading its creation date in time zone `tz`
    ///
    /// Returns the reason when the item cannot be backed up.
    fn parse_item<Tz: TimeZone>(item: ApiMediaItem, tz: &Tz) -> Result<RemoteMediaItem, String> {
        let id = MediaItemId::new(item.id.clone()).map_err(|e| e.to_string())?;
        let metadata = item
            .media_metadata
            .ok_or_else(|| "missing mediaMetadata".to_string())?;

        let media_type = if metadata.photo.is_some() {
            MediaType::Photo
        } else if metadata.video.is_some() {
            MediaType::Video
        } else {
            return Err("neither photo nor video metadata".to_string());
        };

        let created = metadata
            .creation_time
            .ok_or_else(|| "missing creationTime".to_string())?;
        let base_url = item
            .base_url
            .filter(|u| !u.is_empty())
            .ok_or_else(|| "missing baseUrl".to_string())?;
        let filename = item
            .filename
            .filter(|f| !f.is_empty())
            .ok_or_else(|| "missing filename".to_string())?;

        Ok(RemoteMediaItem {
            id,
            media_type,
            creation_date: created.with_timezone(tz).date_naive(),
            filename,
            download_url: download_url(&base_url, media_type),
        })
    }

    /// Parse a page, dropping (and logging) items that cannot be backed up
    fn parse_page<Tz: TimeZone>(items: Vec<ApiMediaItem>, tz: &Tz) -> Vec<RemoteMediaItem> {
        items
            .into_iter()
            .filter_map(|item| {
                let id = item.id.clone();
                match Self::parse_item(item, tz) {
                    Ok(parsed) => Some(parsed),
                    Err(reason) => {
                        warn!(item_id = %id, reason = %reason, "Skipping media item");
                        None
                    }
                }
            })
            .collect()
    }
}

/// URL that yields the original bytes of an item
///
/// Photos use `=d` (download with metadata), videos `=dv`.
pub fn download_url(base_url: &str, media_type: MediaType) -> String {
    match media_type {
        MediaType::Photo => format!("{base_url}=d"),
        MediaType::Video => format!("{base_url}=dv"),
    }
}

// ============================================================================
// Search
// ============================================================================

/// List every item matching `filter`, following all pages
///
/// Creation dates are read in the time zone `tz`.
pub async fn search_media_items<Tz: TimeZone>(
    client: &PhotosClient,
    filter: &MediaFilter,
    page_size: u32,
    tz: &Tz,
) -> Result<Vec<RemoteMediaItem>, PhotosError> {
    let filters = Filters::from_filter(filter);
    let page_size = page_size.clamp(1, MAX_PAGE_SIZE);

    let mut items = Vec::new();
    let mut page_token: Option<String> = None;
    let mut pages = 0u32;

    loop {
        let request = SearchRequest {
            page_size,
            page_token: page_token.clone(),
            filters: filters.clone(),
        };
        let response: SearchResponse = client.post_json(SEARCH_PATH, &request).await?;
        pages += 1;

        let received = response.media_items.len();
        items.extend(MediaItemParser::parse_page(response.media_items, tz));
        debug!(page = pages, received, total = items.len(), "Fetched search page");

        match response.next_page_token.filter(|t| !t.is_empty()) {
            Some(next) if page_token.as_deref() == Some(next.as_str()) => {
                return Err(PhotosError::InvalidResponse(format!(
                    "nextPageToken repeated: {next}"
                )));
            }
            Some(next) => page_token = Some(next),
            None => break,
        }
    }

    debug!(pages, items = items.len(), "Search complete");
    Ok(items)
}
