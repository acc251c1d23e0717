//! Integration tests for media item search
//!
//! - Request body carries the media-type and date filters
//! - Paging follows `nextPageToken`
//! - Error statuses map to `PhotosError`
//! - 429 responses are retried after `Retry-After`

use chrono::{NaiveDate, Utc};
use gpbackup_core::domain::MediaType;
use gpbackup_core::ports::MediaFilter;
use gpbackup_photos::search;
use gpbackup_photos::PhotosError;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, ResponseTemplate};

use crate::common;

fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).unwrap()
}

#[tokio::test]
async fn test_search_single_page() {
    let (server, client) = common::setup_photos_mock().await;
    common::mount_search_single_page(
        &server,
        serde_json::json!([
            common::photo_json("P1", "a.jpg", "2021-03-05T10:00:00Z"),
            common::video_json("V1", "clip.mp4", "2019-07-01T08:30:00Z"),
        ]),
    )
    .await;

    let items = search::search_media_items(&client, &MediaFilter::new(), 100, &Utc)
        .await
        .expect("search failed");

    assert_eq!(items.len(), 2);
    assert_eq!(items[0].id.as_str(), "P1");
    assert_eq!(items[0].media_type, MediaType::Photo);
    assert_eq!(items[0].creation_date, d(2021, 3, 5));
    assert_eq!(items[0].filename, "a.jpg");
    assert_eq!(
        items[0].download_url,
        "https://lh3.googleusercontent.com/lr/P1=d"
    );
    assert_eq!(items[1].media_type, MediaType::Video);
    assert_eq!(
        items[1].download_url,
        "https://lh3.googleusercontent.com/lr/V1=dv"
    );
}

#[tokio::test]
async fn test_search_sends_filters() {
    let (server, client) = common::setup_photos_mock().await;

    Mock::given(method("POST"))
        .and(path(common::SEARCH_PATH))
        .and(body_partial_json(serde_json::json!({
            "pageSize": 50,
            "filters": {
                "mediaTypeFilter": { "mediaTypes": ["PHOTO"] },
                "dateFilter": { "ranges": [{
                    "startDate": { "year": 2020, "month": 10, "day": 30 },
                    "endDate": { "year": 2020, "month": 11, "day": 15 }
                }]}
            }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
        .expect(1)
        .mount(&server)
        .await;

    let filter = MediaFilter::new()
        .with_media_type(MediaType::Photo)
        .with_start(d(2020, 10, 30))
        .with_end(d(2020, 11, 15));
    let items = search::search_media_items(&client, &filter, 50, &Utc)
        .await
        .expect("search failed");
    assert!(items.is_empty());
}

#[tokio::test]
async fn test_search_open_range_uses_extreme_dates() {
    let (server, client) = common::setup_photos_mock().await;

    Mock::given(method("POST"))
        .and(path(common::SEARCH_PATH))
        .and(body_partial_json(serde_json::json!({
            "filters": {
                "mediaTypeFilter": { "mediaTypes": ["ALL_MEDIA"] },
                "dateFilter": { "ranges": [{
                    "startDate": { "year": 1, "month": 1, "day": 1 },
                    "endDate": { "year": 9999, "month": 12, "day": 31 }
                }]}
            }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
        .expect(1)
        .mount(&server)
        .await;

    search::search_media_items(&client, &MediaFilter::new(), 100, &Utc)
        .await
        .expect("search failed");
}

#[tokio::test]
async fn test_search_follows_page_tokens() {
    let (server, client) = common::setup_photos_mock().await;
    common::mount_search_paginated(
        &server,
        serde_json::json!([
            common::photo_json("P1", "a.jpg", "2021-03-05T10:00:00Z"),
            common::photo_json("P2", "b.jpg", "2021-03-06T10:00:00Z"),
        ]),
        serde_json::json!([common::photo_json("P3", "c.jpg", "2021-03-07T10:00:00Z")]),
    )
    .await;

    let items = search::search_media_items(&client, &MediaFilter::new(), 2, &Utc)
        .await
        .expect("search failed");

    let ids: Vec<&str> = items.iter().map(|i| i.id.as_str()).collect();
    assert_eq!(ids, vec!["P1", "P2", "P3"]);
}

#[tokio::test]
async fn test_search_skips_unusable_items() {
    let (server, client) = common::setup_photos_mock().await;
    common::mount_search_single_page(
        &server,
        serde_json::json!([
            common::photo_json("P1", "a.jpg", "2021-03-05T10:00:00Z"),
            { "id": "ODD", "filename": "x", "mediaMetadata": { "creationTime": "2021-03-05T10:00:00Z" } }
        ]),
    )
    .await;

    let items = search::search_media_items(&client, &MediaFilter::new(), 100, &Utc)
        .await
        .expect("search failed");
    assert_eq!(items.len(), 1);
}

#[tokio::test]
async fn test_search_unauthorized() {
    let (server, client) = common::setup_photos_mock().await;
    Mock::given(method("POST"))
        .and(path(common::SEARCH_PATH))
        .respond_with(ResponseTemplate::new(401).set_body_json(serde_json::json!({
            "error": { "code": 401, "message": "Request had invalid authentication credentials.", "status": "UNAUTHENTICATED" }
        })))
        .mount(&server)
        .await;

    let err = search::search_media_items(&client, &MediaFilter::new(), 100, &Utc)
        .await
        .unwrap_err();
    match err {
        PhotosError::Unauthorized(msg) => assert!(msg.contains("invalid authentication")),
        other => panic!("expected Unauthorized, got {other:?}"),
    }
}

#[tokio::test]
async fn test_search_server_error() {
    let (server, client) = common::setup_photos_mock().await;
    Mock::given(method("POST"))
        .and(path(common::SEARCH_PATH))
        .respond_with(ResponseTemplate::new(503).set_body_string("backend unavailable"))
        .mount(&server)
        .await;

    let err = search::search_media_items(&client, &MediaFilter::new(), 100, &Utc)
        .await
        .unwrap_err();
    assert!(matches!(err, PhotosError::ServerError(ref m) if m.contains("503")));
}

#[tokio::test]
async fn test_search_retries_after_429() {
    let (server, client) = common::setup_photos_mock().await;

    Mock::given(method("POST"))
        .and(path(common::SEARCH_PATH))
        .respond_with(ResponseTemplate::new(429).append_header("Retry-After", "0"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    common::mount_search_single_page(
        &server,
        serde_json::json!([common::photo_json("P1", "a.jpg", "2021-03-05T10:00:00Z")]),
    )
    .await;

    let items = search::search_media_items(&client, &MediaFilter::new(), 100, &Utc)
        .await
        .expect("search should succeed after the 429");
    assert_eq!(items.len(), 1);
}

#[tokio::test]
async fn test_search_gives_up_after_repeated_429() {
    let server = wiremock::MockServer::start().await;
    let client = gpbackup_photos::client::PhotosClient::with_base_url("t", server.uri())
        .with_max_retries(2);

    Mock::given(method("POST"))
        .and(path(common::SEARCH_PATH))
        .respond_with(ResponseTemplate::new(429).append_header("Retry-After", "0"))
        .expect(3)
        .mount(&server)
        .await;

    let err = search::search_media_items(&client, &MediaFilter::new(), 100, &Utc)
        .await
        .unwrap_err();
    assert!(matches!(err, PhotosError::TooManyRequests { .. }));
}
