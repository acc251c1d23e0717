//! Integration tests for GooglePhotosLibrary (IMediaLibrary)

use gpbackup_core::domain::MediaType;
use gpbackup_core::ports::{IMediaLibrary, MediaFilter};
use gpbackup_photos::provider::GooglePhotosLibrary;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, ResponseTemplate};

use crate::common;

#[tokio::test]
async fn test_list_items_through_port() {
    let (server, client) = common::setup_photos_mock().await;
    common::mount_search_single_page(
        &server,
        serde_json::json!([
            common::photo_json("P1", "a.jpg", "2021-03-05T12:00:00Z"),
            common::video_json("V1", "clip.mp4", "2021-03-05T12:00:00Z"),
        ]),
    )
    .await;

    let library: Box<dyn IMediaLibrary> = Box::new(GooglePhotosLibrary::new(client));
    let items = library
        .list_items(&MediaFilter::new())
        .await
        .expect("list_items failed");

    let ids: Vec<&str> = items.iter().map(|i| i.id.as_str()).collect();
    assert_eq!(ids, vec!["P1", "V1"]);
    assert!(items[1].download_url.ends_with("=dv"));
}

#[tokio::test]
async fn test_list_items_uses_page_size() {
    let (server, client) = common::setup_photos_mock().await;
    Mock::given(method("POST"))
        .and(path(common::SEARCH_PATH))
        .and(body_partial_json(serde_json::json!({
            "pageSize": 25,
            "filters": { "mediaTypeFilter": { "mediaTypes": ["VIDEO"] } }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
        .expect(1)
        .mount(&server)
        .await;

    let library = GooglePhotosLibrary::new(client).with_page_size(25);
    let items = library
        .list_items(&MediaFilter::new().with_media_type(MediaType::Video))
        .await
        .expect("list_items failed");
    assert!(items.is_empty());
}

#[tokio::test]
async fn test_list_items_failure_is_reported() {
    let (server, client) = common::setup_photos_mock().await;
    Mock::given(method("POST"))
        .and(path(common::SEARCH_PATH))
        .respond_with(ResponseTemplate::new(403).set_body_json(serde_json::json!({
            "error": { "code": 403, "message": "Request had insufficient authentication scopes." }
        })))
        .mount(&server)
        .await;

    let err = GooglePhotosLibrary::new(client)
        .list_items(&MediaFilter::new())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("insufficient authentication scopes"));
}
