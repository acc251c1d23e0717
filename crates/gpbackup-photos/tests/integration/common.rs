//! Shared test helpers for Library API integration tests
//!
//! Each helper mounts the necessary mock endpoints on a wiremock server.

use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use gpbackup_photos::client::PhotosClient;

pub const SEARCH_PATH: &str = "/v1/mediaItems:search";

/// Starts a mock server and returns a client pointing at it
pub async fn setup_photos_mock() -> (MockServer, PhotosClient) {
    let server = MockServer::start().await;
    let client = PhotosClient::with_base_url("test-access-token", server.uri());
    (server, client)
}

/// A photo item as the API returns it
pub fn photo_json(id: &str, filename: &str, creation_time: &str) -> serde_json::Value {
    serde_json::json!({
        "id": id,
        "productUrl": format!("https://photos.google.com/lr/photo/{id}"),
        "baseUrl": format!("https://lh3.googleusercontent.com/lr/{id}"),
        "mimeType": "image/jpeg",
        "filename": filename,
        "mediaMetadata": {
            "creationTime": creation_time,
            "width": "4032",
            "height": "3024",
            "photo": { "cameraMake": "Google", "cameraModel": "Pixel 4" }
        }
    })
}

/// A video item as the API returns it
pub fn video_json(id: &str, filename: &str, creation_time: &str) -> serde_json::Value {
    serde_json::json!({
        "id": id,
        "baseUrl": format!("https://lh3.googleusercontent.com/lr/{id}"),
        "mimeType": "video/mp4",
        "filename": filename,
        "mediaMetadata": {
            "creationTime": creation_time,
            "video": { "fps": 29.97, "status": "READY" }
        }
    })
}

/// Mounts a search endpoint that answers with a single page
pub async fn mount_search_single_page(server: &MockServer, items: serde_json::Value) {
    Mock::given(method("POST"))
        .and(path(SEARCH_PATH))
        .and(header("authorization", "Bearer test-access-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "mediaItems": items
        })))
        .mount(server)
        .await;
}

/// Mounts a search endpoint that answers with two pages
///
/// The request carrying `pageToken: "page-2"` gets the second page; any other
/// request gets the first page and the token.
pub async fn mount_search_paginated(
    server: &MockServer,
    page1_items: serde_json::Value,
    page2_items: serde_json::Value,
) {
    Mock::given(method("POST"))
        .and(path(SEARCH_PATH))
        .and(body_partial_json(serde_json::json!({ "pageToken": "page-2" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "mediaItems": page2_items
        })))
        .expect(1)
        .mount(server)
        .await;

    Mock::given(method("POST"))
        .and(path(SEARCH_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "mediaItems": page1_items,
            "nextPageToken": "page-2"
        })))
        .up_to_n_times(1)
        .mount(server)
        .await;
}

/// Mounts a media download at `media_path`
pub async fn mount_media(server: &MockServer, media_path: &str, content: &[u8]) {
    Mock::given(method("GET"))
        .and(path(media_path))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(content.to_vec())
                .append_header("Content-Type", "image/jpeg"),
        )
        .mount(server)
        .await;
}
