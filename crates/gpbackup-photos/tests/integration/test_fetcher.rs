//! Integration tests for HttpContentFetcher

use futures_util::TryStreamExt;
use gpbackup_core::ports::IContentFetcher;
use gpbackup_photos::fetcher::HttpContentFetcher;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::common;

async fn collect(fetcher: &HttpContentFetcher, url: &str) -> (Option<u64>, Vec<u8>) {
    let content = fetcher.fetch(url).await.expect("fetch failed");
    let chunks: Vec<bytes::Bytes> = content.body.try_collect().await.expect("body failed");
    (content.content_length, chunks.concat())
}

#[tokio::test]
async fn test_fetch_streams_body_and_length() {
    let server = MockServer::start().await;
    let body: Vec<u8> = (0..262_144).map(|i| (i % 251) as u8).collect();
    common::mount_media(&server, "/lr/P1=d", &body).await;

    let fetcher = HttpContentFetcher::new();
    let (length, received) = collect(&fetcher, &format!("{}/lr/P1=d", server.uri())).await;

    assert_eq!(length, Some(body.len() as u64));
    assert_eq!(received, body);
}

#[tokio::test]
async fn test_fetch_empty_body() {
    let server = MockServer::start().await;
    common::mount_media(&server, "/lr/empty=d", &[]).await;

    let (length, received) =
        collect(&HttpContentFetcher::new(), &format!("{}/lr/empty=d", server.uri())).await;
    assert_eq!(length, Some(0));
    assert!(received.is_empty());
}

#[tokio::test]
async fn test_fetch_error_status_is_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/lr/gone=d"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let err = HttpContentFetcher::new()
        .fetch(&format!("{}/lr/gone=d", server.uri()))
        .await
        .unwrap_err();
    assert!(format!("{err:#}").contains("404"));
}

#[tokio::test]
async fn test_fetch_server_error_mentions_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let err = HttpContentFetcher::new()
        .fetch(&format!("{}/lr/x=d", server.uri()))
        .await
        .unwrap_err();
    assert!(format!("{err:#}").contains("503"));
}

#[tokio::test]
async fn test_fetch_error_leaves_out_url() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/lr/500-dns-connection=d"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let err = HttpContentFetcher::new()
        .fetch(&format!("{}/lr/500-dns-connection=d", server.uri()))
        .await
        .unwrap_err();
    let message = format!("{err:#}");
    assert!(message.contains("404"));
    assert!(!message.contains("500-dns-connection"));
    assert!(!message.contains(&server.uri()));
}
