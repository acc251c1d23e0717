//! HttpContentFetcher - IContentFetcher over plain HTTPS
//!
//! Item base URLs are pre-authorized, so downloads go out without the bearer
//! header. The body is handed over as a chunk stream. Errors leave out the
//! request URL.

use anyhow::Context;
use futures_util::TryStreamExt;
use reqwest::Client;
use tracing::debug;

use gpbackup_core::ports::{ByteStream, FetchedContent, IContentFetcher};

/// Downloads media bytes with `reqwest`
#[derive(Debug, Clone, Default)]
pub struct HttpContentFetcher {
    client: Client,
}

impl HttpContentFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reuse an existing `reqwest` client (connection pool, proxy settings)
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl IContentFetcher for HttpContentFetcher {
    async fn fetch(&self, url: &str) -> anyhow::Result<FetchedContent> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(reqwest::Error::without_url)
            .context("Failed to send download request")?
            .error_for_status()
            .map_err(reqwest::Error::without_url)
            .context("Download request returned error status")?;

        let content_length = response.content_length();
        debug!(content_length, "Download started");

        let body: ByteStream = Box::pin(
            response
                .bytes_stream()
                .map_err(|e| anyhow::Error::from(e.without_url())),
        );
        Ok(FetchedContent::new(content_length, body))
    }
}
