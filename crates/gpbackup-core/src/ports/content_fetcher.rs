//! Content fetcher port (driven/secondary port)
//!
//! Raw byte download of a single media item. The body is exposed as a stream
//! so large videos never have to fit in memory.

use std::fmt;
use std::pin::Pin;

use bytes::Bytes;
use futures_util::Stream;

/// Stream of body chunks
pub type ByteStream = Pin<Box<dyn Stream<Item = anyhow::Result<Bytes>> + Send>>;

/// An opened download
pub struct FetchedContent {
    /// Declared size of the body, if the server reported one
    pub content_length: Option<u64>,
    /// The body itself
    pub body: ByteStream,
}

impl FetchedContent {
    pub fn new(content_length: Option<u64>, body: ByteStream) -> Self {
        Self {
            content_length,
            body,
        }
    }
}

impl fmt::Debug for FetchedContent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchedContent")
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

/// Port trait for downloading item content
#[async_trait::async_trait]
pub trait IContentFetcher: Send + Sync {
    /// Opens a download of `url`
    ///
    /// Returns once the response headers are available; the body is read by
    /// polling the returned stream.
    async fn fetch(&self, url: &str) -> anyhow::Result<FetchedContent>;
}
