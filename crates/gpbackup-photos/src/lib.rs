//! gpbackup Photos - Google Photos Library API client
//!
//! Provides async client for:
//! - OAuth2 authentication (installed-app flow with a loopback redirect)
//! - Media item search with media-type and date filters
//! - Streaming download of original media bytes
//!
//! ## Modules
//!
//! - [`auth`] - OAuth2 installed-app flow and keyring token storage
//! - [`client`] - Library API HTTP client
//! - [`search`] - `mediaItems:search` paging and response parsing
//! - [`provider`] - [`IMediaLibrary`](gpbackup_core::ports::IMediaLibrary) adapter
//! - [`fetcher`] - [`IContentFetcher`](gpbackup_core::ports::IContentFetcher) adapter

pub mod auth;
pub mod client;
pub mod fetcher;
pub mod provider;
pub mod search;

use std::time::Duration;
use thiserror::Error;

/// Errors that can occur when communicating with the Google Photos Library API
#[derive(Debug, Error)]
pub enum PhotosError {
    /// Authentication credentials are invalid or expired
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// The token lacks the required scope, or the API is not enabled
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// The request was malformed (bad filter, bad page token)
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Rate limit exceeded; retry after the specified duration
    #[error("Too many requests, retry after {retry_after:?}")]
    TooManyRequests {
        /// Duration to wait before retrying
        retry_after: Duration,
    },

    /// A server-side error occurred (5xx)
    #[error("Server error: {0}")]
    ServerError(String),

    /// A network-level error occurred
    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    /// The API response could not be parsed or was malformed
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}
