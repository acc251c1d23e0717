//! Google Photos Library API client
//!
//! Provides a typed HTTP client for the Library API. Handles the bearer
//! header, endpoint construction, status mapping and 429 back-off.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use gpbackup_photos::client::PhotosClient;
//!
//! let client = PhotosClient::new("access-token-here");
//! assert_eq!(client.base_url(), "https://photoslibrary.googleapis.com");
//! ```

use std::time::Duration;

use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use crate::PhotosError;

/// Base URL of the Google Photos Library API
const PHOTOS_BASE_URL: &str = "https://photoslibrary.googleapis.com";

/// Default retry-after duration when header is missing (30 seconds)
const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(30);

/// Longest Retry-After honoured before falling back to the default
const MAX_RETRY_AFTER: Duration = Duration::from_secs(3600);

/// Maximum number of retries for 429 responses
const DEFAULT_MAX_RETRIES: u32 = 5;

// ============================================================================
// PhotosClient
// ============================================================================

/// HTTP client for Google Photos Library API calls
///
/// Wraps `reqwest::Client` with authentication headers and base URL
/// construction.
pub struct PhotosClient {
    /// The underlying HTTP client
    client: Client,
    /// Base URL for API requests
    base_url: String,
    /// Current OAuth2 access token
    access_token: String,
    /// Retries granted to a request answered with 429
    max_retries: u32,
}

impl PhotosClient {
    /// Creates a new PhotosClient with the given access token
    pub fn new(access_token: impl Into<String>) -> Self {
        Self::with_base_url(access_token, PHOTOS_BASE_URL)
    }

    /// Creates a new PhotosClient with a custom base URL (useful for testing)
    ///
    /// # Arguments
    /// * `access_token` - A valid OAuth2 access token
    /// * `base_url` - Custom base URL for API requests
    pub fn with_base_url(access_token: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            access_token: access_token.into(),
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    /// Sets how many times a rate-limited request is retried
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Updates the access token (e.g., after a token refresh)
    pub fn set_access_token(&mut self, token: impl Into<String>) {
        self.access_token = token.into();
        debug!("Updated PhotosClient access token");
    }

    /// Returns a reference to the current access token
    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    /// Returns the base URL for API requests
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Creates an authenticated request builder for the given method and path
    ///
    /// # Arguments
    /// * `method` - HTTP method
    /// * `path` - API path relative to base URL (e.g., "/v1/mediaItems:search")
    pub fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        self.client
            .request(method, &url)
            .bearer_auth(&self.access_token)
    }

    /// POST `body` as JSON to `path` and decode the JSON answer
    ///
    /// A 429 response is retried after its `Retry-After` delay, up to the
    /// configured number of retries. Other error statuses are mapped to
    /// [`PhotosError`] immediately.
    pub async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T, PhotosError>
    where
        B: serde::Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let mut attempt = 0;
        loop {
            let response = self.request(Method::POST, path).json(body).send().await?;

            match check_status(response).await {
                Ok(response) => {
                    if attempt > 0 {
                        info!(path, attempt, "Request succeeded after retry");
                    }
                    return response
                        .json::<T>()
                        .await
                        .map_err(|e| PhotosError::InvalidResponse(e.to_string()));
                }
                Err(PhotosError::TooManyRequests { retry_after }) if attempt < self.max_retries => {
                    info!(
                        path,
                        attempt,
                        retry_after_ms = retry_after.as_millis() as u64,
                        "Received 429, backing off"
                    );
                    tokio::time::sleep(retry_after).await;
                    attempt += 1;
                }
                Err(e) => {
                    if matches!(e, PhotosError::TooManyRequests { .. }) {
                        warn!(path, attempts = attempt + 1, "429 retry limit exhausted");
                    }
                    return Err(e);
                }
            }
        }
    }
}

/// Map an HTTP status to a [`PhotosError`], passing successful responses through
pub async fn check_status(response: Response) -> Result<Response, PhotosError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after = response
            .headers()
            .get("Retry-After")
            .and_then(|v| v.to_str().ok())
            .map(|v| parse_retry_after(v, DEFAULT_RETRY_AFTER))
            .unwrap_or(DEFAULT_RETRY_AFTER);
        return Err(PhotosError::TooManyRequests { retry_after });
    }

    let body = response.text().await.unwrap_or_default();
    let detail = format!("{status}: {}", error_message(&body));
    Err(match status {
        StatusCode::UNAUTHORIZED => PhotosError::Unauthorized(detail),
        StatusCode::FORBIDDEN => PhotosError::Forbidden(detail),
        s if s.is_server_error() => PhotosError::ServerError(detail),
        _ => PhotosError::BadRequest(detail),
    })
}

/// Extract `error.message` from a Google API error body, or the body itself
fn error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(str::to_string))
        .unwrap_or_else(|| body.trim().to_string())
}

/// Parse a `Retry-After` header value
///
/// Accepts integer seconds or an HTTP-date. Values that cannot be parsed,
/// lie in the past or exceed one hour yield `default`.
pub fn parse_retry_after(value: &str, default: Duration) -> Duration {
    if let Ok(seconds) = value.trim().parse::<u64>() {
        let delay = Duration::from_secs(seconds);
        return if delay <= MAX_RETRY_AFTER { delay } else { default };
    }

    if let Ok(date) = chrono::DateTime::parse_from_rfc2822(value.trim()) {
        let wait = date.with_timezone(&chrono::Utc) - chrono::Utc::now();
        if let Ok(wait) = wait.to_std() {
            if wait <= MAX_RETRY_AFTER {
                return wait;
            }
        }
    }

    warn!(value, "Could not parse Retry-After header, using default");
    default
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_builder() {
        let client = PhotosClient::new("test-token");
        let request = client
            .request(Method::POST, "/v1/mediaItems:search")
            .build()
            .unwrap();
        assert_eq!(
            request.url().as_str(),
            "https://photoslibrary.googleapis.com/v1/mediaItems:search"
        );
        let auth_header = request
            .headers()
            .get("authorization")
            .unwrap()
            .to_str()
            .unwrap();
        assert_eq!(auth_header, "Bearer test-token");
    }

    #[test]
    fn test_custom_base_url_trailing_slash() {
        let client = PhotosClient::with_base_url("token", "http://localhost:8080/");
        let request = client.request(Method::GET, "/v1/x").build().unwrap();
        assert_eq!(request.url().as_str(), "http://localhost:8080/v1/x");
    }

    #[test]
    fn test_set_access_token() {
        let mut client = PhotosClient::new("old-token");
        client.set_access_token("new-token");
        assert_eq!(client.access_token(), "new-token");
    }

    #[test]
    fn test_parse_retry_after_seconds() {
        let d = parse_retry_after("7", DEFAULT_RETRY_AFTER);
        assert_eq!(d, Duration::from_secs(7));
        assert_eq!(parse_retry_after("99999", DEFAULT_RETRY_AFTER), DEFAULT_RETRY_AFTER);
    }

    #[test]
    fn test_parse_retry_after_garbage() {
        assert_eq!(
            parse_retry_after("soon", Duration::from_secs(3)),
            Duration::from_secs(3)
        );
    }

    #[test]
    fn test_error_message_extraction() {
        let body = r#"{"error":{"code":403,"message":"Request had insufficient authentication scopes.","status":"PERMISSION_DENIED"}}"#;
        assert_eq!(
            error_message(body),
            "Request had insufficient authentication scopes."
        );
        assert_eq!(error_message("  plain text \n"), "plain text");
    }
}
