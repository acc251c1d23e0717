//! Integration tests for gpbackup-photos
//!
//! Uses wiremock to simulate the Google Photos Library API and the media
//! download host, and verifies end-to-end behavior of search paging, the
//! library adapter and the content fetcher.

mod common;

mod test_fetcher;
mod test_provider;
mod test_search;
