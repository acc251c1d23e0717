//! Port definitions (hexagonal architecture interfaces)
//!
//! This module defines the port traits that form the boundaries of the
//! hexagonal architecture. The reconciliation engine depends only on these
//! traits; their implementations live in adapter crates.
//!
//! ## Ports Overview
//!
//! - [`IBackupIndex`] - Durable record of every downloaded item
//! - [`IMediaLibrary`] - Listing of the items that currently exist remotely
//! - [`IContentFetcher`] - Raw byte download of a single item

pub mod backup_index;
pub mod content_fetcher;
pub mod media_library;

pub use backup_index::{IBackupIndex, IndexError, IndexResult, MediaFilter};
pub use content_fetcher::{ByteStream, FetchedContent, IContentFetcher};
pub use media_library::{IMediaLibrary, RemoteMediaItem};
