//! gpbackup Core - Domain types and port definitions
//!
//! This crate contains the hexagonal architecture core with:
//! - **Domain entities** - `MediaItemRecord`, `MediaType`, `DateRange`
//! - **Port definitions** - Traits for adapters: `IBackupIndex`, `IMediaLibrary`, `IContentFetcher`
//! - **Configuration** - YAML-backed settings shared by the CLI and the engine
//!
//! # Architecture
//!
//! The domain module holds plain values with validation at construction time.
//! Ports define the trait interfaces that adapter crates implement: the SQLite
//! index lives in `gpbackup-index`, the Google Photos client in `gpbackup-photos`.

pub mod config;
pub mod domain;
pub mod ports;
