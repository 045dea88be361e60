//! Maktaba Offline Core
//!
//! Client-side cache and sync layer for the Maktaba digital library:
//! TTL-cached entity queries with offline fallback, a full-object offline
//! book store, chunked downloads with progress and cancellation, realtime
//! cache invalidation and an idle-time prefetcher.
//!
//! # Architecture
//!
//! The library is organized into the following modules, leaves first:
//! - [`db`] - Local database connections and schema management
//! - [`cache`] - TTL cache façade with expiry-aware reads
//! - [`kv`] - Generic offline key/value storage
//! - [`net`] - Network connectivity observer
//! - [`api`] - Remote data API models and boundary
//! - [`query`] - Offline-aware cached entity queries
//! - [`realtime`] - Change-feed driven cache invalidation
//! - [`offline`] - Full-object offline book store
//! - [`download`] - Chunked download manager
//! - [`prefetch`] - Idle-time popular-list prefetcher
//!
//! Everything here is an additive convenience for the UI layer: a total
//! failure of the caching stack degrades the application to "less
//! resilient offline", never to broken.

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod api;
pub mod cache;
pub mod db;
pub mod download;
pub mod kv;
pub mod net;
pub mod offline;
pub mod prefetch;
pub mod query;
pub mod realtime;

// Re-export commonly used types
pub use api::{ApiError, Book, BookApi, Category, RestBookApi};
pub use cache::{CachePartition, CacheStore};
pub use db::{CACHE_MIGRATOR, Database, DbError, DbHandle, KV_MIGRATOR, OFFLINE_MIGRATOR};
pub use download::{DownloadError, DownloadManager, DownloadProgress, DownloadStatus};
pub use kv::OfflineKv;
pub use net::{MonitorGuard, NetworkMonitor};
pub use offline::{OfflineError, OfflineLibrary, SavedBook};
pub use prefetch::{PREFETCH_VERSION, PrefetchStatus, Prefetcher};
pub use query::LibraryQueries;
pub use realtime::{BookChange, ChangeKind, InvalidatorGuard, RealtimeInvalidator};
