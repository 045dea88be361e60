//! Chunked book download manager.
//!
//! Streams a book file from its remote endpoint in chunks, tracking
//! per-book progress in an in-memory map, with cooperative per-book
//! cancellation. Completed payloads are persisted through the
//! full-object offline store together with a best-effort cover fetch.
//!
//! # Features
//!
//! - Streaming downloads with chunk-by-chunk progress reporting
//! - Whole-payload fallback when the server sends no `content-length`
//! - Cooperative cancellation that discards all partial state
//! - Auto-eviction of completed transfers from the progress map
//!
//! # Example
//!
//! ```no_run
//! use maktaba_core::download::DownloadManager;
//! # async fn example(manager: DownloadManager, book: maktaba_core::api::Book) {
//! if manager.download_book(&book).await {
//!     println!("saved for offline reading");
//! }
//! # }
//! ```

mod error;
mod manager;
mod progress;

pub use error::DownloadError;
pub use manager::DownloadManager;
pub use progress::{DownloadProgress, DownloadStatus};
