//! Transient per-book download progress.

use serde::Serialize;

/// Lifecycle of one transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadStatus {
    /// Registered but no bytes moved yet.
    Idle,
    /// Chunks are arriving.
    Downloading,
    /// Persisted; entry is evicted from the progress map shortly after.
    Completed,
    /// Terminal failure; entry stays until acknowledged.
    Error,
}

/// In-memory progress snapshot for one book transfer.
///
/// Never persisted; the progress map only ever reflects currently
/// interesting transfers.
#[derive(Debug, Clone, Serialize)]
pub struct DownloadProgress {
    /// The book being transferred.
    pub book_id: String,
    /// Percentage, 0 through 100.
    pub progress: u8,
    /// Current lifecycle state.
    pub status: DownloadStatus,
    /// Bytes received so far.
    pub downloaded_bytes: u64,
    /// Expected total from `content-length`, zero when unknown.
    pub total_bytes: u64,
}

impl DownloadProgress {
    /// Fresh entry for a transfer that is about to start.
    #[must_use]
    pub fn starting(book_id: &str) -> Self {
        Self {
            book_id: book_id.to_string(),
            progress: 0,
            status: DownloadStatus::Idle,
            downloaded_bytes: 0,
            total_bytes: 0,
        }
    }
}
