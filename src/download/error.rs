//! Error types for the download module.

use thiserror::Error;

use crate::offline::OfflineError;

/// Errors that can occur while downloading a book for offline use.
///
/// Cancellation is a variant of its own: it is user-initiated, results in
/// silent cleanup and is never reported as an error state.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// The book carries no file URL to download.
    #[error("book {book_id} has no file URL")]
    MissingFileUrl {
        /// The book without a downloadable file.
        book_id: String,
    },

    /// Network-level error (DNS resolution, connection refused, TLS, etc.)
    #[error("network error downloading {url}: {source}")]
    Network {
        /// The URL that failed to download.
        url: String,
        /// The underlying network error.
        #[source]
        source: reqwest::Error,
    },

    /// HTTP error response (4xx client errors, 5xx server errors).
    #[error("HTTP {status} downloading {url}")]
    HttpStatus {
        /// The URL that returned an error status.
        url: String,
        /// The HTTP status code.
        status: u16,
    },

    /// Persisting the completed download failed.
    #[error("failed to persist downloaded book: {0}")]
    Storage(#[from] OfflineError),

    /// The transfer was canceled by the user.
    #[error("download canceled for book {book_id}")]
    Canceled {
        /// The book whose transfer was canceled.
        book_id: String,
    },
}

impl DownloadError {
    /// Creates a network error from a reqwest error.
    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Network {
            url: url.into(),
            source,
        }
    }

    /// Creates an HTTP status error.
    pub fn http_status(url: impl Into<String>, status: u16) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
        }
    }

    /// Whether this error is a user-initiated cancellation.
    #[must_use]
    pub fn is_canceled(&self) -> bool {
        matches!(self, Self::Canceled { .. })
    }
}
