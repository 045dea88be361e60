//! Download manager: streaming, progress, cancellation, persistence.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use futures_util::StreamExt;
use reqwest::Client;
use tracing::{debug, info, instrument, warn};

use super::error::DownloadError;
use super::progress::{DownloadProgress, DownloadStatus};
use crate::api::Book;
use crate::offline::OfflineLibrary;

/// Streaming progress tops out here; the final slice is reserved for the
/// cover fetch and persistence so the UI never reads 100% prematurely.
const STREAM_PROGRESS_CEILING: u64 = 90;

/// How long a completed entry lingers in the progress map.
const COMPLETED_LINGER: Duration = Duration::from_secs(2);

/// Manages chunked book downloads into the offline store.
///
/// Cloning is cheap; clones share the progress map and cancel flags.
#[derive(Debug, Clone)]
pub struct DownloadManager {
    client: Client,
    offline: OfflineLibrary,
    progress: Arc<DashMap<String, DownloadProgress>>,
    cancel_flags: Arc<DashMap<String, Arc<AtomicBool>>>,
    completed_linger: Duration,
}

impl DownloadManager {
    /// Creates a manager persisting into `offline` with a default HTTP
    /// client.
    #[must_use]
    pub fn new(offline: OfflineLibrary) -> Self {
        Self::with_client(offline, Client::new())
    }

    /// Creates a manager reusing an existing reqwest `Client`.
    #[must_use]
    pub fn with_client(offline: OfflineLibrary, client: Client) -> Self {
        Self {
            client,
            offline,
            progress: Arc::new(DashMap::new()),
            cancel_flags: Arc::new(DashMap::new()),
            completed_linger: COMPLETED_LINGER,
        }
    }

    /// Overrides how long completed entries linger in the progress map.
    /// Intended for tests.
    #[must_use]
    pub fn with_completed_linger(mut self, linger: Duration) -> Self {
        self.completed_linger = linger;
        self
    }

    /// Downloads `book`'s file, fetches its cover best-effort and saves
    /// the assembled record offline. Returns whether the book ended up
    /// saved.
    ///
    /// A canceled transfer cleans up silently (no error state, no
    /// persisted record). Any other failure records a terminal error
    /// status in the progress map and persists nothing.
    #[instrument(skip(self, book), fields(id = %book.id))]
    pub async fn download_book(&self, book: &Book) -> bool {
        if self.progress.get(&book.id).is_some_and(|entry| {
            matches!(
                entry.status,
                DownloadStatus::Idle | DownloadStatus::Downloading
            )
        }) {
            warn!(id = %book.id, "download already in progress, ignoring");
            return false;
        }

        let cancel = Arc::new(AtomicBool::new(false));
        self.cancel_flags.insert(book.id.clone(), Arc::clone(&cancel));
        self.progress
            .insert(book.id.clone(), DownloadProgress::starting(&book.id));

        let result = self.run_transfer(book, &cancel).await;
        self.cancel_flags.remove(&book.id);

        match result {
            Ok(()) => {
                self.finish(&book.id);
                true
            }
            Err(error) if error.is_canceled() => {
                // Silent cleanup: a canceled transfer leaves no trace.
                self.progress.remove(&book.id);
                debug!(id = %book.id, "download canceled, state discarded");
                false
            }
            Err(error) => {
                warn!(id = %book.id, %error, "download failed");
                if let Some(mut entry) = self.progress.get_mut(&book.id) {
                    entry.status = DownloadStatus::Error;
                }
                false
            }
        }
    }

    /// Requests cancellation of the transfer for `book_id`.
    ///
    /// Safe to call at any time: if the transfer already completed or
    /// failed (or never existed) this is a no-op.
    #[instrument(skip(self), fields(id = %book_id))]
    pub fn cancel(&self, book_id: &str) {
        if let Some(flag) = self.cancel_flags.get(book_id) {
            flag.store(true, Ordering::SeqCst);
            info!(id = %book_id, "cancellation requested");
        }
    }

    /// Current progress for one book, if the transfer is still
    /// interesting.
    #[must_use]
    pub fn progress(&self, book_id: &str) -> Option<DownloadProgress> {
        self.progress.get(book_id).map(|entry| entry.value().clone())
    }

    /// Snapshot of every tracked transfer.
    #[must_use]
    pub fn progress_snapshot(&self) -> Vec<DownloadProgress> {
        self.progress
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Drops a terminal error entry from the progress map.
    pub fn acknowledge_error(&self, book_id: &str) {
        if self
            .progress
            .get(book_id)
            .is_some_and(|entry| entry.status == DownloadStatus::Error)
        {
            self.progress.remove(book_id);
        }
    }

    async fn run_transfer(&self, book: &Book, cancel: &AtomicBool) -> Result<(), DownloadError> {
        let file_url = book
            .file_url
            .as_deref()
            .ok_or_else(|| DownloadError::MissingFileUrl {
                book_id: book.id.clone(),
            })?;

        let file_blob = self.stream_file(&book.id, file_url, cancel).await?;

        // Cover is best-effort; a miss never fails the download.
        let cover_blob = match book.cover_url.as_deref() {
            Some(url) => self.offline.fetch_blob(url).await,
            None => None,
        };

        if cancel.load(Ordering::SeqCst) {
            return Err(DownloadError::Canceled {
                book_id: book.id.clone(),
            });
        }

        self.offline
            .save_book_with_payload(book, Some(file_blob), cover_blob)
            .await?;
        Ok(())
    }

    /// Streams the file body, updating the progress entry per chunk.
    ///
    /// With a known `content-length` the reported percentage climbs to
    /// the streaming ceiling chunk by chunk; without one the body is
    /// taken in a single read and progress jumps once.
    async fn stream_file(
        &self,
        book_id: &str,
        url: &str,
        cancel: &AtomicBool,
    ) -> Result<Vec<u8>, DownloadError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|source| DownloadError::network(url, source))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::http_status(url, status.as_u16()));
        }

        let Some(total) = response.content_length().filter(|len| *len > 0) else {
            debug!(id = %book_id, "no content-length, downloading whole payload");
            let bytes = response
                .bytes()
                .await
                .map_err(|source| DownloadError::network(url, source))?;
            if cancel.load(Ordering::SeqCst) {
                return Err(DownloadError::Canceled {
                    book_id: book_id.to_string(),
                });
            }
            self.report(book_id, bytes.len() as u64, bytes.len() as u64);
            return Ok(bytes.to_vec());
        };

        let mut stream = response.bytes_stream();
        let mut buffer: Vec<u8> = Vec::with_capacity(usize::try_from(total).unwrap_or(0));
        let mut downloaded: u64 = 0;

        while let Some(chunk_result) = stream.next().await {
            if cancel.load(Ordering::SeqCst) {
                return Err(DownloadError::Canceled {
                    book_id: book_id.to_string(),
                });
            }
            let chunk = chunk_result.map_err(|source| DownloadError::network(url, source))?;
            downloaded += chunk.len() as u64;
            buffer.extend_from_slice(&chunk);
            self.report(book_id, downloaded, total);
        }

        Ok(buffer)
    }

    /// Writes a chunk update into the progress entry. Progress never
    /// exceeds the streaming ceiling here.
    fn report(&self, book_id: &str, downloaded: u64, total: u64) {
        if let Some(mut entry) = self.progress.get_mut(book_id) {
            entry.status = DownloadStatus::Downloading;
            entry.downloaded_bytes = downloaded;
            entry.total_bytes = total;
            entry.progress = Self::stream_percent(downloaded, total);
        }
    }

    /// Percentage of the streaming ceiling for `downloaded` of `total`
    /// bytes, rounded to the nearest point.
    fn stream_percent(downloaded: u64, total: u64) -> u8 {
        if total == 0 {
            return 0;
        }
        let percent = downloaded
            .saturating_mul(STREAM_PROGRESS_CEILING)
            .saturating_add(total / 2)
            .checked_div(total)
            .unwrap_or(0)
            .min(STREAM_PROGRESS_CEILING);
        u8::try_from(percent).unwrap_or(0)
    }

    /// Marks the transfer complete and schedules its eviction from the
    /// progress map.
    fn finish(&self, book_id: &str) {
        if let Some(mut entry) = self.progress.get_mut(book_id) {
            entry.status = DownloadStatus::Completed;
            entry.progress = 100;
        }
        info!(id = %book_id, "download complete");

        let progress = Arc::clone(&self.progress);
        let linger = self.completed_linger;
        let book_id = book_id.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(linger).await;
            let still_completed = progress
                .get(&book_id)
                .is_some_and(|entry| entry.status == DownloadStatus::Completed);
            if still_completed {
                progress.remove(&book_id);
            }
        });
    }
}
