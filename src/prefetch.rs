//! Idle-time prefetch of popular library lists.
//!
//! Once per rolling 24-hour window (per code version), the prefetcher
//! primes the TTL cache with the curated lists a fresh visitor is most
//! likely to open: featured, latest, most-viewed, most-downloaded, the
//! category catalogue and the books of the top few categories.
//!
//! Scheduling never competes with initial rendering: the run waits for an
//! embedder-supplied idle signal with a bounded maximum wait, or for a
//! fixed fallback delay when the platform offers no idle primitive.
//!
//! The last-run record is a single flat JSON file, deliberately outside
//! the databases. A malformed or unreadable record fails open toward
//! re-running.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::api::{BookApi, Category};
use crate::cache::{CachePartition, CacheStore};
use crate::db::now_millis;
use crate::net::NetworkMonitor;
use crate::query::{
    ALL_CATEGORIES_KEY, FEATURED_KEY, LATEST_KEY, MOST_DOWNLOADED_KEY, MOST_VIEWED_KEY,
    category_key,
};

/// Version tag for the prefetch batch. Bumping it invalidates every
/// previously recorded run.
pub const PREFETCH_VERSION: &str = "v2";

/// Rolling window between prefetch runs.
const PREFETCH_WINDOW: Duration = Duration::from_secs(24 * 60 * 60);

/// Fallback delay when the platform offers no idle-scheduling primitive.
const FALLBACK_DELAY: Duration = Duration::from_secs(3);

/// How many of the leading categories get their book lists primed.
const TOP_CATEGORY_COUNT: usize = 3;

/// Persisted record of the last prefetch attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrefetchStatus {
    /// Code version that performed the run.
    pub version: String,
    /// When the run finished, milliseconds since the Unix epoch.
    pub timestamp: i64,
    /// Whether every list in the batch was fetched and cached.
    pub success: bool,
}

/// Primes the TTL cache with popular lists during idle time.
pub struct Prefetcher {
    api: Arc<dyn BookApi>,
    cache: CacheStore,
    monitor: NetworkMonitor,
    status_path: PathBuf,
}

impl Prefetcher {
    /// Creates a prefetcher recording its status at `status_path`.
    #[must_use]
    pub fn new(
        api: Arc<dyn BookApi>,
        cache: CacheStore,
        monitor: NetworkMonitor,
        status_path: &Path,
    ) -> Self {
        Self {
            api,
            cache,
            monitor,
            status_path: status_path.to_path_buf(),
        }
    }

    /// Whether a prefetch run is due.
    ///
    /// True when no status record exists, the record is unreadable or
    /// malformed, the stored version differs from [`PREFETCH_VERSION`],
    /// the last attempt is older than the 24-hour window, or the last
    /// attempt did not succeed.
    pub async fn should_prefetch(&self) -> bool {
        let Some(status) = self.read_status().await else {
            return true;
        };
        if status.version != PREFETCH_VERSION {
            debug!(stored = %status.version, "prefetch version changed");
            return true;
        }
        let age = now_millis().saturating_sub(status.timestamp);
        let window = i64::try_from(PREFETCH_WINDOW.as_millis()).unwrap_or(i64::MAX);
        if age > window {
            return true;
        }
        !status.success
    }

    /// Reads the persisted status record, if a valid one exists.
    pub async fn status(&self) -> Option<PrefetchStatus> {
        self.read_status().await
    }

    /// Removes the status record, forcing the next trigger to run.
    pub async fn clear_status(&self) {
        if let Err(error) = tokio::fs::remove_file(&self.status_path).await
            && error.kind() != std::io::ErrorKind::NotFound
        {
            warn!(path = %self.status_path.display(), %error, "failed to clear prefetch status");
        }
    }

    /// Waits for `idle_signal` (bounded by `max_wait`), then runs the
    /// batch if it is due and the network is online.
    ///
    /// Returns whether the batch actually ran.
    #[instrument(skip_all)]
    pub async fn run_when_idle(
        &self,
        idle_signal: impl Future<Output = ()> + Send,
        max_wait: Duration,
    ) -> bool {
        if !self.should_prefetch().await {
            debug!("prefetch not due");
            return false;
        }
        // Proceed on timeout: idle is an optimization, not a gate.
        let _ = tokio::time::timeout(max_wait, idle_signal).await;
        self.run_if_online().await
    }

    /// Waits the fixed fallback delay, then runs the batch if due and
    /// online. For platforms without an idle-scheduling primitive.
    #[instrument(skip_all)]
    pub async fn run_after_delay(&self) -> bool {
        if !self.should_prefetch().await {
            debug!("prefetch not due");
            return false;
        }
        tokio::time::sleep(FALLBACK_DELAY).await;
        self.run_if_online().await
    }

    async fn run_if_online(&self) -> bool {
        if !self.monitor.is_online() {
            debug!("offline, skipping prefetch");
            return false;
        }
        let success = self.run_batch().await;
        self.write_status(success).await;
        true
    }

    /// Fetches the curated lists in sequence and primes the cache.
    ///
    /// Per-list failures are tolerated; one failing list does not abort
    /// the others. Returns whether every list succeeded.
    #[instrument(skip(self))]
    async fn run_batch(&self) -> bool {
        let mut all_ok = true;

        all_ok &= self
            .prime_books(CachePartition::FeaturedBooks, FEATURED_KEY, self.api.fetch_featured())
            .await;
        all_ok &= self
            .prime_books(CachePartition::LatestBooks, LATEST_KEY, self.api.fetch_latest())
            .await;
        all_ok &= self
            .prime_books(CachePartition::Books, MOST_VIEWED_KEY, self.api.fetch_most_viewed())
            .await;
        all_ok &= self
            .prime_books(
                CachePartition::Books,
                MOST_DOWNLOADED_KEY,
                self.api.fetch_most_downloaded(),
            )
            .await;

        let categories = match self.api.fetch_categories().await {
            Ok(categories) => {
                self.cache
                    .cache_data(CachePartition::Categories, ALL_CATEGORIES_KEY, &categories)
                    .await;
                categories
            }
            Err(error) => {
                warn!(%error, "prefetch: categories fetch failed");
                all_ok = false;
                Vec::new()
            }
        };

        for category in categories.iter().take(TOP_CATEGORY_COUNT) {
            all_ok &= self.prime_category(category).await;
        }

        info!(success = all_ok, "prefetch batch finished");
        all_ok
    }

    async fn prime_books(
        &self,
        partition: CachePartition,
        key: &str,
        fetch: impl Future<Output = Result<Vec<crate::api::Book>, crate::api::ApiError>> + Send,
    ) -> bool {
        match fetch.await {
            Ok(books) => {
                self.cache.cache_data(partition, key, &books).await;
                true
            }
            Err(error) => {
                warn!(key = %key, %error, "prefetch: list fetch failed");
                false
            }
        }
    }

    async fn prime_category(&self, category: &Category) -> bool {
        match self.api.fetch_books_by_category(&category.slug).await {
            Ok(books) => {
                self.cache
                    .cache_data(
                        CachePartition::BooksByCategory,
                        &category_key(&category.slug),
                        &books,
                    )
                    .await;
                true
            }
            Err(error) => {
                warn!(slug = %category.slug, %error, "prefetch: category books fetch failed");
                false
            }
        }
    }

    async fn read_status(&self) -> Option<PrefetchStatus> {
        let raw = match tokio::fs::read_to_string(&self.status_path).await {
            Ok(raw) => raw,
            Err(error) => {
                if error.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %self.status_path.display(), %error, "failed to read prefetch status");
                }
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(status) => Some(status),
            Err(error) => {
                // Fail open: a malformed record means "should prefetch".
                warn!(path = %self.status_path.display(), %error, "malformed prefetch status");
                None
            }
        }
    }

    async fn write_status(&self, success: bool) {
        let status = PrefetchStatus {
            version: PREFETCH_VERSION.to_string(),
            timestamp: now_millis(),
            success,
        };
        let raw = match serde_json::to_string(&status) {
            Ok(raw) => raw,
            Err(error) => {
                warn!(%error, "failed to serialize prefetch status");
                return;
            }
        };
        if let Err(error) = tokio::fs::write(&self.status_path, raw).await {
            warn!(path = %self.status_path.display(), %error, "failed to write prefetch status");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_status_roundtrip_and_clear() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("prefetch-status.json");

        let status = PrefetchStatus {
            version: PREFETCH_VERSION.to_string(),
            timestamp: now_millis(),
            success: true,
        };
        tokio::fs::write(&path, serde_json::to_string(&status).unwrap())
            .await
            .unwrap();

        let raw = tokio::fs::read_to_string(&path).await.unwrap();
        let back: PrefetchStatus = serde_json::from_str(&raw).unwrap();
        assert_eq!(back, status);
    }

    #[test]
    fn test_window_is_twenty_four_hours() {
        assert_eq!(PREFETCH_WINDOW, Duration::from_secs(86_400));
    }
}
