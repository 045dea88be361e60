//! Cached query layer: the fetch policy for every entity view.
//!
//! Each query runs one decision table, the central behavioral contract of
//! the offline core:
//!
//! | Network state | Remote call | Action |
//! |---|---|---|
//! | offline | not attempted | serve cache with `ignore_expiry`, else empty |
//! | online | succeeds | cache fresh under the entity TTL, return fresh |
//! | online | fails | serve stale cache if present, else propagate |
//!
//! The cache is consulted on both failure paths and bypassed on the happy
//! path. A short in-memory memo (the stand-in for a query library's
//! staleness window) sits in front of the table; realtime invalidation
//! clears it so the next read re-executes the policy.
//!
//! The query layer adds no failure modes of its own: storage problems are
//! swallowed below it, so the only error callers ever see is a remote
//! fetch failure with no usable cached fallback.

mod memo;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, instrument, warn};

use crate::api::{ApiError, Book, BookApi, Category};
use crate::cache::{CachePartition, CacheStore};
use crate::net::NetworkMonitor;

use memo::QueryCache;

/// Cache key for the full book list; also searched by offline by-id
/// lookups.
pub const ALL_BOOKS_KEY: &str = "all-books";

/// Cache key for the category catalogue.
pub const ALL_CATEGORIES_KEY: &str = "all-categories";

/// Cache key for the featured list.
pub const FEATURED_KEY: &str = "featured";

/// Cache key for the latest list.
pub const LATEST_KEY: &str = "latest";

/// Cache key for the most-viewed list.
pub const MOST_VIEWED_KEY: &str = "most-viewed";

/// Cache key for the most-downloaded list.
pub const MOST_DOWNLOADED_KEY: &str = "most-downloaded";

/// Default in-memory memo window.
const DEFAULT_MEMO_WINDOW: Duration = Duration::from_secs(30);

/// Cache key for one category's book list.
#[must_use]
pub fn category_key(slug: &str) -> String {
    format!("category-{slug}")
}

/// Entity queries composing the remote API, the TTL cache and the
/// network monitor into the offline-aware fetch policy.
pub struct LibraryQueries {
    api: Arc<dyn BookApi>,
    cache: CacheStore,
    monitor: NetworkMonitor,
    memo: QueryCache,
}

impl LibraryQueries {
    /// Creates the query layer with the default memo window.
    #[must_use]
    pub fn new(api: Arc<dyn BookApi>, cache: CacheStore, monitor: NetworkMonitor) -> Self {
        Self::with_memo_window(api, cache, monitor, DEFAULT_MEMO_WINDOW)
    }

    /// Creates the query layer with an explicit memo window.
    ///
    /// A zero window effectively disables the in-memory memo; every read
    /// re-runs the decision table.
    #[must_use]
    pub fn with_memo_window(
        api: Arc<dyn BookApi>,
        cache: CacheStore,
        monitor: NetworkMonitor,
        memo_window: Duration,
    ) -> Self {
        Self {
            api,
            cache,
            monitor,
            memo: QueryCache::new(memo_window),
        }
    }

    /// The full book list.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] only when online, the remote fetch fails and
    /// no cached fallback exists.
    #[instrument(skip(self))]
    pub async fn books(&self) -> Result<Vec<Book>, ApiError> {
        self.cached_list(
            CachePartition::Books,
            ALL_BOOKS_KEY,
            memo::all_books_key(),
            self.api.fetch_books(),
        )
        .await
    }

    /// All categories.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] only when online, the remote fetch fails and
    /// no cached fallback exists.
    #[instrument(skip(self))]
    pub async fn categories(&self) -> Result<Vec<Category>, ApiError> {
        self.cached_list(
            CachePartition::Categories,
            ALL_CATEGORIES_KEY,
            memo::categories_key(),
            self.api.fetch_categories(),
        )
        .await
    }

    /// The featured book list.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] only when online, the remote fetch fails and
    /// no cached fallback exists.
    #[instrument(skip(self))]
    pub async fn featured_books(&self) -> Result<Vec<Book>, ApiError> {
        self.cached_list(
            CachePartition::FeaturedBooks,
            FEATURED_KEY,
            memo::featured_key(),
            self.api.fetch_featured(),
        )
        .await
    }

    /// The latest book list.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] only when online, the remote fetch fails and
    /// no cached fallback exists.
    #[instrument(skip(self))]
    pub async fn latest_books(&self) -> Result<Vec<Book>, ApiError> {
        self.cached_list(
            CachePartition::LatestBooks,
            LATEST_KEY,
            memo::latest_key(),
            self.api.fetch_latest(),
        )
        .await
    }

    /// The most-viewed book list.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] only when online, the remote fetch fails and
    /// no cached fallback exists.
    #[instrument(skip(self))]
    pub async fn most_viewed_books(&self) -> Result<Vec<Book>, ApiError> {
        self.cached_list(
            CachePartition::Books,
            MOST_VIEWED_KEY,
            memo::most_viewed_key(),
            self.api.fetch_most_viewed(),
        )
        .await
    }

    /// The most-downloaded book list.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] only when online, the remote fetch fails and
    /// no cached fallback exists.
    #[instrument(skip(self))]
    pub async fn most_downloaded_books(&self) -> Result<Vec<Book>, ApiError> {
        self.cached_list(
            CachePartition::Books,
            MOST_DOWNLOADED_KEY,
            memo::most_downloaded_key(),
            self.api.fetch_most_downloaded(),
        )
        .await
    }

    /// The books in one category.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] only when online, the remote fetch fails and
    /// no cached fallback exists.
    #[instrument(skip(self), fields(slug = %slug))]
    pub async fn books_by_category(&self, slug: &str) -> Result<Vec<Book>, ApiError> {
        self.cached_list(
            CachePartition::BooksByCategory,
            &category_key(slug),
            memo::by_category_key(slug),
            self.api.fetch_books_by_category(slug),
        )
        .await
    }

    /// A single book by id.
    ///
    /// There is no per-id cache partition: offline (and fetch-failure)
    /// lookups search the already-cached full list instead.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] only when online, the remote fetch fails and
    /// the cached full list contains no such book.
    #[instrument(skip(self), fields(id = %id))]
    pub async fn book_by_id(&self, id: &str) -> Result<Option<Book>, ApiError> {
        let memo_key = memo::book_key(id);
        if let Some(hit) = self.memo.get::<Book>(&memo_key) {
            debug!(id = %id, "serving memoized book");
            return Ok(Some(hit));
        }

        if !self.monitor.is_online() {
            return Ok(self.find_in_cached_list(id).await);
        }

        match self.api.fetch_book(id).await {
            Ok(book) => {
                if let Some(book) = book.as_ref() {
                    self.memo.insert(memo_key, book);
                }
                Ok(book)
            }
            Err(error) => {
                warn!(id = %id, %error, "book fetch failed, searching cached list");
                match self.find_in_cached_list(id).await {
                    Some(book) => Ok(Some(book)),
                    None => Err(error),
                }
            }
        }
    }

    /// Drops every memoized book-derived view so the next read re-runs
    /// the fetch policy. Called by the realtime invalidation listener.
    pub fn invalidate_book_views(&self) {
        debug!("invalidating memoized book views");
        self.memo.invalidate_book_views();
    }

    /// Drops every memoized result.
    pub fn invalidate_all(&self) {
        self.memo.invalidate_all();
    }

    async fn find_in_cached_list(&self, id: &str) -> Option<Book> {
        let books: Vec<Book> = self
            .cache
            .get_cached_data(CachePartition::Books, ALL_BOOKS_KEY, true)
            .await?;
        books.into_iter().find(|book| book.id == id)
    }

    /// Runs the decision table for one list-shaped entity view.
    ///
    /// Only happy-path results are memoized: offline and fallback reads
    /// must keep consulting the persistent cache until connectivity (or
    /// the remote) recovers.
    async fn cached_list<T>(
        &self,
        partition: CachePartition,
        key: &str,
        memo_key: String,
        fetch: impl Future<Output = Result<Vec<T>, ApiError>> + Send,
    ) -> Result<Vec<T>, ApiError>
    where
        T: Serialize + DeserializeOwned + Send + Sync,
    {
        if let Some(hit) = self.memo.get::<Vec<T>>(&memo_key) {
            debug!(partition = %partition, key = %key, "serving memoized list");
            return Ok(hit);
        }

        if !self.monitor.is_online() {
            debug!(partition = %partition, key = %key, "offline, serving cache");
            let cached: Option<Vec<T>> = self.cache.get_cached_data(partition, key, true).await;
            return Ok(cached.unwrap_or_default());
        }

        match fetch.await {
            Ok(fresh) => {
                self.cache.cache_data(partition, key, &fresh).await;
                self.memo.insert(memo_key, &fresh);
                Ok(fresh)
            }
            Err(error) => {
                warn!(partition = %partition, key = %key, %error, "fetch failed, falling back to cache");
                match self.cache.get_cached_data(partition, key, true).await {
                    Some(cached) => Ok(cached),
                    None => Err(error),
                }
            }
        }
    }
}
