//! TTL cache façade over the cache database.
//!
//! This module is the central freshness-policy primitive of the offline
//! core. Values are cached per partition under an application-chosen key,
//! with a per-partition default time-to-live. Reads come in two modes:
//! normal reads treat an expired record as a miss, offline reads
//! (`ignore_expiry`) accept arbitrarily stale data.
//!
//! The cache is an additive convenience, never a hard dependency: every
//! storage failure in this module is logged and degrades to a cache miss
//! (or a no-op write) instead of reaching the caller.
//!
//! # Example
//!
//! ```no_run
//! use maktaba_core::cache::{CachePartition, CacheStore};
//! # async fn example(store: CacheStore) {
//! store
//!     .cache_data(CachePartition::Books, "all-books", &vec!["..."])
//!     .await;
//! let books: Option<Vec<String>> = store
//!     .get_cached_data(CachePartition::Books, "all-books", false)
//!     .await;
//! # }
//! ```

use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use sqlx::Row;
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::db::{Database, now_millis};

/// Errors from the cache storage boundary.
///
/// These never escape the public façade; they exist so the internal
/// read/write paths can use `?` before the swallow-and-log layer.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Underlying database operation failed.
    #[error("cache storage error: {0}")]
    Storage(#[from] sqlx::Error),

    /// Payload could not be (de)serialized at the storage boundary.
    #[error("cache payload serialization error: {0}")]
    Payload(#[from] serde_json::Error),
}

/// The fixed set of cache partitions.
///
/// Partitions are declared here once and never created dynamically; the
/// database schema enforces the same set with a CHECK constraint. Each
/// partition carries its own default TTL, shorter for the more volatile
/// lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CachePartition {
    /// Full book lists and per-id derived lookups.
    Books,
    /// Category catalogue.
    Categories,
    /// Editorially featured books.
    FeaturedBooks,
    /// Most recently added books.
    LatestBooks,
    /// Book lists scoped to one category.
    BooksByCategory,
}

impl CachePartition {
    /// Partition name as stored in the `partition` column.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Books => "books",
            Self::Categories => "categories",
            Self::FeaturedBooks => "featured-books",
            Self::LatestBooks => "latest-books",
            Self::BooksByCategory => "books-by-category",
        }
    }

    /// Default time-to-live for records in this partition.
    #[must_use]
    pub fn default_ttl(self) -> Duration {
        let minutes = match self {
            Self::Books | Self::BooksByCategory => 60,
            Self::Categories => 120,
            Self::FeaturedBooks => 30,
            Self::LatestBooks => 15,
        };
        Duration::from_secs(minutes * 60)
    }
}

impl std::fmt::Display for CachePartition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// TTL cache store backed by the cache database.
///
/// Cloning is cheap; clones share the underlying connection pool.
#[derive(Debug, Clone)]
pub struct CacheStore {
    db: Database,
}

impl CacheStore {
    /// Creates a cache store over an opened cache database.
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Caches `value` under `key` with the partition's default TTL.
    ///
    /// Overwrites any existing record for the same key. Storage failures
    /// are logged and swallowed; this call never fails.
    pub async fn cache_data<T: Serialize>(&self, partition: CachePartition, key: &str, value: &T) {
        self.cache_data_with_ttl(partition, key, value, partition.default_ttl())
            .await;
    }

    /// Caches `value` under `key` with an explicit TTL.
    ///
    /// `expires_at` is always `stored_at + ttl`. Storage failures are
    /// logged and swallowed; this call never fails.
    #[instrument(level = "debug", skip(self, value), fields(partition = %partition, key = %key))]
    pub async fn cache_data_with_ttl<T: Serialize>(
        &self,
        partition: CachePartition,
        key: &str,
        value: &T,
        ttl: Duration,
    ) {
        if let Err(error) = self.try_put(partition, key, value, ttl).await {
            warn!(partition = %partition, key = %key, %error, "failed to cache data");
        }
    }

    /// Reads the cached value under `key`, if any.
    ///
    /// Returns `None` when the record is absent, when it fails to
    /// deserialize, or when it has expired and `ignore_expiry` is false.
    /// With `ignore_expiry` true (offline fallback mode) the value is
    /// returned regardless of age. Expired records are not deleted on
    /// read; expiry is lazy.
    #[instrument(level = "debug", skip(self), fields(partition = %partition, key = %key))]
    pub async fn get_cached_data<T: DeserializeOwned>(
        &self,
        partition: CachePartition,
        key: &str,
        ignore_expiry: bool,
    ) -> Option<T> {
        match self.try_get(partition, key, ignore_expiry).await {
            Ok(value) => value,
            Err(error) => {
                warn!(partition = %partition, key = %key, %error, "cache read failed, treating as miss");
                None
            }
        }
    }

    /// Removes the record under `key`, if present. Failures are logged
    /// and swallowed.
    #[instrument(level = "debug", skip(self), fields(partition = %partition, key = %key))]
    pub async fn remove(&self, partition: CachePartition, key: &str) {
        let result = sqlx::query("DELETE FROM cache_records WHERE partition = ? AND cache_key = ?")
            .bind(partition.as_str())
            .bind(key)
            .execute(self.db.pool())
            .await;
        if let Err(error) = result {
            warn!(partition = %partition, key = %key, %error, "failed to remove cache record");
        }
    }

    /// Removes every record in `partition`. Failures are logged and
    /// swallowed.
    #[instrument(level = "debug", skip(self), fields(partition = %partition))]
    pub async fn clear(&self, partition: CachePartition) {
        let result = sqlx::query("DELETE FROM cache_records WHERE partition = ?")
            .bind(partition.as_str())
            .execute(self.db.pool())
            .await;
        if let Err(error) = result {
            warn!(partition = %partition, %error, "failed to clear cache partition");
        }
    }

    /// Deletes expired records from `partition` and returns how many
    /// rows went away.
    ///
    /// Nothing calls this automatically; offline reads rely on expired
    /// records still being present. It exists for embedders that want to
    /// bound storage growth with an explicit housekeeping sweep.
    #[instrument(level = "debug", skip(self), fields(partition = %partition))]
    pub async fn prune_expired(&self, partition: CachePartition) -> u64 {
        let result = sqlx::query(
            "DELETE FROM cache_records \
             WHERE partition = ? AND expires_at IS NOT NULL AND expires_at < ?",
        )
        .bind(partition.as_str())
        .bind(now_millis())
        .execute(self.db.pool())
        .await;
        match result {
            Ok(done) => {
                debug!(partition = %partition, pruned = done.rows_affected(), "pruned expired records");
                done.rows_affected()
            }
            Err(error) => {
                warn!(partition = %partition, %error, "failed to prune expired records");
                0
            }
        }
    }

    async fn try_put<T: Serialize>(
        &self,
        partition: CachePartition,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let stored_at = now_millis();
        let expires_at = stored_at.saturating_add(i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX));
        let data = serde_json::to_string(value)?;

        sqlx::query(
            "INSERT INTO cache_records (partition, cache_key, data, stored_at, expires_at) \
             VALUES (?, ?, ?, ?, ?) \
             ON CONFLICT (partition, cache_key) DO UPDATE SET \
                 data = excluded.data, \
                 stored_at = excluded.stored_at, \
                 expires_at = excluded.expires_at",
        )
        .bind(partition.as_str())
        .bind(key)
        .bind(data)
        .bind(stored_at)
        .bind(expires_at)
        .execute(self.db.pool())
        .await?;
        Ok(())
    }

    async fn try_get<T: DeserializeOwned>(
        &self,
        partition: CachePartition,
        key: &str,
        ignore_expiry: bool,
    ) -> Result<Option<T>, CacheError> {
        let row = sqlx::query(
            "SELECT data, expires_at FROM cache_records \
             WHERE partition = ? AND cache_key = ?",
        )
        .bind(partition.as_str())
        .bind(key)
        .fetch_optional(self.db.pool())
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        if !ignore_expiry {
            let expires_at: Option<i64> = row.try_get("expires_at")?;
            if expires_at.is_some_and(|deadline| now_millis() > deadline) {
                debug!(partition = %partition, key = %key, "cache record expired");
                return Ok(None);
            }
        }

        let data: String = row.try_get("data")?;
        Ok(Some(serde_json::from_str(&data)?))
    }
}
