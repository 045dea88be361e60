//! Generic offline key/value storage.
//!
//! A single-partition store on its own database, independent of the TTL
//! cache partitions. Used for small, ad-hoc persisted state with an
//! optional expiry. Follows the same degradation contract as the cache:
//! failures are logged and read as misses.

use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use sqlx::Row;
use tracing::{instrument, warn};

use crate::db::{Database, now_millis};

/// Single-partition key/value store backed by the kv database.
#[derive(Debug, Clone)]
pub struct OfflineKv {
    db: Database,
}

impl OfflineKv {
    /// Creates a store over an opened kv database.
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Stores `value` under `key`, optionally with an expiry.
    ///
    /// Overwrites any existing entry. Failures are logged and swallowed.
    #[instrument(level = "debug", skip(self, value), fields(key = %key))]
    pub async fn put<T: Serialize>(&self, key: &str, value: &T, ttl: Option<Duration>) {
        let timestamp = now_millis();
        let expires_at = ttl.map(|ttl| {
            timestamp.saturating_add(i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX))
        });
        let data = match serde_json::to_string(value) {
            Ok(data) => data,
            Err(error) => {
                warn!(key = %key, %error, "failed to serialize kv payload");
                return;
            }
        };

        let result = sqlx::query(
            "INSERT INTO kv_records (key, data, timestamp, expires_at) \
             VALUES (?, ?, ?, ?) \
             ON CONFLICT (key) DO UPDATE SET \
                 data = excluded.data, \
                 timestamp = excluded.timestamp, \
                 expires_at = excluded.expires_at",
        )
        .bind(key)
        .bind(data)
        .bind(timestamp)
        .bind(expires_at)
        .execute(self.db.pool())
        .await;
        if let Err(error) = result {
            warn!(key = %key, %error, "failed to write kv record");
        }
    }

    /// Reads the value under `key`.
    ///
    /// `None` when absent, unparsable, or expired (unless `ignore_expiry`).
    #[instrument(level = "debug", skip(self), fields(key = %key))]
    pub async fn get<T: DeserializeOwned>(&self, key: &str, ignore_expiry: bool) -> Option<T> {
        let row = sqlx::query("SELECT data, expires_at FROM kv_records WHERE key = ?")
            .bind(key)
            .fetch_optional(self.db.pool())
            .await;

        let row = match row {
            Ok(row) => row?,
            Err(error) => {
                warn!(key = %key, %error, "kv read failed, treating as miss");
                return None;
            }
        };

        if !ignore_expiry {
            let expires_at: Option<i64> = row.try_get("expires_at").ok().flatten();
            if expires_at.is_some_and(|deadline| now_millis() > deadline) {
                return None;
            }
        }

        let data: String = row.try_get("data").ok()?;
        match serde_json::from_str(&data) {
            Ok(value) => Some(value),
            Err(error) => {
                warn!(key = %key, %error, "failed to deserialize kv payload");
                None
            }
        }
    }

    /// Removes the entry under `key`, if present.
    #[instrument(level = "debug", skip(self), fields(key = %key))]
    pub async fn remove(&self, key: &str) {
        let result = sqlx::query("DELETE FROM kv_records WHERE key = ?")
            .bind(key)
            .execute(self.db.pool())
            .await;
        if let Err(error) = result {
            warn!(key = %key, %error, "failed to remove kv record");
        }
    }

    /// Removes every entry in the store.
    #[instrument(level = "debug", skip(self))]
    pub async fn clear(&self) {
        if let Err(error) = sqlx::query("DELETE FROM kv_records")
            .execute(self.db.pool())
            .await
        {
            warn!(%error, "failed to clear kv store");
        }
    }
}
