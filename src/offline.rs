//! Full-object offline store.
//!
//! The long-lived, user-intentional side of local persistence: complete
//! book snapshots plus their binary file and cover payloads, saved when a
//! user explicitly keeps a book for offline reading. Independent of the
//! TTL cache; nothing here expires, entries live until the user removes
//! them. Never synced back to the server.
//!
//! A small in-memory index of saved ids supports synchronous "is this
//! saved?" checks. The index is refreshed on demand, not kept in sync
//! automatically after mutations.

use dashmap::DashSet;
use reqwest::Client;
use sqlx::Row;
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::api::Book;
use crate::db::{Database, now_millis};

/// Errors from the offline store boundary.
#[derive(Debug, Error)]
pub enum OfflineError {
    /// Underlying database operation failed.
    #[error("offline storage error: {0}")]
    Storage(#[from] sqlx::Error),

    /// Book snapshot could not be (de)serialized.
    #[error("offline snapshot serialization error: {0}")]
    Snapshot(#[from] serde_json::Error),
}

/// A book saved for offline reading.
#[derive(Debug, Clone, PartialEq)]
pub struct SavedBook {
    /// Book id (natural key; one saved entry per book).
    pub id: String,
    /// Full denormalized book metadata at save time.
    pub book: Book,
    /// When the entry was saved, milliseconds since the Unix epoch.
    pub saved_at: i64,
    /// The book file payload, when its fetch succeeded.
    pub file_blob: Option<Vec<u8>>,
    /// The cover image payload, when its fetch succeeded.
    pub cover_blob: Option<Vec<u8>>,
}

/// Store for complete offline book records on the offline database.
#[derive(Debug, Clone)]
pub struct OfflineLibrary {
    db: Database,
    client: Client,
    saved_ids: std::sync::Arc<DashSet<String>>,
}

impl OfflineLibrary {
    /// Creates a store over an opened offline database with a default
    /// HTTP client for payload fetches.
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self::with_client(db, Client::new())
    }

    /// Creates a store reusing an existing reqwest `Client`.
    #[must_use]
    pub fn with_client(db: Database, client: Client) -> Self {
        Self {
            db,
            client,
            saved_ids: std::sync::Arc::new(DashSet::new()),
        }
    }

    /// Saves `book` for offline reading, fetching its file and cover.
    ///
    /// Both payload fetches are best-effort: a missing URL or a failed
    /// fetch leaves the corresponding blob empty without failing the
    /// save. Re-saving overwrites the prior entry for the same id.
    ///
    /// # Errors
    ///
    /// Returns [`OfflineError`] when persisting the assembled record
    /// fails.
    #[instrument(skip(self, book), fields(id = %book.id))]
    pub async fn save_book(&self, book: &Book) -> Result<(), OfflineError> {
        let file_blob = match book.file_url.as_deref() {
            Some(url) => self.fetch_blob(url).await,
            None => None,
        };
        let cover_blob = match book.cover_url.as_deref() {
            Some(url) => self.fetch_blob(url).await,
            None => None,
        };
        self.save_book_with_payload(book, file_blob, cover_blob)
            .await
    }

    /// Persists an already-assembled offline record.
    ///
    /// Used by the download manager, which streams the file payload
    /// itself.
    ///
    /// # Errors
    ///
    /// Returns [`OfflineError`] when the write fails.
    #[instrument(skip_all, fields(id = %book.id))]
    pub async fn save_book_with_payload(
        &self,
        book: &Book,
        file_blob: Option<Vec<u8>>,
        cover_blob: Option<Vec<u8>>,
    ) -> Result<(), OfflineError> {
        let snapshot = serde_json::to_string(book)?;
        sqlx::query(
            "INSERT INTO saved_books (id, book, saved_at, file_blob, cover_blob) \
             VALUES (?, ?, ?, ?, ?) \
             ON CONFLICT (id) DO UPDATE SET \
                 book = excluded.book, \
                 saved_at = excluded.saved_at, \
                 file_blob = excluded.file_blob, \
                 cover_blob = excluded.cover_blob",
        )
        .bind(&book.id)
        .bind(snapshot)
        .bind(now_millis())
        .bind(file_blob)
        .bind(cover_blob)
        .execute(self.db.pool())
        .await?;
        debug!(id = %book.id, "book saved offline");
        Ok(())
    }

    /// Reads one saved book. Failures are logged and read as absent.
    #[instrument(level = "debug", skip(self), fields(id = %id))]
    pub async fn get(&self, id: &str) -> Option<SavedBook> {
        let row = sqlx::query(
            "SELECT id, book, saved_at, file_blob, cover_blob FROM saved_books WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(self.db.pool())
        .await;

        match row {
            Ok(row) => row.and_then(|row| Self::row_to_saved(&row)),
            Err(error) => {
                warn!(id = %id, %error, "offline read failed");
                None
            }
        }
    }

    /// Reads every saved book, most recently saved first. Failures are
    /// logged and read as an empty list.
    #[instrument(level = "debug", skip(self))]
    pub async fn get_all(&self) -> Vec<SavedBook> {
        let rows = sqlx::query(
            "SELECT id, book, saved_at, file_blob, cover_blob FROM saved_books \
             ORDER BY saved_at DESC",
        )
        .fetch_all(self.db.pool())
        .await;

        match rows {
            Ok(rows) => rows
                .iter()
                .filter_map(|row| Self::row_to_saved(row))
                .collect(),
            Err(error) => {
                warn!(%error, "offline list failed");
                Vec::new()
            }
        }
    }

    /// Removes one saved book. Failures are logged and swallowed.
    #[instrument(skip(self), fields(id = %id))]
    pub async fn remove(&self, id: &str) {
        let result = sqlx::query("DELETE FROM saved_books WHERE id = ?")
            .bind(id)
            .execute(self.db.pool())
            .await;
        if let Err(error) = result {
            warn!(id = %id, %error, "failed to remove offline book");
        }
    }

    /// Removes every saved book. Failures are logged and swallowed.
    #[instrument(skip(self))]
    pub async fn clear(&self) {
        if let Err(error) = sqlx::query("DELETE FROM saved_books")
            .execute(self.db.pool())
            .await
        {
            warn!(%error, "failed to clear offline books");
        }
    }

    /// Whether `id` is saved with an actual file payload.
    ///
    /// A metadata-only stub (file fetch failed at save time) does not
    /// count as saved.
    #[instrument(level = "debug", skip(self), fields(id = %id))]
    pub async fn is_saved(&self, id: &str) -> bool {
        let row = sqlx::query(
            "SELECT 1 FROM saved_books WHERE id = ? AND file_blob IS NOT NULL",
        )
        .bind(id)
        .fetch_optional(self.db.pool())
        .await;
        match row {
            Ok(row) => row.is_some(),
            Err(error) => {
                warn!(id = %id, %error, "offline saved check failed");
                false
            }
        }
    }

    /// Rebuilds the in-memory saved-ids index from the database.
    ///
    /// Call after mutations when synchronous checks need to observe
    /// them; the index is not updated automatically.
    #[instrument(level = "debug", skip(self))]
    pub async fn refresh_index(&self) {
        let rows = sqlx::query("SELECT id FROM saved_books WHERE file_blob IS NOT NULL")
            .fetch_all(self.db.pool())
            .await;
        match rows {
            Ok(rows) => {
                self.saved_ids.clear();
                for row in &rows {
                    if let Ok(id) = row.try_get::<String, _>("id") {
                        self.saved_ids.insert(id);
                    }
                }
            }
            Err(error) => warn!(%error, "failed to refresh saved-ids index"),
        }
    }

    /// Synchronous saved check against the in-memory index.
    ///
    /// Only as current as the last [`refresh_index`](Self::refresh_index).
    #[must_use]
    pub fn is_saved_cached(&self, id: &str) -> bool {
        self.saved_ids.contains(id)
    }

    fn row_to_saved(row: &sqlx::sqlite::SqliteRow) -> Option<SavedBook> {
        let id: String = row.try_get("id").ok()?;
        let snapshot: String = row.try_get("book").ok()?;
        let book: Book = match serde_json::from_str(&snapshot) {
            Ok(book) => book,
            Err(error) => {
                warn!(id = %id, %error, "corrupt offline snapshot, skipping");
                return None;
            }
        };
        Some(SavedBook {
            id,
            book,
            saved_at: row.try_get("saved_at").unwrap_or(0),
            file_blob: row.try_get("file_blob").ok().flatten(),
            cover_blob: row.try_get("cover_blob").ok().flatten(),
        })
    }

    /// Best-effort binary fetch; any failure reads as "no payload".
    pub(crate) async fn fetch_blob(&self, url: &str) -> Option<Vec<u8>> {
        let response = match self.client.get(url).send().await {
            Ok(response) => response,
            Err(error) => {
                warn!(url = %url, %error, "payload fetch failed");
                return None;
            }
        };
        if !response.status().is_success() {
            warn!(url = %url, status = response.status().as_u16(), "payload fetch returned error status");
            return None;
        }
        match response.bytes().await {
            Ok(bytes) => Some(bytes.to_vec()),
            Err(error) => {
                warn!(url = %url, %error, "payload body read failed");
                None
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::db::OFFLINE_MIGRATOR;

    fn book(id: &str) -> Book {
        Book {
            id: id.to_string(),
            title: format!("Book {id}"),
            author: "Author".to_string(),
            description: None,
            category_slug: None,
            file_url: None,
            cover_url: None,
            views: 0,
            downloads: 0,
        }
    }

    async fn library() -> OfflineLibrary {
        let db = Database::new_in_memory(&OFFLINE_MIGRATOR).await.unwrap();
        OfflineLibrary::new(db)
    }

    #[tokio::test]
    async fn test_save_and_get_roundtrip() {
        let library = library().await;
        library
            .save_book_with_payload(&book("b1"), Some(vec![1, 2, 3]), None)
            .await
            .unwrap();

        let saved = library.get("b1").await.unwrap();
        assert_eq!(saved.book.title, "Book b1");
        assert_eq!(saved.file_blob, Some(vec![1, 2, 3]));
        assert!(saved.cover_blob.is_none());
    }

    #[tokio::test]
    async fn test_resave_overwrites_prior_entry() {
        let library = library().await;
        library
            .save_book_with_payload(&book("b1"), Some(vec![1]), None)
            .await
            .unwrap();
        library
            .save_book_with_payload(&book("b1"), Some(vec![9, 9]), Some(vec![4]))
            .await
            .unwrap();

        let all = library.get_all().await;
        assert_eq!(all.len(), 1, "re-saving must not duplicate the entry");
        assert_eq!(all[0].file_blob, Some(vec![9, 9]));
    }

    #[tokio::test]
    async fn test_is_saved_requires_a_file_blob() {
        let library = library().await;
        library
            .save_book_with_payload(&book("stub"), None, Some(vec![1]))
            .await
            .unwrap();
        library
            .save_book_with_payload(&book("full"), Some(vec![1]), None)
            .await
            .unwrap();

        assert!(!library.is_saved("stub").await, "metadata stub is not saved");
        assert!(library.is_saved("full").await);
        assert!(!library.is_saved("missing").await);
    }

    #[tokio::test]
    async fn test_remove_then_check_returns_false() {
        let library = library().await;
        library
            .save_book_with_payload(&book("b1"), Some(vec![1]), None)
            .await
            .unwrap();
        assert!(library.is_saved("b1").await);

        library.remove("b1").await;
        assert!(!library.is_saved("b1").await);
        assert!(library.get("b1").await.is_none());
    }

    #[tokio::test]
    async fn test_index_is_explicitly_refreshed() {
        let library = library().await;
        library
            .save_book_with_payload(&book("b1"), Some(vec![1]), None)
            .await
            .unwrap();

        assert!(
            !library.is_saved_cached("b1"),
            "index must not update until refreshed"
        );
        library.refresh_index().await;
        assert!(library.is_saved_cached("b1"));

        library.remove("b1").await;
        assert!(
            library.is_saved_cached("b1"),
            "stale index answer until the next refresh"
        );
        library.refresh_index().await;
        assert!(!library.is_saved_cached("b1"));
    }

    #[tokio::test]
    async fn test_clear_empties_the_store() {
        let library = library().await;
        library
            .save_book_with_payload(&book("b1"), Some(vec![1]), None)
            .await
            .unwrap();
        library
            .save_book_with_payload(&book("b2"), Some(vec![2]), None)
            .await
            .unwrap();

        library.clear().await;
        assert!(library.get_all().await.is_empty());
    }
}
