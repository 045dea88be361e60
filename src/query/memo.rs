//! In-memory result memo for the cached query layer.
//!
//! Stands in for a surrounding query library's staleness window: a fresh
//! fetch is remembered for a short interval so immediate re-renders do not
//! re-run the fetch policy, and realtime invalidation clears entries so
//! the next read does.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::Serialize;
use serde::de::DeserializeOwned;

/// Prefix shared by every book-derived view; realtime invalidation
/// removes all keys under it in one sweep.
const BOOK_VIEW_PREFIX: &str = "books:";

pub(crate) fn all_books_key() -> String {
    format!("{BOOK_VIEW_PREFIX}all")
}

pub(crate) fn featured_key() -> String {
    format!("{BOOK_VIEW_PREFIX}featured")
}

pub(crate) fn latest_key() -> String {
    format!("{BOOK_VIEW_PREFIX}latest")
}

pub(crate) fn most_viewed_key() -> String {
    format!("{BOOK_VIEW_PREFIX}most-viewed")
}

pub(crate) fn most_downloaded_key() -> String {
    format!("{BOOK_VIEW_PREFIX}most-downloaded")
}

pub(crate) fn by_category_key(slug: &str) -> String {
    format!("{BOOK_VIEW_PREFIX}category:{slug}")
}

pub(crate) fn book_key(id: &str) -> String {
    format!("{BOOK_VIEW_PREFIX}id:{id}")
}

pub(crate) fn categories_key() -> String {
    "categories:all".to_string()
}

#[derive(Debug)]
struct MemoEntry {
    value: serde_json::Value,
    fetched_at: Instant,
}

/// Keyed memo of recently fetched results.
#[derive(Debug)]
pub(crate) struct QueryCache {
    entries: DashMap<String, MemoEntry>,
    window: Duration,
}

impl QueryCache {
    pub(crate) fn new(window: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            window,
        }
    }

    /// Returns the memoized value when it is still within the staleness
    /// window. Entries that fail to deserialize read as absent.
    pub(crate) fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let entry = self.entries.get(key)?;
        if entry.fetched_at.elapsed() > self.window {
            return None;
        }
        serde_json::from_value(entry.value.clone()).ok()
    }

    /// Memoizes a freshly fetched value. Unserializable values are
    /// silently skipped; the memo is an optimization, not a store.
    pub(crate) fn insert<T: Serialize>(&self, key: String, value: &T) {
        if let Ok(value) = serde_json::to_value(value) {
            self.entries.insert(
                key,
                MemoEntry {
                    value,
                    fetched_at: Instant::now(),
                },
            );
        }
    }

    /// Drops every book-derived view (full list, featured, latest,
    /// by-category, by-id) so the next read re-runs the fetch policy.
    pub(crate) fn invalidate_book_views(&self) {
        self.entries
            .retain(|key, _| !key.starts_with(BOOK_VIEW_PREFIX));
    }

    /// Drops all memoized results.
    pub(crate) fn invalidate_all(&self) {
        self.entries.clear();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_memo_returns_value_within_window() {
        let memo = QueryCache::new(Duration::from_secs(30));
        memo.insert(all_books_key(), &vec![1, 2, 3]);
        assert_eq!(memo.get::<Vec<i32>>(&all_books_key()), Some(vec![1, 2, 3]));
    }

    #[test]
    fn test_memo_misses_outside_window() {
        let memo = QueryCache::new(Duration::ZERO);
        memo.insert(all_books_key(), &vec![1]);
        std::thread::sleep(Duration::from_millis(2));
        assert_eq!(memo.get::<Vec<i32>>(&all_books_key()), None);
    }

    #[test]
    fn test_invalidate_book_views_spares_categories() {
        let memo = QueryCache::new(Duration::from_secs(30));
        memo.insert(featured_key(), &vec![1]);
        memo.insert(by_category_key("history"), &vec![2]);
        memo.insert(categories_key(), &vec![3]);

        memo.invalidate_book_views();

        assert_eq!(memo.get::<Vec<i32>>(&featured_key()), None);
        assert_eq!(memo.get::<Vec<i32>>(&by_category_key("history")), None);
        assert_eq!(memo.get::<Vec<i32>>(&categories_key()), Some(vec![3]));
    }
}
