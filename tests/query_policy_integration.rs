//! Integration tests for the cached query layer.
//!
//! These drive the full fetch policy end to end: a real REST client
//! against a mock HTTP server, a real SQLite-backed cache, and the
//! network monitor flipping between online and offline.

use std::sync::Arc;
use std::time::Duration;

use maktaba_core::api::{Book, RestBookApi};
use maktaba_core::cache::{CachePartition, CacheStore};
use maktaba_core::db::{CACHE_MIGRATOR, Database};
use maktaba_core::net::NetworkMonitor;
use maktaba_core::query::{ALL_BOOKS_KEY, LibraryQueries};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

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

/// Installs a fmt subscriber so failing runs show the policy's logs.
/// Honors `RUST_LOG`; repeat installs are ignored.
fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

async fn cache_store() -> CacheStore {
    init_tracing();
    let db = Database::new_in_memory(&CACHE_MIGRATOR)
        .await
        .expect("in-memory cache database");
    CacheStore::new(db)
}

fn queries(server: &MockServer, cache: CacheStore, online: bool) -> LibraryQueries {
    let api = RestBookApi::new(&server.uri()).expect("valid base url");
    LibraryQueries::with_memo_window(
        Arc::new(api),
        cache,
        NetworkMonitor::new(online),
        Duration::ZERO,
    )
}

#[tokio::test]
async fn test_online_happy_path_overwrites_seeded_cache() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/books"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(vec![book("a"), book("b")]),
        )
        .mount(&server)
        .await;

    let cache = cache_store().await;
    cache
        .cache_data(CachePartition::Books, ALL_BOOKS_KEY, &vec![book("a")])
        .await;

    let q = queries(&server, cache.clone(), true);
    let books = q.books().await.expect("online fetch should succeed");
    assert_eq!(books.len(), 2);

    let cached: Option<Vec<Book>> = cache
        .get_cached_data(CachePartition::Books, ALL_BOOKS_KEY, false)
        .await;
    assert_eq!(
        cached.expect("cache should be primed").len(),
        2,
        "fresh result must overwrite the seeded cache"
    );
}

#[tokio::test]
async fn test_cold_start_offline_returns_empty_without_network_call() {
    let server = MockServer::start().await;
    // No mocks mounted: any request would 404 and fail the test below.

    let cache = cache_store().await;
    let q = queries(&server, cache, false);

    let featured = q.featured_books().await.expect("offline read never errors");
    assert!(featured.is_empty());
    assert!(
        server.received_requests().await.unwrap_or_default().is_empty(),
        "offline reads must not touch the network"
    );
}

#[tokio::test]
async fn test_server_error_falls_back_to_cached_value() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/books"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let cache = cache_store().await;
    cache
        .cache_data(CachePartition::Books, ALL_BOOKS_KEY, &vec![book("v")])
        .await;

    let q = queries(&server, cache, true);
    for _ in 0..3 {
        let books = q.books().await.expect("cached fallback should mask the failure");
        assert_eq!(books[0].id, "v");
    }
}

#[tokio::test]
async fn test_server_error_without_cache_surfaces() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/books"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let cache = cache_store().await;
    let q = queries(&server, cache, true);

    let result = q.books().await;
    assert!(result.is_err(), "no fallback means the error reaches the caller");
}

#[tokio::test]
async fn test_offline_serves_expired_entries() {
    let server = MockServer::start().await;
    let cache = cache_store().await;
    cache
        .cache_data_with_ttl(
            CachePartition::Books,
            ALL_BOOKS_KEY,
            &vec![book("old")],
            Duration::ZERO,
        )
        .await;
    tokio::time::sleep(Duration::from_millis(5)).await;

    // Expired for a normal read...
    let strict: Option<Vec<Book>> = cache
        .get_cached_data(CachePartition::Books, ALL_BOOKS_KEY, false)
        .await;
    assert!(strict.is_none());

    // ...but still served offline.
    let q = queries(&server, cache, false);
    let books = q.books().await.expect("offline read never errors");
    assert_eq!(books.len(), 1);
}

#[tokio::test]
async fn test_book_by_id_offline_searches_cached_full_list() {
    let server = MockServer::start().await;
    let cache = cache_store().await;
    cache
        .cache_data(
            CachePartition::Books,
            ALL_BOOKS_KEY,
            &vec![book("x"), book("y")],
        )
        .await;

    let q = queries(&server, cache, false);
    let found = q.book_by_id("y").await.expect("offline read never errors");
    assert_eq!(found.expect("book should be found").id, "y");

    let missing = q.book_by_id("absent").await.expect("offline read never errors");
    assert!(missing.is_none());
}

#[tokio::test]
async fn test_by_category_uses_its_own_partition() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/categories/history/books"))
        .respond_with(ResponseTemplate::new(200).set_body_json(vec![book("h1")]))
        .mount(&server)
        .await;

    let cache = cache_store().await;
    let q = queries(&server, cache.clone(), true);
    let books = q.books_by_category("history").await.expect("fetch should succeed");
    assert_eq!(books.len(), 1);

    let cached: Option<Vec<Book>> = cache
        .get_cached_data(CachePartition::BooksByCategory, "category-history", false)
        .await;
    assert_eq!(cached.expect("per-category list should be cached").len(), 1);
}
