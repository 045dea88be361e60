//! Integration tests for the chunked download manager.
//!
//! These verify the full download flow against mock HTTP servers:
//! streaming with progress, cover fetch, persistence, cancellation and
//! error handling.

use std::time::Duration;

use maktaba_core::api::Book;
use maktaba_core::db::{Database, OFFLINE_MIGRATOR};
use maktaba_core::download::{DownloadManager, DownloadStatus};
use maktaba_core::offline::OfflineLibrary;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn book_with_urls(id: &str, file_url: Option<String>, cover_url: Option<String>) -> Book {
    Book {
        id: id.to_string(),
        title: format!("Book {id}"),
        author: "Author".to_string(),
        description: None,
        category_slug: None,
        file_url,
        cover_url,
        views: 0,
        downloads: 0,
    }
}

/// Installs a fmt subscriber so failing runs show the manager's logs.
/// Honors `RUST_LOG`; repeat installs are ignored.
fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

async fn offline_library() -> OfflineLibrary {
    init_tracing();
    let db = Database::new_in_memory(&OFFLINE_MIGRATOR)
        .await
        .expect("in-memory offline database");
    OfflineLibrary::new(db)
}

#[tokio::test]
async fn test_download_persists_file_and_cover() {
    let server = MockServer::start().await;
    let file_content = vec![7_u8; 64 * 1024];
    Mock::given(method("GET"))
        .and(path("/files/b1.epub"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(file_content.clone()))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/covers/b1.jpg"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"jpeg".to_vec()))
        .mount(&server)
        .await;

    let offline = offline_library().await;
    let manager = DownloadManager::new(offline.clone());
    let book = book_with_urls(
        "b1",
        Some(format!("{}/files/b1.epub", server.uri())),
        Some(format!("{}/covers/b1.jpg", server.uri())),
    );

    assert!(manager.download_book(&book).await, "download should succeed");

    let saved = offline.get("b1").await.expect("record should be persisted");
    assert_eq!(saved.file_blob.expect("file payload").len(), file_content.len());
    assert_eq!(saved.cover_blob, Some(b"jpeg".to_vec()));
    assert!(offline.is_saved("b1").await);
}

#[tokio::test]
async fn test_failed_cover_fetch_does_not_fail_the_download() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/files/b2.epub"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"content".to_vec()))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/covers/b2.jpg"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let offline = offline_library().await;
    let manager = DownloadManager::new(offline.clone());
    let book = book_with_urls(
        "b2",
        Some(format!("{}/files/b2.epub", server.uri())),
        Some(format!("{}/covers/b2.jpg", server.uri())),
    );

    assert!(manager.download_book(&book).await);
    let saved = offline.get("b2").await.expect("record should be persisted");
    assert!(saved.file_blob.is_some());
    assert!(saved.cover_blob.is_none(), "cover miss is tolerated");
}

#[tokio::test]
async fn test_progress_is_monotone_and_entry_evicts_after_completion() {
    let server = MockServer::start().await;
    // Large enough that the body arrives as multiple chunks.
    let file_content = vec![1_u8; 4 * 1024 * 1024];
    Mock::given(method("GET"))
        .and(path("/files/big.epub"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(file_content))
        .mount(&server)
        .await;

    let offline = offline_library().await;
    let manager = DownloadManager::new(offline)
        .with_completed_linger(Duration::from_millis(50));
    let book = book_with_urls("big", Some(format!("{}/files/big.epub", server.uri())), None);

    let task = {
        let manager = manager.clone();
        let book = book.clone();
        tokio::spawn(async move { manager.download_book(&book).await })
    };

    let mut samples: Vec<u8> = Vec::new();
    loop {
        if let Some(entry) = manager.progress("big") {
            samples.push(entry.progress);
        }
        if task.is_finished() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    assert!(task.await.expect("download task should not panic"));

    assert!(
        samples.windows(2).all(|pair| pair[0] <= pair[1]),
        "progress must be non-decreasing: {samples:?}"
    );

    // The final observable value is 100, then the entry goes away.
    let final_entry = manager.progress("big");
    if let Some(entry) = final_entry {
        assert_eq!(entry.progress, 100);
        assert_eq!(entry.status, DownloadStatus::Completed);
    }
    tokio::time::sleep(Duration::from_millis(120)).await;
    assert!(
        manager.progress("big").is_none(),
        "completed entry should be evicted from the progress map"
    );
}

#[tokio::test]
async fn test_cancellation_leaves_no_trace() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/files/slow.epub"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(vec![0_u8; 1024 * 1024])
                .set_delay(Duration::from_millis(200)),
        )
        .mount(&server)
        .await;

    let offline = offline_library().await;
    let manager = DownloadManager::new(offline.clone());
    let book = book_with_urls("slow", Some(format!("{}/files/slow.epub", server.uri())), None);

    let task = {
        let manager = manager.clone();
        let book = book.clone();
        tokio::spawn(async move { manager.download_book(&book).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    manager.cancel("slow");

    assert!(!task.await.expect("download task should not panic"));
    assert!(
        offline.get("slow").await.is_none(),
        "canceled download must persist nothing"
    );
    assert!(
        manager.progress("slow").is_none(),
        "canceled download must leave no progress entry"
    );
}

#[tokio::test]
async fn test_cancel_after_completion_is_a_noop() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/files/b3.epub"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"tiny".to_vec()))
        .mount(&server)
        .await;

    let offline = offline_library().await;
    let manager = DownloadManager::new(offline.clone());
    let book = book_with_urls("b3", Some(format!("{}/files/b3.epub", server.uri())), None);

    assert!(manager.download_book(&book).await);
    manager.cancel("b3");
    manager.cancel("b3");

    assert!(offline.get("b3").await.is_some(), "late cancel must not undo the save");
}

#[tokio::test]
async fn test_server_error_records_error_status_and_persists_nothing() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/files/b4.epub"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let offline = offline_library().await;
    let manager = DownloadManager::new(offline.clone());
    let book = book_with_urls("b4", Some(format!("{}/files/b4.epub", server.uri())), None);

    assert!(!manager.download_book(&book).await);
    assert!(offline.get("b4").await.is_none());

    let entry = manager.progress("b4").expect("error entry should remain");
    assert_eq!(entry.status, DownloadStatus::Error);

    manager.acknowledge_error("b4");
    assert!(manager.progress("b4").is_none(), "acknowledged error is dropped");
}

#[tokio::test]
async fn test_book_without_file_url_fails_cleanly() {
    let offline = offline_library().await;
    let manager = DownloadManager::new(offline.clone());
    let book = book_with_urls("b5", None, None);

    assert!(!manager.download_book(&book).await);
    assert!(offline.get("b5").await.is_none());
}
