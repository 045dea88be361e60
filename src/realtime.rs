//! Realtime cache invalidation.
//!
//! Listens to the backend's change feed for the books table and drops the
//! memoized book views on every insert, update or delete, so the next
//! read re-runs the cached query policy against fresh server truth.
//!
//! The subscription only exists while online: when connectivity flips
//! offline the feed is dropped (unsubscribed) and re-established on the
//! next transition back online. The listener is started at most once at a
//! time; a second `start` while the listener task is alive is a guarded
//! no-op.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures_util::{Stream, StreamExt};
use tracing::{debug, info, warn};

use crate::net::NetworkMonitor;
use crate::query::LibraryQueries;

/// Kind of change reported by the backend feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// A book row was inserted.
    Inserted,
    /// A book row was updated.
    Updated,
    /// A book row was deleted.
    Deleted,
}

/// One change notification for the books table.
#[derive(Debug, Clone)]
pub struct BookChange {
    /// What happened.
    pub kind: ChangeKind,
    /// The affected book id, when the feed includes it.
    pub book_id: Option<String>,
}

/// Installs and tears down the change-feed subscription.
#[derive(Debug, Default)]
pub struct RealtimeInvalidator {
    running: Arc<AtomicBool>,
}

impl RealtimeInvalidator {
    /// Creates an idle invalidator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts listening. `subscribe` is called each time the listener
    /// (re-)attaches to the feed, so going offline and back online builds
    /// a fresh subscription rather than reusing a dead one.
    ///
    /// Returns `None` while a previous listener task is still running;
    /// duplicate subscriptions are never installed. A listener whose feed
    /// has ended no longer counts as running.
    pub fn start<S, F>(
        &self,
        subscribe: F,
        queries: Arc<LibraryQueries>,
        monitor: &NetworkMonitor,
    ) -> Option<InvalidatorGuard>
    where
        S: Stream<Item = BookChange> + Send + 'static,
        F: Fn() -> S + Send + 'static,
    {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("realtime invalidator already running, ignoring start");
            return None;
        }

        let running = Arc::clone(&self.running);
        let task_running = Arc::clone(&self.running);
        let mut online_rx = monitor.subscribe();
        let task = tokio::spawn(async move {
            'listen: loop {
                // Wait until online before holding a subscription.
                while !*online_rx.borrow_and_update() {
                    if online_rx.changed().await.is_err() {
                        break 'listen;
                    }
                }

                debug!("subscribing to book change feed");
                let feed = subscribe();
                let mut feed = std::pin::pin!(feed);

                loop {
                    tokio::select! {
                        change = feed.next() => {
                            let Some(change) = change else {
                                info!("book change feed ended");
                                break 'listen;
                            };
                            debug!(kind = ?change.kind, book_id = ?change.book_id, "book change, invalidating views");
                            queries.invalidate_book_views();
                        }
                        changed = online_rx.changed() => {
                            if changed.is_err() {
                                break 'listen;
                            }
                            if !*online_rx.borrow() {
                                debug!("offline, dropping book change subscription");
                                break;
                            }
                        }
                    }
                }
                // Feed dropped here; loop back to await connectivity.
            }
            // An ended feed must not block a later start while the guard
            // is still held.
            task_running.store(false, Ordering::SeqCst);
        });

        Some(InvalidatorGuard { task, running })
    }
}

/// Owns the listener task. Stopping (or dropping) the guard unsubscribes
/// and allows a later `start` to succeed.
#[derive(Debug)]
pub struct InvalidatorGuard {
    task: tokio::task::JoinHandle<()>,
    running: Arc<AtomicBool>,
}

impl InvalidatorGuard {
    /// Stops the listener. Idempotent.
    pub fn stop(&self) {
        self.task.abort();
        self.running.store(false, Ordering::SeqCst);
    }
}

impl Drop for InvalidatorGuard {
    fn drop(&mut self) {
        self.task.abort();
        self.running.store(false, Ordering::SeqCst);
    }
}
