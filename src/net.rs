//! Network connectivity observer.
//!
//! Wraps the platform's online/offline signal in an explicit
//! publish/subscribe channel so cache-aware readers can decide between
//! "fetch fresh" and "serve cached" without being tied to any UI
//! rendering model. Purely event-driven; nothing polls.
//!
//! The platform event source is attached with [`NetworkMonitor::attach`],
//! which returns a [`MonitorGuard`]. The subscription lives exactly as
//! long as the guard: dropping it (or calling [`MonitorGuard::stop`])
//! detaches the source.

use futures_util::{Stream, StreamExt};
use tokio::sync::watch;
use tracing::{debug, info};

/// Reactive online/offline flag with subscriber support.
///
/// Cloning is cheap; clones publish into and read from the same channel.
#[derive(Debug, Clone)]
pub struct NetworkMonitor {
    tx: watch::Sender<bool>,
}

impl NetworkMonitor {
    /// Creates a monitor seeded with the platform's current connectivity
    /// flag.
    #[must_use]
    pub fn new(initially_online: bool) -> Self {
        let (tx, _) = watch::channel(initially_online);
        Self { tx }
    }

    /// Current connectivity as last published.
    #[must_use]
    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    /// Returns a receiver that observes every connectivity transition.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }

    /// Publishes a connectivity transition.
    ///
    /// Re-publishing the current state is a no-op for subscribers.
    pub fn set_online(&self, online: bool) {
        let changed = self.tx.send_if_modified(|state| {
            if *state == online {
                false
            } else {
                *state = online;
                true
            }
        });
        if changed {
            info!(online, "network status changed");
        }
    }

    /// Consumes a platform connectivity event stream in a background
    /// task, publishing each transition into the channel.
    ///
    /// The returned guard owns the task; dropping it stops consumption.
    pub fn attach<S>(&self, events: S) -> MonitorGuard
    where
        S: Stream<Item = bool> + Send + 'static,
    {
        let monitor = self.clone();
        let task = tokio::spawn(async move {
            let mut events = std::pin::pin!(events);
            while let Some(online) = events.next().await {
                monitor.set_online(online);
            }
            debug!("connectivity event stream ended");
        });
        MonitorGuard { task }
    }
}

/// Owns the background task consuming a connectivity event stream.
///
/// Teardown is guaranteed: the task is aborted when the guard is dropped,
/// so a detached monitor can never keep publishing stale transitions.
#[derive(Debug)]
pub struct MonitorGuard {
    task: tokio::task::JoinHandle<()>,
}

impl MonitorGuard {
    /// Stops consuming connectivity events. Idempotent.
    pub fn stop(&self) {
        self.task.abort();
    }
}

impl Drop for MonitorGuard {
    fn drop(&mut self) {
        self.task.abort();
    }
}
