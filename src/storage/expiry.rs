//! Per-Entry Expiry Watchers
//!
//! Every insertion that stores an item spawns one watcher task bound to that
//! item's expiration. There is no periodic sweeper: a key is removed by the
//! watcher of the insertion that put it there.
//!
//! ## Watcher Algorithm
//!
//! 1. Sleep until the wall clock has passed the expiration
//!    (no sleep at all if it already has)
//! 2. Take the write lock and look the key up
//! 3. Absent: the key was flushed or deleted, nothing to do
//! 4. Stored item expires later than now: a newer insertion superseded
//!    this watcher, leave it alone
//! 5. Otherwise delete the key
//!
//! A poisoned lock is recovered and checked like a healthy one. If the check
//! itself panics (a key whose `Hash` or `Eq` panics), the watcher takes the
//! fail-safe branch and deletes the key anyway. A watcher never reports
//! anything to callers.
//!
//! ## Cancellation
//!
//! Superseded watchers are not cancelled, they just wake up to a no-op.
//! All watchers listen on a shared shutdown channel, which the store signals
//! when it is dropped or shut down.

use crate::storage::store::Shared;
use std::hash::Hash;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::SystemTime;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::{debug, trace, warn};

/// Errors a watcher can hit while checking its key.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
enum WatchError {
    /// The key's `Hash` or `Eq` implementation panicked during the check
    #[error("expiry check panicked: {0}")]
    Panicked(String),
}

/// What a watcher found when it woke up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Expiry {
    /// The key was due and has been removed
    Evicted { keys_remaining: usize },
    /// A newer item with a later expiration replaced ours
    Superseded,
    /// The key is gone already
    Absent,
}

impl<K: Eq + Hash, V> Shared<K, V> {
    /// Removes the key if the item stored under it is due.
    ///
    /// Lookup and removal happen under one write lock, so an insertion
    /// cannot slip in between. A poisoned lock is recovered and the check
    /// still runs, since every critical section is a single map operation.
    fn expire_if_due(&self, key: &K) -> Result<Expiry, WatchError> {
        let check = AssertUnwindSafe(|| {
            let mut data = self.data.write().unwrap_or_else(|poisoned| {
                warn!("Store lock poisoned, checking expiry on the recovered map");
                poisoned.into_inner()
            });
            let now = SystemTime::now();

            match data.get(key) {
                None => Expiry::Absent,
                Some(item) if item.expiration.is_some_and(|exp| exp > now) => Expiry::Superseded,
                Some(_) => {
                    data.remove(key);
                    self.expired_count.fetch_add(1, Ordering::Relaxed);
                    Expiry::Evicted {
                        keys_remaining: data.len(),
                    }
                }
            }
        });

        panic::catch_unwind(check).map_err(|payload| {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            WatchError::Panicked(message)
        })
    }

    /// Fail-safe removal, used when the regular check could not run.
    fn evict(&self, key: &K) {
        if self.data_mut().remove(key).is_some() {
            self.expired_count.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Spawns expiry watchers for a store and owns their shutdown signal.
#[derive(Debug)]
pub(crate) struct ExpiryWatchers {
    /// Runtime the watcher tasks are spawned on
    runtime: Handle,

    /// Sender to signal shutdown; every watcher holds a receiver
    shutdown_tx: watch::Sender<bool>,
}

impl ExpiryWatchers {
    pub(crate) fn new(runtime: Handle) -> Self {
        // Only watchers hold receivers, so `closed()` means "all watchers done"
        let (shutdown_tx, _) = watch::channel(false);

        Self {
            runtime,
            shutdown_tx,
        }
    }

    /// Starts a watcher that removes `key` once `expiration` has passed.
    pub(crate) fn schedule<K, V>(&self, shared: &Arc<Shared<K, V>>, key: K, expiration: SystemTime)
    where
        K: Eq + Hash + Send + Sync + 'static,
        V: Send + Sync + 'static,
    {
        let guard = WatcherGuard::new(Arc::clone(shared));
        let shutdown_rx = self.shutdown_tx.subscribe();

        self.runtime
            .spawn(watch_expiry(guard, key, expiration, shutdown_rx));
    }

    /// Signals every watcher to stop sleeping and exit.
    pub(crate) fn stop(&self) {
        self.shutdown_tx.send_replace(true);
    }

    /// Completes once every watcher task has finished.
    pub(crate) async fn drained(&self) {
        self.shutdown_tx.closed().await;
    }
}

/// Keeps the pending watcher count accurate, even if a watcher is
/// dropped mid-sleep by a runtime shutdown.
struct WatcherGuard<K, V> {
    shared: Arc<Shared<K, V>>,
}

impl<K, V> WatcherGuard<K, V> {
    fn new(shared: Arc<Shared<K, V>>) -> Self {
        shared.pending_watchers.fetch_add(1, Ordering::Relaxed);
        Self { shared }
    }
}

impl<K, V> Drop for WatcherGuard<K, V> {
    fn drop(&mut self) {
        self.shared.pending_watchers.fetch_sub(1, Ordering::Relaxed);
    }
}

/// The watcher task.
async fn watch_expiry<K, V>(
    guard: WatcherGuard<K, V>,
    key: K,
    expiration: SystemTime,
    mut shutdown_rx: watch::Receiver<bool>,
) where
    K: Eq + Hash,
{
    // The timer and the wall clock can disagree slightly, so keep sleeping
    // until the wall clock itself has reached the deadline
    while let Ok(remaining) = expiration.duration_since(SystemTime::now()) {
        if remaining.is_zero() {
            break;
        }

        tokio::select! {
            _ = tokio::time::sleep(remaining) => {}
            result = shutdown_rx.changed() => {
                if result.is_err() || *shutdown_rx.borrow() {
                    trace!("Expiry watcher cancelled by store shutdown");
                    return;
                }
            }
        }
    }

    let shared = &guard.shared;
    match shared.expire_if_due(&key) {
        Ok(Expiry::Evicted { keys_remaining }) => {
            debug!(keys_remaining, "Expired key removed");
        }
        Ok(Expiry::Superseded) => trace!("Expiry watcher superseded by a newer item"),
        Ok(Expiry::Absent) => trace!("Expiry watcher found no key to remove"),
        Err(e) => {
            warn!(error = %e, "Expiry check failed, removing key");
            shared.evict(&key);
        }
    }
}
