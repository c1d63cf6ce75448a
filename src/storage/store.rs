//! Expiring Key-Value Store
//!
//! This module implements the store behind ttlstore: a `HashMap` guarded by a
//! single `RwLock`, where every insertion schedules its own expiry watcher.
//!
//! ## Design Decisions
//!
//! 1. **One RwLock**: Readers run concurrently, writers are exclusive. Locks are
//!    held only for the map access itself, never across a sleep.
//! 2. **No Sweeper**: There is no periodic scan. Each `set`/`add` that stores an
//!    item spawns one watcher task that sleeps until that item's expiration.
//! 3. **Supersede Check**: A watcher only deletes the key if the stored item is
//!    due at wake-up time, so an overwrite is never clobbered by a stale watcher.
//! 4. **Lazy Staleness**: `get` never evicts. Callers that care about the short
//!    window between expiration and watcher wake-up use [`Item::is_expired`].
//!
//! ## Lifecycle
//!
//! ```text
//!   set/add ──> insert under write lock ──> spawn watcher ──> sleep until deadline
//!                                                                  │
//!                      flush / delete / newer set                  ▼
//!                      make the wake-up a no-op ───────> check + delete under write lock
//! ```

use crate::storage::expiry::ExpiryWatchers;
use crate::storage::item::deadline;
use crate::storage::Item;
use std::collections::hash_map;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, SystemTime};
use thiserror::Error;
use tokio::runtime::Handle;
use tracing::{debug, info};

/// Errors that can occur while constructing a [`Store`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The default validity must be a positive duration
    #[error("argument 'default_validity' can't be empty")]
    ZeroValidity,

    /// `now + default_validity` is not a representable point in time
    #[error("argument 'default_validity' is too large: {0:?}")]
    ValidityOverflow(Duration),

    /// Expiry watchers need a Tokio runtime to run on
    #[error("no Tokio runtime available to run expiry watchers")]
    NoRuntime,
}

/// State shared between the store and its expiry watchers.
pub(crate) struct Shared<K, V> {
    /// The actual data storage
    pub(super) data: RwLock<HashMap<K, Item<V>>>,

    /// Statistics: total SET operations
    set_count: AtomicU64,

    /// Statistics: ADD operations that stored an item
    add_count: AtomicU64,

    /// Statistics: ADD operations skipped because the key was present
    add_rejected_count: AtomicU64,

    /// Statistics: number of keys removed by expiry watchers
    pub(super) expired_count: AtomicU64,

    /// Statistics: total FLUSH operations
    flush_count: AtomicU64,

    /// Watcher tasks that have not finished yet
    pub(super) pending_watchers: AtomicU64,
}

impl<K, V> Shared<K, V> {
    pub(super) fn new() -> Self {
        Self {
            data: RwLock::new(HashMap::new()),
            set_count: AtomicU64::new(0),
            add_count: AtomicU64::new(0),
            add_rejected_count: AtomicU64::new(0),
            expired_count: AtomicU64::new(0),
            flush_count: AtomicU64::new(0),
            pending_watchers: AtomicU64::new(0),
        }
    }

    /// Read access to the map. A poisoned lock still holds a consistent map,
    /// since every critical section is a single map operation.
    pub(super) fn data(&self) -> RwLockReadGuard<'_, HashMap<K, Item<V>>> {
        self.data.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Write access to the map, recovering from poisoning like [`Shared::data`].
    pub(super) fn data_mut(&self) -> RwLockWriteGuard<'_, HashMap<K, Item<V>>> {
        self.data.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// An in-process key-value cache where every entry expires on its own.
///
/// # Thread Safety
///
/// All operations take `&self`, so a store is usually wrapped in an `Arc` and
/// shared between threads or tasks. `set` and `add` may be called from plain
/// OS threads: watchers are spawned on the runtime captured at construction.
///
/// # Shutdown
///
/// Dropping the store cancels every pending watcher. [`Store::shutdown`] does
/// the same and additionally waits until all watcher tasks have finished.
///
/// # Example
///
/// ```
/// use ttlstore::storage::{Item, Store};
/// use std::time::Duration;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), ttlstore::storage::StoreError> {
/// let store = Store::new(Duration::from_secs(60))?;
///
/// // Uses the default validity of 60 seconds
/// store.set("name", Item::new("Ariz"));
/// assert_eq!(store.get(&"name").map(|item| item.value), Some("Ariz"));
///
/// // Explicit time to live
/// store.set("session", Item::with_ttl("abc123", Duration::from_secs(5)));
///
/// // Only stored if the key is missing
/// assert!(!store.add("name", Item::new("someone else")));
/// # Ok(())
/// # }
/// ```
pub struct Store<K, V> {
    /// Map and counters, shared with the watcher tasks
    shared: Arc<Shared<K, V>>,

    /// Validity applied to items inserted without an expiration
    default_validity: Duration,

    /// Spawns, cancels and drains expiry watchers
    watchers: ExpiryWatchers,
}

impl<K, V> std::fmt::Debug for Store<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("default_validity", &self.default_validity)
            .field("keys", &self.shared.data().len())
            .field(
                "pending_watchers",
                &self.shared.pending_watchers.load(Ordering::Relaxed),
            )
            .finish()
    }
}

impl<K, V> Store<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Creates a store whose watchers run on the current Tokio runtime.
    ///
    /// # Errors
    ///
    /// - [`StoreError::ZeroValidity`] if `default_validity` is zero
    /// - [`StoreError::ValidityOverflow`] if `default_validity` cannot be added to the current time
    /// - [`StoreError::NoRuntime`] if called outside a Tokio runtime
    pub fn new(default_validity: Duration) -> Result<Self, StoreError> {
        validate(default_validity)?;
        let runtime = Handle::try_current().map_err(|_| StoreError::NoRuntime)?;
        Self::with_runtime(default_validity, runtime)
    }

    /// Creates a store whose watchers run on the given runtime.
    ///
    /// This is the constructor to use from synchronous code.
    pub fn with_runtime(default_validity: Duration, runtime: Handle) -> Result<Self, StoreError> {
        validate(default_validity)?;

        info!(
            default_validity_ms = default_validity.as_millis() as u64,
            "Expiring store created"
        );

        Ok(Self {
            shared: Arc::new(Shared::new()),
            default_validity,
            watchers: ExpiryWatchers::new(runtime),
        })
    }

    /// Returns the validity applied to items without an expiration.
    pub fn default_validity(&self) -> Duration {
        self.default_validity
    }

    /// Gets the item stored for a key.
    ///
    /// The item may already be expired if its watcher has not run yet;
    /// check [`Item::is_expired`] when that matters.
    pub fn get(&self, key: &K) -> Option<Item<V>> {
        self.shared.data().get(key).cloned()
    }

    /// Stores an item, replacing whatever the key held before.
    ///
    /// An item without an expiration gets `now + default_validity`.
    pub fn set(&self, key: K, item: Item<V>) {
        self.shared.set_count.fetch_add(1, Ordering::Relaxed);

        let (item, expiration) = self.resolve(item, SystemTime::now());
        self.shared.data_mut().insert(key.clone(), item);

        self.watchers.schedule(&self.shared, key, expiration);
    }

    /// Stores an item only if the key is missing.
    ///
    /// A key that is present blocks the insert even when its item is already
    /// expired and merely waiting for its watcher.
    ///
    /// # Returns
    ///
    /// Returns `true` if the item was stored, `false` if the key was present.
    pub fn add(&self, key: K, item: Item<V>) -> bool {
        // Fast path: read lock only
        if self.shared.data().contains_key(&key) {
            self.shared.add_rejected_count.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        let (item, expiration) = self.resolve(item, SystemTime::now());
        {
            let mut data = self.shared.data_mut();
            match data.entry(key.clone()) {
                // Race: another writer stored the key after our read
                hash_map::Entry::Occupied(_) => {
                    self.shared.add_rejected_count.fetch_add(1, Ordering::Relaxed);
                    return false;
                }
                hash_map::Entry::Vacant(slot) => {
                    slot.insert(item);
                }
            }
        }

        self.shared.add_count.fetch_add(1, Ordering::Relaxed);
        self.watchers.schedule(&self.shared, key, expiration);
        true
    }

    /// Removes every key.
    ///
    /// Pending watchers keep sleeping, but find nothing to delete when they wake.
    pub fn flush(&self) {
        let dropped = {
            let mut data = self.shared.data_mut();
            std::mem::take(&mut *data).len()
        };
        self.shared.flush_count.fetch_add(1, Ordering::Relaxed);

        debug!(keys = dropped, "Store flushed");
    }

    /// Deletes a key from the store.
    ///
    /// # Returns
    ///
    /// Returns `true` if the key was deleted, `false` if it didn't exist.
    pub fn delete(&self, key: &K) -> bool {
        self.shared.data_mut().remove(key).is_some()
    }

    /// Returns the number of stored keys, including expired ones whose
    /// watcher has not run yet.
    pub fn len(&self) -> usize {
        self.shared.data().len()
    }

    /// Returns true if the store holds no keys.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns store statistics.
    pub fn stats(&self) -> StoreStats {
        StoreStats {
            keys: self.len(),
            set_ops: self.shared.set_count.load(Ordering::Relaxed),
            add_ops: self.shared.add_count.load(Ordering::Relaxed),
            add_rejected: self.shared.add_rejected_count.load(Ordering::Relaxed),
            expired: self.shared.expired_count.load(Ordering::Relaxed),
            flushes: self.shared.flush_count.load(Ordering::Relaxed),
            pending_watchers: self.shared.pending_watchers.load(Ordering::Relaxed),
        }
    }

    /// Cancels all pending watchers and waits for their tasks to finish.
    ///
    /// Entries stay in the map until the store itself is dropped.
    pub async fn shutdown(self) {
        self.watchers.stop();
        self.watchers.drained().await;

        info!(keys = self.len(), "Expiring store shut down");
    }

    /// Fills in the default expiration and returns it alongside the item.
    fn resolve(&self, mut item: Item<V>, now: SystemTime) -> (Item<V>, SystemTime) {
        let expiration = item
            .expiration
            .unwrap_or_else(|| deadline(now, self.default_validity));
        item.expiration = Some(expiration);
        (item, expiration)
    }
}

impl<K, V> Drop for Store<K, V> {
    fn drop(&mut self) {
        self.watchers.stop();
    }
}

/// Rejects validities that are zero or too large to turn into a deadline.
fn validate(default_validity: Duration) -> Result<(), StoreError> {
    if default_validity.is_zero() {
        return Err(StoreError::ZeroValidity);
    }
    if SystemTime::now().checked_add(default_validity).is_none() {
        return Err(StoreError::ValidityOverflow(default_validity));
    }
    Ok(())
}

/// Store statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreStats {
    /// Number of keys currently stored
    pub keys: usize,
    /// Total SET operations
    pub set_ops: u64,
    /// ADD operations that stored an item
    pub add_ops: u64,
    /// ADD operations skipped because the key was present
    pub add_rejected: u64,
    /// Keys removed by expiry watchers
    pub expired: u64,
    /// Total FLUSH operations
    pub flushes: u64,
    /// Watcher tasks still sleeping or running
    pub pending_watchers: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use tokio::time::sleep;
    use tokio_test::{assert_err, assert_ok};

    fn store(validity: Duration) -> Store<&'static str, u32> {
        assert_ok!(Store::new(validity))
    }

    #[tokio::test]
    async fn test_new_rejects_zero_validity() {
        let err = assert_err!(Store::<&str, u32>::new(Duration::ZERO));
        assert_eq!(err, StoreError::ZeroValidity);
    }

    #[tokio::test]
    async fn test_new_rejects_overflowing_validity() {
        let err = assert_err!(Store::<&str, u32>::new(Duration::MAX));
        assert_eq!(err, StoreError::ValidityOverflow(Duration::MAX));
    }

    #[tokio::test]
    async fn test_new_starts_empty() {
        let store = store(Duration::from_secs(1));
        assert!(store.is_empty());
        assert_eq!(store.default_validity(), Duration::from_secs(1));
        assert_eq!(store.get(&"missing"), None);
    }

    #[test]
    fn test_new_outside_runtime() {
        let err = assert_err!(Store::<&str, u32>::new(Duration::from_secs(1)));
        assert_eq!(err, StoreError::NoRuntime);

        // Zero validity is reported first, runtime or not
        let err = assert_err!(Store::<&str, u32>::new(Duration::ZERO));
        assert_eq!(err, StoreError::ZeroValidity);
    }

    #[test]
    fn test_with_runtime_from_plain_thread() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let store = assert_ok!(Store::with_runtime(
            Duration::from_secs(60),
            runtime.handle().clone()
        ));

        store.set("key", Item::with_ttl(1, Duration::from_millis(30)));
        assert_eq!(store.get(&"key").map(|item| item.value), Some(1));

        // The watcher runs on the runtime's worker threads
        thread::sleep(Duration::from_millis(150));
        assert_eq!(store.get(&"key"), None);
    }

    #[tokio::test]
    async fn test_set_and_get() {
        let store = store(Duration::from_secs(60));
        let item = Item::with_ttl(7, Duration::from_secs(30));

        store.set("key", item.clone());
        assert_eq!(store.get(&"key"), Some(item));
    }

    #[tokio::test]
    async fn test_set_resolves_default_validity() {
        let validity = Duration::from_secs(60);
        let store = store(validity);

        let before = SystemTime::now();
        store.set("key", Item::new(1));
        let after = SystemTime::now();

        let item = store.get(&"key").unwrap();
        let expiration = item.expiration.unwrap();
        assert!(expiration >= before + validity);
        assert!(expiration <= after + validity);
        assert!(!item.is_expired());
    }

    #[tokio::test]
    async fn test_set_overwrites() {
        let store = store(Duration::from_secs(60));

        store.set("key", Item::new(1));
        store.set("key", Item::new(2));

        assert_eq!(store.get(&"key").map(|item| item.value), Some(2));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_entry_evicted_after_expiry() {
        let store = store(Duration::from_secs(60));

        store.set("key", Item::with_ttl(1, Duration::from_millis(50)));
        assert!(store.get(&"key").is_some());

        sleep(Duration::from_millis(150)).await;

        assert_eq!(store.get(&"key"), None);
        assert_eq!(store.stats().expired, 1);
        assert_eq!(store.stats().pending_watchers, 0);
    }

    #[tokio::test]
    async fn test_default_validity_evicts() {
        let store = store(Duration::from_millis(40));

        store.set("key", Item::new(1));
        sleep(Duration::from_millis(150)).await;

        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_past_expiration_removed_immediately() {
        let store = store(Duration::from_secs(60));
        let past = SystemTime::now() - Duration::from_secs(5);

        store.set("key", Item::with_expiration(1, past));
        // Stored as given; the watcher removes it on its first poll
        assert!(store.get(&"key").unwrap().is_expired());

        sleep(Duration::from_millis(20)).await;
        assert_eq!(store.get(&"key"), None);
    }

    #[tokio::test]
    async fn test_add_keeps_first() {
        let store = store(Duration::from_secs(60));

        assert!(store.add("key", Item::new(1)));
        assert!(!store.add("key", Item::new(2)));

        assert_eq!(store.get(&"key").map(|item| item.value), Some(1));

        let stats = store.stats();
        assert_eq!(stats.add_ops, 1);
        assert_eq!(stats.add_rejected, 1);
        assert_eq!(stats.pending_watchers, 1);
    }

    #[tokio::test]
    async fn test_add_blocked_by_stale_entry() {
        let store = store(Duration::from_secs(60));
        let past = SystemTime::now() - Duration::from_secs(1);

        // The current-thread runtime cannot run the watcher before we yield
        store.set("key", Item::with_expiration(1, past));
        assert!(!store.add("key", Item::new(2)));
        assert_eq!(store.get(&"key").map(|item| item.value), Some(1));

        // Once the watcher has removed it, add succeeds
        sleep(Duration::from_millis(20)).await;
        assert!(store.add("key", Item::new(3)));
        assert_eq!(store.get(&"key").map(|item| item.value), Some(3));
    }

    #[tokio::test]
    async fn test_newer_set_survives_older_watcher() {
        let store = store(Duration::from_secs(60));

        store.set("key", Item::with_ttl(1, Duration::from_millis(50)));
        let fresher = Item::with_ttl(2, Duration::from_millis(500));
        store.set("key", fresher.clone());

        // The first watcher wakes up and must leave the newer item alone
        sleep(Duration::from_millis(150)).await;
        assert_eq!(store.get(&"key"), Some(fresher));
        assert_eq!(store.stats().expired, 0);
        assert_eq!(store.stats().pending_watchers, 1);
    }

    #[tokio::test]
    async fn test_flush() {
        let store = store(Duration::from_secs(3600));

        store.set("key1", Item::new(1));
        store.set("key2", Item::new(2));
        store.add("key3", Item::with_ttl(3, Duration::from_millis(30)));
        assert_eq!(store.len(), 3);

        store.flush();

        assert!(store.is_empty());
        assert_eq!(store.get(&"key1"), None);
        assert_eq!(store.get(&"key2"), None);
        assert_eq!(store.get(&"key3"), None);
        assert_eq!(store.stats().flushes, 1);

        // The short watcher wakes to an empty map
        sleep(Duration::from_millis(100)).await;
        assert_eq!(store.stats().expired, 0);
    }

    #[tokio::test]
    async fn test_delete() {
        let store = store(Duration::from_secs(60));

        store.set("key", Item::with_ttl(1, Duration::from_millis(30)));
        assert!(store.delete(&"key"));
        assert!(!store.delete(&"key")); // Already deleted

        sleep(Duration::from_millis(100)).await;
        assert_eq!(store.stats().expired, 0);
        assert_eq!(store.stats().pending_watchers, 0);
    }

    #[tokio::test]
    async fn test_poisoned_lock_keeps_supersede_check() {
        let store = Arc::new(store(Duration::from_secs(60)));

        let poisoner = Arc::clone(&store);
        let result = thread::spawn(move || {
            let _guard = poisoner.shared.data.write().unwrap();
            panic!("poisoning the store lock");
        })
        .join();
        assert!(result.is_err());
        assert!(store.shared.data.is_poisoned());

        store.set("key", Item::with_ttl(1, Duration::from_millis(30)));
        let fresher = Item::with_ttl(2, Duration::from_secs(10));
        store.set("key", fresher.clone());

        // The first watcher wakes on a poisoned lock and must still see the newer item
        sleep(Duration::from_millis(150)).await;
        assert_eq!(store.get(&"key"), Some(fresher));
        assert_eq!(store.stats().expired, 0);

        // Due items are still removed
        store.set("other", Item::with_ttl(3, Duration::from_millis(30)));
        sleep(Duration::from_millis(120)).await;
        assert_eq!(store.get(&"other"), None);
        assert_eq!(store.stats().expired, 1);
    }

    #[tokio::test]
    async fn test_drop_cancels_watchers() {
        let store = store(Duration::from_secs(3600));
        for key in ["a", "b", "c"] {
            store.set(key, Item::new(1));
        }
        assert_eq!(store.stats().pending_watchers, 3);

        let shared = Arc::clone(&store.shared);
        drop(store);

        sleep(Duration::from_millis(50)).await;
        assert_eq!(shared.pending_watchers.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn test_shutdown_drains_watchers() {
        let store: Store<String, u32> = assert_ok!(Store::new(Duration::from_secs(3600)));
        for i in 0..100 {
            store.set(format!("key-{}", i), Item::new(i));
        }
        assert_eq!(store.stats().pending_watchers, 100);

        let shared = Arc::clone(&store.shared);
        assert_ok!(tokio::time::timeout(Duration::from_secs(1), store.shutdown()).await);
        assert_eq!(shared.pending_watchers.load(Ordering::Relaxed), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_disjoint_sets() {
        let store: Arc<Store<String, usize>> =
            Arc::new(assert_ok!(Store::new(Duration::from_secs(60))));
        let mut handles = vec![];

        // Spawn multiple writers
        for i in 0..10 {
            let store = Arc::clone(&store);
            handles.push(thread::spawn(move || {
                for j in 0..100 {
                    let key = format!("key-{}-{}", i, j);
                    store.set(key.clone(), Item::new(i * 100 + j));
                    store.get(&key);
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(store.len(), 1000);
        for i in 0..10 {
            for j in 0..100 {
                let item = store.get(&format!("key-{}-{}", i, j)).unwrap();
                assert_eq!(item.value, i * 100 + j);
            }
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_same_key() {
        let store = Arc::new(store(Duration::from_secs(60)));
        let mut handles = vec![];

        for i in 0..8u32 {
            let store = Arc::clone(&store);
            handles.push(thread::spawn(move || {
                let mut stored = 0u64;
                for j in 0..200u32 {
                    if j % 2 == 0 {
                        store.set("shared", Item::with_ttl(i, Duration::from_millis(5)));
                    } else {
                        if store.add("shared", Item::new(i)) {
                            stored += 1;
                        }
                        store.get(&"shared");
                    }
                }
                stored
            }));
        }

        let mut stored = 0;
        for handle in handles {
            stored += handle.join().unwrap();
        }

        // Every add is counted exactly once, as stored or rejected
        let stats = store.stats();
        assert_eq!(stats.set_ops, 800);
        assert_eq!(stats.add_ops, stored);
        assert_eq!(stats.add_ops + stats.add_rejected, 800);

        // Every short-lived write eventually expires or is superseded
        store.set("shared", Item::with_ttl(99, Duration::from_secs(30)));
        sleep(Duration::from_millis(100)).await;
        assert_eq!(store.get(&"shared").map(|item| item.value), Some(99));

        // Only the long-lived watchers are left: stored adds plus the last set
        assert_eq!(store.stats().pending_watchers, stored + 1);
    }

    /// Largest whole-second validity that can still be added to `from`.
    fn max_validity_from(from: SystemTime) -> Duration {
        let (mut lo, mut hi) = (0u64, u64::MAX);
        while lo < hi {
            let mid = lo + (hi - lo + 1) / 2;
            if from.checked_add(Duration::from_secs(mid)).is_some() {
                lo = mid;
            } else {
                hi = mid - 1;
            }
        }
        Duration::from_secs(lo)
    }

    #[tokio::test]
    async fn test_resolve_saturates_near_limit_validity() {
        let now = SystemTime::now();
        let validity = max_validity_from(now + Duration::from_secs(60));
        let store = store(validity);

        // Once the clock has moved on, now + validity no longer fits
        let later = now + Duration::from_secs(3600);
        assert!(later.checked_add(validity).is_none());

        let (item, expiration) = store.resolve(Item::new(1), later);
        assert_eq!(item.expiration, Some(expiration));
        assert_eq!(expiration, deadline(later, Duration::MAX));
        assert!(!item.is_expired());
    }

    #[tokio::test]
    async fn test_set_with_huge_ttl() {
        let store = store(Duration::from_secs(60));

        store.set("forever", Item::with_ttl(1, Duration::MAX));
        let item = store.get(&"forever").unwrap();
        assert!(!item.is_expired());

        sleep(Duration::from_millis(20)).await;
        assert!(store.get(&"forever").is_some());
        assert_eq!(store.stats().pending_watchers, 1);
    }
}
