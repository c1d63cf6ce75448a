//! The caching contract.
//!
//! [`Cache`] is the small interface callers program against: get, set,
//! add-if-absent and flush. [`Store`] is the implementation shipped with
//! this crate.

use crate::storage::{Item, Store};
use std::hash::Hash;

/// A key-value cache of expiring items.
pub trait Cache<K, V> {
    /// Gets the item stored for a key, if any.
    fn get(&self, key: &K) -> Option<Item<V>>;

    /// Stores an item regardless of whether the key is present.
    fn set(&self, key: K, item: Item<V>);

    /// Stores an item only if the key is missing. Returns whether it was stored.
    fn add(&self, key: K, item: Item<V>) -> bool;

    /// Removes every item.
    fn flush(&self);
}

impl<K, V> Cache<K, V> for Store<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn get(&self, key: &K) -> Option<Item<V>> {
        Store::get(self, key)
    }

    fn set(&self, key: K, item: Item<V>) {
        Store::set(self, key, item)
    }

    fn add(&self, key: K, item: Item<V>) -> bool {
        Store::add(self, key, item)
    }

    fn flush(&self) {
        Store::flush(self)
    }
}
