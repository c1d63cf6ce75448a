//! Storage Module
//!
//! This module provides the expiring key-value store at the heart of ttlstore.
//! It includes the item type, the store itself, and the per-entry expiry
//! watchers that remove items once they are due.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Store<K, V>                            │
//! │        RwLock<HashMap<K, Item<V>>> + default_validity       │
//! └─────────────────────────────────────────────────────────────┘
//!        ▲                  ▲                      ▲
//!        │ delete if due    │ delete if due        │ delete if due
//!  ┌─────┴──────┐     ┌─────┴──────┐         ┌─────┴──────┐
//!  │ Watcher #1 │     │ Watcher #2 │   ...   │ Watcher #N │
//!  │ (one task  │     │ per stored │         │ insertion) │
//!  └────────────┘     └────────────┘         └────────────┘
//! ```
//!
//! ## Features
//!
//! - **Per-Entry Expiry**: Each insertion schedules its own deletion
//! - **RwLock**: Multiple concurrent readers, exclusive writers
//! - **Supersede-Safe**: Overwrites are never removed by an older watcher
//! - **Structured Shutdown**: Dropping the store cancels all watchers
//!
//! ## Example
//!
//! ```
//! use ttlstore::storage::{Item, Store};
//! use bytes::Bytes;
//! use std::time::Duration;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), ttlstore::storage::StoreError> {
//! let store = Store::new(Duration::from_secs(300))?;
//!
//! // Basic operations
//! store.set("name", Item::new(Bytes::from("Ariz")));
//! let item = store.get(&"name").unwrap();
//! assert_eq!(item.value, Bytes::from("Ariz"));
//! assert!(!item.is_expired());
//!
//! // Set with TTL
//! store.set(
//!     "session",
//!     Item::with_ttl(Bytes::from("token123"), Duration::from_secs(3600)),
//! );
//!
//! // Cancel the watchers and wait for them to finish
//! store.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod expiry;
pub mod item;
pub mod store;

// Re-export commonly used types
pub use item::Item;
pub use store::{Store, StoreError, StoreStats};
