//! # ttlstore - An In-Process Key-Value Cache with Per-Entry Expiry
//!
//! ttlstore memoizes arbitrary values under arbitrary keys for a bounded time.
//! There is no network and no disk: everything lives in one process.
//!
//! ## Features
//!
//! - **Generic**: Any hashable key, any cloneable value
//! - **Per-Entry TTL**: Each item carries its own absolute expiration
//! - **No Sweeper**: Every insertion schedules its own deletion on Tokio
//! - **Concurrent**: One RwLock, callers on any thread or task
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                              ttlstore                                   │
//! │                                                                         │
//! │  caller ──get/set/add/flush──> ┌──────────────────────────────────┐     │
//! │                                │           Store<K, V>            │     │
//! │                                │  RwLock<HashMap<K, Item<V>>>     │     │
//! │                                └──────────────────────────────────┘     │
//! │                                     │ spawn on set/add      ▲           │
//! │                                     ▼                       │ delete    │
//! │                                ┌──────────────────────────────────┐     │
//! │                                │   Expiry watcher (Tokio task)    │     │
//! │                                │   sleep until due, then check    │     │
//! │                                └──────────────────────────────────┘     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```
//! use ttlstore::{Item, Store};
//! use std::time::Duration;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), ttlstore::StoreError> {
//! // Items without an explicit expiration live for 30 seconds
//! let store = Store::new(Duration::from_secs(30))?;
//!
//! store.set("answer", Item::new(42));
//! store.set("short", Item::with_ttl(7, Duration::from_millis(10)));
//!
//! // Only inserts when the key is missing
//! assert!(!store.add("answer", Item::new(0)));
//! assert_eq!(store.get(&"answer").map(|item| item.value), Some(42));
//!
//! tokio::time::sleep(Duration::from_millis(50)).await;
//! assert!(store.get(&"short").is_none());
//! # Ok(())
//! # }
//! ```
//!
//! ## Module Overview
//!
//! - [`cache`]: The `Cache` trait callers can program against
//! - [`storage`]: The store, its items, and the expiry watchers
//!
//! ## Design Highlights
//!
//! ### Supersede Check
//!
//! Overwriting a key does not cancel the old watcher. When it wakes, it
//! compares the stored item's expiration with the current time and leaves
//! anything that is not yet due alone.
//!
//! ### Lazy Staleness
//!
//! `get` never evicts. An item can be observed for a moment after it expired,
//! until its watcher runs; `Item::is_expired` is the authoritative check.

pub mod cache;
pub mod storage;

// Re-export commonly used types for convenience
pub use cache::Cache;
pub use storage::{Item, Store, StoreError, StoreStats};

/// Version of ttlstore
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
