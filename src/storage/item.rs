//! Cache Items
//!
//! An [`Item`] pairs an opaque value with an absolute expiration timestamp.
//! Expirations are wall-clock [`SystemTime`] values, so they compare the same
//! way regardless of the local timezone.
//!
//! An item built with [`Item::new`] carries no expiration. The store resolves
//! it to `now + default_validity` when the item is inserted, so every item
//! read back from a store has a concrete expiration.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Seconds from the epoch to the end of year 9999 UTC, representable on
/// every platform's `SystemTime`.
const FAR_FUTURE_SECS: u64 = 253_402_300_799;

/// Returns `from + ttl`, saturating to the end of year 9999 when the sum
/// is not a representable point in time.
pub(crate) fn deadline(from: SystemTime, ttl: Duration) -> SystemTime {
    from.checked_add(ttl)
        .unwrap_or_else(|| UNIX_EPOCH + Duration::from_secs(FAR_FUTURE_SECS))
}

/// A cached value together with the moment it stops being valid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item<V> {
    /// The cached value. The store never inspects it.
    pub value: V,
    /// When this item expires (None = use the store's default validity)
    pub expiration: Option<SystemTime>,
}

impl<V> Item<V> {
    /// Creates an item that will use the store's default validity.
    pub fn new(value: V) -> Self {
        Self {
            value,
            expiration: None,
        }
    }

    /// Creates an item expiring at an absolute point in time.
    pub fn with_expiration(value: V, expiration: SystemTime) -> Self {
        Self {
            value,
            expiration: Some(expiration),
        }
    }

    /// Creates an item expiring `ttl` from now.
    ///
    /// A `ttl` too large to add to the current time yields an item that
    /// expires at the end of year 9999.
    pub fn with_ttl(value: V, ttl: Duration) -> Self {
        Self::with_expiration(value, deadline(SystemTime::now(), ttl))
    }

    /// Checks if this item has expired.
    ///
    /// An item without an expiration counts as expired: it has not been
    /// through a store yet, and its deadline is the zero timestamp.
    #[inline]
    pub fn is_expired(&self) -> bool {
        self.expiration
            .map(|exp| SystemTime::now() > exp)
            .unwrap_or(true)
    }

    /// Returns the remaining time to live, or None if no expiration is set.
    pub fn ttl(&self) -> Option<Duration> {
        self.expiration.map(|exp| {
            exp.duration_since(SystemTime::now())
                .unwrap_or(Duration::ZERO)
        })
    }
}
