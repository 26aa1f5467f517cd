//! Stale-while-revalidate TTL cache.
//!
//! Entries are immutable: `set` replaces the whole entry, never mutates
//! one in place. Expired entries are still served while exactly one
//! concurrent caller per stale interval is told to refresh — the
//! single-flight flag lives on the entry itself, so there is no cross-key
//! contention. The hit path takes a read lock, clones an `Arc`, and
//! returns; it never waits on a refresh.
//!
//! Time is injected via `_at` suffixed methods for deterministic tests;
//! production callers use the plain methods.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

/// Result of a cache lookup.
#[derive(Debug, Clone)]
pub struct CacheLookup<V> {
    /// The cached value. `None` only when `hit` is false.
    pub value: Option<V>,
    /// Whether an entry (fresh or stale) existed for the key.
    pub hit: bool,
    /// Whether this caller won the refresh race for a stale entry.
    /// At most one concurrent caller per stale interval sees `true`.
    pub needs_refresh: bool,
}

impl<V> CacheLookup<V> {
    fn miss() -> Self {
        Self {
            value: None,
            hit: false,
            needs_refresh: false,
        }
    }
}

struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
    refreshing: AtomicBool,
}

struct Inner<V> {
    entries: RwLock<HashMap<String, Arc<CacheEntry<V>>>>,
    ttl: Duration,
}

/// A TTL cache with stale-while-revalidate semantics.
///
/// Cloning is cheap (the store is shared), so background refresh tasks can
/// hold their own handle.
pub struct TtlCache<V> {
    inner: Arc<Inner<V>>,
}

impl<V> Clone for TtlCache<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V: Clone> TtlCache<V> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                entries: RwLock::new(HashMap::new()),
                ttl,
            }),
        }
    }

    /// Look up a key.
    ///
    /// Fresh entry: `{value, hit: true, needs_refresh: false}`. Stale
    /// entry: the value is still returned and the first caller to win the
    /// entry's refresh flag gets `needs_refresh: true`. Missing entry:
    /// `{None, hit: false, needs_refresh: false}`.
    pub fn get(&self, key: &str) -> CacheLookup<V> {
        self.get_at(key, Instant::now())
    }

    /// [`get`](Self::get) with an explicit "now" for deterministic tests.
    pub fn get_at(&self, key: &str, now: Instant) -> CacheLookup<V> {
        let entry = {
            let map = self
                .inner
                .entries
                .read()
                .unwrap_or_else(PoisonError::into_inner);
            map.get(key).cloned()
        };

        let Some(entry) = entry else {
            return CacheLookup::miss();
        };

        if now < entry.expires_at {
            return CacheLookup {
                value: Some(entry.value.clone()),
                hit: true,
                needs_refresh: false,
            };
        }

        // Stale. Exactly one caller wins the refresh flag; the flag is
        // cleared only by `set` replacing the entry.
        let won = entry
            .refreshing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();

        CacheLookup {
            value: Some(entry.value.clone()),
            hit: true,
            needs_refresh: won,
        }
    }

    /// Insert or replace a value. The new entry is fresh for a full TTL
    /// and its refresh flag is clear.
    pub fn set(&self, key: &str, value: V) {
        self.set_at(key, value, Instant::now());
    }

    /// [`set`](Self::set) with an explicit "now" for deterministic tests.
    pub fn set_at(&self, key: &str, value: V, now: Instant) {
        let entry = Arc::new(CacheEntry {
            value,
            expires_at: now + self.inner.ttl,
            refreshing: AtomicBool::new(false),
        });
        let mut map = self
            .inner
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        map.insert(key.to_string(), entry);
    }

    /// Remove an entry. The next lookup misses and resolves synchronously.
    pub fn delete(&self, key: &str) {
        let mut map = self
            .inner
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        map.remove(key);
    }

    /// Number of live entries (fresh and stale).
    pub fn len(&self) -> usize {
        self.inner
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
