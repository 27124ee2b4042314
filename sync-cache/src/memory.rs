//! In-memory cache.
//!
//! A single `RwLock` guards the whole map: writes are exclusive, reads run
//! concurrently with each other. Counters are atomics so `get` only needs
//! the read lock.
//!
//! Expired entries found by `get` are evicted lazily: the read guard is
//! released first, then a separate write-locked step removes the entry if
//! it is still expired.

use crate::{Cache, CacheEntry, CacheStatistics, Expiration};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tasksync_core::{Clock, SystemClock};

/// Thread-safe in-memory TTL cache.
pub struct MemoryCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
    clock: Arc<dyn Clock>,
    total_requests: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
}

enum Lookup {
    Hit(Vec<u8>),
    Expired,
    Missing,
}

impl MemoryCache {
    /// Create an empty cache on the wall clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create an empty cache reading time from `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            clock,
            total_requests: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Remove `key` if it is still expired once the write lock is held.
    ///
    /// Another writer may have replaced the entry between the read and
    /// this step; a fresh value must survive.
    fn evict_if_expired(&self, key: &str) {
        let now = self.clock.now();
        let mut entries = self.entries.write();
        if entries.get(key).is_some_and(|e| e.is_expired(now)) {
            entries.remove(key);
            tracing::debug!(key, "Evicted expired cache entry");
        }
    }

    fn reset_counters(&self) {
        self.total_requests.store(0, Ordering::Relaxed);
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MemoryCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryCache")
            .field("items", &self.item_count())
            .field("clock", &self.clock)
            .finish()
    }
}

impl Cache for MemoryCache {
    fn set_raw(&self, key: &str, value: Vec<u8>, expiration: Expiration) {
        let entry = CacheEntry::new(value, expiration, self.clock.now());
        self.entries.write().insert(key.to_string(), entry);
    }

    fn get_raw(&self, key: &str) -> Option<Vec<u8>> {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        let now = self.clock.now();

        let lookup = {
            let entries = self.entries.read();
            match entries.get(key) {
                None => Lookup::Missing,
                Some(entry) if entry.is_expired(now) => Lookup::Expired,
                Some(entry) => Lookup::Hit(entry.value.clone()),
            }
        };

        match lookup {
            Lookup::Hit(value) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(value)
            }
            Lookup::Expired => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                self.evict_if_expired(key);
                None
            }
            Lookup::Missing => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    fn remove(&self, key: &str) {
        self.entries.write().remove(key);
    }

    fn exists(&self, key: &str) -> bool {
        let now = self.clock.now();
        self.entries
            .read()
            .get(key)
            .is_some_and(|e| !e.is_expired(now))
    }

    fn clear_all(&self) {
        let mut entries = self.entries.write();
        let removed = entries.len();
        entries.clear();
        self.reset_counters();
        tracing::debug!(removed, "Cache cleared");
    }

    fn clear_expired(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, e| !e.is_expired(now));
        before - entries.len()
    }

    fn statistics(&self) -> CacheStatistics {
        let entries = self.entries.read();
        CacheStatistics {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            item_count: entries.len(),
            cache_size: entries.values().map(CacheEntry::size).sum(),
        }
    }

    fn item_count(&self) -> usize {
        self.entries.read().len()
    }

    fn record_decode_miss(&self) {
        // Saturating: a clear_all may have reset the counters in between.
        let _ = self
            .hits
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |h| h.checked_sub(1));
        self.misses.fetch_add(1, Ordering::Relaxed);
    }
}
