//! Cache Store Module
//!
//! Size-bounded response cache combining HashMap storage with LRU tracking
//! and lazy TTL expiration.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::cache::{CacheEntry, LruTracker};

// == Cache Trait ==
/// Storage backing for cached responses.
///
/// No operation fails: absence is reported through `Option`, and capacity
/// pressure is resolved by eviction rather than rejection.
pub trait Cache: Send + Sync {
    /// Returns a fresh entry and marks it most recently used.
    fn get(&self, key: &str) -> Option<Arc<CacheEntry>>;

    /// Inserts or fully replaces the entry stored under `key`.
    fn set(&self, key: String, entry: CacheEntry);

    /// Removes `key` if present.
    fn delete(&self, key: &str);

    /// Removes every entry.
    fn clear(&self);

    /// Total accounted bytes of stored entries.
    fn size(&self) -> u64;

    /// Number of stored entries.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// == Memory Cache ==
/// In-memory LRU cache bounded by total entry size.
///
/// A single mutex guards the map, the access order and the size counter
/// together, so "check size, evict, insert" is atomic.
#[derive(Debug)]
pub struct MemoryCache {
    inner: Mutex<CacheInner>,
    /// Maximum total accounted size in bytes
    max_size: u64,
}

#[derive(Debug, Default)]
struct CacheInner {
    entries: HashMap<String, Arc<CacheEntry>>,
    lru: LruTracker,
    /// Sum of `size` over `entries`
    size: u64,
}

impl CacheInner {
    fn remove(&mut self, key: &str) -> bool {
        match self.entries.remove(key) {
            Some(entry) => {
                self.lru.remove(key);
                self.size -= entry.size;
                true
            }
            None => false,
        }
    }
}

impl MemoryCache {
    // == Constructor ==
    /// Creates an empty cache holding at most `max_size` bytes.
    pub fn new(max_size: u64) -> Self {
        Self {
            inner: Mutex::new(CacheInner::default()),
            max_size,
        }
    }
}

impl Cache for MemoryCache {
    // == Get ==
    /// Expired entries are removed on discovery and reported as absent.
    fn get(&self, key: &str) -> Option<Arc<CacheEntry>> {
        let mut inner = self.inner.lock();

        let entry = inner.entries.get(key)?.clone();
        if entry.is_expired() {
            inner.remove(key);
            debug!(key, "Cache entry expired");
            return None;
        }

        inner.lru.touch(key);
        Some(entry)
    }

    // == Set ==
    /// After insertion, least recently used entries are evicted until the
    /// total size fits. An entry larger than the whole cache evicts
    /// everything, itself included.
    fn set(&self, key: String, entry: CacheEntry) {
        let mut inner = self.inner.lock();

        let new_size = entry.size;
        if let Some(old) = inner.entries.insert(key.clone(), Arc::new(entry)) {
            inner.size -= old.size;
        }
        inner.size += new_size;
        inner.lru.touch(&key);

        while inner.size > self.max_size {
            let Some(oldest) = inner.lru.evict_oldest() else {
                break;
            };
            if let Some(evicted) = inner.entries.remove(&oldest) {
                inner.size -= evicted.size;
                debug!(key = %oldest, size = evicted.size, "Evicted cache entry");
            }
        }
    }

    fn delete(&self, key: &str) {
        self.inner.lock().remove(key);
    }

    fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.lru.clear();
        inner.size = 0;
    }

    fn size(&self) -> u64 {
        self.inner.lock().size
    }

    fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }
}
