use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::debug;

const PREALLOCATE_LIMIT: usize = 1024;

/// Statistics about the value cache
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValueCacheStats {
    pub entries: usize,
    pub max_items: usize,
    pub hits: u64,
    pub misses: u64,
}

/// Map plus insertion queue; both always hold the same key set
#[derive(Debug)]
struct Entries<V> {
    map: HashMap<String, V>,
    queue: VecDeque<String>,
}

/// A bounded value cache evicting by first insertion
///
/// `get` hands out clones, so large values should be stored behind an `Arc`.
#[derive(Debug)]
pub struct ValueCache<V> {
    entries: Mutex<Entries<V>>,
    /// Maximum number of items, 0 disables the cache
    max_items: usize,
    /// Keys dropped per eviction batch
    purge_items: usize,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<V: Clone> ValueCache<V> {
    /// Create a cache holding at most `max_items`, evicting `purge_items` at a time
    pub fn new(max_items: usize, purge_items: usize) -> Self {
        Self {
            entries: Mutex::new(Entries {
                map: HashMap::with_capacity(max_items.min(PREALLOCATE_LIMIT)),
                queue: VecDeque::with_capacity(max_items.min(PREALLOCATE_LIMIT)),
            }),
            max_items,
            // Evicting nothing would let the map outgrow max_items.
            purge_items: purge_items.max(1),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Clone of the cached value; a hit does not refresh the key
    pub fn get(&self, key: &str) -> Option<V> {
        let value = self.lock().map.get(key).cloned();
        match value {
            Some(_) => self.hits.fetch_add(1, Ordering::Relaxed),
            None => self.misses.fetch_add(1, Ordering::Relaxed),
        };
        value
    }

    /// Insert or overwrite `key`
    ///
    /// A new key arriving at a full cache first evicts the oldest inserted
    /// keys. Overwriting keeps the key's original place in eviction order.
    pub fn put(&self, key: impl Into<String>, value: V) {
        if self.max_items == 0 {
            return;
        }

        let key = key.into();
        let mut guard = self.lock();
        let entries = &mut *guard;

        if let Some(slot) = entries.map.get_mut(&key) {
            *slot = value;
            return;
        }

        if entries.map.len() >= self.max_items {
            let count = self.purge_items.min(entries.queue.len());
            for evicted in entries.queue.drain(..count) {
                entries.map.remove(&evicted);
            }
            debug!(
                evicted = count,
                remaining = entries.map.len(),
                "Value cache purged"
            );
        }

        entries.map.insert(key.clone(), value);
        entries.queue.push_back(key);
        debug_assert_eq!(entries.map.len(), entries.queue.len());
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.lock().map.contains_key(key)
    }

    pub fn size(&self) -> usize {
        self.lock().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Drop every entry
    pub fn clear(&self) {
        let mut entries = self.lock();
        entries.map.clear();
        entries.queue.clear();
    }

    pub fn stats(&self) -> ValueCacheStats {
        ValueCacheStats {
            entries: self.size(),
            max_items: self.max_items,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Entries<V>> {
        // put() never unwinds between the map and queue updates
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
