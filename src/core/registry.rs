//! Shared loader registry
//!
//! Several caches may view the same backing collection (e.g. one list per
//! view of a media library). The registry hands out one shared instance per
//! key and keeps only weak references, so an entry disappears with its last
//! user.
//!
//! - `get_or_insert_with()`: O(1) lookup, builds the value on a miss
//! - `purge()`: drop keys whose value is gone
//! - hit/miss counters for monitoring

use log::{debug, trace};
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

/// Lookup statistics
#[derive(Debug, Default)]
pub struct RegistryStats {
    hits: AtomicU64,
    misses: AtomicU64,
}

impl RegistryStats {
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn hit_rate(&self) -> f64 {
        let total = self.hits() + self.misses();
        if total == 0 { 0.0 } else { self.hits() as f64 / total as f64 }
    }

    pub fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
    }
}

pub struct SourceRegistry<K, V: ?Sized> {
    entries: Mutex<HashMap<K, Weak<V>>>,
    stats: RegistryStats,
}

impl<K, V: ?Sized> std::fmt::Debug for SourceRegistry<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceRegistry")
            .field("hits", &self.stats.hits())
            .field("misses", &self.stats.misses())
            .finish()
    }
}

impl<K, V: ?Sized> Default for SourceRegistry<K, V> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            stats: RegistryStats::default(),
        }
    }
}

impl<K: Hash + Eq + Clone + std::fmt::Debug, V: ?Sized> SourceRegistry<K, V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared value for `key`, built with `make` if no live one exists.
    pub fn get_or_insert_with(&self, key: &K, make: impl FnOnce() -> Arc<V>) -> Arc<V> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(value) = entries.get(key).and_then(Weak::upgrade) {
            self.stats.record_hit();
            trace!("Registry hit: {:?}", key);
            return value;
        }

        self.stats.record_miss();
        debug!("Registry miss: {:?}, creating", key);
        let value = make();
        entries.insert(key.clone(), Arc::downgrade(&value));
        value
    }

    /// Live value for `key`, without creating one. A dead entry is evicted.
    pub fn get(&self, key: &K) -> Option<Arc<V>> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let value = entries.get(key).and_then(Weak::upgrade);
        match value {
            Some(_) => self.stats.record_hit(),
            None => {
                self.stats.record_miss();
                if entries.remove(key).is_some() {
                    trace!("Registry evicted dead entry: {:?}", key);
                }
            }
        }
        value
    }

    /// Number of keys with a live value.
    pub fn len(&self) -> usize {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.values().filter(|weak| weak.strong_count() > 0).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forget keys whose value was dropped. Returns how many were removed.
    pub fn purge(&self) -> usize {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let before = entries.len();
        entries.retain(|_, weak| weak.strong_count() > 0);
        let removed = before - entries.len();
        if removed > 0 {
            debug!("Registry purged {} dead entries", removed);
        }
        removed
    }

    pub fn stats(&self) -> &RegistryStats {
        &self.stats
    }
}
