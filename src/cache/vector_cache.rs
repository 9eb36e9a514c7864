//! Bounded hypervector cache with LRU eviction and pinning.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use lru::LruCache;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::memory::hypervector::HyperVector;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Total entries, pinned included. Only unpinned entries are evicted.
    pub max_entries: usize,

    /// Idle time after which an unpinned entry is dropped by cleanup.
    pub max_age: Duration,

    /// Period of the background cleanup timer.
    pub cleanup_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 1000,
            max_age: Duration::from_secs(300),
            cleanup_interval: Duration::from_secs(60),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub pinned: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

struct Cached {
    vector: HyperVector,
    last_access: Instant,
}

impl Cached {
    fn new(vector: HyperVector) -> Self {
        Self {
            vector,
            last_access: Instant::now(),
        }
    }
}

pub struct VectorCache {
    entries: LruCache<String, Cached>,
    pinned: HashMap<String, Cached>,
    config: CacheConfig,
    stats: CacheStats,
}

impl VectorCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            entries: LruCache::unbounded(),
            pinned: HashMap::new(),
            config,
            stats: CacheStats::default(),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn len(&self) -> usize {
        self.entries.len() + self.pinned.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, key: &str) -> bool {
        self.pinned.contains_key(key) || self.entries.contains(key)
    }

    /// Look up `key`, refreshing its recency and idle clock.
    pub fn get(&mut self, key: &str) -> Option<&HyperVector> {
        let now = Instant::now();
        if let Some(hit) = self.pinned.get_mut(key) {
            hit.last_access = now;
            self.stats.hits += 1;
            return Some(&hit.vector);
        }
        match self.entries.get_mut(key) {
            Some(hit) => {
                hit.last_access = now;
                self.stats.hits += 1;
                Some(&hit.vector)
            }
            None => {
                self.stats.misses += 1;
                None
            }
        }
    }

    /// Look up without touching recency or stats.
    pub fn peek(&self, key: &str) -> Option<&HyperVector> {
        self.pinned
            .get(key)
            .or_else(|| self.entries.peek(key))
            .map(|c| &c.vector)
    }

    /// Insert or replace. A pinned key stays pinned.
    ///
    /// Returns whether the entry is still cached afterwards: when pinned
    /// entries alone fill `max_entries`, a new unpinned entry is evicted
    /// immediately and `false` is returned.
    pub fn put(&mut self, key: impl Into<String>, vector: HyperVector) -> bool {
        let key = key.into();
        if let Some(slot) = self.pinned.get_mut(&key) {
            *slot = Cached::new(vector);
            return true;
        }
        self.entries.put(key.clone(), Cached::new(vector));
        self.evict_over_capacity();
        self.entries.contains(&key)
    }

    /// Exempt `key` from eviction and idle cleanup.
    pub fn pin(&mut self, key: &str) -> bool {
        if self.pinned.contains_key(key) {
            return true;
        }
        match self.entries.pop(key) {
            Some(entry) => {
                self.pinned.insert(key.to_string(), entry);
                true
            }
            None => false,
        }
    }

    pub fn unpin(&mut self, key: &str) -> bool {
        match self.pinned.remove(key) {
            Some(entry) => {
                self.entries.put(key.to_string(), entry);
                self.evict_over_capacity();
                true
            }
            None => false,
        }
    }

    pub fn is_pinned(&self, key: &str) -> bool {
        self.pinned.contains_key(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<HyperVector> {
        self.pinned
            .remove(key)
            .or_else(|| self.entries.pop(key))
            .map(|c| c.vector)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.pinned.clear();
    }

    /// Drop unpinned entries idle for longer than `max_age` as of `now`.
    pub fn remove_idle(&mut self, now: Instant) -> usize {
        let max_age = self.config.max_age;
        let stale: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, c)| now.saturating_duration_since(c.last_access) > max_age)
            .map(|(k, _)| k.clone())
            .collect();
        for key in &stale {
            self.entries.pop(key);
        }
        if !stale.is_empty() {
            self.stats.expirations += stale.len() as u64;
            debug!(removed = stale.len(), remaining = self.len(), "vector cache cleanup");
        }
        stale.len()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.len(),
            pinned: self.pinned.len(),
            ..self.stats.clone()
        }
    }

    fn evict_over_capacity(&mut self) {
        while self.len() > self.config.max_entries {
            match self.entries.pop_lru() {
                Some((key, _)) => {
                    self.stats.evictions += 1;
                    debug!(%key, "vector cache eviction");
                }
                // Only pinned entries left.
                None => break,
            }
        }
    }
}

impl Default for VectorCache {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernels::random_pool::RandomPool;

    fn vector(seed: u64) -> HyperVector {
        let mut pool = RandomPool::with_seed(2048, seed);
        HyperVector::random(1000, &mut pool).unwrap()
    }

    fn small_cache(max_entries: usize) -> VectorCache {
        VectorCache::new(CacheConfig {
            max_entries,
            max_age: Duration::from_millis(50),
            ..Default::default()
        })
    }

    #[test]
    fn test_lru_eviction_order() {
        let mut cache = small_cache(2);
        cache.put("a", vector(1));
        cache.put("b", vector(2));
        // Touch "a" so "b" becomes least recently used.
        assert!(cache.get("a").is_some());
        cache.put("c", vector(3));

        assert!(cache.contains("a"));
        assert!(!cache.contains("b"));
        assert!(cache.contains("c"));
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_peek_does_not_refresh() {
        let mut cache = small_cache(2);
        cache.put("a", vector(1));
        cache.put("b", vector(2));
        assert!(cache.peek("a").is_some());
        cache.put("c", vector(3));
        assert!(!cache.contains("a"));
        assert_eq!(cache.stats().hits, 0);
    }

    #[test]
    fn test_pinned_exempt_from_eviction() {
        let mut cache = small_cache(2);
        cache.put("keep", vector(1));
        assert!(cache.pin("keep"));
        cache.put("b", vector(2));
        cache.put("c", vector(3));
        cache.put("d", vector(4));

        assert!(cache.contains("keep"));
        assert!(cache.contains("d"));
        assert_eq!(cache.len(), 2);
        assert!(!cache.pin("missing"));
    }

    #[test]
    fn test_put_reports_eviction_when_pins_fill_capacity() {
        let mut cache = small_cache(2);
        assert!(cache.put("p1", vector(1)));
        assert!(cache.put("p2", vector(2)));
        cache.pin("p1");
        cache.pin("p2");

        assert!(!cache.put("x", vector(3)));
        assert!(!cache.contains("x"));
        assert_eq!(cache.len(), 2);
        // Replacing a pinned value always sticks.
        assert!(cache.put("p1", vector(4)));
        assert_eq!(cache.peek("p1"), Some(&vector(4)));
    }

    #[test]
    fn test_unpin_rejoins_lru() {
        let mut cache = small_cache(3);
        cache.put("a", vector(1));
        cache.pin("a");
        assert!(cache.unpin("a"));
        assert!(!cache.is_pinned("a"));
        cache.put("b", vector(2));
        cache.put("c", vector(3));
        cache.put("d", vector(4));
        assert!(!cache.contains("a"));
    }

    #[test]
    fn test_remove_idle_skips_pinned() {
        let mut cache = small_cache(10);
        cache.put("idle", vector(1));
        cache.put("pinned", vector(2));
        cache.pin("pinned");

        let later = Instant::now() + Duration::from_secs(1);
        assert_eq!(cache.remove_idle(later), 1);
        assert!(!cache.contains("idle"));
        assert!(cache.contains("pinned"));
        assert_eq!(cache.stats().expirations, 1);

        assert_eq!(cache.remove_idle(Instant::now()), 0);
    }

    #[test]
    fn test_stats_and_remove() {
        let mut cache = small_cache(4);
        let v = vector(9);
        cache.put("k", v.clone());
        assert_eq!(cache.get("k"), Some(&v));
        assert!(cache.get("nope").is_none());
        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses), (1, 1));
        assert!((stats.hit_rate() - 0.5).abs() < 1e-12);
        assert_eq!(cache.remove("k"), Some(v));
        assert!(cache.is_empty());
    }
}
