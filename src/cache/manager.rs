//! Shared cache context: vector cache, scratch pool, semantic vectors.

use std::collections::HashMap;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};

use crate::cache::memory_pool::MemoryPool;
use crate::cache::vector_cache::{CacheConfig, CacheStats, VectorCache};
use crate::error::Result;
use crate::kernels::random_pool::RandomPool;
use crate::memory::hypervector::HyperVector;

/// Named primitives every manager can hand out.
pub const SEMANTIC_PRIMITIVES: [&str; 6] = [
    "NEGATION",
    "CAUSALITY",
    "TEMPORAL",
    "SPATIAL",
    "SIMILARITY",
    "POSSESSION",
];

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// 64-bit FNV-1a.
pub fn fnv1a(name: &str) -> u64 {
    name.bytes().fold(FNV_OFFSET, |hash, b| {
        (hash ^ b as u64).wrapping_mul(FNV_PRIME)
    })
}

pub struct CacheManager {
    dimensions: usize,
    cache: Arc<Mutex<VectorCache>>,
    pool: Mutex<MemoryPool>,
    semantic: RwLock<HashMap<String, HyperVector>>,
}

impl CacheManager {
    pub fn new(dimensions: usize, config: CacheConfig) -> Result<Self> {
        // Validates the dimension once, up front.
        semantic_from_seed(dimensions, 0)?;
        Ok(Self {
            dimensions,
            cache: Arc::new(Mutex::new(VectorCache::new(config))),
            pool: Mutex::new(MemoryPool::default()),
            semantic: RwLock::new(HashMap::new()),
        })
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Deterministic vector for `name`; identical across managers and runs.
    pub fn semantic_vector(&self, name: &str) -> Result<HyperVector> {
        if let Some(v) = self.semantic.read().get(name) {
            return Ok(v.clone());
        }
        let vector = semantic_from_seed(self.dimensions, fnv1a(name))?;
        self.semantic
            .write()
            .entry(name.to_string())
            .or_insert_with(|| vector.clone());
        Ok(vector)
    }

    /// Materialize every entry of [`SEMANTIC_PRIMITIVES`].
    pub fn preload_semantics(&self) -> Result<usize> {
        for name in SEMANTIC_PRIMITIVES {
            self.semantic_vector(name)?;
        }
        Ok(self.semantic.read().len())
    }

    pub fn get(&self, key: &str) -> Option<HyperVector> {
        self.cache.lock().get(key).cloned()
    }

    /// See [`VectorCache::put`]; `false` when the entry could not be kept.
    pub fn put(&self, key: impl Into<String>, vector: HyperVector) -> bool {
        self.cache.lock().put(key, vector)
    }

    /// Cached vector for `key`, computing and inserting it on a miss.
    pub fn get_or_insert_with(
        &self,
        key: &str,
        make: impl FnOnce() -> Result<HyperVector>,
    ) -> Result<HyperVector> {
        if let Some(v) = self.get(key) {
            return Ok(v);
        }
        let v = make()?;
        if !self.put(key, v.clone()) {
            debug!(key, "cache full of pinned entries, value not cached");
        }
        Ok(v)
    }

    pub fn cache(&self) -> Arc<Mutex<VectorCache>> {
        Arc::clone(&self.cache)
    }

    pub fn with_pool<R>(&self, f: impl FnOnce(&mut MemoryPool) -> R) -> R {
        f(&mut self.pool.lock())
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.lock().stats()
    }

    /// Spawn a thread running idle cleanup every `interval` until the
    /// returned handle is dropped.
    pub fn start_cleanup(&self, interval: Duration) -> CleanupTimer {
        let cache = Arc::clone(&self.cache);
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let handle = std::thread::spawn(move || loop {
            match stop_rx.recv_timeout(interval) {
                Err(RecvTimeoutError::Timeout) => {
                    let removed = cache.lock().remove_idle(Instant::now());
                    if removed > 0 {
                        debug!(removed, "periodic cache cleanup");
                    }
                }
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }
        });
        info!(interval_ms = crate::memory::entry::duration_ms(interval), "cache cleanup timer started");
        CleanupTimer {
            stop: Some(stop_tx),
            handle: Some(handle),
        }
    }

    pub fn clear(&self) {
        self.cache.lock().clear();
        self.pool.lock().clear();
        self.semantic.write().clear();
    }
}

fn semantic_from_seed(dimensions: usize, seed: u64) -> Result<HyperVector> {
    let mut pool = RandomPool::with_seed(dimensions, seed);
    HyperVector::random(dimensions, &mut pool)
}

/// Stops the cleanup thread when dropped.
pub struct CleanupTimer {
    stop: Option<mpsc::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl CleanupTimer {
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Some(tx) = self.stop.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for CleanupTimer {
    fn drop(&mut self) {
        self.shutdown();
    }
}
