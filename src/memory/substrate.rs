//! Holographic memory substrate: keyed hypervector store with similarity
//! retrieval, consolidation and decay.
//!
//! Entries live behind an `RwLock`; similarity scoring runs under the read
//! lock and access bookkeeping takes the write lock afterwards. Every
//! stored vector has a slot in a dense layout that the backend may mirror
//! on the device. Stores write one slot, deletes swap the last slot into the
//! hole, and [`HolographicMemorySubstrate::rebuild_gpu_buffer`] rewrites all
//! of them.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::{
    CONSOLIDATE_STRENGTH_GAIN, DECAY_NOISE_FLOOR, DEFAULT_CONSOLIDATE_THRESHOLD,
    DEFAULT_DECAY_RATE, DEFAULT_DIMENSIONS, DEFAULT_MAX_AGE_MS, DEFAULT_MAX_MEMORIES,
    DEFAULT_RETRIEVE_THRESHOLD, DEFAULT_TOP_K, MIN_DIMENSIONS, RANDOM_POOL_SIZE,
};
use crate::error::{ensure_same_dims, HhmError, Result};
use crate::gpu::{GpuConfig, GpuStats};
use crate::kernels::kernel_dispatch::{select_backend, Backend, ComputeBackend};
use crate::kernels::random_pool::RandomPool;
use crate::memory::entry::{
    duration_ms, Clock, MemoryEntry, MemoryMetadata, MetadataOverrides, RetrievalResult, SystemClock,
};
use crate::memory::hypervector::HyperVector;

/// Floor for strength in the decay noise formula.
const MIN_DECAY_STRENGTH: f64 = 1e-6;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubstrateConfig {
    /// Hypervector dimension, fixed for the substrate's lifetime.
    pub dimensions: usize,

    /// Capacity hint used to pre-size the GPU resident buffer.
    pub max_memories: usize,

    /// Try the GPU backend; falls back to CPU when unavailable.
    pub use_gpu: bool,

    pub gpu: GpuConfig,

    /// Pre-generated bipolar values in the substrate's random pool.
    pub random_pool_size: usize,

    /// Seed for the random pool. `None` seeds from entropy.
    pub seed: Option<u64>,
}

impl Default for SubstrateConfig {
    fn default() -> Self {
        Self {
            dimensions: DEFAULT_DIMENSIONS,
            max_memories: DEFAULT_MAX_MEMORIES,
            use_gpu: false,
            gpu: GpuConfig::default(),
            random_pool_size: RANDOM_POOL_SIZE,
            seed: None,
        }
    }
}

impl SubstrateConfig {
    pub fn validate(&self) -> Result<()> {
        if self.dimensions < MIN_DIMENSIONS {
            return Err(HhmError::DimensionTooSmall {
                dimensions: self.dimensions,
                minimum: MIN_DIMENSIONS,
            });
        }
        if self.random_pool_size == 0 {
            return Err(HhmError::Config("random_pool_size must be positive".into()));
        }
        if self.gpu.workgroup_size == 0 {
            return Err(HhmError::Config("gpu.workgroup_size must be positive".into()));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SubstrateStats {
    pub total_memories: usize,
    pub dimensions: usize,
    pub max_memories: usize,
    pub backend: Backend,
    /// Whether retrieval currently runs against the resident GPU buffer.
    pub gpu_resident: bool,
    pub gpu: Option<GpuStats>,
    pub average_strength: f64,
    pub total_accesses: u64,
    /// Vector payload plus ids.
    pub memory_bytes: usize,
    pub oldest_timestamp: Option<u64>,
    pub newest_timestamp: Option<u64>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct DecayReport {
    pub removed: usize,
    pub noised: usize,
}

/// Entries plus their dense slot layout.
#[derive(Default)]
struct Store {
    entries: HashMap<String, MemoryEntry>,
    slots: Vec<String>,
    slot_of: HashMap<String, usize>,
}

/// Outcome of removing one slot.
struct SlotRemoval {
    /// Slot that moved into the freed position, as `(slot, id)`.
    moved: Option<(usize, String)>,
    remaining: usize,
}

impl Store {
    /// Slot for `id`, appending when new.
    fn slot_for(&mut self, id: &str) -> usize {
        if let Some(&slot) = self.slot_of.get(id) {
            return slot;
        }
        let slot = self.slots.len();
        self.slots.push(id.to_string());
        self.slot_of.insert(id.to_string(), slot);
        slot
    }

    fn remove(&mut self, id: &str) -> Option<(MemoryEntry, SlotRemoval)> {
        let entry = self.entries.remove(id)?;
        let slot = self.slot_of.remove(id)?;
        self.slots.swap_remove(slot);
        let moved = self.slots.get(slot).cloned().map(|moved_id| {
            self.slot_of.insert(moved_id.clone(), slot);
            (slot, moved_id)
        });
        Some((
            entry,
            SlotRemoval {
                moved,
                remaining: self.slots.len(),
            },
        ))
    }

    fn clear(&mut self) {
        self.entries.clear();
        self.slots.clear();
        self.slot_of.clear();
    }

    fn slot_vectors(&self) -> Vec<&HyperVector> {
        self.slots
            .iter()
            .filter_map(|id| self.entries.get(id).map(|e| &e.vector))
            .collect()
    }
}

pub struct HolographicMemorySubstrate {
    config: SubstrateConfig,
    backend: Box<dyn ComputeBackend>,
    clock: Arc<dyn Clock>,
    store: RwLock<Store>,
    pool: Mutex<RandomPool>,
}

impl HolographicMemorySubstrate {
    /// Validate `config` and pick a backend (GPU when requested and
    /// available, otherwise CPU).
    pub fn new(config: SubstrateConfig) -> Result<Self> {
        config.validate()?;
        let backend = select_backend(config.use_gpu, &config.gpu);
        Self::with_backend(config, backend, Arc::new(SystemClock))
    }

    /// Build with an explicit backend and clock.
    pub fn with_backend(
        config: SubstrateConfig,
        backend: Box<dyn ComputeBackend>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;
        let pool = match config.seed {
            Some(seed) => RandomPool::with_seed(config.random_pool_size, seed),
            None => RandomPool::new(config.random_pool_size),
        };

        if backend.kind() != Backend::Cpu {
            let stride = config.dimensions as u64 * std::mem::size_of::<f32>() as u64;
            let fit = (config.gpu.max_buffer_bytes() / stride.max(1)) as usize;
            let slots = config.max_memories.min(fit);
            if slots < config.max_memories {
                warn!(
                    max_memories = config.max_memories,
                    fit, "GPU buffer limit below capacity hint, resident search stops past it"
                );
            }
            backend.reserve_slots(config.dimensions, slots);
        }

        info!(
            dimensions = config.dimensions,
            max_memories = config.max_memories,
            backend = %backend.kind(),
            "holographic memory substrate created"
        );
        Ok(Self {
            config,
            backend,
            clock,
            store: RwLock::new(Store::default()),
            pool: Mutex::new(pool),
        })
    }

    pub fn dimensions(&self) -> usize {
        self.config.dimensions
    }

    pub fn config(&self) -> &SubstrateConfig {
        &self.config
    }

    pub fn backend(&self) -> Backend {
        self.backend.kind()
    }

    /// Random hypervector from the substrate's pool.
    pub fn random_vector(&self) -> Result<HyperVector> {
        HyperVector::random(self.config.dimensions, &mut self.pool.lock())
    }

    /// Insert or overwrite `id`.
    pub fn store(
        &self,
        id: &str,
        vector: HyperVector,
        overrides: Option<MetadataOverrides>,
    ) -> Result<()> {
        ensure_same_dims(self.config.dimensions, vector.dimensions())?;
        let metadata = MemoryMetadata::merged(self.clock.now_ms(), overrides);

        let mut store = self.store.write();
        let slot = store.slot_for(id);
        self.backend.write_slot(slot, &vector);
        store.entries.insert(
            id.to_string(),
            MemoryEntry {
                id: id.to_string(),
                vector,
                metadata,
            },
        );
        debug!(id, slot, total = store.entries.len(), "stored memory");
        Ok(())
    }

    /// Up to `k` entries with similarity `>= threshold`, best first (ties
    /// broken by id). Returned entries have their access bookkeeping bumped.
    pub fn retrieve(&self, query: &HyperVector, k: usize, threshold: f32) -> Result<Vec<RetrievalResult>> {
        ensure_same_dims(self.config.dimensions, query.dimensions())?;

        let mut hits: Vec<(String, f32)> = {
            let store = self.store.read();
            if store.slots.is_empty() || k == 0 {
                return Ok(Vec::new());
            }
            let scores = match self.backend.resident_similarities(query, store.slots.len()) {
                Some(scores) => scores,
                None => self.backend.similarities(query, &store.slot_vectors())?,
            };
            store
                .slots
                .iter()
                .zip(scores)
                .filter(|(_, score)| *score >= threshold)
                .map(|(id, score)| (id.clone(), score))
                .collect()
        };
        hits.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        hits.truncate(k);

        let now = self.clock.now_ms();
        let mut store = self.store.write();
        let results: Vec<RetrievalResult> = hits
            .into_iter()
            // Entries deleted between the two locks drop out.
            .filter_map(|(id, similarity)| {
                let entry = store.entries.get_mut(&id)?;
                entry.metadata.access_count += 1;
                entry.metadata.last_accessed = now;
                Some((entry.clone(), similarity))
            })
            .enumerate()
            .map(|(i, (entry, similarity))| RetrievalResult {
                entry,
                similarity,
                rank: i + 1,
            })
            .collect();
        debug!(returned = results.len(), k, threshold, "retrieve");
        Ok(results)
    }

    /// [`retrieve`](Self::retrieve) with `k = 10`, `threshold = 0.3`.
    pub fn retrieve_default(&self, query: &HyperVector) -> Result<Vec<RetrievalResult>> {
        self.retrieve(query, DEFAULT_TOP_K, DEFAULT_RETRIEVE_THRESHOLD)
    }

    /// Reinforce entries accessed at least `strength_threshold` times:
    /// re-bind with a fresh random vector, scale strength by 1.1, reset the
    /// access count. Returns how many were consolidated.
    pub fn consolidate(&self, strength_threshold: u64) -> Result<usize> {
        let dims = self.config.dimensions;
        let mut guard = self.store.write();
        let store = &mut *guard;
        let mut consolidated = 0;

        for (slot, id) in store.slots.iter().enumerate() {
            let entry = match store.entries.get_mut(id) {
                Some(entry) if entry.metadata.access_count >= strength_threshold => entry,
                _ => continue,
            };
            let fresh = HyperVector::random(dims, &mut self.pool.lock())?;
            entry.vector = self.backend.circular_convolution(&entry.vector, &fresh)?;
            entry.metadata.strength *= CONSOLIDATE_STRENGTH_GAIN;
            entry.metadata.access_count = 0;
            self.backend.write_slot(slot, &entry.vector);
            consolidated += 1;
        }

        if consolidated > 0 {
            info!(consolidated, strength_threshold, "memories consolidated");
        }
        Ok(consolidated)
    }

    pub fn consolidate_default(&self) -> Result<usize> {
        self.consolidate(DEFAULT_CONSOLIDATE_THRESHOLD)
    }

    /// Age-based forgetting. Entries idle longer than `max_age` are removed;
    /// others receive `decay_rate · (age / max_age) / strength` bit-flip
    /// noise when that exceeds 0.01, losing the same fraction of strength.
    pub fn decay(&self, decay_rate: f64, max_age: Duration) -> DecayReport {
        let now = self.clock.now_ms();
        let max_age_ms = duration_ms(max_age);
        let mut report = DecayReport::default();
        let mut expired = Vec::new();

        let mut guard = self.store.write();
        let store = &mut *guard;
        for (slot, id) in store.slots.iter().enumerate() {
            let Some(entry) = store.entries.get_mut(id) else {
                continue;
            };
            let age = now.saturating_sub(entry.metadata.last_accessed);
            if age > max_age_ms {
                expired.push(id.clone());
                continue;
            }
            let age_fraction = if max_age_ms == 0 {
                0.0
            } else {
                age as f64 / max_age_ms as f64
            };
            let strength = entry.metadata.strength.max(MIN_DECAY_STRENGTH);
            let noise = (decay_rate * age_fraction / strength).min(1.0);
            if noise > DECAY_NOISE_FLOOR {
                entry.vector = entry.vector.add_noise(noise, self.pool.lock().rng());
                entry.metadata.strength = (entry.metadata.strength * (1.0 - noise)).max(0.0);
                self.backend.write_slot(slot, &entry.vector);
                report.noised += 1;
                debug!(id = %id, age_ms = age, noise, "decayed memory");
            }
        }

        for id in &expired {
            if self.remove_locked(store, id).is_some() {
                report.removed += 1;
                debug!(id = %id, "expired memory removed");
            }
        }
        if report.removed > 0 || report.noised > 0 {
            info!(removed = report.removed, noised = report.noised, "decay pass");
        }
        report
    }

    /// [`decay`](Self::decay) with rate 0.01 and a 30 day maximum age.
    pub fn decay_default(&self) -> DecayReport {
        self.decay(DEFAULT_DECAY_RATE, Duration::from_millis(DEFAULT_MAX_AGE_MS))
    }

    pub fn get(&self, id: &str) -> Option<MemoryEntry> {
        self.store.read().entries.get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.store.read().entries.contains_key(id)
    }

    /// Ids in slot order.
    pub fn ids(&self) -> Vec<String> {
        self.store.read().slots.clone()
    }

    pub fn delete(&self, id: &str) -> bool {
        let mut store = self.store.write();
        self.remove_locked(&mut store, id).is_some()
    }

    fn remove_locked(&self, store: &mut Store, id: &str) -> Option<MemoryEntry> {
        let (entry, removal) = store.remove(id)?;
        if let Some((slot, moved_id)) = &removal.moved {
            if let Some(moved) = store.entries.get(moved_id) {
                self.backend.write_slot(*slot, &moved.vector);
            }
        }
        self.backend.set_slot_count(removal.remaining);
        Some(entry)
    }

    pub fn clear(&self) {
        let mut store = self.store.write();
        let removed = store.entries.len();
        store.clear();
        self.backend.set_slot_count(0);
        info!(removed, "substrate cleared");
    }

    pub fn len(&self) -> usize {
        self.store.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> SubstrateStats {
        let store = self.store.read();
        let total = store.entries.len();
        let (strength_sum, accesses, bytes) =
            store
                .entries
                .values()
                .fold((0.0, 0u64, 0usize), |(s, a, b), e| {
                    (
                        s + e.metadata.strength,
                        a + e.metadata.access_count,
                        b + e.vector.size_bytes() + e.id.len(),
                    )
                });
        let timestamps = store.entries.values().map(|e| e.metadata.timestamp);
        SubstrateStats {
            total_memories: total,
            dimensions: self.config.dimensions,
            max_memories: self.config.max_memories,
            backend: self.backend.kind(),
            gpu_resident: self
                .backend
                .resident_valid(self.config.dimensions, store.slots.len()),
            gpu: self.backend.gpu_stats(),
            average_strength: if total == 0 {
                0.0
            } else {
                strength_sum / total as f64
            },
            total_accesses: accesses,
            memory_bytes: bytes,
            oldest_timestamp: timestamps.clone().min(),
            newest_timestamp: timestamps.max(),
        }
    }

    /// Rewrite the whole resident GPU buffer from the current entries.
    /// Returns `false` on the CPU backend or when the device refuses.
    pub fn rebuild_gpu_buffer(&self) -> bool {
        let store = self.store.read();
        let vectors = store.slot_vectors();
        let ok = self.backend.rebuild_slots(&vectors);
        if ok {
            info!(slots = vectors.len(), "GPU buffer rebuilt");
        } else if self.backend.kind() != Backend::Cpu {
            warn!("GPU buffer rebuild failed, retrieval stays on the CPU path");
        }
        ok
    }

    /// Release GPU resources and drop every entry.
    pub fn destroy(&self) {
        self.store.write().clear();
        self.backend.release();
        info!("substrate destroyed");
    }
}

impl std::fmt::Debug for HolographicMemorySubstrate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HolographicMemorySubstrate")
            .field("dimensions", &self.config.dimensions)
            .field("backend", &self.backend.kind())
            .field("memories", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernels::kernel_dispatch::CpuBackend;
    use crate::memory::entry::ManualClock;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const DIMS: usize = 2000;
    const DAY_MS: u64 = 24 * 60 * 60 * 1000;

    fn config() -> SubstrateConfig {
        SubstrateConfig {
            dimensions: DIMS,
            max_memories: 128,
            random_pool_size: 1 << 16,
            seed: Some(42),
            ..Default::default()
        }
    }

    fn substrate() -> (HolographicMemorySubstrate, ManualClock) {
        let clock = ManualClock::new(1_000_000);
        let s = HolographicMemorySubstrate::with_backend(
            config(),
            Box::new(CpuBackend),
            Arc::new(clock.clone()),
        )
        .unwrap();
        (s, clock)
    }

    #[test]
    fn test_rejects_small_dimensions() {
        let cfg = SubstrateConfig {
            dimensions: 999,
            ..config()
        };
        assert!(matches!(
            HolographicMemorySubstrate::new(cfg),
            Err(HhmError::DimensionTooSmall { dimensions: 999, .. })
        ));
    }

    #[test]
    fn test_rejects_zero_pool() {
        let cfg = SubstrateConfig {
            random_pool_size: 0,
            ..config()
        };
        assert!(matches!(cfg.validate(), Err(HhmError::Config(_))));
    }

    #[test]
    fn test_store_defaults_metadata() {
        let (s, clock) = substrate();
        let v = s.random_vector().unwrap();
        s.store("a", v.clone(), None).unwrap();

        let entry = s.get("a").unwrap();
        assert_eq!(entry.vector, v);
        assert_eq!(entry.metadata.timestamp, clock.now_ms());
        assert_eq!(entry.metadata.last_accessed, clock.now_ms());
        assert_eq!(entry.metadata.access_count, 0);
        assert_eq!(entry.metadata.strength, 1.0);
    }

    #[test]
    fn test_store_wrong_dims_leaves_count() {
        let (s, _) = substrate();
        s.store("a", s.random_vector().unwrap(), None).unwrap();
        let mut pool = RandomPool::with_seed(4096, 1);
        let wrong = HyperVector::random(1000, &mut pool).unwrap();
        assert_eq!(
            s.store("b", wrong, None),
            Err(HhmError::DimensionMismatch {
                expected: DIMS,
                actual: 1000
            })
        );
        assert_eq!(s.len(), 1);
    }

    #[test]
    fn test_store_overwrites() {
        let (s, _) = substrate();
        s.store("a", s.random_vector().unwrap(), None).unwrap();
        let v2 = s.random_vector().unwrap();
        s.store(
            "a",
            v2.clone(),
            Some(MetadataOverrides::default().context("second")),
        )
        .unwrap();
        assert_eq!(s.len(), 1);
        let entry = s.get("a").unwrap();
        assert_eq!(entry.vector, v2);
        assert_eq!(entry.metadata.context.as_deref(), Some("second"));
        assert_eq!(s.ids(), vec!["a".to_string()]);
    }

    #[test]
    fn test_retrieve_empty() {
        let (s, _) = substrate();
        let q = s.random_vector().unwrap();
        assert!(s.retrieve_default(&q).unwrap().is_empty());
    }

    #[test]
    fn test_retrieve_contract() {
        let (s, clock) = substrate();
        let base = s.random_vector().unwrap();
        let mut rng = RandomPool::with_seed(16, 7);
        for i in 0..20 {
            let noisy = base.add_noise(0.02 * i as f64, rng.rng());
            s.store(&format!("m{i:02}"), noisy, None).unwrap();
        }
        clock.advance(Duration::from_secs(5));

        let results = s.retrieve(&base, 5, 0.6).unwrap();
        assert_eq!(results.len(), 5);
        for (i, r) in results.iter().enumerate() {
            assert_eq!(r.rank, i + 1);
            assert!(r.similarity >= 0.6);
            if i > 0 {
                assert!(results[i - 1].similarity >= r.similarity);
            }
            assert_eq!(r.entry.metadata.access_count, 1);
            assert_eq!(r.entry.metadata.last_accessed, clock.now_ms());
        }
        assert_eq!(results[0].entry.id, "m00");

        // Non-returned entries are untouched.
        let untouched = s.get("m19").unwrap();
        assert_eq!(untouched.metadata.access_count, 0);
    }

    #[test]
    fn test_retrieve_threshold_filters() {
        let (s, _) = substrate();
        for i in 0..5 {
            s.store(&format!("r{i}"), s.random_vector().unwrap(), None).unwrap();
        }
        let q = s.random_vector().unwrap();
        assert!(s.retrieve(&q, 10, 0.9).unwrap().is_empty());
        assert_eq!(s.retrieve(&q, 10, 0.0).unwrap().len(), 5);
    }

    #[test]
    fn test_retrieve_wrong_dims() {
        let (s, _) = substrate();
        let mut pool = RandomPool::with_seed(4096, 2);
        let q = HyperVector::random(1500, &mut pool).unwrap();
        assert!(matches!(
            s.retrieve_default(&q),
            Err(HhmError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_consolidate_touches_only_qualifying() {
        let (s, _) = substrate();
        let hot = s.random_vector().unwrap();
        let cold = s.random_vector().unwrap();
        s.store(
            "hot",
            hot.clone(),
            Some(MetadataOverrides {
                access_count: Some(12),
                strength: Some(2.0),
                ..Default::default()
            }),
        )
        .unwrap();
        s.store(
            "cold",
            cold.clone(),
            Some(MetadataOverrides {
                access_count: Some(3),
                ..Default::default()
            }),
        )
        .unwrap();

        assert_eq!(s.consolidate(10).unwrap(), 1);
        let h = s.get("hot").unwrap();
        assert_eq!(h.metadata.access_count, 0);
        assert_eq!(h.metadata.strength, 2.0 * 1.1);
        assert_ne!(h.vector, hot);

        let c = s.get("cold").unwrap();
        assert_eq!(c.metadata.access_count, 3);
        assert_eq!(c.metadata.strength, 1.0);
        assert_eq!(c.vector, cold);
    }

    #[test]
    fn test_decay_removes_expired_and_spares_fresh() {
        let (s, clock) = substrate();
        let fresh = s.random_vector().unwrap();
        s.store("old", s.random_vector().unwrap(), None).unwrap();
        clock.advance(Duration::from_millis(31 * DAY_MS));
        s.store("fresh", fresh.clone(), None).unwrap();

        let report = s.decay(0.01, Duration::from_millis(30 * DAY_MS));
        assert_eq!(report, DecayReport { removed: 1, noised: 0 });
        assert!(!s.contains("old"));
        assert_eq!(s.get("fresh").unwrap().vector, fresh);
        assert_eq!(s.get("fresh").unwrap().metadata.strength, 1.0);
    }

    #[test]
    fn test_decay_noises_aging_entries() {
        let (s, clock) = substrate();
        let v = s.random_vector().unwrap();
        s.store("aging", v.clone(), None).unwrap();
        clock.advance(Duration::from_millis(15 * DAY_MS));

        // rate 0.5 at half the max age: noise 0.25.
        let report = s.decay(0.5, Duration::from_millis(30 * DAY_MS));
        assert_eq!(report.noised, 1);
        let entry = s.get("aging").unwrap();
        assert!((entry.metadata.strength - 0.75).abs() < 1e-9);
        let sim = entry.vector.similarity(&v).unwrap();
        assert!(sim < 0.85 && sim > 0.65, "expected ~0.75, got {sim}");
    }

    #[test]
    fn test_decay_with_huge_max_age_keeps_entries() {
        let (s, clock) = substrate();
        let v = s.random_vector().unwrap();
        s.store("a", v.clone(), None).unwrap();
        clock.advance(Duration::from_millis(10 * DAY_MS));

        let report = s.decay(0.01, Duration::from_secs(1 << 62));
        assert_eq!(report, DecayReport::default());
        assert_eq!(s.len(), 1);
        assert_eq!(s.get("a").unwrap().vector, v);
    }

    #[test]
    fn test_strong_memories_resist_decay() {
        let (s, clock) = substrate();
        let v = s.random_vector().unwrap();
        s.store(
            "strong",
            v.clone(),
            Some(MetadataOverrides::default().strength(100.0)),
        )
        .unwrap();
        clock.advance(Duration::from_millis(20 * DAY_MS));
        let report = s.decay(0.5, Duration::from_millis(30 * DAY_MS));
        assert_eq!(report.noised, 0);
        assert_eq!(s.get("strong").unwrap().vector, v);
    }

    #[test]
    fn test_delete_swaps_slots() {
        let (s, _) = substrate();
        for id in ["a", "b", "c"] {
            s.store(id, s.random_vector().unwrap(), None).unwrap();
        }
        assert!(s.delete("a"));
        assert!(!s.delete("a"));
        assert_eq!(s.ids(), vec!["c".to_string(), "b".to_string()]);

        let c = s.get("c").unwrap();
        let results = s.retrieve(&c.vector, 1, 0.9).unwrap();
        assert_eq!(results[0].entry.id, "c");
    }

    #[test]
    fn test_clear_and_stats() {
        let (s, clock) = substrate();
        s.store("x", s.random_vector().unwrap(), None).unwrap();
        clock.advance(Duration::from_secs(1));
        s.store(
            "y",
            s.random_vector().unwrap(),
            Some(MetadataOverrides::default().strength(3.0)),
        )
        .unwrap();

        let stats = s.stats();
        assert_eq!(stats.total_memories, 2);
        assert_eq!(stats.dimensions, DIMS);
        assert_eq!(stats.backend, Backend::Cpu);
        assert!(!stats.gpu_resident);
        assert!(stats.gpu.is_none());
        assert!((stats.average_strength - 2.0).abs() < 1e-12);
        assert_eq!(stats.memory_bytes, 2 * DIMS + 2);
        assert_eq!(stats.oldest_timestamp, Some(1_000_000));
        assert_eq!(stats.newest_timestamp, Some(1_001_000));

        s.clear();
        assert!(s.is_empty());
        assert_eq!(s.stats().oldest_timestamp, None);
    }

    #[test]
    fn test_rebuild_on_cpu_is_noop() {
        let (s, _) = substrate();
        s.store("a", s.random_vector().unwrap(), None).unwrap();
        assert!(!s.rebuild_gpu_buffer());
        s.destroy();
        assert!(s.is_empty());
    }

    /// Records slot traffic to check the incremental mirror protocol.
    #[derive(Clone, Default)]
    struct RecordingBackend {
        writes: Arc<Mutex<Vec<usize>>>,
        count: Arc<AtomicUsize>,
    }

    impl ComputeBackend for RecordingBackend {
        fn kind(&self) -> Backend {
            Backend::Cpu
        }
        fn similarities(&self, q: &HyperVector, v: &[&HyperVector]) -> Result<Vec<f32>> {
            CpuBackend.similarities(q, v)
        }
        fn circular_convolution(&self, a: &HyperVector, b: &HyperVector) -> Result<HyperVector> {
            a.bind(b)
        }
        fn bundle(&self, v: &[&HyperVector]) -> Result<HyperVector> {
            HyperVector::bundle(v)
        }
        fn write_slot(&self, slot: usize, _vector: &HyperVector) -> bool {
            self.writes.lock().push(slot);
            self.count.fetch_max(slot + 1, Ordering::SeqCst);
            true
        }
        fn set_slot_count(&self, count: usize) {
            self.count.store(count, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_store_writes_one_slot_each() {
        let backend = RecordingBackend::default();
        let s = HolographicMemorySubstrate::with_backend(
            config(),
            Box::new(backend.clone()),
            Arc::new(ManualClock::new(0)),
        )
        .unwrap();
        for id in ["a", "b", "c", "d"] {
            s.store(id, s.random_vector().unwrap(), None).unwrap();
        }
        s.store("b", s.random_vector().unwrap(), None).unwrap();
        assert_eq!(*backend.writes.lock(), vec![0, 1, 2, 3, 1]);

        // Deleting "a" moves "d" from slot 3 into slot 0.
        s.delete("a");
        assert_eq!(backend.writes.lock().last(), Some(&0));
        assert_eq!(backend.count.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_substrate_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<HolographicMemorySubstrate>();
    }

    #[test]
    fn test_concurrent_retrieves() {
        let (s, _) = substrate();
        let s = Arc::new(s);
        let target = s.random_vector().unwrap();
        s.store("target", target.clone(), None).unwrap();
        for i in 0..10 {
            s.store(&format!("n{i}"), s.random_vector().unwrap(), None).unwrap();
        }
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let s = Arc::clone(&s);
                let q = target.clone();
                std::thread::spawn(move || s.retrieve(&q, 1, 0.9).unwrap()[0].entry.id.clone())
            })
            .collect();
        for h in handles {
            assert_eq!(h.join().unwrap(), "target");
        }
        assert_eq!(s.get("target").unwrap().metadata.access_count, 4);
    }
}
