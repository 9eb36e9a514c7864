//! GPU accelerator with CPU fallback.
//!
//! Every public operation returns the same answer with or without a device:
//! the GPU is tried first when ready, and any failure is logged and answered
//! by the CPU kernels instead. Fatal failures (device loss, map errors) drop
//! the context and leave the accelerator `Uninitialized`; nothing
//! re-initializes automatically.
//!
//! The accelerator also owns the resident buffer: one `dims`-float slot per
//! stored memory, written incrementally by the substrate. A failed slot
//! write invalidates the buffer until the next full rebuild.

use serde::Serialize;
#[cfg(feature = "gpu")]
use tracing::info;
use tracing::{debug, warn};

use crate::cache::memory_pool::MemoryPool;
use crate::error::{ensure_same_dims, HhmError, Result};
#[cfg(feature = "gpu")]
use crate::gpu::device::{self, GpuContext};
#[cfg(feature = "gpu")]
use crate::gpu::GpuError;
use crate::gpu::{GpuConfig, GpuState};
use crate::kernels::simd_ops;
use crate::memory::hypervector::HyperVector;

/// Scratch buffers kept per size bucket.
const SCRATCH_PER_BUCKET: usize = 4;

/// Counters exposed for diagnostics.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct GpuStats {
    pub dispatches: u64,
    pub fallbacks: u64,
    pub failures: u64,
    pub buffer_allocations: u64,
    pub pooled_bytes: u64,
    pub scratch_bytes: u64,
    pub adapter: Option<String>,
}

#[derive(Clone, Copy, Debug, Default)]
struct ResidentLayout {
    dims: usize,
    count: usize,
    valid: bool,
}

pub struct GpuAccelerator {
    config: GpuConfig,
    state: GpuState,
    #[cfg(feature = "gpu")]
    context: Option<GpuContext>,
    resident: ResidentLayout,
    scratch: MemoryPool,
    stats: GpuStats,
    /// Error returned by the next GPU call instead of running it.
    #[cfg(all(test, feature = "gpu"))]
    injected_failure: Option<GpuError>,
}

impl GpuAccelerator {
    pub fn new(config: GpuConfig) -> Self {
        Self {
            config,
            state: GpuState::Uninitialized,
            #[cfg(feature = "gpu")]
            context: None,
            resident: ResidentLayout::default(),
            scratch: MemoryPool::new(SCRATCH_PER_BUCKET),
            stats: GpuStats::default(),
            #[cfg(all(test, feature = "gpu"))]
            injected_failure: None,
        }
    }

    /// Whether this build can reach a GPU adapter at all.
    pub fn is_supported() -> bool {
        #[cfg(feature = "gpu")]
        {
            device::probe_adapter()
        }
        #[cfg(not(feature = "gpu"))]
        {
            false
        }
    }

    /// Bring up the device and pipelines. Returns `true` when ready,
    /// including when it already was.
    pub fn initialize(&mut self) -> bool {
        match self.state {
            GpuState::Ready => return true,
            GpuState::Initializing => return false,
            GpuState::Uninitialized => {}
        }
        self.state = GpuState::Initializing;
        let ready = self.create_context();
        self.state = if ready {
            GpuState::Ready
        } else {
            GpuState::Uninitialized
        };
        ready
    }

    #[cfg(feature = "gpu")]
    fn create_context(&mut self) -> bool {
        match GpuContext::create(&self.config) {
            Ok(ctx) => {
                info!(adapter = %ctx.adapter_name, "GPU accelerator ready");
                self.stats.adapter = Some(ctx.adapter_name.clone());
                self.context = Some(ctx);
                self.resident = ResidentLayout::default();
                true
            }
            Err(e) => {
                warn!(error = %e, "GPU unavailable, using CPU kernels");
                false
            }
        }
    }

    #[cfg(not(feature = "gpu"))]
    fn create_context(&mut self) -> bool {
        debug!("built without the gpu feature, using CPU kernels");
        false
    }

    pub fn state(&self) -> GpuState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == GpuState::Ready
    }

    pub fn config(&self) -> &GpuConfig {
        &self.config
    }

    pub fn stats(&self) -> GpuStats {
        #[cfg(feature = "gpu")]
        let (buffer_allocations, pooled_bytes) = self
            .context
            .as_ref()
            .map(|ctx| (ctx.allocations(), ctx.pooled_bytes()))
            .unwrap_or_default();
        #[cfg(not(feature = "gpu"))]
        let (buffer_allocations, pooled_bytes) = (0, 0);
        GpuStats {
            buffer_allocations,
            pooled_bytes,
            scratch_bytes: self.scratch.retained_bytes() as u64,
            ..self.stats.clone()
        }
    }

    /// Run `op` on the context, converting any failure into `None`.
    #[cfg(feature = "gpu")]
    fn try_gpu<T>(
        &mut self,
        op: &'static str,
        f: impl FnOnce(&mut GpuContext, &mut MemoryPool) -> std::result::Result<T, GpuError>,
    ) -> Option<T> {
        if self.state != GpuState::Ready {
            return None;
        }
        #[cfg(test)]
        let injected = self.injected_failure.take();
        #[cfg(not(test))]
        let injected: Option<GpuError> = None;
        let ctx = self.context.as_mut()?;
        if ctx.is_lost() {
            self.drop_context("device reported lost");
            return None;
        }
        let outcome = match injected {
            Some(e) => Err(e),
            None => f(ctx, &mut self.scratch),
        };
        match outcome {
            Ok(value) => {
                self.stats.dispatches += 1;
                Some(value)
            }
            Err(e) => {
                self.stats.failures += 1;
                let fatal = e.is_fatal() || ctx.is_lost();
                warn!(op, error = %e, fatal, "GPU operation failed, using CPU kernels");
                if fatal {
                    self.drop_context(op);
                }
                None
            }
        }
    }

    #[cfg(feature = "gpu")]
    fn drop_context(&mut self, reason: &str) {
        if let Some(mut ctx) = self.context.take() {
            ctx.destroy();
        }
        self.state = GpuState::Uninitialized;
        self.resident.valid = false;
        warn!(reason, "GPU context dropped");
    }

    /// Similarity of `query` against every vector, in input order.
    pub fn compute_similarities(
        &mut self,
        query: &HyperVector,
        vectors: &[&HyperVector],
    ) -> Result<Vec<f32>> {
        let dims = query.dimensions();
        for v in vectors {
            ensure_same_dims(dims, v.dimensions())?;
        }
        if vectors.is_empty() {
            return Ok(Vec::new());
        }

        #[cfg(feature = "gpu")]
        {
            let count = vectors.len();
            let out = self.try_gpu("similarity", |ctx, _| {
                let q = query.to_f32_vec();
                ctx.similarities(&q, &pack_f32(vectors, dims), count)
            });
            if let Some(scores) = out {
                return Ok(scores);
            }
        }

        self.stats.fallbacks += 1;
        let slices: Vec<&[i8]> = vectors.iter().map(|v| v.as_slice()).collect();
        Ok(simd_ops::batch_similarity(query.as_slice(), &slices, None))
    }

    /// Thresholded circular convolution of `a` and `b`.
    pub fn circular_convolution(&mut self, a: &HyperVector, b: &HyperVector) -> Result<HyperVector> {
        ensure_same_dims(a.dimensions(), b.dimensions())?;

        #[cfg(feature = "gpu")]
        {
            let out = self.try_gpu("convolution", |ctx, _| {
                ctx.convolve(&a.to_f32_vec(), &b.to_f32_vec())
            });
            if let Some(values) = out {
                return Ok(from_gpu_signs(&values[..a.dimensions()]));
            }
        }

        self.stats.fallbacks += 1;
        a.bind(b)
    }

    /// Majority-vote bundle of `vectors`.
    pub fn bundle(&mut self, vectors: &[&HyperVector]) -> Result<HyperVector> {
        let first = vectors.first().ok_or(HhmError::EmptyInput)?;
        let dims = first.dimensions();
        for v in vectors {
            ensure_same_dims(dims, v.dimensions())?;
        }

        #[cfg(feature = "gpu")]
        {
            let count = vectors.len();
            let out = self.try_gpu("bundle", |ctx, _| {
                ctx.bundle(&pack_f32(vectors, dims), dims, count)
            });
            if let Some(values) = out {
                return Ok(from_gpu_signs(&values[..dims]));
            }
        }

        self.stats.fallbacks += 1;
        HyperVector::bundle(vectors)
    }

    /// Whether resident search is usable for `count` slots of `dims`.
    pub fn resident_valid(&self, dims: usize, count: usize) -> bool {
        self.is_ready()
            && self.resident.valid
            && self.resident.dims == dims
            && self.resident.count == count
    }

    /// Pre-size the resident buffer for `slots` vectors of `dims`.
    pub fn reserve_resident(&mut self, dims: usize, slots: usize) -> bool {
        if !self.is_ready() || (self.resident.valid && self.resident.dims != dims) {
            return false;
        }
        #[cfg(feature = "gpu")]
        {
            let live = self.resident.count;
            if self
                .try_gpu("reserve_resident", |ctx, _| ctx.reserve_resident(dims, slots, live))
                .is_some()
            {
                if !self.resident.valid && self.resident.count == 0 {
                    self.resident = ResidentLayout {
                        dims,
                        count: 0,
                        valid: true,
                    };
                }
                return true;
            }
            self.resident.valid = false;
        }
        let _ = slots;
        false
    }

    /// Write `vector` into resident slot `slot`. On failure the resident
    /// buffer is invalid until [`rebuild_resident`](Self::rebuild_resident).
    pub fn write_resident(&mut self, slot: usize, vector: &HyperVector) -> bool {
        let dims = vector.dimensions();
        if !self.is_ready() {
            return false;
        }
        if !self.resident.valid {
            // A fresh, empty buffer can start at slot 0 without a rebuild.
            if self.resident.count == 0 && slot == 0 {
                self.resident = ResidentLayout {
                    dims,
                    count: 0,
                    valid: true,
                };
            } else {
                return false;
            }
        }
        if self.resident.dims != dims || slot > self.resident.count {
            self.invalidate_resident("slot write out of layout");
            return false;
        }

        #[cfg(feature = "gpu")]
        {
            let live = self.resident.count;
            let ok = self
                .try_gpu("write_resident", |ctx, scratch| {
                    let mut data = scratch.get_float32(dims);
                    vector.write_f32(&mut data);
                    let res = ctx.write_resident(slot, &data, live);
                    scratch.release_float32(data);
                    res
                })
                .is_some();
            if ok {
                self.resident.count = self.resident.count.max(slot + 1);
                return true;
            }
        }
        self.invalidate_resident("slot write failed");
        false
    }

    /// Replace the whole resident buffer with `vectors` in slot order.
    pub fn rebuild_resident(&mut self, vectors: &[&HyperVector]) -> bool {
        if !self.is_ready() {
            return false;
        }
        let dims = vectors.first().map(|v| v.dimensions()).unwrap_or(0);
        if vectors.iter().any(|v| v.dimensions() != dims) {
            self.invalidate_resident("mixed dimensions");
            return false;
        }

        #[cfg(feature = "gpu")]
        {
            let count = vectors.len();
            let ok = self
                .try_gpu("rebuild_resident", |ctx, _| {
                    ctx.rebuild_resident(&pack_f32(vectors, dims))
                })
                .is_some();
            if ok {
                self.resident = ResidentLayout {
                    dims,
                    count,
                    valid: true,
                };
                debug!(slots = count, dims, "resident buffer rebuilt");
                return true;
            }
        }
        self.invalidate_resident("rebuild failed");
        false
    }

    /// Shrink the live slot count after a swap-remove.
    pub fn set_resident_count(&mut self, count: usize) {
        if count > self.resident.count {
            self.invalidate_resident("count grew without writes");
        } else {
            self.resident.count = count;
        }
    }

    pub fn invalidate_resident(&mut self, reason: &str) {
        if self.resident.valid {
            warn!(reason, "resident GPU buffer invalidated, search uses CPU until rebuild");
        }
        self.resident.valid = false;
    }

    /// Similarity of `query` against the first `count` resident slots, or
    /// `None` when the resident buffer cannot answer.
    pub fn resident_similarities(&mut self, query: &HyperVector, count: usize) -> Option<Vec<f32>> {
        if !self.resident_valid(query.dimensions(), count) {
            return None;
        }
        #[cfg(feature = "gpu")]
        let scores = self.try_gpu("resident_similarity", |ctx, _| {
            ctx.resident_similarities(&query.to_f32_vec(), count)
        });
        #[cfg(not(feature = "gpu"))]
        let scores = None;
        if scores.is_none() {
            self.invalidate_resident("resident dispatch failed");
        }
        scores
    }

    /// Release every GPU resource. Safe to call more than once.
    pub fn destroy(&mut self) {
        #[cfg(feature = "gpu")]
        {
            if let Some(mut ctx) = self.context.take() {
                ctx.destroy();
                info!("GPU accelerator destroyed");
            }
        }
        self.state = GpuState::Uninitialized;
        self.resident = ResidentLayout::default();
        self.scratch.clear();
    }
}

impl Drop for GpuAccelerator {
    fn drop(&mut self) {
        self.destroy();
    }
}

impl std::fmt::Debug for GpuAccelerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GpuAccelerator")
            .field("state", &self.state)
            .field("resident_slots", &self.resident.count)
            .field("resident_valid", &self.resident.valid)
            .finish()
    }
}

/// Row-major f32 copy of `vectors`. Batch sizes vary per call, so these
/// buffers are not pooled.
#[cfg(feature = "gpu")]
fn pack_f32(vectors: &[&HyperVector], dims: usize) -> Vec<f32> {
    let mut packed = vec![0.0; dims * vectors.len()];
    if dims > 0 {
        for (chunk, v) in packed.chunks_exact_mut(dims).zip(vectors) {
            v.write_f32(chunk);
        }
    }
    packed
}

#[cfg(feature = "gpu")]
fn from_gpu_signs(values: &[f32]) -> HyperVector {
    HyperVector::from_kernel(
        values
            .iter()
            .map(|&v| if v >= 0.0 { 1 } else { -1 })
            .collect(),
    )
}
