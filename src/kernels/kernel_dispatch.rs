//! Kernel dispatch: routes hypervector algebra to the selected backend.
//!
//! The backend is chosen once, when a substrate is built:
//!   GPU (feature `gpu`, adapter present, pipelines compiled) → CPU.
//! A GPU backend still falls back to the CPU kernels per call, inside the
//! accelerator, so callers never see a GPU failure.

#[cfg(feature = "gpu")]
use parking_lot::Mutex;
use serde::Serialize;
use tracing::info;
#[cfg(feature = "gpu")]
use tracing::warn;

use crate::error::{ensure_same_dims, Result};
#[cfg(feature = "gpu")]
use crate::gpu::GpuAccelerator;
use crate::gpu::{GpuConfig, GpuStats};
use crate::kernels::simd_ops;
use crate::memory::hypervector::HyperVector;

/// Backend selection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum Backend {
    Cpu,
    #[cfg(feature = "gpu")]
    Gpu,
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Backend::Cpu => write!(f, "CPU"),
            #[cfg(feature = "gpu")]
            Backend::Gpu => write!(f, "GPU"),
        }
    }
}

/// Compute strategy behind a substrate.
///
/// The resident-buffer methods mirror the substrate's slot layout on the
/// device. Backends without device memory keep the defaults, which report
/// the resident buffer as unavailable.
pub trait ComputeBackend: Send + Sync {
    fn kind(&self) -> Backend;

    /// Similarity of `query` against each vector, in input order.
    fn similarities(&self, query: &HyperVector, vectors: &[&HyperVector]) -> Result<Vec<f32>>;

    fn circular_convolution(&self, a: &HyperVector, b: &HyperVector) -> Result<HyperVector>;

    fn bundle(&self, vectors: &[&HyperVector]) -> Result<HyperVector>;

    fn reserve_slots(&self, _dims: usize, _slots: usize) -> bool {
        false
    }

    fn write_slot(&self, _slot: usize, _vector: &HyperVector) -> bool {
        false
    }

    fn rebuild_slots(&self, _vectors: &[&HyperVector]) -> bool {
        false
    }

    fn set_slot_count(&self, _count: usize) {}

    fn resident_valid(&self, _dims: usize, _count: usize) -> bool {
        false
    }

    fn resident_similarities(&self, _query: &HyperVector, _count: usize) -> Option<Vec<f32>> {
        None
    }

    /// Accelerator counters, `None` for host-only backends.
    fn gpu_stats(&self) -> Option<GpuStats> {
        None
    }

    /// Release device resources. Idempotent.
    fn release(&self) {}
}

/// The SIMD-style CPU kernels. Always available.
#[derive(Clone, Copy, Debug, Default)]
pub struct CpuBackend;

impl ComputeBackend for CpuBackend {
    fn kind(&self) -> Backend {
        Backend::Cpu
    }

    fn similarities(&self, query: &HyperVector, vectors: &[&HyperVector]) -> Result<Vec<f32>> {
        for v in vectors {
            ensure_same_dims(query.dimensions(), v.dimensions())?;
        }
        let slices: Vec<&[i8]> = vectors.iter().map(|v| v.as_slice()).collect();
        Ok(simd_ops::batch_similarity(query.as_slice(), &slices, None))
    }

    fn circular_convolution(&self, a: &HyperVector, b: &HyperVector) -> Result<HyperVector> {
        a.bind(b)
    }

    fn bundle(&self, vectors: &[&HyperVector]) -> Result<HyperVector> {
        HyperVector::bundle(vectors)
    }
}

/// wgpu accelerator behind a mutex; every device write goes through it.
#[cfg(feature = "gpu")]
pub struct GpuBackend {
    accel: Mutex<GpuAccelerator>,
}

#[cfg(feature = "gpu")]
impl GpuBackend {
    /// Initialize a device, or `None` if none can be brought up.
    pub fn new(config: GpuConfig) -> Option<Self> {
        let mut accel = GpuAccelerator::new(config);
        if !accel.initialize() {
            return None;
        }
        Some(Self {
            accel: Mutex::new(accel),
        })
    }
}

#[cfg(feature = "gpu")]
impl ComputeBackend for GpuBackend {
    fn kind(&self) -> Backend {
        Backend::Gpu
    }

    fn similarities(&self, query: &HyperVector, vectors: &[&HyperVector]) -> Result<Vec<f32>> {
        self.accel.lock().compute_similarities(query, vectors)
    }

    fn circular_convolution(&self, a: &HyperVector, b: &HyperVector) -> Result<HyperVector> {
        self.accel.lock().circular_convolution(a, b)
    }

    fn bundle(&self, vectors: &[&HyperVector]) -> Result<HyperVector> {
        self.accel.lock().bundle(vectors)
    }

    fn reserve_slots(&self, dims: usize, slots: usize) -> bool {
        self.accel.lock().reserve_resident(dims, slots)
    }

    fn write_slot(&self, slot: usize, vector: &HyperVector) -> bool {
        self.accel.lock().write_resident(slot, vector)
    }

    fn rebuild_slots(&self, vectors: &[&HyperVector]) -> bool {
        self.accel.lock().rebuild_resident(vectors)
    }

    fn set_slot_count(&self, count: usize) {
        self.accel.lock().set_resident_count(count);
    }

    fn resident_valid(&self, dims: usize, count: usize) -> bool {
        self.accel.lock().resident_valid(dims, count)
    }

    fn resident_similarities(&self, query: &HyperVector, count: usize) -> Option<Vec<f32>> {
        self.accel.lock().resident_similarities(query, count)
    }

    fn gpu_stats(&self) -> Option<GpuStats> {
        Some(self.accel.lock().stats())
    }

    fn release(&self) {
        self.accel.lock().destroy();
    }
}

/// Pick the backend for a substrate. GPU only when requested and a device
/// comes up; otherwise CPU.
pub fn select_backend(use_gpu: bool, gpu: &GpuConfig) -> Box<dyn ComputeBackend> {
    #[cfg(feature = "gpu")]
    {
        if use_gpu {
            match GpuBackend::new(gpu.clone()) {
                Some(backend) => {
                    info!(backend = %Backend::Gpu, "compute backend selected");
                    return Box::new(backend);
                }
                None => warn!("GPU requested but unavailable, falling back to CPU"),
            }
        }
    }
    #[cfg(not(feature = "gpu"))]
    {
        if use_gpu {
            info!("GPU requested but the gpu feature is disabled");
        }
        let _ = gpu;
    }
    info!(backend = %Backend::Cpu, "compute backend selected");
    Box::new(CpuBackend)
}
