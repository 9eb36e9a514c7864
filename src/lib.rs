//! # holomem
//!
//! **Holographic hyperdimensional memory**: concepts and memories stored as
//! high-dimensional bipolar vectors and recalled by similarity rather
//! than by exact key.
//!
//! ## Components
//!
//! 1. **HyperVector**: ±1 vector algebra (bind by circular convolution,
//!    bundle by majority vote, permute, similarity, noise)
//! 2. **Kernels**: unrolled, block-wise CPU kernels and a random pool
//! 3. **GPU accelerator**: wgpu compute pipelines with transparent CPU fallback
//! 4. **Substrate**: keyed store with retrieve, consolidate and decay
//! 5. **Cache**: LRU vector cache, scratch pool, semantic vectors
//!
//! ## Example
//!
//! ```no_run
//! use holomem::{HolographicMemorySubstrate, SubstrateConfig};
//!
//! let substrate = HolographicMemorySubstrate::new(SubstrateConfig::default())?;
//! let v = substrate.random_vector()?;
//! substrate.store("cat", v.clone(), None)?;
//! let hits = substrate.retrieve(&v, 5, 0.4)?;
//! assert_eq!(hits[0].entry.id, "cat");
//! # Ok::<(), holomem::HhmError>(())
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod gpu;
pub mod kernels;
pub mod memory;

pub use error::{HhmError, Result};
pub use gpu::{GpuAccelerator, GpuConfig, GpuError, GpuState, PowerPreference};
pub use kernels::kernel_dispatch::{select_backend, Backend, ComputeBackend, CpuBackend};
pub use kernels::random_pool::RandomPool;
pub use memory::{
    DecayReport, HolographicMemorySubstrate, HyperVector, ManualClock, MemoryEntry,
    MemoryMetadata, MetadataOverrides, RetrievalResult, SubstrateConfig, SubstrateStats,
};
