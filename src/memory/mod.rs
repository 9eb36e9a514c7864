//! Holographic memory.
//!
//! A hyperdimensional approach to associative memory:
//! - **Bipolar hypervectors** (±1, 1000+ dimensions) as memory atoms
//! - **Circular convolution binding** for role-filler pairing
//! - **Majority-vote bundling** for superposition
//! - **Normalized dot-product similarity** for content-addressable retrieval
//! - **Consolidation and decay** for long-run memory dynamics

pub mod composition;
pub mod entry;
pub mod hypervector;
pub mod substrate;

pub use entry::{
    Clock, ManualClock, MemoryEntry, MemoryMetadata, MetadataOverrides, RetrievalResult,
    SystemClock,
};
pub use hypervector::HyperVector;
pub use substrate::{DecayReport, HolographicMemorySubstrate, SubstrateConfig, SubstrateStats};
