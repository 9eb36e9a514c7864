//! Caching aids: a bounded vector cache, a scratch buffer pool and a
//! manager tying them to deterministic semantic vectors.

pub mod manager;
pub mod memory_pool;
pub mod vector_cache;

pub use manager::{CacheManager, CleanupTimer};
pub use memory_pool::{MemoryPool, PoolStats};
pub use vector_cache::{CacheConfig, CacheStats, VectorCache};
