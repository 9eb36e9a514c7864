//! Hypervector kernels and backend dispatch.
//!
//! - **simd_ops**: unrolled, block-wise CPU kernels over `&[i8]`
//! - **random_pool**: pre-generated bipolar values for vector creation
//! - **kernel_dispatch**: CPU / GPU compute strategy, selected once

pub mod kernel_dispatch;
pub mod random_pool;
pub mod simd_ops;
