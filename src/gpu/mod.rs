//! GPU compute backend (wgpu).
//!
//! The accelerator compiles three compute pipelines (similarity,
//! circular convolution, bundle) and runs the same algebra as the CPU
//! kernels. Any unavailability or failure degrades to the CPU path; callers
//! never branch on GPU availability.
//!
//! The wgpu device code is compiled under the `gpu` feature. Without it the
//! accelerator reports itself unsupported and always takes the CPU path.

pub mod accelerator;
#[cfg(feature = "gpu")]
pub(crate) mod buffers;
#[cfg(feature = "gpu")]
pub(crate) mod device;
pub mod shaders;

use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use accelerator::{GpuAccelerator, GpuStats};

/// Adapter power preference.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PowerPreference {
    #[default]
    HighPerformance,
    LowPower,
}

/// Accelerator tunables.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GpuConfig {
    /// Which adapter class to request.
    pub preferred_device: PowerPreference,

    /// Largest single buffer the accelerator will allocate.
    pub max_buffer_size_mb: u64,

    /// Compute shader workgroup size (x dimension).
    pub workgroup_size: u32,

    /// Upper bound on waiting for a readback map.
    pub readback_timeout_ms: u64,
}

impl Default for GpuConfig {
    fn default() -> Self {
        Self {
            preferred_device: PowerPreference::HighPerformance,
            max_buffer_size_mb: 256,
            workgroup_size: 64,
            readback_timeout_ms: 5_000,
        }
    }
}

impl GpuConfig {
    pub fn max_buffer_bytes(&self) -> u64 {
        self.max_buffer_size_mb * 1024 * 1024
    }

    pub fn readback_timeout(&self) -> Duration {
        Duration::from_millis(self.readback_timeout_ms)
    }
}

/// Accelerator lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum GpuState {
    Uninitialized,
    Initializing,
    Ready,
}

/// GPU-side failures. Always recovered inside the accelerator.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum GpuError {
    #[error("no GPU adapter available")]
    Unavailable,

    #[error("GPU initialisation failed: {0}")]
    InitFailed(String),

    #[error("GPU device lost: {0}")]
    DeviceLost(String),

    #[error("buffer of {requested} bytes exceeds the {limit} byte limit")]
    BufferTooLarge { requested: u64, limit: u64 },

    #[error("dispatch rejected: {0}")]
    Dispatch(String),

    #[error("GPU readback timed out after {0:?}")]
    Timeout(Duration),

    #[error("buffer map failed: {0}")]
    Map(String),
}

impl GpuError {
    /// Errors after which the device can no longer be trusted.
    pub fn is_fatal(&self) -> bool {
        matches!(self, GpuError::DeviceLost(_) | GpuError::Map(_))
    }
}
