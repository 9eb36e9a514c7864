//! Error taxonomy for the substrate.
//!
//! Contract violations (dimension errors, empty input, malformed components)
//! surface as [`HhmError`] and propagate to the caller. GPU failures never
//! leave the GPU path: see [`crate::gpu::GpuError`].

/// Crate-level error type.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum HhmError {
    #[error("hypervector dimension {dimensions} is below the minimum of {minimum}")]
    DimensionTooSmall { dimensions: usize, minimum: usize },

    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("operation requires at least one vector")]
    EmptyInput,

    #[error("component {index} is {value}; hypervector components must be -1 or +1")]
    InvalidComponent { index: usize, value: i8 },

    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, HhmError>;

/// Fail with `DimensionMismatch` unless both sizes agree.
pub(crate) fn ensure_same_dims(expected: usize, actual: usize) -> Result<()> {
    if expected == actual {
        Ok(())
    } else {
        Err(HhmError::DimensionMismatch { expected, actual })
    }
}
