//! Crate-wide constants and config-file loading.

use std::path::Path;

use anyhow::Context;

use crate::memory::substrate::SubstrateConfig;

/// Smallest hypervector dimension the algebra is defined for.
pub const MIN_DIMENSIONS: usize = 1000;

/// Default hypervector dimension.
pub const DEFAULT_DIMENSIONS: usize = 10_000;

/// Default substrate capacity hint (GPU buffer sizing).
pub const DEFAULT_MAX_MEMORIES: usize = 10_000;

/// Number of pre-generated bipolar values held by a random pool.
pub const RANDOM_POOL_SIZE: usize = 1_000_000;

/// Unroll width of the dot / hamming / xor kernels.
pub const DOT_UNROLL: usize = 16;

/// Output block size of the circular convolution kernel.
pub const CONV_BLOCK: usize = 64;

/// Batch size above which similarity fans out over rayon.
pub const PARALLEL_BATCH_MIN: usize = 64;

/// Dimension above which binding uses the parallel convolution kernel.
pub const PARALLEL_CONV_MIN_DIM: usize = 4096;

/// Default `retrieve` result count.
pub const DEFAULT_TOP_K: usize = 10;

/// Default `retrieve` similarity threshold.
pub const DEFAULT_RETRIEVE_THRESHOLD: f32 = 0.3;

/// Default access count at which `consolidate` reinforces an entry.
pub const DEFAULT_CONSOLIDATE_THRESHOLD: u64 = 10;

/// Strength multiplier applied by `consolidate`.
pub const CONSOLIDATE_STRENGTH_GAIN: f64 = 1.1;

/// Default per-call decay rate.
pub const DEFAULT_DECAY_RATE: f64 = 0.01;

/// Default maximum idle age before `decay` evicts an entry (30 days).
pub const DEFAULT_MAX_AGE_MS: u64 = 30 * 24 * 60 * 60 * 1000;

/// Noise level at or below which `decay` leaves a vector untouched.
pub const DECAY_NOISE_FLOOR: f64 = 0.01;

/// Environment variable overriding `SubstrateConfig::dimensions`.
pub const ENV_DIMENSIONS: &str = "HOLOMEM_DIMENSIONS";

/// Environment variable overriding `SubstrateConfig::use_gpu`.
pub const ENV_USE_GPU: &str = "HOLOMEM_USE_GPU";

/// Load a substrate configuration from a JSON file, then apply environment
/// overrides. Missing fields take their defaults.
pub fn load_substrate_config(path: &Path) -> anyhow::Result<SubstrateConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file '{}'", path.display()))?;
    let mut config: SubstrateConfig = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse config file '{}'", path.display()))?;
    apply_env_overrides(&mut config)?;
    Ok(config)
}

/// Apply `HOLOMEM_*` environment overrides in place.
pub fn apply_env_overrides(config: &mut SubstrateConfig) -> anyhow::Result<()> {
    if let Ok(dims) = std::env::var(ENV_DIMENSIONS) {
        config.dimensions = dims
            .trim()
            .parse()
            .with_context(|| format!("{ENV_DIMENSIONS}='{dims}' is not an integer"))?;
    }
    if let Ok(flag) = std::env::var(ENV_USE_GPU) {
        config.use_gpu = parse_flag(&flag)
            .with_context(|| format!("{ENV_USE_GPU}='{flag}' is not a boolean"))?;
    }
    Ok(())
}

fn parse_flag(raw: &str) -> anyhow::Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => anyhow::bail!("unrecognised flag value '{other}'"),
    }
}
