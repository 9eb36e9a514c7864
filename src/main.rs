//! holomem: synthetic workload driver for the holographic memory substrate.
//!
//! Stores random memories, probes them with noisy copies, then runs
//! consolidation and decay and reports substrate statistics.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::Parser;
use holomem::config::{apply_env_overrides, load_substrate_config, DEFAULT_MAX_AGE_MS};
use holomem::{HolographicMemorySubstrate, MetadataOverrides, SubstrateConfig};
use tracing_subscriber::EnvFilter;

/// holomem workload CLI.
#[derive(Parser, Debug)]
#[command(
    name = "holomem",
    about = "Holographic hyperdimensional memory: synthetic store/retrieve workload",
    version
)]
struct Cli {
    /// JSON substrate config file. Flags below override it.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Hypervector dimension.
    #[arg(short, long)]
    dimensions: Option<usize>,

    /// Number of memories to store.
    #[arg(short = 'n', long, default_value_t = 500)]
    memories: usize,

    /// Number of noisy probes to retrieve with.
    #[arg(short, long, default_value_t = 50)]
    probes: usize,

    /// Bit-flip rate applied to each probe.
    #[arg(long, default_value_t = 0.15)]
    noise: f64,

    /// Results per retrieve.
    #[arg(short = 'k', long, default_value_t = 5)]
    top_k: usize,

    /// Minimum similarity for a retrieve hit.
    #[arg(short, long, default_value_t = 0.3)]
    threshold: f32,

    /// Access count at which consolidate reinforces a memory.
    #[arg(long, default_value_t = 2)]
    consolidate_threshold: u64,

    /// Decay rate passed to decay.
    #[arg(long, default_value_t = 0.01)]
    decay_rate: f64,

    /// Random seed for reproducible runs.
    #[arg(long)]
    seed: Option<u64>,

    /// Request the GPU backend.
    #[arg(long, default_value_t = false)]
    gpu: bool,

    /// Print final stats as JSON on stdout.
    #[arg(long, default_value_t = false)]
    json: bool,
}

fn build_config(cli: &Cli) -> anyhow::Result<SubstrateConfig> {
    let mut config = match &cli.config {
        Some(path) => load_substrate_config(path)?,
        None => {
            let mut config = SubstrateConfig::default();
            apply_env_overrides(&mut config)?;
            config
        }
    };
    if let Some(dims) = cli.dimensions {
        config.dimensions = dims;
    }
    if cli.gpu {
        config.use_gpu = true;
    }
    if cli.seed.is_some() {
        config.seed = cli.seed;
    }
    config.max_memories = config.max_memories.max(cli.memories);
    Ok(config)
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    tracing::info!("holomem v{}", env!("CARGO_PKG_VERSION"));

    let config = build_config(&cli)?;
    let substrate =
        HolographicMemorySubstrate::new(config).context("failed to create substrate")?;
    tracing::info!(
        "Config: dims={}, memories={}, probes={}, backend={}",
        substrate.dimensions(),
        cli.memories,
        cli.probes,
        substrate.backend(),
    );

    let start = Instant::now();
    let mut originals = Vec::with_capacity(cli.memories);
    for i in 0..cli.memories {
        let v = substrate.random_vector()?;
        let tags = MetadataOverrides::default()
            .modality("synthetic")
            .tags([format!("batch-{}", i / 100)]);
        substrate.store(&format!("mem-{i:05}"), v.clone(), Some(tags))?;
        originals.push(v);
    }
    tracing::info!(
        "Stored {} memories in {:.1} ms",
        cli.memories,
        start.elapsed().as_secs_f64() * 1e3
    );

    let start = Instant::now();
    let mut correct = 0usize;
    let mut rng = holomem::RandomPool::with_seed(64, cli.seed.unwrap_or(0) ^ 0x5eed);
    let probes = cli.probes.min(originals.len());
    for (i, original) in originals.iter().take(probes).enumerate() {
        let probe = original.add_noise(cli.noise, rng.rng());
        let hits = substrate.retrieve(&probe, cli.top_k, cli.threshold)?;
        if hits.first().map(|h| h.entry.id.as_str()) == Some(format!("mem-{i:05}").as_str()) {
            correct += 1;
        }
        // A second pass makes the probed memories eligible for consolidation.
        substrate.retrieve(original, 1, cli.threshold)?;
    }
    let elapsed = start.elapsed().as_secs_f64() * 1e3;
    tracing::info!(
        "Retrieved {} probes in {:.1} ms ({:.2} ms/probe), top-1 accuracy {:.1}%",
        probes,
        elapsed,
        if probes == 0 { 0.0 } else { elapsed / probes as f64 },
        if probes == 0 {
            0.0
        } else {
            100.0 * correct as f64 / probes as f64
        },
    );

    let consolidated = substrate.consolidate(cli.consolidate_threshold)?;
    tracing::info!("Consolidated {} memories", consolidated);

    let report = substrate.decay(cli.decay_rate, Duration::from_millis(DEFAULT_MAX_AGE_MS));
    tracing::info!(
        "Decay: {} removed, {} noised",
        report.removed,
        report.noised
    );

    let stats = substrate.stats();
    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&stats).context("failed to serialize stats")?
        );
    } else {
        tracing::info!("Memories: {}", stats.total_memories);
        tracing::info!("  Backend: {} (resident: {})", stats.backend, stats.gpu_resident);
        if let Some(gpu) = &stats.gpu {
            tracing::info!(
                "  GPU: {} dispatches, {} fallbacks, {:.1} MiB pooled",
                gpu.dispatches,
                gpu.fallbacks,
                gpu.pooled_bytes as f64 / (1024.0 * 1024.0)
            );
        }
        tracing::info!("  Avg strength: {:.3}", stats.average_strength);
        tracing::info!("  Total accesses: {}", stats.total_accesses);
        tracing::info!("  Memory: {:.1} KiB", stats.memory_bytes as f64 / 1024.0);
    }

    substrate.destroy();
    tracing::info!("Done.");
    Ok(())
}
