use std::sync::Arc;
use std::time::Duration;

use holomem::cache::{CacheConfig, CacheManager};
use holomem::memory::composition::{cleanup, encode_record};
use holomem::{
    CpuBackend, HolographicMemorySubstrate, HyperVector, ManualClock, RandomPool, SubstrateConfig,
};

const DIMS: usize = 2000;

fn substrate(clock: &ManualClock) -> HolographicMemorySubstrate {
    let config = SubstrateConfig {
        dimensions: DIMS,
        max_memories: 64,
        random_pool_size: 1 << 16,
        seed: Some(2024),
        ..Default::default()
    };
    HolographicMemorySubstrate::with_backend(config, Box::new(CpuBackend), Arc::new(clock.clone()))
        .unwrap()
}

#[test]
fn test_bound_pair_ranked_below_original() {
    let clock = ManualClock::new(0);
    let s = substrate(&clock);
    let v_a = s.random_vector().unwrap();
    let role = s.random_vector().unwrap();
    let v_b = v_a.bind(&role).unwrap();

    s.store("a", v_a.clone(), None).unwrap();
    s.store("b", v_b, None).unwrap();

    let results = s.retrieve(&v_a, 2, 0.4).unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].entry.id, "a");
    assert_eq!(results[1].entry.id, "b");
    assert_eq!(results[0].rank, 1);
    assert_eq!(results[1].rank, 2);
    assert!(results[0].similarity > results[1].similarity);
}

#[test]
fn test_default_config_matches_cpu_when_gpu_requested() {
    // The GPU request degrades silently when no device is available.
    let config = SubstrateConfig {
        dimensions: DIMS,
        max_memories: 16,
        use_gpu: true,
        seed: Some(5),
        random_pool_size: 1 << 14,
        ..Default::default()
    };
    let s = HolographicMemorySubstrate::new(config).unwrap();
    let v = s.random_vector().unwrap();
    s.store("only", v.clone(), None).unwrap();
    for i in 0..8 {
        s.store(&format!("other-{i}"), s.random_vector().unwrap(), None)
            .unwrap();
    }
    s.delete("other-0");
    let hits = s.retrieve(&v, 3, 0.9).unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].entry.id, "only");
    assert!((hits[0].similarity - 1.0).abs() < 1e-4);
    s.destroy();
}

#[test]
fn test_memory_lifecycle() {
    let clock = ManualClock::new(1_000);
    let s = substrate(&clock);
    let mut noise_rng = RandomPool::with_seed(64, 9);

    let vectors: Vec<HyperVector> = (0..10).map(|_| s.random_vector().unwrap()).collect();
    for (i, v) in vectors.iter().enumerate() {
        s.store(&format!("m{i}"), v.clone(), None).unwrap();
    }

    // Practice m3 until it consolidates.
    let probe = vectors[3].add_noise(0.1, noise_rng.rng());
    for _ in 0..10 {
        let hits = s.retrieve(&probe, 1, 0.6).unwrap();
        assert_eq!(hits[0].entry.id, "m3");
    }
    assert_eq!(s.consolidate(10).unwrap(), 1);
    let m3 = s.get("m3").unwrap();
    assert_eq!(m3.metadata.access_count, 0);
    assert!((m3.metadata.strength - 1.1).abs() < 1e-12);

    // Touch m0 late; everything else goes stale and is evicted.
    clock.advance(Duration::from_secs(40 * 24 * 3600));
    s.retrieve(&vectors[0], 1, 0.9).unwrap();
    let report = s.decay(0.01, Duration::from_secs(30 * 24 * 3600));
    assert_eq!(report.removed, 9);
    assert_eq!(s.len(), 1);
    assert!(s.contains("m0"));
    assert_eq!(s.get("m0").unwrap().vector, vectors[0]);
}

#[test]
fn test_semantic_records_through_cache_manager() {
    let manager = CacheManager::new(DIMS, CacheConfig::default()).unwrap();
    let agent = manager.semantic_vector("AGENT").unwrap();
    let action = manager.semantic_vector("ACTION").unwrap();

    let mut pool = RandomPool::with_seed(1 << 14, 77);
    let dog = HyperVector::random(DIMS, &mut pool).unwrap();
    let runs = HyperVector::random(DIMS, &mut pool).unwrap();
    let cat = HyperVector::random(DIMS, &mut pool).unwrap();

    let record = encode_record(&[(&agent, &dog), (&action, &runs)], "dog runs").unwrap();
    let recovered = record.query(&agent).unwrap();
    let (idx, _) = cleanup(&recovered, &[&cat, &dog, &runs]).unwrap();
    assert_eq!(idx, 1);

    assert!(manager.put("dog", dog.clone()));
    assert_eq!(manager.get("dog"), Some(dog));
}
