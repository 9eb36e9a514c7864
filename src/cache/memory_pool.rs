//! Reusable scratch buffers bucketed by length.
//!
//! Each bucket tracks its free list and the number of pooled buffers
//! currently handed out; together they never exceed `max_per_bucket`.
//! Requests past the cap get temporary buffers that are simply dropped.
//! Free lists together never hold more than `max_bytes`; a release that
//! would exceed it drops the buffer instead of pooling it.

use std::collections::HashMap;
use std::mem::size_of;

use serde::Serialize;

/// Free-list budget used by [`MemoryPool::new`].
pub const DEFAULT_POOL_BYTES: usize = 16 << 20;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub allocations: u64,
    pub reuses: u64,
    pub temporaries: u64,
    pub releases: u64,
    pub dropped: u64,
}

struct Bucket<T> {
    free: Vec<Vec<T>>,
    live: usize,
}

impl<T> Default for Bucket<T> {
    fn default() -> Self {
        Self {
            free: Vec::new(),
            live: 0,
        }
    }
}

fn take<T: Copy + Default>(
    buckets: &mut HashMap<usize, Bucket<T>>,
    size: usize,
    max_per_bucket: usize,
    stats: &mut PoolStats,
) -> Vec<T> {
    let bucket = buckets.entry(size).or_default();
    if let Some(mut buf) = bucket.free.pop() {
        buf.fill(T::default());
        bucket.live += 1;
        stats.reuses += 1;
        return buf;
    }
    if bucket.live < max_per_bucket {
        bucket.live += 1;
        stats.allocations += 1;
    } else {
        stats.temporaries += 1;
    }
    vec![T::default(); size]
}

fn give_back<T>(
    buckets: &mut HashMap<usize, Bucket<T>>,
    buf: Vec<T>,
    retained: &mut usize,
    max_bytes: usize,
    stats: &mut PoolStats,
) {
    let len = buf.len();
    let bytes = len * size_of::<T>();
    let Some(bucket) = buckets.get_mut(&len).filter(|b| b.live > 0) else {
        stats.dropped += 1;
        return;
    };
    bucket.live -= 1;
    if *retained + bytes <= max_bytes {
        bucket.free.push(buf);
        *retained += bytes;
        stats.releases += 1;
        return;
    }
    stats.dropped += 1;
    if bucket.live == 0 && bucket.free.is_empty() {
        buckets.remove(&len);
    }
}

/// Debit the free buffer `take` is about to hand out.
fn debit_reuse<T>(
    buckets: &HashMap<usize, Bucket<T>>,
    size: usize,
    retained: &mut usize,
) {
    if let Some(buf) = buckets.get(&size).and_then(|b| b.free.last()) {
        *retained -= buf.len() * size_of::<T>();
    }
}

pub struct MemoryPool {
    int8: HashMap<usize, Bucket<i8>>,
    float32: HashMap<usize, Bucket<f32>>,
    max_per_bucket: usize,
    max_bytes: usize,
    retained: usize,
    stats: PoolStats,
}

impl MemoryPool {
    pub fn new(max_per_bucket: usize) -> Self {
        Self::with_byte_limit(max_per_bucket, DEFAULT_POOL_BYTES)
    }

    pub fn with_byte_limit(max_per_bucket: usize, max_bytes: usize) -> Self {
        Self {
            int8: HashMap::new(),
            float32: HashMap::new(),
            max_per_bucket,
            max_bytes,
            retained: 0,
            stats: PoolStats::default(),
        }
    }

    /// Zeroed `i8` buffer of exactly `size` elements.
    pub fn get_int8(&mut self, size: usize) -> Vec<i8> {
        debit_reuse(&self.int8, size, &mut self.retained);
        take(&mut self.int8, size, self.max_per_bucket, &mut self.stats)
    }

    /// Zeroed `f32` buffer of exactly `size` elements.
    pub fn get_float32(&mut self, size: usize) -> Vec<f32> {
        debit_reuse(&self.float32, size, &mut self.retained);
        take(&mut self.float32, size, self.max_per_bucket, &mut self.stats)
    }

    pub fn release_int8(&mut self, buf: Vec<i8>) {
        give_back(&mut self.int8, buf, &mut self.retained, self.max_bytes, &mut self.stats);
    }

    pub fn release_float32(&mut self, buf: Vec<f32>) {
        give_back(&mut self.float32, buf, &mut self.retained, self.max_bytes, &mut self.stats);
    }

    /// Bytes held in free lists.
    pub fn retained_bytes(&self) -> usize {
        self.retained
    }

    /// Buffers sitting in free lists.
    pub fn pooled(&self) -> usize {
        self.int8.values().map(|b| b.free.len()).sum::<usize>()
            + self.float32.values().map(|b| b.free.len()).sum::<usize>()
    }

    pub fn stats(&self) -> PoolStats {
        self.stats.clone()
    }

    /// Drop every pooled buffer and forget outstanding ones.
    pub fn clear(&mut self) {
        self.int8.clear();
        self.float32.clear();
        self.retained = 0;
    }
}

impl Default for MemoryPool {
    fn default() -> Self {
        Self::new(8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reuse_is_zeroed() {
        let mut pool = MemoryPool::new(2);
        let mut buf = pool.get_int8(16);
        buf.iter_mut().for_each(|v| *v = 1);
        pool.release_int8(buf);

        let again = pool.get_int8(16);
        assert!(again.iter().all(|&v| v == 0));
        assert_eq!(pool.stats().reuses, 1);
        assert_eq!(pool.stats().allocations, 1);

        let mut f = pool.get_float32(8);
        f[3] = 2.5;
        pool.release_float32(f);
        assert_eq!(pool.get_float32(8), vec![0.0; 8]);
    }

    #[test]
    fn test_bucket_cap_hands_out_temporaries() {
        let mut pool = MemoryPool::new(2);
        let a = pool.get_float32(4);
        let b = pool.get_float32(4);
        let c = pool.get_float32(4);
        assert_eq!(c.len(), 4);
        assert_eq!(pool.stats().allocations, 2);
        assert_eq!(pool.stats().temporaries, 1);

        pool.release_float32(a);
        pool.release_float32(b);
        pool.release_float32(c);
        assert_eq!(pool.pooled(), 2);
        assert_eq!(pool.stats().dropped, 1);
    }

    #[test]
    fn test_sizes_are_separate_buckets() {
        let mut pool = MemoryPool::new(1);
        let small = pool.get_int8(4);
        let large = pool.get_int8(8);
        assert_eq!(pool.stats().temporaries, 0);
        pool.release_int8(small);
        pool.release_int8(large);
        assert_eq!(pool.get_int8(8).len(), 8);
        assert_eq!(pool.stats().reuses, 1);
    }

    #[test]
    fn test_retained_bytes_stay_under_limit() {
        let limit = 4 << 20;
        let mut pool = MemoryPool::with_byte_limit(4, limit);
        for n in 1..=200 {
            let buf = pool.get_float32(2000 * n);
            pool.release_float32(buf);
            assert!(pool.retained_bytes() <= limit);
        }
        assert!(pool.pooled() < 200);
        assert!(pool.stats().dropped > 0);

        // Reuse hands bytes back out of the budget.
        let before = pool.retained_bytes();
        let buf = pool.get_float32(2000);
        assert_eq!(pool.retained_bytes(), before - 2000 * 4);
        pool.release_float32(buf);
        assert_eq!(pool.retained_bytes(), before);

        pool.clear();
        assert_eq!(pool.retained_bytes(), 0);
    }

    #[test]
    fn test_unknown_release_dropped() {
        let mut pool = MemoryPool::new(4);
        pool.release_int8(vec![1; 10]);
        assert_eq!(pool.pooled(), 0);
        assert_eq!(pool.stats().dropped, 1);
    }
}
