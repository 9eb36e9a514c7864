//! CPU kernels over bipolar (±1) component slices.
//!
//! Everything here is stateless and deterministic for a given input; the
//! only randomness is [`generate_random_vector`], which reads from a
//! caller-owned [`RandomPool`].
//!
//! Implementations follow the same shape:
//! 1. a naive scalar reference (tests compare against it)
//! 2. a manually unrolled / block-wise kernel over contiguous slices
//! 3. a rayon variant where the work splits into independent rows

use rayon::prelude::*;

use crate::config::{CONV_BLOCK, DOT_UNROLL, PARALLEL_BATCH_MIN};
use crate::kernels::random_pool::RandomPool;

/// Threshold an accumulator to ±1. Zero maps to +1 on every path (CPU and GPU).
#[inline(always)]
pub fn sign(x: i32) -> i8 {
    if x >= 0 {
        1
    } else {
        -1
    }
}

/// Map a dot product over `n` components from `[-n, n]` to `[0, 1]`.
#[inline]
pub fn normalized_similarity(dot: i32, n: usize) -> f32 {
    if n == 0 {
        return 0.0;
    }
    ((dot as f64 + n as f64) / (2.0 * n as f64)) as f32
}

// ──────────────────────────────────────────────────────────────
// 1. Naive references
// ──────────────────────────────────────────────────────────────

/// Scalar dot product.
pub fn naive_dot_product(a: &[i8], b: &[i8]) -> i32 {
    a.iter().zip(b.iter()).map(|(&x, &y)| x as i32 * y as i32).sum()
}

/// Direct O(n²) circular convolution, thresholded.
pub fn naive_circular_convolution(a: &[i8], b: &[i8]) -> Vec<i8> {
    let n = a.len();
    assert_eq!(b.len(), n);
    (0..n)
        .map(|i| {
            let mut acc = 0i32;
            for k in 0..n {
                acc += a[k] as i32 * b[(i + n - k) % n] as i32;
            }
            sign(acc)
        })
        .collect()
}

// ──────────────────────────────────────────────────────────────
// 2. Unrolled kernels
// ──────────────────────────────────────────────────────────────

/// Dot product with a 16-wide unrolled inner loop.
pub fn dot_product(a: &[i8], b: &[i8]) -> i32 {
    assert_eq!(a.len(), b.len());

    let mut acc = [0i32; DOT_UNROLL];
    let a_chunks = a.chunks_exact(DOT_UNROLL);
    let b_chunks = b.chunks_exact(DOT_UNROLL);
    let a_tail = a_chunks.remainder();
    let b_tail = b_chunks.remainder();

    for (ca, cb) in a_chunks.zip(b_chunks) {
        acc[0] += ca[0] as i32 * cb[0] as i32;
        acc[1] += ca[1] as i32 * cb[1] as i32;
        acc[2] += ca[2] as i32 * cb[2] as i32;
        acc[3] += ca[3] as i32 * cb[3] as i32;
        acc[4] += ca[4] as i32 * cb[4] as i32;
        acc[5] += ca[5] as i32 * cb[5] as i32;
        acc[6] += ca[6] as i32 * cb[6] as i32;
        acc[7] += ca[7] as i32 * cb[7] as i32;
        acc[8] += ca[8] as i32 * cb[8] as i32;
        acc[9] += ca[9] as i32 * cb[9] as i32;
        acc[10] += ca[10] as i32 * cb[10] as i32;
        acc[11] += ca[11] as i32 * cb[11] as i32;
        acc[12] += ca[12] as i32 * cb[12] as i32;
        acc[13] += ca[13] as i32 * cb[13] as i32;
        acc[14] += ca[14] as i32 * cb[14] as i32;
        acc[15] += ca[15] as i32 * cb[15] as i32;
    }

    let mut total: i32 = acc.iter().sum();
    for (&x, &y) in a_tail.iter().zip(b_tail.iter()) {
        total += x as i32 * y as i32;
    }
    total
}

/// Reversed, extended copy of `b` such that
/// `b[(i - k) mod n] == ext[(n - 1 - i) + k]` for all `i, k < n`.
/// Every output of the convolution then becomes one contiguous dot product.
fn reversed_extension(b: &[i8]) -> Vec<i8> {
    let n = b.len();
    (0..2 * n - 1)
        .map(|t| b[(n as isize - 1 - t as isize).rem_euclid(n as isize) as usize])
        .collect()
}

fn convolve_block(a: &[i8], ext: &[i8], start: usize, out: &mut [i8]) {
    let n = a.len();
    for (j, slot) in out.iter_mut().enumerate() {
        let i = start + j;
        let offset = n - 1 - i;
        *slot = sign(dot_product(a, &ext[offset..offset + n]));
    }
}

/// Block-wise circular convolution, thresholded to ±1.
///
/// `result[i] = sign(Σ_k a[k] · b[(i - k) mod n])`
pub fn circular_convolution(a: &[i8], b: &[i8]) -> Vec<i8> {
    let n = a.len();
    assert_eq!(b.len(), n);
    if n == 0 {
        return Vec::new();
    }

    let ext = reversed_extension(b);
    let mut out = vec![0i8; n];
    for (block_idx, block) in out.chunks_mut(CONV_BLOCK).enumerate() {
        convolve_block(a, &ext, block_idx * CONV_BLOCK, block);
    }
    out
}

/// Bundle (majority vote): accumulate in i32 so arbitrarily many inputs
/// cannot overflow, then re-threshold.
pub fn bundle(vectors: &[&[i8]]) -> Vec<i8> {
    let Some(first) = vectors.first() else {
        return Vec::new();
    };
    let n = first.len();
    let mut acc = vec![0i32; n];
    for v in vectors {
        assert_eq!(v.len(), n);
        for (s, &x) in acc.iter_mut().zip(v.iter()) {
            *s += x as i32;
        }
    }
    acc.into_iter().map(sign).collect()
}

/// Similarity of `query` against every vector. Scores below `threshold`
/// are zeroed (not removed), so output index `i` always belongs to input `i`.
pub fn batch_similarity(query: &[i8], vectors: &[&[i8]], threshold: Option<f32>) -> Vec<f32> {
    let n = query.len();
    let score = |v: &&[i8]| {
        let s = normalized_similarity(dot_product(query, v), n);
        match threshold {
            Some(t) if s < t => 0.0,
            _ => s,
        }
    };

    if vectors.len() >= PARALLEL_BATCH_MIN {
        vectors.par_iter().map(score).collect()
    } else {
        vectors.iter().map(score).collect()
    }
}

/// Bipolar XOR. Under the mapping +1 → 0, −1 → 1 this is the bitwise XOR,
/// which for ±1 values is the element-wise product. Self-inverse.
pub fn xor(a: &[i8], b: &[i8]) -> Vec<i8> {
    assert_eq!(a.len(), b.len());
    let mut out = vec![0i8; a.len()];
    let mut o_chunks = out.chunks_exact_mut(DOT_UNROLL);
    let mut a_chunks = a.chunks_exact(DOT_UNROLL);
    let mut b_chunks = b.chunks_exact(DOT_UNROLL);

    for ((co, ca), cb) in (&mut o_chunks).zip(&mut a_chunks).zip(&mut b_chunks) {
        for k in 0..DOT_UNROLL {
            co[k] = ca[k] * cb[k];
        }
    }
    for ((o, &x), &y) in o_chunks
        .into_remainder()
        .iter_mut()
        .zip(a_chunks.remainder())
        .zip(b_chunks.remainder())
    {
        *o = x * y;
    }
    out
}

/// Cyclic rotation to the right by `shift` (negative shifts rotate left).
pub fn permute(v: &[i8], shift: i64) -> Vec<i8> {
    let n = v.len();
    if n == 0 {
        return Vec::new();
    }
    let s = shift.rem_euclid(n as i64) as usize;
    let mut out = vec![0i8; n];
    // out[(i + s) % n] = v[i], as two contiguous copies.
    out[s..].copy_from_slice(&v[..n - s]);
    out[..s].copy_from_slice(&v[n - s..]);
    out
}

/// Number of positions where the two slices differ.
pub fn hamming_distance(a: &[i8], b: &[i8]) -> usize {
    assert_eq!(a.len(), b.len());
    let mut acc = [0usize; DOT_UNROLL];
    let a_chunks = a.chunks_exact(DOT_UNROLL);
    let b_chunks = b.chunks_exact(DOT_UNROLL);
    let a_tail = a_chunks.remainder();
    let b_tail = b_chunks.remainder();

    for (ca, cb) in a_chunks.zip(b_chunks) {
        for k in 0..DOT_UNROLL {
            acc[k] += (ca[k] != cb[k]) as usize;
        }
    }
    let mut total: usize = acc.iter().sum();
    total += a_tail
        .iter()
        .zip(b_tail.iter())
        .filter(|(x, y)| x != y)
        .count();
    total
}

/// Random bipolar components drawn from the pool.
pub fn generate_random_vector(dimensions: usize, pool: &mut RandomPool) -> Vec<i8> {
    pool.next_vector(dimensions)
}

// ──────────────────────────────────────────────────────────────
// 3. Parallel variants (rayon)
// ──────────────────────────────────────────────────────────────

/// Circular convolution with output blocks distributed across threads.
/// Produces exactly the same result as [`circular_convolution`].
pub fn circular_convolution_parallel(a: &[i8], b: &[i8]) -> Vec<i8> {
    let n = a.len();
    assert_eq!(b.len(), n);
    if n == 0 {
        return Vec::new();
    }

    let ext = reversed_extension(b);
    let mut out = vec![0i8; n];
    out.par_chunks_mut(CONV_BLOCK)
        .enumerate()
        .for_each(|(block_idx, block)| convolve_block(a, &ext, block_idx * CONV_BLOCK, block));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool() -> RandomPool {
        RandomPool::with_seed(50_000, 1234)
    }

    #[test]
    fn test_dot_matches_naive_on_odd_lengths() {
        let mut p = pool();
        for len in [1usize, 15, 16, 17, 63, 1001] {
            let a = p.next_vector(len);
            let b = p.next_vector(len);
            assert_eq!(dot_product(&a, &b), naive_dot_product(&a, &b), "len {}", len);
        }
    }

    #[test]
    fn test_dot_self_is_length() {
        let v = pool().next_vector(1000);
        assert_eq!(dot_product(&v, &v), 1000);
    }

    #[test]
    fn test_convolution_matches_naive() {
        let mut p = pool();
        for len in [1usize, 5, 64, 100, 130] {
            let a = p.next_vector(len);
            let b = p.next_vector(len);
            let reference = naive_circular_convolution(&a, &b);
            assert_eq!(circular_convolution(&a, &b), reference, "len {}", len);
            assert_eq!(circular_convolution_parallel(&a, &b), reference, "len {}", len);
        }
    }

    #[test]
    fn test_convolution_commutes() {
        let mut p = pool();
        let a = p.next_vector(96);
        let b = p.next_vector(96);
        assert_eq!(circular_convolution(&a, &b), circular_convolution(&b, &a));
    }

    #[test]
    fn test_bundle_majority() {
        let a: Vec<i8> = vec![1, 1, -1, -1];
        let b: Vec<i8> = vec![1, -1, -1, 1];
        let c: Vec<i8> = vec![1, -1, 1, -1];
        assert_eq!(bundle(&[&a, &b, &c]), vec![1, -1, -1, -1]);
    }

    #[test]
    fn test_bundle_tie_goes_positive() {
        let a: Vec<i8> = vec![1, -1];
        let b: Vec<i8> = vec![-1, 1];
        assert_eq!(bundle(&[&a, &b]), vec![1, 1]);
    }

    #[test]
    fn test_bundle_many_no_overflow() {
        let v: Vec<i8> = vec![-1; 8];
        let many: Vec<&[i8]> = (0..300).map(|_| v.as_slice()).collect();
        assert_eq!(bundle(&many), vec![-1; 8]);
    }

    #[test]
    fn test_batch_similarity_threshold_zeroes() {
        let mut p = pool();
        let q = p.next_vector(1000);
        let other = p.next_vector(1000);
        let out = batch_similarity(&q, &[&q, &other], Some(0.9));
        assert_eq!(out.len(), 2);
        assert!((out[0] - 1.0).abs() < 1e-6);
        assert_eq!(out[1], 0.0);
    }

    #[test]
    fn test_batch_similarity_parallel_path_preserves_order() {
        let mut p = pool();
        let q = p.next_vector(1000);
        let vs: Vec<Vec<i8>> = (0..100).map(|_| p.next_vector(1000)).collect();
        let refs: Vec<&[i8]> = vs.iter().map(|v| v.as_slice()).collect();
        let out = batch_similarity(&q, &refs, None);
        for (i, v) in vs.iter().enumerate() {
            let expected = normalized_similarity(naive_dot_product(&q, v), 1000);
            assert!((out[i] - expected).abs() < 1e-6);
        }
    }

    #[test]
    fn test_xor_self_inverse() {
        let mut p = pool();
        let a = p.next_vector(1003);
        let b = p.next_vector(1003);
        assert_eq!(xor(&xor(&a, &b), &b), a);
        assert!(xor(&a, &a).iter().all(|&x| x == 1));
    }

    #[test]
    fn test_permute_rotates_right() {
        let v: Vec<i8> = vec![1, -1, -1, 1, 1];
        assert_eq!(permute(&v, 1), vec![1, 1, -1, -1, 1]);
        assert_eq!(permute(&v, -1), permute(&v, 4));
        assert_eq!(permute(&v, 12), permute(&v, 2));
        assert_eq!(permute(&v, 0), v);
    }

    #[test]
    fn test_hamming_matches_dot() {
        let mut p = pool();
        let a = p.next_vector(1031);
        let b = p.next_vector(1031);
        let h = hamming_distance(&a, &b) as i32;
        // dot = matches - mismatches = n - 2h
        assert_eq!(dot_product(&a, &b), 1031 - 2 * h);
    }

    #[test]
    fn test_normalized_similarity_bounds() {
        assert_eq!(normalized_similarity(1000, 1000), 1.0);
        assert_eq!(normalized_similarity(-1000, 1000), 0.0);
        assert_eq!(normalized_similarity(0, 1000), 0.5);
    }
}
