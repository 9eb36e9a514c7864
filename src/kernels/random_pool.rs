//! Pooled bipolar random generation.
//!
//! Drawing one random bit per component is the dominant cost of building
//! random hypervectors. A pool pre-generates a large block of ±1 values and
//! hands out contiguous windows; when a window would cross the end of the
//! pool, the pool is refilled and the cursor wraps to zero.
//!
//! The pool is an explicit context object: whoever needs random vectors
//! owns (or borrows) one. Tests seed it for reproducibility.

use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};

use crate::config::RANDOM_POOL_SIZE;

/// A refillable block of pre-generated ±1 values.
pub struct RandomPool {
    /// Pool contents (empty until the first draw).
    values: Vec<i8>,

    /// Configured pool length.
    size: usize,

    /// Next unread position.
    cursor: usize,

    /// Generator backing both the pool and ad-hoc draws.
    rng: StdRng,

    /// How many times the pool has been (re)filled.
    fills: u64,
}

impl RandomPool {
    /// Pool of `size` values seeded from OS entropy.
    pub fn new(size: usize) -> Self {
        Self::from_rng(size, StdRng::from_entropy())
    }

    /// Deterministic pool.
    pub fn with_seed(size: usize, seed: u64) -> Self {
        Self::from_rng(size, StdRng::seed_from_u64(seed))
    }

    fn from_rng(size: usize, rng: StdRng) -> Self {
        Self {
            values: Vec::new(),
            size: size.max(1),
            cursor: 0,
            rng,
            fills: 0,
        }
    }

    /// Fill `out` with pooled bipolar values.
    pub fn fill(&mut self, out: &mut [i8]) {
        if self.values.is_empty() {
            self.refill();
        }

        let mut written = 0;
        while written < out.len() {
            if self.cursor >= self.values.len() {
                self.refill();
            }
            let take = (out.len() - written).min(self.values.len() - self.cursor);
            out[written..written + take]
                .copy_from_slice(&self.values[self.cursor..self.cursor + take]);
            self.cursor += take;
            written += take;
        }
    }

    /// Draw a fresh bipolar sequence of length `dimensions`.
    pub fn next_vector(&mut self, dimensions: usize) -> Vec<i8> {
        let mut out = vec![0i8; dimensions];
        // Refill up front when the window would straddle the end, so a
        // vector never mixes the tail of one fill with the head of the next.
        if !self.values.is_empty()
            && dimensions <= self.values.len()
            && self.cursor + dimensions > self.values.len()
        {
            self.refill();
        }
        self.fill(&mut out);
        out
    }

    /// The generator behind the pool, for other stochastic operations.
    pub fn rng(&mut self) -> &mut StdRng {
        &mut self.rng
    }

    /// Configured pool length.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of fills so far.
    pub fn fills(&self) -> u64 {
        self.fills
    }

    fn refill(&mut self) {
        if self.values.len() != self.size {
            self.values = vec![0i8; self.size];
        }
        // 64 components per RNG call.
        for chunk in self.values.chunks_mut(64) {
            let bits = self.rng.next_u64();
            for (i, v) in chunk.iter_mut().enumerate() {
                *v = if (bits >> i) & 1 == 1 { 1 } else { -1 };
            }
        }
        self.cursor = 0;
        self.fills += 1;
    }
}

impl Default for RandomPool {
    fn default() -> Self {
        Self::new(RANDOM_POOL_SIZE)
    }
}

impl std::fmt::Debug for RandomPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RandomPool")
            .field("size", &self.size)
            .field("cursor", &self.cursor)
            .field("fills", &self.fills)
            .finish()
    }
}
