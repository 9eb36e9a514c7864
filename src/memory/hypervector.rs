//! Bipolar hypervector type and its algebra.
//!
//! A hypervector is a sequence of at least 1,000 components, each exactly
//! −1 or +1. Vectors are immutable values: every operation returns a new
//! instance. Heavy lifting is delegated to [`crate::kernels::simd_ops`].

use std::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::config::{MIN_DIMENSIONS, PARALLEL_CONV_MIN_DIM};
use crate::error::{ensure_same_dims, HhmError, Result};
use crate::kernels::random_pool::RandomPool;
use crate::kernels::simd_ops;

/// A bipolar hypervector.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawHyperVector", into = "RawHyperVector")]
pub struct HyperVector {
    components: Vec<i8>,
}

/// Unvalidated wire shape; deserialization goes through [`HyperVector::new`].
#[derive(Serialize, Deserialize)]
struct RawHyperVector {
    dimensions: usize,
    components: Vec<i8>,
}

impl TryFrom<RawHyperVector> for HyperVector {
    type Error = HhmError;

    fn try_from(raw: RawHyperVector) -> Result<Self> {
        HyperVector::new(raw.dimensions, raw.components)
    }
}

impl From<HyperVector> for RawHyperVector {
    fn from(v: HyperVector) -> Self {
        RawHyperVector {
            dimensions: v.components.len(),
            components: v.components,
        }
    }
}

fn check_dimensions(dimensions: usize) -> Result<()> {
    if dimensions < MIN_DIMENSIONS {
        return Err(HhmError::DimensionTooSmall {
            dimensions,
            minimum: MIN_DIMENSIONS,
        });
    }
    Ok(())
}

impl HyperVector {
    /// Build from explicit components.
    pub fn new(dimensions: usize, components: Vec<i8>) -> Result<Self> {
        check_dimensions(dimensions)?;
        ensure_same_dims(dimensions, components.len())?;
        if let Some((index, &value)) = components
            .iter()
            .enumerate()
            .find(|&(_, &c)| c != 1 && c != -1)
        {
            return Err(HhmError::InvalidComponent { index, value });
        }
        Ok(Self { components })
    }

    /// Random hypervector drawn from `pool`.
    pub fn random(dimensions: usize, pool: &mut RandomPool) -> Result<Self> {
        check_dimensions(dimensions)?;
        Ok(Self {
            components: simd_ops::generate_random_vector(dimensions, pool),
        })
    }

    /// Wrap kernel output that is already known to be bipolar.
    pub(crate) fn from_kernel(components: Vec<i8>) -> Self {
        debug_assert!(components.iter().all(|&c| c == 1 || c == -1));
        Self { components }
    }

    /// Number of components.
    pub fn dimensions(&self) -> usize {
        self.components.len()
    }

    /// Borrow the components.
    pub fn as_slice(&self) -> &[i8] {
        &self.components
    }

    /// Binding: thresholded circular convolution.
    pub fn bind(&self, other: &HyperVector) -> Result<HyperVector> {
        ensure_same_dims(self.dimensions(), other.dimensions())?;
        let out = if self.dimensions() >= PARALLEL_CONV_MIN_DIM {
            simd_ops::circular_convolution_parallel(&self.components, &other.components)
        } else {
            simd_ops::circular_convolution(&self.components, &other.components)
        };
        Ok(Self::from_kernel(out))
    }

    /// Approximate inverse of [`bind`](Self::bind): `bind(other.inverse())`.
    pub fn unbind(&self, other: &HyperVector) -> Result<HyperVector> {
        self.bind(&other.inverse())
    }

    /// Involution for circular convolution: index 0 stays, indices
    /// `1..n` are reversed.
    pub fn inverse(&self) -> HyperVector {
        let mut components = self.components.clone();
        components[1..].reverse();
        Self { components }
    }

    /// Majority-vote superposition of `vectors`.
    pub fn bundle(vectors: &[&HyperVector]) -> Result<HyperVector> {
        let first = vectors.first().ok_or(HhmError::EmptyInput)?;
        for v in vectors.iter().skip(1) {
            ensure_same_dims(first.dimensions(), v.dimensions())?;
        }
        let slices: Vec<&[i8]> = vectors.iter().map(|v| v.as_slice()).collect();
        Ok(Self::from_kernel(simd_ops::bundle(&slices)))
    }

    /// Raw dot product in `[-n, n]`.
    pub fn dot(&self, other: &HyperVector) -> Result<i32> {
        ensure_same_dims(self.dimensions(), other.dimensions())?;
        Ok(simd_ops::dot_product(&self.components, &other.components))
    }

    /// Normalized similarity in `[0, 1]`: `(dot + n) / (2n)`.
    /// 1.0 = identical, ~0.5 = unrelated, 0.0 = complement.
    pub fn similarity(&self, other: &HyperVector) -> Result<f32> {
        let dot = self.dot(other)?;
        Ok(simd_ops::normalized_similarity(dot, self.dimensions()))
    }

    /// Number of differing components.
    pub fn hamming_distance(&self, other: &HyperVector) -> Result<usize> {
        ensure_same_dims(self.dimensions(), other.dimensions())?;
        Ok(simd_ops::hamming_distance(
            &self.components,
            &other.components,
        ))
    }

    /// Bipolar XOR (element-wise product); exact and self-inverse.
    pub fn xor(&self, other: &HyperVector) -> Result<HyperVector> {
        ensure_same_dims(self.dimensions(), other.dimensions())?;
        Ok(Self::from_kernel(simd_ops::xor(
            &self.components,
            &other.components,
        )))
    }

    /// Cyclic rotation by `shift` positions (any sign or magnitude).
    /// Used for sequence encoding: position(i) = permute(base, i).
    pub fn permute(&self, shift: i64) -> HyperVector {
        Self::from_kernel(simd_ops::permute(&self.components, shift))
    }

    /// Flip each component independently with probability `noise_level`.
    pub fn add_noise<R: Rng + ?Sized>(&self, noise_level: f64, rng: &mut R) -> HyperVector {
        let p = noise_level.clamp(0.0, 1.0);
        let mut components = self.components.clone();
        if p > 0.0 {
            for c in components.iter_mut() {
                if rng.gen::<f64>() < p {
                    *c = -*c;
                }
            }
        }
        Self { components }
    }

    /// Float view for crossing into GPU buffers.
    pub fn to_f32_vec(&self) -> Vec<f32> {
        self.components.iter().map(|&c| c as f32).collect()
    }

    /// Write the float view into an existing buffer.
    pub fn write_f32(&self, out: &mut [f32]) {
        for (o, &c) in out.iter_mut().zip(self.components.iter()) {
            *o = c as f32;
        }
    }

    /// Back from floats: `>= 0` maps to +1, anything else to −1.
    pub fn from_f32_slice(values: &[f32]) -> Result<HyperVector> {
        check_dimensions(values.len())?;
        Ok(Self::from_kernel(
            values
                .iter()
                .map(|&x| if x >= 0.0 { 1 } else { -1 })
                .collect(),
        ))
    }

    /// Number of +1 components.
    pub fn positive_count(&self) -> usize {
        self.components.iter().filter(|&&c| c == 1).count()
    }

    /// Memory footprint of the components in bytes.
    pub fn size_bytes(&self) -> usize {
        self.components.len()
    }
}

impl fmt::Debug for HyperVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "HyperVector(dim={}, positive={:.3})",
            self.dimensions(),
            self.positive_count() as f64 / self.dimensions().max(1) as f64
        )
    }
}
