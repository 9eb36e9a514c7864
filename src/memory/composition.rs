//! Structured encodings built from bind, bundle and permute.
//!
//! - **Records**: bundle of `bind(role, filler)`; `query(role)` unbinds the role
//! - **Sequences**: bundle of `permute(item_i, i)`
//! - **Cleanup**: snap a noisy result to the nearest known vector

use crate::error::{HhmError, Result};
use crate::memory::hypervector::HyperVector;

/// A composite of role-filler bindings.
#[derive(Clone, Debug)]
pub struct RoleFillerRecord {
    /// Majority vote of all bindings.
    pub vector: HyperVector,

    /// Individual bound pairs, kept so the composite can be re-bundled.
    bindings: Vec<HyperVector>,

    pub label: String,
}

impl RoleFillerRecord {
    pub fn from_binding(role: &HyperVector, filler: &HyperVector, label: &str) -> Result<Self> {
        let bound = role.bind(filler)?;
        Ok(Self {
            vector: bound.clone(),
            bindings: vec![bound],
            label: label.to_string(),
        })
    }

    /// Add another pair and re-bundle.
    pub fn add_binding(&mut self, role: &HyperVector, filler: &HyperVector) -> Result<()> {
        let bound = role.bind(filler)?;
        self.bindings.push(bound);
        let refs: Vec<&HyperVector> = self.bindings.iter().collect();
        self.vector = HyperVector::bundle(&refs)?;
        Ok(())
    }

    pub fn binding_count(&self) -> usize {
        self.bindings.len()
    }

    /// Approximate filler bound to `role`.
    pub fn query(&self, role: &HyperVector) -> Result<HyperVector> {
        self.vector.unbind(role)
    }

    /// Query `role` and snap the result to the closest candidate.
    pub fn query_cleanup(&self, role: &HyperVector, candidates: &[&HyperVector]) -> Result<(usize, f32)> {
        let noisy = self.query(role)?;
        cleanup(&noisy, candidates)
    }
}

/// Encode `(role, filler)` pairs as one record.
pub fn encode_record(pairs: &[(&HyperVector, &HyperVector)], label: &str) -> Result<RoleFillerRecord> {
    let ((role, filler), rest) = pairs.split_first().ok_or(HhmError::EmptyInput)?;
    let mut record = RoleFillerRecord::from_binding(role, filler, label)?;
    for (role, filler) in rest {
        record.add_binding(role, filler)?;
    }
    Ok(record)
}

/// Bundle of each item rotated by its position.
pub fn encode_sequence(items: &[&HyperVector]) -> Result<HyperVector> {
    if items.is_empty() {
        return Err(HhmError::EmptyInput);
    }
    let shifted: Vec<HyperVector> = items
        .iter()
        .enumerate()
        .map(|(i, item)| item.permute(i as i64))
        .collect();
    let refs: Vec<&HyperVector> = shifted.iter().collect();
    HyperVector::bundle(&refs)
}

/// Undo the rotation for `position` so the item there can be compared.
pub fn sequence_probe(sequence: &HyperVector, position: usize) -> HyperVector {
    sequence.permute(-(position as i64))
}

/// Index and similarity of the candidate closest to `noisy`. Ties go to
/// the earlier candidate.
pub fn cleanup(noisy: &HyperVector, candidates: &[&HyperVector]) -> Result<(usize, f32)> {
    if candidates.is_empty() {
        return Err(HhmError::EmptyInput);
    }
    let mut best = (0, f32::MIN);
    for (i, candidate) in candidates.iter().enumerate() {
        let sim = noisy.similarity(candidate)?;
        if sim > best.1 {
            best = (i, sim);
        }
    }
    Ok(best)
}
