//! Cosine-similarity matching of a probe descriptor against the template store.

use crate::config::Threshold;
use crate::store::StoredRecord;
use crate::types::Descriptor;

/// Cosine similarity between two equal-length vectors.
///
/// Returns a value in [-1, 1]. Higher = more similar. Returns exactly 0.0
/// when either vector has zero norm or the lengths differ.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;

    for (x, y) in a.iter().zip(b.iter()) {
        let (x, y) = (f64::from(*x), f64::from(*y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom > 0.0 {
        (dot / denom).clamp(-1.0, 1.0) as f32
    } else {
        0.0
    }
}

/// Best-scoring record for a probe.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    pub id: String,
    pub name: String,
    /// Cosine similarity of the match [-1, 1].
    pub similarity: f32,
}

/// Highest-similarity record regardless of threshold.
///
/// Ties on the maximum keep the record that comes first in store order, so
/// the result is deterministic for a given store. Records whose descriptor
/// length differs from the probe are not comparable and are skipped.
pub fn best_candidate<'a, I>(probe: &Descriptor, records: I) -> Option<MatchResult>
where
    I: IntoIterator<Item = StoredRecord<'a>>,
{
    let mut best: Option<(StoredRecord<'a>, f32)> = None;

    for entry in records {
        if entry.record.descriptor.len() != probe.len() {
            tracing::trace!(
                id = entry.id,
                stored = entry.record.descriptor.len(),
                probe = probe.len(),
                "skipping record with different descriptor length"
            );
            continue;
        }
        let sim = probe.similarity(&entry.record.descriptor);
        match best {
            Some((_, best_sim)) if sim <= best_sim => {}
            // NaN never beats a real score.
            _ if sim.is_nan() => {}
            _ => best = Some((entry, sim)),
        }
    }

    best.map(|(entry, similarity)| MatchResult {
        id: entry.id.to_string(),
        name: entry.record.name.clone(),
        similarity,
    })
}

/// Find the record most similar to `probe`, if it scores strictly above
/// `threshold`. A score equal to the threshold is not a match.
pub fn find_best_match<'a, I>(
    probe: &Descriptor,
    records: I,
    threshold: Threshold,
) -> Option<MatchResult>
where
    I: IntoIterator<Item = StoredRecord<'a>>,
{
    let candidate = best_candidate(probe, records)?;
    if candidate.similarity > threshold.value() {
        Some(candidate)
    } else {
        tracing::trace!(
            similarity = candidate.similarity,
            threshold = threshold.value(),
            "best candidate below threshold"
        );
        None
    }
}
