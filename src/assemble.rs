//! Final assembly — per-chunk artifacts → one narration.
//!
//! Buffers are concatenated strictly in chunk-index order.  Gaps are not
//! filled or flagged here; the pipeline diffs expected against present
//! indices before deciding whether to assemble at all.

use std::collections::BTreeMap;

use thiserror::Error;

use crate::audio::Artifact;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AssembleError {
    #[error("no artifacts to assemble")]
    Empty,

    #[error("chunk {index} is at {found} Hz but the narration is at {expected} Hz")]
    SampleRateMismatch { index: usize, expected: u32, found: u32 },
}

/// Concatenate `artifacts` in index order at `sample_rate`.
///
/// Every artifact must already be at `sample_rate`; resampling is not done.
pub fn assemble(
    artifacts: &BTreeMap<usize, Artifact>,
    sample_rate: u32,
) -> Result<Artifact, AssembleError> {
    if artifacts.is_empty() {
        return Err(AssembleError::Empty);
    }

    let total: usize = artifacts.values().map(|a| a.samples.len()).sum();
    let mut samples = Vec::with_capacity(total);
    for (&index, artifact) in artifacts {
        if artifact.sample_rate != sample_rate {
            return Err(AssembleError::SampleRateMismatch {
                index,
                expected: sample_rate,
                found: artifact.sample_rate,
            });
        }
        samples.extend_from_slice(&artifact.samples);
    }

    Ok(Artifact::new(samples, sample_rate))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_concatenates_in_index_order() {
        let mut map = BTreeMap::new();
        map.insert(2, Artifact::new(vec![0.3], 24_000));
        map.insert(0, Artifact::new(vec![0.1, 0.1], 24_000));
        map.insert(1, Artifact::new(vec![0.2], 24_000));

        let out = assemble(&map, 24_000).unwrap();
        assert_eq!(out.samples, vec![0.1, 0.1, 0.2, 0.3]);
        assert_eq!(out.sample_rate, 24_000);
    }

    #[test]
    fn test_gaps_are_not_filled() {
        let mut map = BTreeMap::new();
        map.insert(0, Artifact::new(vec![0.1], 24_000));
        map.insert(5, Artifact::new(vec![0.5], 24_000));
        assert_eq!(assemble(&map, 24_000).unwrap().samples, vec![0.1, 0.5]);
    }

    #[test]
    fn test_empty_is_an_error() {
        assert_eq!(assemble(&BTreeMap::new(), 24_000), Err(AssembleError::Empty));
    }

    #[test]
    fn test_rate_mismatch_is_an_error() {
        let mut map = BTreeMap::new();
        map.insert(0, Artifact::new(vec![0.1], 24_000));
        map.insert(1, Artifact::new(vec![0.1], 16_000));
        assert_eq!(
            assemble(&map, 24_000),
            Err(AssembleError::SampleRateMismatch { index: 1, expected: 24_000, found: 16_000 })
        );
    }
}
