//! Sample identifier alignment between a count matrix and its metadata
//!
//! Alignment is checked before any computation. The only way to fix a
//! column order that differs from the metadata is [`reorder_to_metadata`],
//! which logs the permutation it applies.

use std::collections::{HashMap, HashSet};

use super::{CountMatrix, SampleMetadata};
use crate::error::{DeError, Result};

fn set_differences(counts: &CountMatrix, metadata: &SampleMetadata) -> (Vec<String>, Vec<String>) {
    let in_counts: HashSet<&str> = counts.sample_ids().iter().map(|s| s.as_str()).collect();
    let in_meta: HashSet<&str> = metadata.sample_ids().iter().map(|s| s.as_str()).collect();

    let missing_in_counts = metadata
        .sample_ids()
        .iter()
        .filter(|s| !in_counts.contains(s.as_str()))
        .cloned()
        .collect();
    let missing_in_meta = counts
        .sample_ids()
        .iter()
        .filter(|s| !in_meta.contains(s.as_str()))
        .cloned()
        .collect();
    (missing_in_counts, missing_in_meta)
}

fn mismatch_error(missing_in_counts: &[String], missing_in_meta: &[String]) -> DeError {
    let mut parts = Vec::new();
    if !missing_in_counts.is_empty() {
        parts.push(format!(
            "metadata samples absent from count matrix: [{}]",
            missing_in_counts.join(", ")
        ));
    }
    if !missing_in_meta.is_empty() {
        parts.push(format!(
            "count matrix columns absent from metadata: [{}]",
            missing_in_meta.join(", ")
        ));
    }
    DeError::SampleMismatch {
        reason: parts.join("; "),
    }
}

/// Fail unless count columns and metadata rows hold the same samples in the same order
pub fn check_alignment(counts: &CountMatrix, metadata: &SampleMetadata) -> Result<()> {
    let (missing_in_counts, missing_in_meta) = set_differences(counts, metadata);
    if !missing_in_counts.is_empty() || !missing_in_meta.is_empty() {
        return Err(mismatch_error(&missing_in_counts, &missing_in_meta));
    }

    if let Some(pos) = counts
        .sample_ids()
        .iter()
        .zip(metadata.sample_ids())
        .position(|(c, m)| c != m)
    {
        return Err(DeError::SampleOrder {
            reason: format!(
                "position {}: count column '{}' but metadata row '{}' (use explicit reordering)",
                pos + 1,
                counts.sample_ids()[pos],
                metadata.sample_ids()[pos]
            ),
        });
    }

    Ok(())
}

/// Return a copy of `counts` with columns in metadata order
///
/// Sample sets must match exactly; only the order may differ.
pub fn reorder_to_metadata(counts: &CountMatrix, metadata: &SampleMetadata) -> Result<CountMatrix> {
    let (missing_in_counts, missing_in_meta) = set_differences(counts, metadata);
    if !missing_in_counts.is_empty() || !missing_in_meta.is_empty() {
        return Err(mismatch_error(&missing_in_counts, &missing_in_meta));
    }

    let position: HashMap<&str, usize> = counts
        .sample_ids()
        .iter()
        .enumerate()
        .map(|(i, s)| (s.as_str(), i))
        .collect();
    let order: Vec<usize> = metadata
        .sample_ids()
        .iter()
        .map(|s| position[s.as_str()])
        .collect();

    if order.iter().enumerate().all(|(i, &j)| i == j) {
        log::debug!("Sample order already matches metadata");
        return Ok(counts.clone());
    }

    for (new_pos, &old_pos) in order.iter().enumerate() {
        if new_pos != old_pos {
            log::info!(
                "Reordering sample '{}': column {} -> {}",
                counts.sample_ids()[old_pos],
                old_pos + 1,
                new_pos + 1
            );
        }
    }
    Ok(counts.select_samples(&order))
}

/// A count matrix paired with metadata whose samples are known to align
#[derive(Debug, Clone)]
pub struct Experiment {
    counts: CountMatrix,
    metadata: SampleMetadata,
}

impl Experiment {
    /// Pair inputs after checking alignment
    pub fn new(counts: CountMatrix, metadata: SampleMetadata) -> Result<Self> {
        check_alignment(&counts, &metadata)?;
        Ok(Self { counts, metadata })
    }

    /// Pair inputs, reordering count columns to metadata order first
    pub fn with_reordering(counts: CountMatrix, metadata: SampleMetadata) -> Result<Self> {
        let counts = reorder_to_metadata(&counts, &metadata)?;
        Ok(Self { counts, metadata })
    }

    pub fn counts(&self) -> &CountMatrix {
        &self.counts
    }

    pub fn metadata(&self) -> &SampleMetadata {
        &self.metadata
    }

    /// New experiment sharing metadata but with a derived count matrix
    pub fn with_counts(&self, counts: CountMatrix) -> Result<Self> {
        Self::new(counts, self.metadata.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn counts(samples: &[&str]) -> CountMatrix {
        let n = samples.len();
        let data = ndarray::Array2::from_shape_fn((2, n), |(i, j)| (10 * (i + 1) + j) as f64);
        CountMatrix::new(
            data,
            vec!["g1".into(), "g2".into()],
            samples.iter().map(|s| s.to_string()).collect(),
        )
        .unwrap()
    }

    fn metadata(samples: &[&str]) -> SampleMetadata {
        SampleMetadata::new(samples.iter().map(|s| s.to_string()).collect()).unwrap()
    }

    #[test]
    fn test_aligned_inputs_pass() {
        let c = counts(&["a", "b", "c"]);
        let m = metadata(&["a", "b", "c"]);
        assert!(check_alignment(&c, &m).is_ok());
        assert!(Experiment::new(c, m).is_ok());
    }

    #[test]
    fn test_missing_sample_is_fatal() {
        let c = counts(&["a", "b", "c"]);
        let m = metadata(&["a", "b", "d"]);
        let err = check_alignment(&c, &m).unwrap_err();
        let msg = err.to_string();
        assert!(matches!(err, DeError::SampleMismatch { .. }));
        assert!(msg.contains("d"));
        assert!(msg.contains("c"));
        assert!(reorder_to_metadata(&c, &m).is_err());
    }

    #[test]
    fn test_order_mismatch_requires_explicit_reorder() {
        let c = counts(&["b", "a", "c"]);
        let m = metadata(&["a", "b", "c"]);
        assert!(matches!(
            check_alignment(&c, &m),
            Err(DeError::SampleOrder { .. })
        ));

        let reordered = reorder_to_metadata(&c, &m).unwrap();
        assert_eq!(reordered.sample_ids(), m.sample_ids());
        assert_eq!(reordered.gene_counts(0).to_vec(), vec![11.0, 10.0, 12.0]);
        assert!(check_alignment(&reordered, &m).is_ok());
        // input untouched
        assert_eq!(c.sample_ids()[0], "b");
    }

    #[test]
    fn test_with_reordering() {
        let c = CountMatrix::new(
            array![[1.0, 2.0]],
            vec!["g1".into()],
            vec!["y".into(), "x".into()],
        )
        .unwrap();
        let exp = Experiment::with_reordering(c, metadata(&["x", "y"])).unwrap();
        assert_eq!(exp.counts().gene_counts(0).to_vec(), vec![2.0, 1.0]);
    }
}
