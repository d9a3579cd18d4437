//! Low-count gene filtering

use crate::data::CountMatrix;

/// Default minimum total count per gene
pub const DEFAULT_MIN_TOTAL_COUNT: f64 = 10.0;

/// Genes kept and dropped by [`filter_low_counts`]
#[derive(Debug, Clone)]
pub struct FilterOutcome {
    /// Derived matrix with only the retained genes, in input order
    pub counts: CountMatrix,
    /// Identifiers of the dropped genes, in input order
    pub dropped: Vec<String>,
    pub threshold: f64,
}

impl FilterOutcome {
    pub fn n_kept(&self) -> usize {
        self.counts.n_genes()
    }

    pub fn n_dropped(&self) -> usize {
        self.dropped.len()
    }
}

/// Keep genes whose summed count across samples is at least `threshold`
///
/// Applying the filter to its own output changes nothing.
pub fn filter_low_counts(counts: &CountMatrix, threshold: f64) -> FilterOutcome {
    let totals = counts.row_sums();
    let (keep, drop): (Vec<usize>, Vec<usize>) =
        (0..counts.n_genes()).partition(|&i| totals[i] >= threshold);

    let dropped: Vec<String> = drop.iter().map(|&i| counts.gene_ids()[i].clone()).collect();

    log::info!(
        "Low-count filter (total >= {}): kept {} of {} genes",
        threshold,
        keep.len(),
        counts.n_genes()
    );
    if !dropped.is_empty() {
        log::debug!("Dropped genes: {}", dropped.join(", "));
    }

    FilterOutcome {
        counts: counts.subset_genes(&keep),
        dropped,
        threshold,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn matrix() -> CountMatrix {
        let counts = array![
            [100.0, 120.0, 10.0, 8.0],
            [0.0, 1.0, 2.0, 3.0],
            [50.0, 50.0, 51.0, 49.0],
            [3.0, 3.0, 2.0, 2.0],
            [0.0, 0.0, 0.0, 0.0],
        ];
        let genes = ["G1", "G2", "G3", "G4", "G5"].iter().map(|s| s.to_string()).collect();
        let samples = ["a1", "a2", "b1", "b2"].iter().map(|s| s.to_string()).collect();
        CountMatrix::new(counts, genes, samples).unwrap()
    }

    #[test]
    fn test_threshold_partition() {
        let m = matrix();
        let out = filter_low_counts(&m, DEFAULT_MIN_TOTAL_COUNT);
        assert_eq!(out.counts.gene_ids(), &["G1", "G3", "G4"]);
        assert_eq!(out.dropped, vec!["G2", "G5"]);

        for total in out.counts.row_sums() {
            assert!(total >= DEFAULT_MIN_TOTAL_COUNT);
        }
        for id in &out.dropped {
            let i = m.gene_index(id).unwrap();
            assert!(m.gene_counts(i).sum() < DEFAULT_MIN_TOTAL_COUNT);
        }
    }

    #[test]
    fn test_idempotent() {
        let m = matrix();
        for threshold in [0.0, 1.0, 10.0, 11.0, 200.0, 1000.0] {
            let once = filter_low_counts(&m, threshold);
            let twice = filter_low_counts(&once.counts, threshold);
            assert_eq!(once.counts, twice.counts);
            assert!(twice.dropped.is_empty());
        }
    }

    #[test]
    fn test_everything_dropped_gives_empty_matrix() {
        let out = filter_low_counts(&matrix(), 1e9);
        assert_eq!(out.n_kept(), 0);
        assert_eq!(out.n_dropped(), 5);
        assert_eq!(out.counts.n_samples(), 4);
    }
}
