//! Size-factor normalized counts

use ndarray::{Array1, Array2, Axis};

use super::{estimate_size_factors, SizeFactorMethod};
use crate::data::CountMatrix;
use crate::error::Result;

/// Counts divided by their sample's size factor, with the factors used
#[derive(Debug, Clone)]
pub struct NormalizedCounts {
    pub gene_ids: Vec<String>,
    pub sample_ids: Vec<String>,
    /// Normalized counts (genes x samples)
    pub values: Array2<f64>,
    pub size_factors: Array1<f64>,
}

impl NormalizedCounts {
    /// Estimate size factors and normalize
    pub fn from_counts(counts: &CountMatrix, method: SizeFactorMethod) -> Result<Self> {
        let size_factors = estimate_size_factors(counts.counts(), method)?;
        log::info!(
            "Estimated size factors ({:?}): range {:.3} - {:.3}",
            method,
            size_factors.iter().cloned().fold(f64::INFINITY, f64::min),
            size_factors.iter().cloned().fold(f64::NEG_INFINITY, f64::max),
        );
        Ok(Self::with_size_factors(counts, size_factors))
    }

    /// Normalize with known size factors
    pub fn with_size_factors(counts: &CountMatrix, size_factors: Array1<f64>) -> Self {
        let values = &counts.counts() / &size_factors.view().insert_axis(Axis(0));
        Self {
            gene_ids: counts.gene_ids().to_vec(),
            sample_ids: counts.sample_ids().to_vec(),
            values,
            size_factors,
        }
    }

    /// Mean normalized count per gene
    pub fn base_means(&self) -> Array1<f64> {
        self.values
            .mean_axis(Axis(1))
            .unwrap_or_else(|| Array1::zeros(self.values.nrows()))
    }

    /// Sample variance of normalized counts per gene
    pub fn base_vars(&self) -> Array1<f64> {
        if self.values.ncols() < 2 {
            return Array1::from_elem(self.values.nrows(), f64::NAN);
        }
        self.values.var_axis(Axis(1), 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    #[test]
    fn test_normalized_counts() {
        let counts = CountMatrix::new(
            array![[10.0, 20.0], [30.0, 60.0], [5.0, 10.0]],
            vec!["a".into(), "b".into(), "c".into()],
            vec!["s1".into(), "s2".into()],
        )
        .unwrap();
        let norm = NormalizedCounts::from_counts(&counts, SizeFactorMethod::Ratio).unwrap();

        // After normalization both samples agree exactly
        for i in 0..3 {
            assert_relative_eq!(norm.values[[i, 0]], norm.values[[i, 1]], epsilon = 1e-10);
        }
        assert_eq!(norm.gene_ids, counts.gene_ids());
        assert_relative_eq!(norm.size_factors[0] * norm.size_factors[1], 1.0, epsilon = 1e-10);
        assert_relative_eq!(norm.base_vars()[0], 0.0, epsilon = 1e-10);
    }
}
