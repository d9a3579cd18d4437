//! Size factor estimation using the median of ratios method

use clap::ValueEnum;
use ndarray::{Array1, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

use crate::error::{DeError, Result};
use crate::stats::median;

/// Method for size factor estimation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum SizeFactorMethod {
    /// Median of ratios to the geometric mean over genes with no zero count
    #[default]
    Ratio,
    /// Geometric mean over positive counts only, for data where every gene has a zero
    PosCounts,
}

/// Estimate one strictly positive size factor per sample
pub fn estimate_size_factors(counts: ArrayView2<f64>, method: SizeFactorMethod) -> Result<Array1<f64>> {
    let (n_genes, n_samples) = counts.dim();
    if n_genes == 0 || n_samples == 0 {
        return Err(DeError::EmptyData {
            reason: "count matrix is empty".to_string(),
        });
    }

    let size_factors = match method {
        SizeFactorMethod::Ratio => size_factors_ratio(counts)?,
        SizeFactorMethod::PosCounts => size_factors_poscounts(counts)?,
    };

    if size_factors.iter().any(|&x| x <= 0.0 || !x.is_finite()) {
        return Err(DeError::SizeFactorFailed {
            reason: format!("non-positive size factor computed: {:?}", size_factors.to_vec()),
        });
    }

    log::debug!("Size factors ({:?}): {:?}", method, size_factors.to_vec());
    Ok(size_factors)
}

/// Per-sample median of count / geometric mean over `genes`
fn median_ratios(counts: ArrayView2<f64>, genes: &[(usize, f64)]) -> Vec<Option<f64>> {
    (0..counts.ncols())
        .map(|j| {
            let log_ratios: Vec<f64> = genes
                .iter()
                .filter(|&&(i, _)| counts[[i, j]] > 0.0)
                .map(|&(i, log_geo)| counts[[i, j]].ln() - log_geo)
                .collect();
            median(&log_ratios).map(f64::exp)
        })
        .collect()
}

fn size_factors_ratio(counts: ArrayView2<f64>) -> Result<Array1<f64>> {
    let n_samples = counts.ncols() as f64;

    let genes: Vec<(usize, f64)> = counts
        .axis_iter(Axis(0))
        .enumerate()
        .filter(|(_, row)| row.iter().all(|&x| x > 0.0))
        .map(|(i, row)| (i, row.iter().map(|&x| x.ln()).sum::<f64>() / n_samples))
        .collect();

    if genes.is_empty() {
        return Err(DeError::SizeFactorFailed {
            reason: "every gene contains at least one zero; use the pos_counts method".to_string(),
        });
    }

    median_ratios(counts, &genes)
        .into_iter()
        .enumerate()
        .map(|(j, sf)| {
            sf.ok_or_else(|| DeError::SizeFactorFailed {
                reason: format!("no valid ratios for sample {}", j + 1),
            })
        })
        .collect::<Result<Vec<f64>>>()
        .map(Array1::from)
}

fn size_factors_poscounts(counts: ArrayView2<f64>) -> Result<Array1<f64>> {
    let n_samples = counts.ncols() as f64;

    // Log sum over positive counts divided by the total number of samples
    let genes: Vec<(usize, f64)> = counts
        .axis_iter(Axis(0))
        .enumerate()
        .filter(|(_, row)| row.iter().any(|&x| x > 0.0))
        .map(|(i, row)| {
            let log_sum: f64 = row.iter().filter(|&&x| x > 0.0).map(|&x| x.ln()).sum();
            (i, log_sum / n_samples)
        })
        .collect();

    if genes.is_empty() {
        return Err(DeError::SizeFactorFailed {
            reason: "no genes with positive counts".to_string(),
        });
    }

    let raw: Vec<f64> = median_ratios(counts, &genes)
        .into_iter()
        .map(|sf| sf.unwrap_or(1.0))
        .collect();

    // Rescale to geometric mean 1
    let log_mean = raw.iter().map(|x| x.ln()).sum::<f64>() / raw.len() as f64;
    Ok(raw.iter().map(|x| x / log_mean.exp()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    #[test]
    fn test_size_factors_basic() {
        let counts = array![
            [100.0, 200.0, 150.0],
            [50.0, 100.0, 75.0],
            [200.0, 400.0, 300.0],
            [10.0, 20.0, 15.0],
        ];
        let sf = estimate_size_factors(counts.view(), SizeFactorMethod::Ratio).unwrap();

        assert!(sf.iter().all(|&x| x > 0.0));
        // Sample 2 is exactly twice sample 1
        assert_relative_eq!(sf[1] / sf[0], 2.0, epsilon = 1e-12);
        assert_relative_eq!(sf[2] / sf[0], 1.5, epsilon = 1e-12);
    }

    #[test]
    fn test_ratio_fails_when_every_gene_has_zero() {
        let counts = array![[0.0, 10.0], [5.0, 0.0]];
        let err = estimate_size_factors(counts.view(), SizeFactorMethod::Ratio).unwrap_err();
        assert!(matches!(err, DeError::SizeFactorFailed { .. }));

        let sf = estimate_size_factors(counts.view(), SizeFactorMethod::PosCounts).unwrap();
        assert!(sf.iter().all(|&x| x > 0.0 && x.is_finite()));
        assert_relative_eq!(sf[0] * sf[1], 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_zero_rows_ignored() {
        let counts = array![[0.0, 0.0], [10.0, 20.0], [30.0, 60.0]];
        let sf = estimate_size_factors(counts.view(), SizeFactorMethod::Ratio).unwrap();
        assert_relative_eq!(sf[1] / sf[0], 2.0, epsilon = 1e-12);
    }
}
