//! Cook's distance outlier detection
//!
//! Influence of each sample on its gene's fit:
//! D = (y - mu)^2 / (mu + alpha mu^2) / p * h / (1 - h)^2, with alpha a
//! robust method-of-moments dispersion so that the outlier itself does not
//! inflate the variance it is judged against.

use ndarray::{Array2, ArrayView2};
use rayon::prelude::*;
use statrs::distribution::{ContinuousCDF, FisherSnedecor};

use crate::glm::{Design, GlmFits};
use crate::normalization::NormalizedCounts;
use crate::stats::trimmed_mean;

/// Floor of the robust dispersion
const MIN_ROBUST_DISP: f64 = 0.04;

/// Minimum replicates per cell for outlier calls
pub const MIN_REPLICATES: usize = 3;

/// Trim ratio and variance scale for a cell of `n` samples
fn trim_scale(n: usize) -> (f64, f64) {
    if n <= 3 {
        (1.0 / 3.0, 2.04)
    } else if n <= 23 {
        (1.0 / 4.0, 1.86)
    } else {
        (1.0 / 8.0, 1.51)
    }
}

fn trimmed_variance(values: &[f64], trim: f64, scale: f64) -> f64 {
    let center = trimmed_mean(values, trim).unwrap_or(0.0);
    let sq: Vec<f64> = values.iter().map(|v| (v - center).powi(2)).collect();
    scale * trimmed_mean(&sq, trim).unwrap_or(0.0)
}

/// Per-gene dispersion from trimmed variances, largest over cells with
/// enough replicates (all samples together otherwise)
pub fn robust_dispersions(normalized: &NormalizedCounts, design: &Design) -> Vec<f64> {
    let cells: Vec<Vec<usize>> = design
        .cells()
        .into_iter()
        .filter(|c| c.len() >= MIN_REPLICATES)
        .collect();

    normalized
        .values
        .rows()
        .into_iter()
        .map(|row| {
            let mean = row.mean().unwrap_or(0.0);
            let var = if cells.is_empty() {
                trimmed_variance(&row.to_vec(), 1.0 / 8.0, 1.51)
            } else {
                cells
                    .iter()
                    .map(|cell| {
                        let values: Vec<f64> = cell.iter().map(|&j| row[j]).collect();
                        let (trim, scale) = trim_scale(values.len());
                        trimmed_variance(&values, trim, scale)
                    })
                    .fold(0.0, f64::max)
            };
            if mean > 0.0 {
                ((var - mean) / (mean * mean)).max(MIN_ROBUST_DISP)
            } else {
                MIN_ROBUST_DISP
            }
        })
        .collect()
}

/// Cook's distances (genes x samples); NaN where the hat value is degenerate
pub fn cooks_distances(
    counts: ArrayView2<f64>,
    normalized: &NormalizedCounts,
    design: &Design,
    fits: &GlmFits,
) -> Array2<f64> {
    let (n_genes, n_samples) = counts.dim();
    let p = design.n_coefs() as f64;
    let alphas = robust_dispersions(normalized, design);

    let rows: Vec<Vec<f64>> = (0..n_genes)
        .into_par_iter()
        .map(|i| {
            let alpha = alphas[i];
            (0..n_samples)
                .map(|j| {
                    let y = counts[[i, j]];
                    let mu = fits.mu[[i, j]];
                    let h = fits.hat_diagonals[[i, j]];
                    let v = mu + alpha * mu * mu;
                    let pearson_sq = if v > 0.0 { (y - mu).powi(2) / v } else { 0.0 };
                    if h.is_finite() && h < 1.0 {
                        pearson_sq / p * h / (1.0 - h).powi(2)
                    } else {
                        f64::NAN
                    }
                })
                .collect()
        })
        .collect();

    let mut cooks = Array2::zeros((n_genes, n_samples));
    for (i, row) in rows.into_iter().enumerate() {
        for (j, v) in row.into_iter().enumerate() {
            cooks[[i, j]] = v;
        }
    }
    cooks
}

/// 0.99 quantile of F(p, m - p)
pub fn cooks_cutoff(n_samples: usize, n_coefs: usize) -> f64 {
    if n_samples <= n_coefs {
        return f64::INFINITY;
    }
    match FisherSnedecor::new(n_coefs as f64, (n_samples - n_coefs) as f64) {
        Ok(f) => f.inverse_cdf(0.99),
        Err(_) => f64::INFINITY,
    }
}

/// Outlier calls are made only when every cell has enough replicates
pub fn has_enough_replicates(design: &Design) -> bool {
    design.cells().iter().all(|c| c.len() >= MIN_REPLICATES)
}

/// Genes whose largest Cook's distance exceeds `cutoff`
///
/// With a two-level design a gene is spared when at least three samples
/// have counts above the outlying sample's count.
pub fn flag_cooks_outliers(cooks: &Array2<f64>, counts: ArrayView2<f64>, cutoff: f64, two_level: bool) -> Vec<bool> {
    cooks
        .rows()
        .into_iter()
        .enumerate()
        .map(|(i, row)| {
            let (max_j, max_d) = row
                .iter()
                .enumerate()
                .filter(|(_, d)| d.is_finite())
                .fold((0, 0.0_f64), |acc, (j, &d)| if d > acc.1 { (j, d) } else { acc });
            if max_d <= cutoff {
                return false;
            }
            if two_level {
                let outlier_count = counts[[i, max_j]];
                let n_above = counts.row(i).iter().filter(|&&c| c > outlier_count).count();
                n_above < 3
            } else {
                true
            }
        })
        .collect()
}
