//! Empirical Bayes shrinkage of gene-wise dispersions toward the trend

use ndarray::{Array1, ArrayView1, ArrayView2};
use rand::distributions::Distribution;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use statrs::distribution::{ChiSquared, Normal};

use super::gene_wise::GeneWiseEstimates;
use super::objective::{armijo_line_search, grid_search, GeneObservations, LogNormalPrior};
use super::DispersionParams;
use crate::glm::Design;
use crate::stats::{mad, trigamma};

/// Smallest prior variance of log dispersions
const MIN_PRIOR_VAR: f64 = 0.25;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriorVariance {
    /// Variance of the log-normal prior
    pub prior_var: f64,
    /// Observed MAD^2 of log(gene-wise / trend)
    pub var_log_disp: f64,
}

/// Width of the prior on log dispersions around the trend
///
/// The observed spread of log residuals minus the sampling variance expected
/// with `n_samples - n_coefs` residual degrees of freedom. With three or
/// fewer residual degrees of freedom the sampling distribution is skewed
/// enough that the prior variance is instead matched by simulation.
pub fn estimate_prior_variance(
    gene_wise: &[f64],
    trend: &[f64],
    n_samples: usize,
    n_coefs: usize,
    params: &DispersionParams,
) -> PriorVariance {
    let residuals: Vec<f64> = gene_wise
        .iter()
        .zip(trend)
        .filter(|(&g, &t)| g.is_finite() && t.is_finite() && t > 0.0 && g >= 100.0 * params.min_disp)
        .map(|(&g, &t)| g.ln() - t.ln())
        .collect();

    let var_log_disp = match mad(&residuals) {
        Some(m) if residuals.len() >= 3 => m * m,
        _ => {
            return PriorVariance {
                prior_var: MIN_PRIOR_VAR,
                var_log_disp: MIN_PRIOR_VAR,
            }
        }
    };

    if n_samples <= n_coefs {
        return PriorVariance {
            prior_var: MIN_PRIOR_VAR,
            var_log_disp,
        };
    }

    let df = (n_samples - n_coefs) as f64;
    let prior_var = if df <= 3.0 {
        simulated_prior_variance(&residuals, df, params.seed)
    } else {
        (var_log_disp - trigamma(df / 2.0)).max(MIN_PRIOR_VAR)
    };

    log::debug!(
        "Dispersion prior: residual df {}, varLogDisp {:.4}, prior variance {:.4}",
        df,
        var_log_disp,
        prior_var
    );

    PriorVariance {
        prior_var,
        var_log_disp,
    }
}

fn histogram_density(values: &[f64], lo: f64, width: f64, n_bins: usize) -> Vec<f64> {
    let mut counts = vec![0.0; n_bins];
    let mut total = 0.0;
    for &v in values {
        let bin = ((v - lo) / width).floor();
        if bin >= 0.0 && (bin as usize) < n_bins {
            counts[bin as usize] += 1.0;
            total += 1.0;
        }
    }
    if total > 0.0 {
        counts.iter_mut().for_each(|c| *c /= total);
    }
    counts
}

/// Prior variance minimizing the KL divergence between the observed log
/// residual histogram and simulated log(chi^2_df / df) + N(0, var)
fn simulated_prior_variance(residuals: &[f64], df: f64, seed: u64) -> f64 {
    const N_SIM: usize = 10_000;
    const N_GRID: usize = 200;
    const MAX_VAR: f64 = 8.0;
    const LO: f64 = -10.0;
    const WIDTH: f64 = 0.5;
    const N_BINS: usize = 40;

    let (chi, normal) = match (ChiSquared::new(df), Normal::new(0.0, 1.0)) {
        (Ok(c), Ok(n)) => (c, n),
        _ => return MIN_PRIOR_VAR,
    };
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let log_chi: Vec<f64> = (0..N_SIM).map(|_| (chi.sample(&mut rng) / df).ln()).collect();
    let z: Vec<f64> = (0..N_SIM).map(|_| normal.sample(&mut rng)).collect();

    let observed = histogram_density(residuals, LO, WIDTH, N_BINS);
    let grid: Vec<f64> = (0..N_GRID).map(|i| MAX_VAR * i as f64 / (N_GRID - 1) as f64).collect();

    let kl: Vec<f64> = grid
        .iter()
        .map(|&var| {
            let sd = var.sqrt();
            let simulated: Vec<f64> = log_chi.iter().zip(&z).map(|(c, e)| c + sd * e).collect();
            let sim = histogram_density(&simulated, LO, WIDTH, N_BINS);
            let small = observed
                .iter()
                .chain(&sim)
                .copied()
                .filter(|v| *v > 0.0)
                .fold(f64::INFINITY, f64::min);
            observed
                .iter()
                .zip(&sim)
                .filter(|(o, _)| **o > 0.0)
                .map(|(o, s)| o * ((o + small).ln() - (s + small).ln()))
                .sum()
        })
        .collect();

    // moving average over the grid before taking the minimum
    let half = 5;
    let smoothed: Vec<f64> = (0..N_GRID)
        .map(|i| {
            let lo = i.saturating_sub(half);
            let hi = (i + half + 1).min(N_GRID);
            kl[lo..hi].iter().sum::<f64>() / (hi - lo) as f64
        })
        .collect();
    let best = smoothed
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.total_cmp(b.1))
        .map(|(i, _)| grid[i])
        .unwrap_or(MIN_PRIOR_VAR);

    log::debug!("Simulated dispersion prior variance with df {}: {:.4}", df, best);
    best.max(MIN_PRIOR_VAR)
}

/// MAP dispersions and the final per-gene dispersion used by the GLM
#[derive(Debug, Clone)]
pub struct MapEstimates {
    pub map: Array1<f64>,
    pub final_dispersions: Array1<f64>,
    /// Genes whose gene-wise estimate lies far above the trend
    pub outliers: Vec<bool>,
}

fn map_one(
    gene: &GeneObservations<'_>,
    gene_wise: f64,
    trend: f64,
    prior_var: f64,
    params: &DispersionParams,
    max_disp: f64,
) -> f64 {
    if !gene_wise.is_finite() || !(trend > 0.0) {
        return f64::NAN;
    }
    let start = if gene_wise < 0.1 * trend { trend } else { gene_wise };
    let prior = Some(LogNormalPrior {
        log_mean: trend.ln(),
        variance: prior_var,
    });

    let search = armijo_line_search(gene, start.ln(), prior, &params.line_search());
    let log_alpha = if search.converged(params.maxit) {
        search.log_alpha
    } else {
        grid_search(gene, params.min_disp.ln(), max_disp.ln(), prior)
    };
    log_alpha.exp().clamp(params.min_disp, max_disp)
}

pub fn estimate_map_dispersions(
    counts: ArrayView2<f64>,
    gene_wise: &GeneWiseEstimates,
    trend: ArrayView1<f64>,
    design: &Design,
    prior: PriorVariance,
    params: &DispersionParams,
) -> MapEstimates {
    let (n_genes, n_samples) = counts.dim();
    let max_disp = params.max_disp(n_samples);
    let x = design.matrix();

    let map: Vec<f64> = (0..n_genes)
        .into_par_iter()
        .map(|i| {
            let gene = GeneObservations {
                y: counts.row(i),
                mu: gene_wise.mu.row(i),
                design: x,
            };
            map_one(&gene, gene_wise.dispersions[i], trend[i], prior.prior_var, params, max_disp)
        })
        .collect();

    let threshold = params.outlier_sd * prior.var_log_disp.sqrt();
    let outliers: Vec<bool> = (0..n_genes)
        .map(|i| {
            let g = gene_wise.dispersions[i];
            let t = trend[i];
            g.is_finite() && g > 0.0 && t > 0.0 && (g.ln() - t.ln()) > threshold
        })
        .collect();

    let final_dispersions = Array1::from_iter(
        (0..n_genes).map(|i| if outliers[i] { gene_wise.dispersions[i] } else { map[i] }),
    );

    log::debug!(
        "MAP dispersions: {} genes kept their gene-wise estimate as outliers",
        outliers.iter().filter(|o| **o).count()
    );

    MapEstimates {
        map: Array1::from_vec(map),
        final_dispersions,
        outliers,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_prior_variance_floor() {
        let gene_wise = vec![0.1, 0.11, 0.09, 0.1, 0.1, 0.105];
        let trend = vec![0.1; 6];
        let pv = estimate_prior_variance(&gene_wise, &trend, 12, 2, &DispersionParams::default());
        assert_relative_eq!(pv.prior_var, MIN_PRIOR_VAR);
        assert!(pv.var_log_disp < 0.01);
    }

    #[test]
    fn test_prior_variance_wide_spread() {
        let gene_wise: Vec<f64> = (0..100).map(|i| 0.1 * ((i as f64 - 50.0) / 10.0).exp()).collect();
        let trend = vec![0.1; 100];
        let pv = estimate_prior_variance(&gene_wise, &trend, 30, 2, &DispersionParams::default());
        assert!(pv.prior_var > 1.0);
        assert!(pv.prior_var < pv.var_log_disp);
    }

    #[test]
    fn test_simulated_prior_variance_is_reproducible() {
        let residuals: Vec<f64> = (0..200).map(|i| ((i % 20) as f64 - 10.0) / 4.0).collect();
        let a = simulated_prior_variance(&residuals, 2.0, 2);
        let b = simulated_prior_variance(&residuals, 2.0, 2);
        assert_eq!(a, b);
        assert!(a >= MIN_PRIOR_VAR && a <= 8.0);
    }

    #[test]
    fn test_histogram_density_sums_to_one() {
        let d = histogram_density(&[-1.0, 0.1, 0.2, 3.0, 50.0], -10.0, 0.5, 40);
        assert_relative_eq!(d.iter().sum::<f64>(), 1.0);
    }
}
