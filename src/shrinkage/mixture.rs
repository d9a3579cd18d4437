//! Adaptive shrinkage with a scale mixture of zero-centered normals
//!
//! The true log2 fold changes are modeled as drawn from
//! π₀·δ₀ + Σ πₖ·N(0, σₖ²) over a fixed grid of σₖ. The mixture weights are
//! estimated by EM from the observed estimates and their standard errors;
//! each gene then gets its posterior mean and standard deviation.

use rayon::prelude::*;
use statrs::distribution::{Continuous, ContinuousCDF, Normal};

#[derive(Debug, Clone)]
pub struct MixtureParams {
    /// Normal components besides the point mass at zero
    pub n_components: usize,
    pub max_iter: usize,
    /// Stop when the log likelihood changes by less than this
    pub tol: f64,
    /// Dirichlet penalty on the point mass weight, favoring the null
    pub null_weight: f64,
}

impl Default for MixtureParams {
    fn default() -> Self {
        Self {
            n_components: 20,
            max_iter: 1000,
            tol: 1e-6,
            null_weight: 10.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MixtureFit {
    /// NaN where the input row was undefined
    pub posterior_mean: Vec<f64>,
    pub posterior_sd: Vec<f64>,
    pub lfsr: Vec<f64>,
    /// Component weights, point mass first
    pub pi: Vec<f64>,
    /// Component standard deviations, 0 for the point mass
    pub sigma: Vec<f64>,
}

/// Point mass plus `n` standard deviations spaced evenly on the log2 scale
/// from min(SE)/10 to 2·max(SE)
fn sigma_grid(se: &[f64], n: usize) -> Vec<f64> {
    let se_min = se.iter().copied().fold(f64::INFINITY, f64::min);
    let se_max = se.iter().copied().fold(0.0_f64, f64::max);
    let lo = (se_min / 10.0).max(1e-8).log2();
    let hi = (2.0 * se_max).max(2.0 * se_min / 10.0).log2();
    let mut sigma = vec![0.0];
    for k in 0..n {
        let t = if n > 1 { k as f64 / (n - 1) as f64 } else { 1.0 };
        sigma.push((lo + (hi - lo) * t).exp2());
    }
    sigma
}

fn ln_density(b: f64, sd: f64) -> f64 {
    Normal::new(0.0, sd).map(|d| d.ln_pdf(b)).unwrap_or(f64::NEG_INFINITY)
}

/// Responsibilities of each component for one observation, and the log of
/// its marginal likelihood
fn responsibilities(log_lik: &[f64], pi: &[f64]) -> (Vec<f64>, f64) {
    let terms: Vec<f64> = log_lik
        .iter()
        .zip(pi)
        .map(|(l, p)| if *p > 0.0 { p.ln() + l } else { f64::NEG_INFINITY })
        .collect();
    let max = terms.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() {
        return (vec![0.0; terms.len()], f64::NEG_INFINITY);
    }
    let total = max + terms.iter().map(|t| (t - max).exp()).sum::<f64>().ln();
    (terms.iter().map(|t| (t - total).exp()).collect(), total)
}

/// Fit the mixture to `lfc` with standard errors `se` (both log2 scale)
///
/// Rows with a non-finite estimate or a non-positive standard error do not
/// take part and get NaN outputs.
pub fn fit_normal_mixture(lfc: &[f64], se: &[f64], params: &MixtureParams) -> MixtureFit {
    let n = lfc.len();
    let valid: Vec<usize> = (0..n)
        .filter(|&i| lfc[i].is_finite() && se[i].is_finite() && se[i] > 0.0)
        .collect();
    let mut fit = MixtureFit {
        posterior_mean: vec![f64::NAN; n],
        posterior_sd: vec![f64::NAN; n],
        lfsr: vec![f64::NAN; n],
        pi: Vec::new(),
        sigma: Vec::new(),
    };
    if valid.is_empty() {
        return fit;
    }

    let b: Vec<f64> = valid.iter().map(|&i| lfc[i]).collect();
    let s: Vec<f64> = valid.iter().map(|&i| se[i]).collect();
    let sigma = sigma_grid(&s, params.n_components);
    let k = sigma.len();

    let log_lik: Vec<Vec<f64>> = b
        .par_iter()
        .zip(s.par_iter())
        .map(|(&bi, &si)| {
            sigma
                .iter()
                .map(|&sk| ln_density(bi, (si * si + sk * sk).sqrt()))
                .collect()
        })
        .collect();

    let mut pi = vec![1.0 / k as f64; k];
    let mut prior_counts = vec![0.0; k];
    prior_counts[0] = params.null_weight - 1.0;
    let mut last_ll = f64::NEG_INFINITY;

    for iter in 0..params.max_iter {
        let mut totals = prior_counts.clone();
        let mut ll = 0.0;
        for row in &log_lik {
            let (resp, marginal) = responsibilities(row, &pi);
            ll += marginal;
            for (t, r) in totals.iter_mut().zip(&resp) {
                *t += r;
            }
        }
        let sum: f64 = totals.iter().sum();
        pi = totals.iter().map(|t| t.max(0.0) / sum).collect();

        if (ll - last_ll).abs() < params.tol {
            log::debug!("Mixture EM converged after {} iterations", iter + 1);
            break;
        }
        last_ll = ll;
    }

    let std_normal = Normal::new(0.0, 1.0).ok();
    for (idx, &i) in valid.iter().enumerate() {
        let (resp, _) = responsibilities(&log_lik[idx], &pi);
        let (bi, si) = (b[idx], s[idx]);
        let mut mean = 0.0;
        let mut second = 0.0;
        let mut negative = 0.0;
        for (j, &sk) in sigma.iter().enumerate() {
            if sk == 0.0 {
                continue;
            }
            let shrink = sk * sk / (sk * sk + si * si);
            let m = bi * shrink;
            let v = si * si * shrink;
            mean += resp[j] * m;
            second += resp[j] * (v + m * m);
            if let Some(z) = &std_normal {
                negative += resp[j] * z.cdf(-m / v.sqrt());
            }
        }
        let zero = resp[0];
        let positive = (1.0 - negative - zero).max(0.0);
        fit.posterior_mean[i] = mean;
        fit.posterior_sd[i] = (second - mean * mean).max(0.0).sqrt();
        fit.lfsr[i] = (negative + zero).min(positive + zero);
    }

    log::info!(
        "Mixture prior: null weight {:.3} over {} components",
        pi[0],
        k
    );
    fit.pi = pi;
    fit.sigma = sigma;
    fit
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_sigma_grid_range() {
        let grid = sigma_grid(&[0.2, 0.5, 1.0], 20);
        assert_eq!(grid.len(), 21);
        assert_eq!(grid[0], 0.0);
        assert_relative_eq!(grid[1], 0.02, epsilon = 1e-12);
        assert_relative_eq!(grid[20], 2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_responsibilities_sum_to_one() {
        let (resp, _) = responsibilities(&[-1.0, -2.0, -0.5], &[0.2, 0.3, 0.5]);
        assert_relative_eq!(resp.iter().sum::<f64>(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_noise_is_shrunk_signal_survives() {
        let mut lfc = vec![0.05, -0.1, 0.08, -0.02, 0.12, -0.07, 0.03, -0.11, 0.0, 0.06];
        lfc.extend([4.0, -3.5]);
        let se = vec![0.3; lfc.len()];
        let fit = fit_normal_mixture(&lfc, &se, &MixtureParams::default());

        for i in 0..10 {
            assert!(fit.posterior_mean[i].abs() < lfc[i].abs() + 1e-12);
            assert!(fit.lfsr[i] > 0.1);
        }
        assert!(fit.posterior_mean[10] > 3.0);
        assert!(fit.posterior_mean[11] < -2.5);
        assert!(fit.lfsr[10] < 0.01);
        assert_relative_eq!(fit.pi.iter().sum::<f64>(), 1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_undefined_rows_pass_through() {
        let fit = fit_normal_mixture(&[1.0, f64::NAN, 0.5], &[0.2, 0.2, 0.0], &MixtureParams::default());
        assert!(fit.posterior_mean[0].is_finite());
        assert!(fit.posterior_mean[1].is_nan());
        assert!(fit.posterior_mean[2].is_nan());
    }
}
