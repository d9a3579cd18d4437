//! Cox-Reid adjusted profile likelihood of the dispersion and its optimizers
//!
//! Everything here works on log(alpha). The same objective serves the
//! gene-wise estimate (no prior) and the MAP estimate (log-normal prior
//! centered on the trend).

use ndarray::{Array2, ArrayView1};
use statrs::function::gamma::{digamma, ln_gamma};

use crate::glm::linalg::{invert_spd, log_det_spd, weighted_gram};

/// Hard bounds on a proposed log dispersion
const LOG_ALPHA_LOWER: f64 = -30.0;
const LOG_ALPHA_UPPER: f64 = 10.0;

/// Log-normal prior on the dispersion
#[derive(Debug, Clone, Copy)]
pub struct LogNormalPrior {
    pub log_mean: f64,
    pub variance: f64,
}

/// Observed counts and fitted means of one gene
pub struct GeneObservations<'a> {
    pub y: ArrayView1<'a, f64>,
    pub mu: ArrayView1<'a, f64>,
    pub design: &'a Array2<f64>,
}

impl GeneObservations<'_> {
    fn weights(&self, alpha: f64) -> Vec<f64> {
        self.mu.iter().map(|&m| 1.0 / (1.0 / m + alpha)).collect()
    }

    /// Log posterior of log(alpha), dropping terms constant in alpha
    pub fn log_posterior(&self, log_alpha: f64, prior: Option<LogNormalPrior>) -> f64 {
        let alpha = log_alpha.exp();
        let r = 1.0 / alpha;
        let ll: f64 = self
            .y
            .iter()
            .zip(self.mu.iter())
            .map(|(&y, &m)| ln_gamma(y + r) - ln_gamma(r) - y * (m + r).ln() - r * (1.0 + m * alpha).ln())
            .sum();

        let gram = weighted_gram(self.design, &self.weights(alpha));
        let cr = match log_det_spd(&gram) {
            Some(ld) => -0.5 * ld,
            None => f64::NEG_INFINITY,
        };

        let prior_term = match prior {
            Some(p) => -(log_alpha - p.log_mean).powi(2) / (2.0 * p.variance),
            None => 0.0,
        };
        ll + cr + prior_term
    }

    /// Derivative of [`Self::log_posterior`] with respect to log(alpha)
    pub fn d_log_posterior(&self, log_alpha: f64, prior: Option<LogNormalPrior>) -> f64 {
        let alpha = log_alpha.exp();
        let r = 1.0 / alpha;
        let r2 = r * r;
        let psi_r = digamma(r);
        let dll: f64 = self
            .y
            .iter()
            .zip(self.mu.iter())
            .map(|(&y, &m)| {
                -r2 * (digamma(y + r) - psi_r) + y * r2 / (m + r) + r2 * (1.0 + m * alpha).ln() - r * m / (1.0 + m * alpha)
            })
            .sum();

        let w = self.weights(alpha);
        let gram = weighted_gram(self.design, &w);
        let dcr = match invert_spd(&gram) {
            Some(inv) => {
                let dw: Vec<f64> = w.iter().map(|wi| -wi * wi).collect();
                let dgram = weighted_gram(self.design, &dw);
                -0.5 * (inv.dot(&dgram)).diag().sum()
            }
            None => 0.0,
        };

        let prior_term = match prior {
            Some(p) => -(log_alpha - p.log_mean) / p.variance,
            None => 0.0,
        };
        alpha * (dll + dcr) + prior_term
    }
}

#[derive(Debug, Clone)]
pub struct LineSearchParams {
    pub epsilon: f64,
    pub kappa_0: f64,
    pub tolerance: f64,
    pub maxit: usize,
    /// Stop once log(alpha) falls below this value
    pub min_log_alpha: f64,
}

#[derive(Debug, Clone)]
pub struct LineSearchOutcome {
    pub log_alpha: f64,
    pub iterations: usize,
    pub initial_lp: f64,
    pub last_lp: f64,
}

impl LineSearchOutcome {
    /// Converged when it stopped before the iteration cap and took more than one step
    pub fn converged(&self, maxit: usize) -> bool {
        self.iterations < maxit && self.iterations != 1
    }

    /// True when the search ended no better than it started
    pub fn no_increase(&self) -> bool {
        self.last_lp < self.initial_lp + self.initial_lp.abs() / 1e6
    }
}

/// Maximize the log posterior by gradient ascent with Armijo backtracking
pub fn armijo_line_search(
    gene: &GeneObservations<'_>,
    start_log_alpha: f64,
    prior: Option<LogNormalPrior>,
    params: &LineSearchParams,
) -> LineSearchOutcome {
    let mut a = start_log_alpha;
    let mut lp = gene.log_posterior(a, prior);
    let mut dlp = gene.d_log_posterior(a, prior);
    let initial_lp = lp;
    let mut kappa = params.kappa_0;
    let mut iterations = 0;
    let mut accepted = 0;

    while iterations < params.maxit {
        iterations += 1;
        let proposal = a + kappa * dlp;
        if proposal < LOG_ALPHA_LOWER {
            kappa = (LOG_ALPHA_LOWER - a) / dlp;
        }
        if proposal > LOG_ALPHA_UPPER {
            kappa = (LOG_ALPHA_UPPER - a) / dlp;
        }

        let theta_kappa = -gene.log_posterior(a + kappa * dlp, prior);
        let theta_hat_kappa = -lp - kappa * params.epsilon * dlp * dlp;

        if theta_kappa <= theta_hat_kappa {
            accepted += 1;
            a += kappa * dlp;
            let lp_new = gene.log_posterior(a, prior);
            let change = lp_new - lp;
            lp = lp_new;
            if change < params.tolerance || a < params.min_log_alpha {
                break;
            }
            dlp = gene.d_log_posterior(a, prior);
            kappa = (kappa * 1.1).min(params.kappa_0);
            if accepted % 5 == 0 {
                kappa /= 2.0;
            }
        } else {
            kappa /= 2.0;
        }
    }

    LineSearchOutcome {
        log_alpha: a,
        iterations,
        initial_lp,
        last_lp: lp,
    }
}

/// Coarse then refined 20-point grid search over [min_log, max_log]
pub fn grid_search(gene: &GeneObservations<'_>, min_log: f64, max_log: f64, prior: Option<LogNormalPrior>) -> f64 {
    const N_GRID: usize = 20;
    let linspace = |lo: f64, hi: f64| -> Vec<f64> {
        (0..N_GRID)
            .map(|i| lo + (hi - lo) * i as f64 / (N_GRID - 1) as f64)
            .collect()
    };
    let best = |grid: &[f64]| -> f64 {
        let mut best_a = grid[0];
        let mut best_lp = f64::NEG_INFINITY;
        for &a in grid {
            let lp = gene.log_posterior(a, prior);
            if lp > best_lp {
                best_lp = lp;
                best_a = a;
            }
        }
        best_a
    };

    let coarse = linspace(min_log, max_log);
    let delta = coarse[1] - coarse[0];
    let center = best(&coarse);
    let fine = linspace(center - delta, center + delta);
    best(&fine)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array1};

    fn params() -> LineSearchParams {
        LineSearchParams {
            epsilon: 1e-4,
            kappa_0: 1.0,
            tolerance: 1e-6,
            maxit: 100,
            min_log_alpha: (1e-9_f64).ln(),
        }
    }

    #[test]
    fn test_derivative_matches_finite_difference() {
        let design = array![[1.0], [1.0], [1.0], [1.0], [1.0]];
        let y = array![12.0, 30.0, 5.0, 22.0, 17.0];
        let mu = Array1::from_elem(5, 17.2);
        let gene = GeneObservations { y: y.view(), mu: mu.view(), design: &design };
        let prior = Some(LogNormalPrior { log_mean: -2.0, variance: 0.5 });
        for &a in &[-3.0, -1.0, 0.5] {
            let h = 1e-5;
            let numeric = (gene.log_posterior(a + h, prior) - gene.log_posterior(a - h, prior)) / (2.0 * h);
            let analytic = gene.d_log_posterior(a, prior);
            assert!((numeric - analytic).abs() < 1e-4 * (1.0 + numeric.abs()), "{} vs {}", numeric, analytic);
        }
    }

    #[test]
    fn test_line_search_matches_grid() {
        let design = array![[1.0, 0.0], [1.0, 0.0], [1.0, 0.0], [1.0, 1.0], [1.0, 1.0], [1.0, 1.0]];
        let y = array![40.0, 80.0, 55.0, 150.0, 90.0, 210.0];
        let mu = array![58.3, 58.3, 58.3, 150.0, 150.0, 150.0];
        let gene = GeneObservations { y: y.view(), mu: mu.view(), design: &design };

        let out = armijo_line_search(&gene, (0.1_f64).ln(), None, &params());
        let grid = grid_search(&gene, (1e-8_f64).ln(), (10.0_f64).ln(), None);
        assert!((out.log_alpha - grid).abs() < 0.15, "{} vs {}", out.log_alpha, grid);
        assert!(out.last_lp >= out.initial_lp);
    }

    #[test]
    fn test_prior_pulls_toward_center() {
        let design = array![[1.0], [1.0], [1.0], [1.0]];
        let y = array![10.0, 100.0, 20.0, 90.0];
        let mu = Array1::from_elem(4, 55.0);
        let gene = GeneObservations { y: y.view(), mu: mu.view(), design: &design };

        let free = armijo_line_search(&gene, -1.0, None, &params()).log_alpha;
        let center = free - 3.0;
        let prior = Some(LogNormalPrior { log_mean: center, variance: 0.25 });
        let shrunk = armijo_line_search(&gene, -1.0, prior, &params()).log_alpha;
        assert!(shrunk < free);
        assert!(shrunk > center);
    }
}
