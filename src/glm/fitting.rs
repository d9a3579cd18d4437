//! GLM fitting using Iteratively Reweighted Least Squares (IRLS)
//!
//! Coefficients are kept on the natural log scale throughout; callers divide
//! by ln 2 when reporting log2 fold changes.

use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use rayon::prelude::*;

use super::linalg::{invert_spd, least_squares, solve_spd, weighted_gram};
use super::negative_binomial::{nb_deviance, nb_log_likelihood, nb_mean, nb_weight, MAX_BETA, MIN_MU};

/// Ridge penalty applied to every coefficient of an unshrunk fit
pub fn default_ridge(n_coefs: usize) -> Array1<f64> {
    let ln2 = std::f64::consts::LN_2;
    Array1::from_elem(n_coefs, 1e-6 / (ln2 * ln2))
}

#[derive(Debug, Clone)]
pub struct GlmFitParams {
    /// Maximum IRLS iterations
    pub maxit: usize,
    /// Relative deviance change tolerance
    pub beta_tol: f64,
}

impl Default for GlmFitParams {
    fn default() -> Self {
        Self {
            maxit: 100,
            beta_tol: 1e-8,
        }
    }
}

/// Log prior density on the coefficients, used by the Newton fallback and
/// by shrinkage refits
pub trait CoefficientPrior: Sync {
    fn log_density(&self, beta: &Array1<f64>) -> f64;
    fn gradient(&self, beta: &Array1<f64>) -> Array1<f64>;
    /// Non-negative curvature bound used to keep Newton directions ascending
    fn curvature(&self, beta: &Array1<f64>) -> Array1<f64>;
}

/// Independent zero-centered normal prior with precision `lambda` per coefficient
#[derive(Debug, Clone)]
pub struct RidgePrior {
    pub lambda: Array1<f64>,
}

impl CoefficientPrior for RidgePrior {
    fn log_density(&self, beta: &Array1<f64>) -> f64 {
        -0.5 * (&self.lambda * &beta.mapv(|b| b * b)).sum()
    }

    fn gradient(&self, beta: &Array1<f64>) -> Array1<f64> {
        -(&self.lambda * beta)
    }

    fn curvature(&self, _beta: &Array1<f64>) -> Array1<f64> {
        self.lambda.clone()
    }
}

/// Fit of one gene
#[derive(Debug, Clone)]
pub struct GeneFit {
    /// Coefficients, natural log scale
    pub beta: Array1<f64>,
    /// Sandwich covariance of `beta`
    pub covariance: Array2<f64>,
    pub hat_diagonals: Array1<f64>,
    pub mu: Array1<f64>,
    pub deviance: f64,
    pub iterations: usize,
    pub converged: bool,
}

impl GeneFit {
    /// Placeholder for a gene without any counts: every coefficient is zero
    /// and nothing is estimated
    pub fn all_zero(n_samples: usize, n_coefs: usize) -> Self {
        Self {
            beta: Array1::zeros(n_coefs),
            covariance: Array2::zeros((n_coefs, n_coefs)),
            hat_diagonals: Array1::zeros(n_samples),
            mu: Array1::zeros(n_samples),
            deviance: 0.0,
            iterations: 0,
            converged: true,
        }
    }

    pub fn standard_errors(&self) -> Array1<f64> {
        self.covariance
            .diag()
            .mapv(|v| if v > 0.0 { v.sqrt() } else { f64::NAN })
    }
}

fn linear_predictor(design: &Array2<f64>, beta: &Array1<f64>) -> Array1<f64> {
    design.dot(beta)
}

fn fitted_means(design: &Array2<f64>, beta: &Array1<f64>, sf: ArrayView1<f64>, floor: f64) -> Array1<f64> {
    let eta = linear_predictor(design, beta);
    Array1::from_iter(eta.iter().zip(sf.iter()).map(|(&e, &s)| nb_mean(e, s).max(floor)))
}

/// Least squares start on ln(y / sf + 0.1)
fn initial_beta(y: ArrayView1<f64>, design: &Array2<f64>, sf: ArrayView1<f64>) -> Array1<f64> {
    let log_norm: Vec<f64> = y.iter().zip(sf.iter()).map(|(&c, &s)| (c / s + 0.1).ln()).collect();
    match least_squares(design, &log_norm) {
        Some(b) if b.iter().all(|v| v.is_finite()) => b,
        _ => {
            let mut b = Array1::zeros(design.ncols());
            b[0] = (log_norm.iter().map(|v| v.exp()).sum::<f64>() / log_norm.len() as f64).ln();
            b
        }
    }
}

/// Covariance (X'WX + L)^-1 X'WX (X'WX + L)^-1 and hat diagonals w_i x_i' (X'WX + L)^-1 x_i
fn covariance_and_hat(design: &Array2<f64>, weights: &[f64], lambda: &Array1<f64>) -> (Array2<f64>, Array1<f64>) {
    let n = design.nrows();
    let p = design.ncols();
    let xtwx = weighted_gram(design, weights);
    let mut ridged = xtwx.clone();
    for j in 0..p {
        ridged[[j, j]] += lambda[j];
    }
    match invert_spd(&ridged) {
        Some(inv) => {
            let sigma = inv.dot(&xtwx).dot(&inv);
            let hat = Array1::from_iter((0..n).map(|i| {
                let x = design.row(i);
                weights[i] * x.dot(&inv.dot(&x))
            }));
            (sigma, hat)
        }
        None => (
            Array2::from_elem((p, p), f64::NAN),
            Array1::from_elem(n, f64::NAN),
        ),
    }
}

fn finish(
    y: ArrayView1<f64>,
    design: &Array2<f64>,
    sf: ArrayView1<f64>,
    alpha: f64,
    lambda: &Array1<f64>,
    beta: Array1<f64>,
    iterations: usize,
    converged: bool,
) -> GeneFit {
    let mu = fitted_means(design, &beta, sf, MIN_MU);
    let weights: Vec<f64> = mu.iter().map(|&m| nb_weight(m, alpha)).collect();
    let (covariance, hat_diagonals) = covariance_and_hat(design, &weights, lambda);
    let deviance = nb_deviance(&y.to_vec(), &mu.to_vec(), alpha);
    GeneFit {
        beta,
        covariance,
        hat_diagonals,
        mu,
        deviance,
        iterations,
        converged,
    }
}

/// Fit one gene by ridge-penalized IRLS, falling back to damped Newton
/// steps on the penalized likelihood when IRLS does not converge
pub fn fit_gene(
    y: ArrayView1<f64>,
    design: &Array2<f64>,
    sf: ArrayView1<f64>,
    alpha: f64,
    lambda: &Array1<f64>,
    params: &GlmFitParams,
) -> GeneFit {
    let p = design.ncols();
    let mut beta = initial_beta(y, design, sf);
    let start = beta.clone();
    let mut dev_old = 0.0;
    let mut converged = false;
    let mut iterations = 0;

    for iter in 0..params.maxit {
        iterations = iter + 1;
        let mu = fitted_means(design, &beta, sf, MIN_MU);
        let w: Vec<f64> = mu.iter().map(|&m| nb_weight(m, alpha)).collect();
        let z = Array1::from_iter(
            (0..mu.len()).map(|i| (mu[i] / sf[i]).ln() + (y[i] - mu[i]) / mu[i]),
        );

        let mut lhs = weighted_gram(design, &w);
        for j in 0..p {
            lhs[[j, j]] += lambda[j];
        }
        let wz = Array1::from_iter(z.iter().zip(&w).map(|(zi, wi)| zi * wi));
        let rhs = design.t().dot(&wz);

        let next = match solve_spd(&lhs, &rhs) {
            Some(b) => b,
            None => break,
        };
        if next.iter().any(|b| !b.is_finite() || b.abs() > MAX_BETA) {
            break;
        }
        beta = next;

        let mu = fitted_means(design, &beta, sf, MIN_MU);
        let dev = nb_deviance(&y.to_vec(), &mu.to_vec(), alpha);
        let conv = (dev - dev_old).abs() / (dev.abs() + 0.1);
        if conv.is_nan() {
            break;
        }
        if iter > 0 && conv < params.beta_tol {
            converged = true;
            break;
        }
        dev_old = dev;
    }

    if converged {
        return finish(y, design, sf, alpha, lambda, beta, iterations, true);
    }

    let prior = RidgePrior {
        lambda: lambda.clone(),
    };
    let from = if beta.iter().all(|b| b.is_finite() && b.abs() <= MAX_BETA) {
        beta
    } else {
        start
    };
    let newton = fit_gene_newton(y, design, sf, alpha, &prior, from, 200);
    log::debug!(
        "IRLS did not converge after {} iterations; Newton fallback converged = {}",
        iterations,
        newton.converged
    );
    finish(
        y,
        design,
        sf,
        alpha,
        lambda,
        newton.beta,
        iterations + newton.iterations,
        newton.converged,
    )
}

/// Result of a Newton ascent on the log posterior
#[derive(Debug, Clone)]
pub struct NewtonFit {
    pub beta: Array1<f64>,
    /// Negative Hessian of the log posterior at `beta` (observed information)
    pub information: Array2<f64>,
    pub log_posterior: f64,
    pub iterations: usize,
    pub converged: bool,
}

/// NB log likelihood plus log prior at `beta`
pub fn log_posterior(
    y: ArrayView1<f64>,
    design: &Array2<f64>,
    sf: ArrayView1<f64>,
    alpha: f64,
    prior: &dyn CoefficientPrior,
    beta: &Array1<f64>,
) -> f64 {
    let mu = fitted_means(design, beta, sf, 0.0);
    let ll: f64 = (0..mu.len()).map(|i| nb_log_likelihood(y[i], mu[i], alpha)).sum();
    ll + prior.log_density(beta)
}

/// Observed information of the NB likelihood with log link
fn nb_information(
    y: ArrayView1<f64>,
    design: &Array2<f64>,
    mu: &Array1<f64>,
    alpha: f64,
) -> Array2<f64> {
    let w: Vec<f64> = (0..mu.len())
        .map(|i| mu[i] * (1.0 + alpha * y[i]) / (1.0 + alpha * mu[i]).powi(2))
        .collect();
    weighted_gram(design, &w)
}

/// Maximize the log posterior by Newton steps with backtracking
pub fn fit_gene_newton(
    y: ArrayView1<f64>,
    design: &Array2<f64>,
    sf: ArrayView1<f64>,
    alpha: f64,
    prior: &dyn CoefficientPrior,
    start: Array1<f64>,
    maxit: usize,
) -> NewtonFit {
    let p = design.ncols();
    let mut beta = start;
    let mut current = log_posterior(y, design, sf, alpha, prior, &beta);
    let mut converged = false;
    let mut iterations = 0;

    for iter in 0..maxit {
        iterations = iter + 1;
        let mu = fitted_means(design, &beta, sf, 0.0);
        let resid = Array1::from_iter((0..mu.len()).map(|i| (y[i] - mu[i]) / (1.0 + alpha * mu[i])));
        let grad = design.t().dot(&resid) + prior.gradient(&beta);
        if grad.iter().all(|g| g.abs() < 1e-6) {
            converged = true;
            break;
        }

        let mut info = nb_information(y, design, &mu, alpha);
        let curv = prior.curvature(&beta);
        for j in 0..p {
            info[[j, j]] += curv[j] + 1e-10;
        }
        let step = match solve_spd(&info, &grad) {
            Some(s) => s,
            None => grad.clone(),
        };

        let slope = grad.dot(&step);
        let mut t = 1.0;
        let mut gain = None;
        while t > 1e-10 {
            let candidate = &beta + &(t * &step);
            if candidate.iter().all(|b| b.is_finite() && b.abs() <= MAX_BETA) {
                let value = log_posterior(y, design, sf, alpha, prior, &candidate);
                if value.is_finite() && value >= current + 1e-4 * t * slope {
                    gain = Some(value - current);
                    beta = candidate;
                    current = value;
                    break;
                }
            }
            t *= 0.5;
        }

        match gain {
            None => break,
            Some(g) if g.abs() < 1e-12 * (current.abs() + 0.1) => {
                converged = true;
                break;
            }
            Some(_) => {}
        }
    }

    let mu = fitted_means(design, &beta, sf, 0.0);
    let information = nb_information(y, design, &mu, alpha);
    NewtonFit {
        beta,
        information,
        log_posterior: current,
        iterations,
        converged,
    }
}

/// Per-gene fits over a whole matrix, in parallel
#[derive(Debug, Clone)]
pub struct GlmFits {
    /// Coefficients (genes x coefficients), natural log scale
    pub coefficients: Array2<f64>,
    pub covariances: Vec<Array2<f64>>,
    /// Hat diagonals (genes x samples)
    pub hat_diagonals: Array2<f64>,
    /// Fitted means (genes x samples)
    pub mu: Array2<f64>,
    pub deviance: Array1<f64>,
    pub converged: Vec<bool>,
}

impl GlmFits {
    /// Standard errors (genes x coefficients), natural log scale
    pub fn standard_errors(&self) -> Array2<f64> {
        let p = self.coefficients.ncols();
        let mut se = Array2::zeros((self.covariances.len(), p));
        for (i, cov) in self.covariances.iter().enumerate() {
            for j in 0..p {
                let v = cov[[j, j]];
                se[[i, j]] = if v > 0.0 { v.sqrt() } else { f64::NAN };
            }
        }
        se
    }
}

/// Fit every gene with its own dispersion and a shared ridge penalty
///
/// Genes without counts or without a finite dispersion are not fitted.
pub fn fit_genes(
    counts: ArrayView2<f64>,
    design: &Array2<f64>,
    size_factors: ArrayView1<f64>,
    dispersions: &[f64],
    lambda: &Array1<f64>,
    params: &GlmFitParams,
) -> GlmFits {
    let (n_genes, n_samples) = counts.dim();
    let p = design.ncols();

    let fits: Vec<GeneFit> = (0..n_genes)
        .into_par_iter()
        .map(|i| {
            let y = counts.row(i);
            if y.sum() == 0.0 || !dispersions[i].is_finite() {
                GeneFit::all_zero(n_samples, p)
            } else {
                fit_gene(y, design, size_factors, dispersions[i], lambda, params)
            }
        })
        .collect();

    let mut coefficients = Array2::zeros((n_genes, p));
    let mut hat_diagonals = Array2::zeros((n_genes, n_samples));
    let mut mu = Array2::zeros((n_genes, n_samples));
    let mut deviance = Array1::zeros(n_genes);
    let mut converged = Vec::with_capacity(n_genes);
    let mut covariances = Vec::with_capacity(n_genes);

    for (i, fit) in fits.into_iter().enumerate() {
        coefficients.row_mut(i).assign(&fit.beta);
        hat_diagonals.row_mut(i).assign(&fit.hat_diagonals);
        mu.row_mut(i).assign(&fit.mu);
        deviance[i] = fit.deviance;
        converged.push(fit.converged);
        covariances.push(fit.covariance);
    }

    let n_failed = converged.iter().filter(|c| !**c).count();
    if n_failed > 0 {
        log::warn!("{} genes did not converge in the GLM fit; their statistics are reported as NA", n_failed);
    }

    GlmFits {
        coefficients,
        covariances,
        hat_diagonals,
        mu,
        deviance,
        converged,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    fn two_group() -> Array2<f64> {
        array![[1.0, 0.0], [1.0, 0.0], [1.0, 1.0], [1.0, 1.0]]
    }

    #[test]
    fn test_fit_recovers_group_means() {
        let y = array![100.0, 120.0, 10.0, 8.0];
        let sf = array![1.0, 1.0, 1.0, 1.0];
        let fit = fit_gene(y.view(), &two_group(), sf.view(), 0.01, &default_ridge(2), &GlmFitParams::default());

        assert!(fit.converged);
        assert_relative_eq!(fit.beta[0].exp(), 110.0, max_relative = 1e-3);
        assert_relative_eq!((fit.beta[0] + fit.beta[1]).exp(), 9.0, max_relative = 1e-3);
        assert!(fit.standard_errors().iter().all(|s| s.is_finite() && *s > 0.0));
        // Each group has two samples, so every hat value is close to 1/2
        for h in fit.hat_diagonals.iter() {
            assert_relative_eq!(*h, 0.5, epsilon = 1e-3);
        }
    }

    #[test]
    fn test_size_factors_enter_offset() {
        let y = array![20.0, 20.0, 40.0, 40.0];
        let sf = array![1.0, 1.0, 2.0, 2.0];
        let fit = fit_gene(y.view(), &two_group(), sf.view(), 0.05, &default_ridge(2), &GlmFitParams::default());
        assert_relative_eq!(fit.beta[1], 0.0, epsilon = 1e-4);
    }

    #[test]
    fn test_newton_matches_irls() {
        let y = array![30.0, 41.0, 80.0, 95.0];
        let sf = array![0.9, 1.1, 1.0, 1.0];
        let design = two_group();
        let lambda = default_ridge(2);
        let irls = fit_gene(y.view(), &design, sf.view(), 0.1, &lambda, &GlmFitParams::default());
        let newton = fit_gene_newton(
            y.view(),
            &design,
            sf.view(),
            0.1,
            &RidgePrior { lambda },
            Array1::zeros(2),
            200,
        );
        assert!(newton.converged);
        assert_relative_eq!(irls.beta[1], newton.beta[1], epsilon = 1e-4);
    }

    #[test]
    fn test_fit_genes_parallel_shapes() {
        let counts = array![[100.0, 120.0, 10.0, 8.0], [50.0, 50.0, 51.0, 49.0]];
        let sf = array![1.0, 1.0, 1.0, 1.0];
        let fits = fit_genes(
            counts.view(),
            &two_group(),
            sf.view(),
            &[0.05, 0.05],
            &default_ridge(2),
            &GlmFitParams::default(),
        );
        assert_eq!(fits.coefficients.dim(), (2, 2));
        assert_eq!(fits.hat_diagonals.dim(), (2, 4));
        assert!(fits.converged.iter().all(|&c| c));
        assert!(fits.coefficients[[0, 1]] < -2.0);
        assert!(fits.coefficients[[1, 1]].abs() < 0.1);
    }
}
