//! Dispersion estimation for negative binomial models
//!
//! Three stages: gene-wise maximum Cox-Reid adjusted likelihood, a trend of
//! dispersion over mean expression, and MAP estimates shrunk toward the
//! trend under a log-normal prior.

mod gene_wise;
mod map;
mod objective;
mod trend;

pub use gene_wise::{estimate_gene_dispersions, moments_dispersion, rough_dispersion, GeneWiseEstimates};
pub use map::{estimate_map_dispersions, estimate_prior_variance, MapEstimates, PriorVariance};
pub use objective::{LineSearchParams, LogNormalPrior};
pub use trend::{fit_trend, DispersionTrend, TrendFitMethod};

use ndarray::{Array1, ArrayView1, ArrayView2};
use serde::Serialize;

use crate::error::{DeError, Result};
use crate::glm::Design;

/// Tuning of the dispersion optimizers
#[derive(Debug, Clone)]
pub struct DispersionParams {
    /// Lower bound on any dispersion
    pub min_disp: f64,
    /// Log posterior change at which the line search stops
    pub disp_tol: f64,
    /// Initial line search step
    pub kappa_0: f64,
    pub maxit: usize,
    /// Gene-wise estimates more than this many prior SDs above the trend are kept unshrunk
    pub outlier_sd: f64,
    /// Seed of the prior variance simulation used with few residual degrees of freedom
    pub seed: u64,
}

impl Default for DispersionParams {
    fn default() -> Self {
        Self {
            min_disp: 1e-8,
            disp_tol: 1e-6,
            kappa_0: 1.0,
            maxit: 100,
            outlier_sd: 2.0,
            seed: 2,
        }
    }
}

impl DispersionParams {
    /// Upper bound on any dispersion: max(10, number of samples)
    pub fn max_disp(&self, n_samples: usize) -> f64 {
        (n_samples as f64).max(10.0)
    }

    pub fn line_search(&self) -> LineSearchParams {
        LineSearchParams {
            epsilon: 1e-4,
            kappa_0: self.kappa_0,
            tolerance: self.disp_tol,
            maxit: self.maxit,
            min_log_alpha: (self.min_disp / 10.0).ln(),
        }
    }
}

/// All dispersion estimates of one experiment
#[derive(Debug, Clone, Serialize)]
pub struct DispersionFit {
    pub gene_wise: Array1<f64>,
    /// Trend evaluated at each gene's mean
    pub trend: Array1<f64>,
    pub map: Array1<f64>,
    /// Dispersion used by the GLM: MAP, or gene-wise for outliers
    pub final_dispersions: Array1<f64>,
    pub trend_fn: DispersionTrend,
    pub prior_var: f64,
    pub var_log_disp: f64,
    pub outliers: Vec<bool>,
}

/// True when every defined gene-wise estimate sits at most 100x above the floor
fn near_floor(gene_wise: ArrayView1<f64>, min_disp: f64) -> bool {
    let mut defined = gene_wise.iter().filter(|d| d.is_finite()).peekable();
    defined.peek().is_some() && defined.all(|&d| d <= 100.0 * min_disp)
}

/// Gene-wise, trend and MAP estimates in one pass
///
/// When the data show no overdispersion at all, so no trend can be fitted,
/// the trend is the constant minimum dispersion and genes are modeled as
/// nearly Poisson.
pub fn estimate_dispersions(
    counts: ArrayView2<f64>,
    size_factors: ArrayView1<f64>,
    base_means: ArrayView1<f64>,
    design: &Design,
    fit_type: TrendFitMethod,
    params: &DispersionParams,
) -> Result<DispersionFit> {
    if design.residual_df() == 0 {
        return Err(DeError::InvalidDesign {
            reason: format!(
                "{} samples leave no residual degrees of freedom for {} coefficients",
                design.n_samples(),
                design.n_coefs()
            ),
        });
    }

    let gene_wise = estimate_gene_dispersions(counts, size_factors, design, params);

    let means = base_means.to_vec();
    let trend_fn = match fit_trend(&means, gene_wise.dispersions.as_slice().unwrap_or(&[]), fit_type, params.min_disp) {
        Ok(trend) => trend,
        Err(DeError::TrendFittingFailed { .. }) if near_floor(gene_wise.dispersions.view(), params.min_disp) => {
            log::warn!(
                "All gene-wise dispersions are within two orders of magnitude of the minimum {}; \
                 using a constant trend at the minimum",
                params.min_disp
            );
            DispersionTrend::Mean {
                value: params.min_disp,
            }
        }
        Err(e) => return Err(e),
    };
    let trend = Array1::from_iter(means.iter().map(|&m| {
        if m > 0.0 {
            trend_fn.evaluate(m).max(params.min_disp)
        } else {
            f64::NAN
        }
    }));

    let prior = estimate_prior_variance(
        &gene_wise.dispersions.to_vec(),
        &trend.to_vec(),
        design.n_samples(),
        design.n_coefs(),
        params,
    );
    let map = estimate_map_dispersions(counts, &gene_wise, trend.view(), design, prior, params);

    log::info!(
        "Estimated dispersions ({:?} trend, prior variance {:.3})",
        trend_fn.method(),
        prior.prior_var
    );

    Ok(DispersionFit {
        gene_wise: gene_wise.dispersions,
        trend,
        map: map.map,
        final_dispersions: map.final_dispersions,
        trend_fn,
        prior_var: prior.prior_var,
        var_log_disp: prior.var_log_disp,
        outliers: map.outliers,
    })
}
