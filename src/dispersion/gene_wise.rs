//! Gene-wise dispersion estimates

use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use rayon::prelude::*;

use super::objective::{armijo_line_search, grid_search, GeneObservations};
use super::DispersionParams;
use crate::glm::linalg::least_squares;
use crate::glm::{default_ridge, fit_gene, Design, GlmFitParams, MIN_MU};

/// Gene-wise estimates together with the means they were computed against
#[derive(Debug, Clone)]
pub struct GeneWiseEstimates {
    /// NaN for genes without counts
    pub dispersions: Array1<f64>,
    /// Fitted means (genes x samples), reused by the MAP step
    pub mu: Array2<f64>,
    pub converged: Vec<bool>,
}

/// Method-of-moments style estimate from residuals of a linear fit to the
/// normalized counts
pub fn rough_dispersion(normalized: ArrayView1<f64>, design: &Array2<f64>) -> f64 {
    let (m, p) = design.dim();
    if m <= p {
        return f64::NAN;
    }
    let y: Vec<f64> = normalized.to_vec();
    let fitted = match least_squares(design, &y) {
        Some(beta) => design.dot(&beta),
        None => return f64::NAN,
    };
    let est: f64 = y
        .iter()
        .zip(fitted.iter())
        .map(|(&yi, &fi)| {
            let mu = fi.max(1.0);
            ((yi - mu).powi(2) - mu) / (mu * mu)
        })
        .sum::<f64>()
        / (m - p) as f64;
    est.max(0.0)
}

/// (var - xim * mean) / mean^2 where xim is the mean inverse size factor
pub fn moments_dispersion(normalized: ArrayView1<f64>, size_factors: ArrayView1<f64>) -> f64 {
    let n = normalized.len() as f64;
    let mean = normalized.sum() / n;
    if mean.abs() < 1e-12 {
        return f64::INFINITY;
    }
    let var = normalized.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    let xim = size_factors.iter().map(|s| 1.0 / s).sum::<f64>() / n;
    (var - xim * mean) / (mean * mean)
}

fn linear_model_mu(y: ArrayView1<f64>, design: &Array2<f64>, sf: ArrayView1<f64>) -> Array1<f64> {
    let normalized: Vec<f64> = y.iter().zip(sf.iter()).map(|(c, s)| c / s).collect();
    let fitted = match least_squares(design, &normalized) {
        Some(beta) => design.dot(&beta),
        None => Array1::from_elem(y.len(), crate::stats::mean(&normalized)),
    };
    Array1::from_iter(fitted.iter().zip(sf.iter()).map(|(f, s)| (f * s).max(MIN_MU)))
}

struct GeneEstimate {
    dispersion: f64,
    mu: Array1<f64>,
    converged: bool,
}

fn estimate_one(
    y: ArrayView1<f64>,
    sf: ArrayView1<f64>,
    design: &Array2<f64>,
    use_linear_mu: bool,
    params: &DispersionParams,
    max_disp: f64,
) -> GeneEstimate {
    let n = y.len();
    if y.sum() == 0.0 {
        return GeneEstimate {
            dispersion: f64::NAN,
            mu: Array1::zeros(n),
            converged: true,
        };
    }

    let normalized = Array1::from_iter(y.iter().zip(sf.iter()).map(|(c, s)| c / s));
    let rough = rough_dispersion(normalized.view(), design);
    let moments = moments_dispersion(normalized.view(), sf);
    let init = match (rough.is_finite(), moments.is_finite()) {
        (true, true) => rough.min(moments),
        (true, false) => rough,
        (false, true) => moments,
        (false, false) => 0.1,
    }
    .clamp(params.min_disp, max_disp);

    let mu = if use_linear_mu {
        linear_model_mu(y, design, sf)
    } else {
        let lambda = default_ridge(design.ncols());
        fit_gene(y, design, sf, init, &lambda, &GlmFitParams::default()).mu.mapv(|m| m.max(MIN_MU))
    };

    let gene = GeneObservations {
        y: y.view(),
        mu: mu.view(),
        design,
    };
    let search = armijo_line_search(&gene, init.ln(), None, &params.line_search());
    let converged = search.converged(params.maxit);

    let mut dispersion = if search.no_increase() {
        init
    } else {
        search.log_alpha.exp()
    }
    .clamp(params.min_disp, max_disp);

    if !converged && dispersion > 10.0 * params.min_disp {
        dispersion = grid_search(&gene, params.min_disp.ln(), max_disp.ln(), None).exp();
        dispersion = dispersion.clamp(params.min_disp, max_disp);
    }

    GeneEstimate {
        dispersion,
        mu,
        converged,
    }
}

/// Maximize the Cox-Reid adjusted profile likelihood of every gene
pub fn estimate_gene_dispersions(
    counts: ArrayView2<f64>,
    size_factors: ArrayView1<f64>,
    design: &Design,
    params: &DispersionParams,
) -> GeneWiseEstimates {
    let (n_genes, n_samples) = counts.dim();
    let max_disp = params.max_disp(n_samples);
    let use_linear_mu = design.is_group_design();
    let x = design.matrix();

    let estimates: Vec<GeneEstimate> = (0..n_genes)
        .into_par_iter()
        .map(|i| estimate_one(counts.row(i), size_factors, x, use_linear_mu, params, max_disp))
        .collect();

    let mut dispersions = Array1::zeros(n_genes);
    let mut mu = Array2::zeros((n_genes, n_samples));
    let mut converged = Vec::with_capacity(n_genes);
    for (i, est) in estimates.into_iter().enumerate() {
        dispersions[i] = est.dispersion;
        mu.row_mut(i).assign(&est.mu);
        converged.push(est.converged);
    }

    let n_refit = converged.iter().filter(|c| !**c).count();
    log::debug!(
        "Gene-wise dispersions: {} genes, {} refit by grid search, linear mu: {}",
        n_genes,
        n_refit,
        use_linear_mu
    );

    GeneWiseEstimates {
        dispersions,
        mu,
        converged,
    }
}
