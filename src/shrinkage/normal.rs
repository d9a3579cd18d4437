//! Normal prior shrinkage by ridge-penalized refit

use ndarray::Array1;
use rayon::prelude::*;

use super::ShrunkenEstimates;
use crate::error::Result;
use crate::glm::{default_ridge, fit_gene, Contrast, GlmFitParams, ModelFit};
use crate::stats::match_weighted_upper_quantile_for_variance;
use crate::testing::ResultTable;

/// Upper quantile of |log2FC| matched to the prior
const UPPER_QUANTILE: f64 = 0.05;

/// Prior variance (log2 scale) whose 0.95 quantile of |x| matches the
/// weighted 0.95 quantile of the observed |log2FC|, weights 1/SE²
///
/// Fold changes of 10 or more and undefined rows are ignored. Returns a
/// wide variance when nothing usable is left.
pub fn normal_prior_variance(log2_fold_changes: &[f64], lfc_se: &[f64]) -> f64 {
    let mut x = Vec::new();
    let mut w = Vec::new();
    for (&lfc, &se) in log2_fold_changes.iter().zip(lfc_se) {
        if lfc.is_finite() && lfc.abs() < 10.0 && se.is_finite() && se > 0.0 {
            x.push(lfc);
            w.push(1.0 / (se * se));
        }
    }
    if x.is_empty() {
        return 1e6;
    }
    let var = match_weighted_upper_quantile_for_variance(&x, &w, UPPER_QUANTILE);
    if var > 0.0 {
        var
    } else {
        1e-6
    }
}

/// Refit every gene with precision 1/(σ²·ln2²) on the coefficients of the
/// contrast and the default ridge elsewhere
pub fn shrink_normal(model: &ModelFit, results: &ResultTable, contrast: &Contrast) -> Result<ShrunkenEstimates> {
    let c = model.design.contrast_vector(contrast)?;
    let ln2 = std::f64::consts::LN_2;

    let lfc: Vec<f64> = results.rows.iter().map(|r| r.log2_fold_change).collect();
    let se: Vec<f64> = results.rows.iter().map(|r| r.lfc_se).collect();
    let prior_var = normal_prior_variance(&lfc, &se);

    let mut lambda: Array1<f64> = default_ridge(model.design.n_coefs());
    for (j, &weight) in c.iter().enumerate() {
        if weight != 0.0 {
            lambda[j] = 1.0 / (prior_var * ln2 * ln2);
        }
    }
    log::info!("Normal prior variance on log2 fold changes: {:.4}", prior_var);

    let design = model.design.matrix();
    let sf = model.size_factors().view();
    let dispersions = &model.dispersions.final_dispersions;
    let params = GlmFitParams::default();

    let per_gene: Vec<(f64, f64)> = (0..model.n_genes())
        .into_par_iter()
        .map(|i| {
            if model.all_zero[i] || !dispersions[i].is_finite() {
                return (f64::NAN, f64::NAN);
            }
            let fit = fit_gene(model.counts.row(i), design, sf, dispersions[i], &lambda, &params);
            let var = c.dot(&fit.covariance.dot(&c));
            let se = if var > 0.0 { var.sqrt() / ln2 } else { f64::NAN };
            (c.dot(&fit.beta) / ln2, se)
        })
        .collect();

    Ok(ShrunkenEstimates {
        log2_fold_change: per_gene.iter().map(|p| p.0).collect(),
        lfc_se: per_gene.iter().map(|p| p.1).collect(),
        lfsr: vec![f64::NAN; per_gene.len()],
    })
}
