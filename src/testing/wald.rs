//! Wald test of a contrast of GLM coefficients

use super::pvalue::{greater_abs_test, normal_pvalue, t_pvalue};
use crate::error::Result;
use crate::glm::{Contrast, ModelFit};

/// Per-gene Wald statistics; NaN where undefined
#[derive(Debug, Clone)]
pub struct WaldStatistics {
    /// log2 scale
    pub log2_fold_change: Vec<f64>,
    pub lfc_se: Vec<f64>,
    pub stat: Vec<f64>,
    pub pvalue: Vec<f64>,
}

/// stat = c'beta / sqrt(c' Sigma c) for contrast vector c
///
/// With `lfc_threshold > 0` the null hypothesis is |log2FC| <= threshold.
/// With `use_t` p-values come from a t distribution with m - p degrees of
/// freedom.
pub fn wald_test(model: &ModelFit, contrast: &Contrast, use_t: bool, lfc_threshold: f64) -> Result<WaldStatistics> {
    let c = model.design.contrast_vector(contrast)?;
    let ln2 = std::f64::consts::LN_2;
    let df = if use_t {
        Some(model.design.residual_df() as f64)
    } else {
        None
    };

    let n = model.n_genes();
    let mut out = WaldStatistics {
        log2_fold_change: vec![0.0; n],
        lfc_se: vec![0.0; n],
        stat: vec![f64::NAN; n],
        pvalue: vec![f64::NAN; n],
    };

    for i in 0..n {
        if model.all_zero[i] {
            continue;
        }
        let beta = model.fits.coefficients.row(i);
        let cov = &model.fits.covariances[i];
        let lfc = c.dot(&beta) / ln2;
        let var = c.dot(&cov.dot(&c));
        let se = if var > 0.0 { var.sqrt() / ln2 } else { f64::NAN };
        out.log2_fold_change[i] = lfc;
        out.lfc_se[i] = se;

        if !model.fits.converged[i] || !se.is_finite() {
            continue;
        }
        let (stat, p) = if lfc_threshold > 0.0 {
            greater_abs_test(lfc, se, lfc_threshold, df)
        } else {
            let stat = lfc / se;
            let p = match df {
                Some(df) => t_pvalue(stat, df),
                None => normal_pvalue(stat),
            };
            (stat, p)
        };
        out.stat[i] = stat;
        out.pvalue[i] = p;
    }

    Ok(out)
}
