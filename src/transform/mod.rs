//! Count transforms for exploratory analysis
//!
//! The transformed matrices are meant for clustering, PCA and heatmaps.
//! Testing always works on raw counts through the GLM.

mod rlog;
mod vst;

pub use rlog::regularized_log;
pub use vst::{variance_stabilize, vst_mean, vst_parametric};

use clap::ValueEnum;
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

use crate::data::Experiment;
use crate::dispersion::{estimate_dispersions, DispersionTrend};
use crate::error::{DeError, Result};
use crate::glm::{Design, FitOptions, ModelFit};
use crate::normalization::NormalizedCounts;

/// Transform applied for exploration (clustering, visualization)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum TransformMode {
    /// log2(normalized count + 1)
    Log2,
    /// Closed-form variance-stabilizing transform from the dispersion trend
    #[default]
    Vst,
    /// Regularized log: per-gene ridge-penalized GLM with one coefficient per sample
    Rlog,
}

/// Transformed values with the identifiers of the input matrix
#[derive(Debug, Clone)]
pub struct TransformedMatrix {
    pub mode: TransformMode,
    pub blind: bool,
    pub gene_ids: Vec<String>,
    pub sample_ids: Vec<String>,
    /// Transformed values (genes x samples), log2 scale
    pub values: Array2<f64>,
}

impl TransformedMatrix {
    pub fn n_genes(&self) -> usize {
        self.values.nrows()
    }

    pub fn n_samples(&self) -> usize {
        self.values.ncols()
    }

    pub fn get(&self, gene_id: &str, sample_id: &str) -> Option<f64> {
        let i = self.gene_ids.iter().position(|g| g == gene_id)?;
        let j = self.sample_ids.iter().position(|s| s == sample_id)?;
        Some(self.values[[i, j]])
    }
}

/// log2(normalized + 1)
pub fn log2_transform(normalized: &Array2<f64>) -> Array2<f64> {
    normalized.mapv(|q| (q + 1.0).log2())
}

/// Normalized counts, reusing the model's size factors when they cover the same genes
fn normalize(experiment: &Experiment, model: Option<&ModelFit>, options: &FitOptions) -> Result<NormalizedCounts> {
    match model {
        Some(m) if m.gene_ids.as_slice() == experiment.counts().gene_ids() => Ok(m.normalized.clone()),
        _ => NormalizedCounts::from_counts(experiment.counts(), options.size_factor_method),
    }
}

/// Dispersion trend and its value at each gene's mean
fn trend_for(
    experiment: &Experiment,
    normalized: &NormalizedCounts,
    base_means: &Array1<f64>,
    model: Option<&ModelFit>,
    blind: bool,
    options: &FitOptions,
) -> Result<(DispersionTrend, Array1<f64>)> {
    if blind {
        let design = Design::intercept_only(normalized.sample_ids.len());
        log::info!("Re-estimating dispersions with the {} design for a blind transform", design.formula());
        let fit = estimate_dispersions(
            experiment.counts().counts(),
            normalized.size_factors.view(),
            base_means.view(),
            &design,
            options.fit_type,
            &options.dispersion,
        )?;
        return Ok((fit.trend_fn, fit.trend));
    }

    match model {
        Some(m) if m.gene_ids.as_slice() == experiment.counts().gene_ids() => {
            Ok((m.dispersions.trend_fn.clone(), m.dispersions.trend.clone()))
        }
        Some(_) => Err(DeError::InvalidConfig {
            reason: "the fitted model covers different genes than the matrix to transform".to_string(),
        }),
        None => Err(DeError::InvalidConfig {
            reason: "a non-blind transform needs a fitted model".to_string(),
        }),
    }
}

/// Transform the counts of `experiment`
///
/// With `blind` the dispersion trend is re-estimated under `~ 1`, ignoring
/// the experimental design; otherwise the trend of `model` is reused.
/// `Log2` needs no dispersions.
pub fn transform_counts(
    experiment: &Experiment,
    model: Option<&ModelFit>,
    mode: TransformMode,
    blind: bool,
    options: &FitOptions,
) -> Result<TransformedMatrix> {
    let normalized = normalize(experiment, model, options)?;
    let values = match mode {
        TransformMode::Log2 => log2_transform(&normalized.values),
        TransformMode::Vst | TransformMode::Rlog => {
            let base_means = normalized.base_means();
            let (trend, trend_values) = trend_for(experiment, &normalized, &base_means, model, blind, options)?;
            if mode == TransformMode::Vst {
                variance_stabilize(&normalized, &base_means, &trend)
            } else {
                regularized_log(
                    experiment.counts().counts(),
                    &normalized,
                    &base_means,
                    trend_values.as_slice().unwrap_or(&[]),
                )
            }
        }
    };

    log::info!(
        "Transformed {} genes x {} samples ({:?}, blind = {})",
        values.nrows(),
        values.ncols(),
        mode,
        blind
    );
    Ok(TransformedMatrix {
        mode,
        blind,
        gene_ids: normalized.gene_ids,
        sample_ids: normalized.sample_ids,
        values,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispersion::TrendFitMethod;
    use crate::glm::{fit_model, DesignSpec};
    use crate::test_support::{small_experiment_counts, two_group_metadata};
    use approx::assert_relative_eq;

    fn experiment() -> Experiment {
        Experiment::new(small_experiment_counts(), two_group_metadata(3)).unwrap()
    }

    fn options() -> FitOptions {
        FitOptions {
            fit_type: TrendFitMethod::Mean,
            ..Default::default()
        }
    }

    #[test]
    fn test_log2_transform() {
        let x = ndarray::array![[0.0, 1.0], [3.0, 7.0]];
        let t = log2_transform(&x);
        assert_relative_eq!(t[[0, 0]], 0.0);
        assert_relative_eq!(t[[0, 1]], 1.0);
        assert_relative_eq!(t[[1, 1]], 3.0);
    }

    #[test]
    fn test_every_mode_keeps_identifiers() {
        let exp = experiment();
        for mode in [TransformMode::Log2, TransformMode::Vst, TransformMode::Rlog] {
            let t = transform_counts(&exp, None, mode, true, &options()).unwrap();
            assert_eq!(t.gene_ids, exp.counts().gene_ids());
            assert_eq!(t.sample_ids, exp.counts().sample_ids());
            assert_eq!(t.values.dim(), (6, 6));
            assert!(t.values.iter().all(|v| v.is_finite()));
        }
    }

    #[test]
    fn test_vst_orders_like_counts() {
        let exp = experiment();
        let t = transform_counts(&exp, None, TransformMode::Vst, true, &options()).unwrap();
        // g4 has more counts than g2 in every sample; g3 has none
        for j in 0..6 {
            assert!(t.values[[3, j]] > t.values[[1, j]]);
            assert!(t.values[[1, j]] > t.values[[2, j]]);
        }
    }

    #[test]
    fn test_non_blind_reuses_model() {
        let exp = experiment();
        let model = fit_model(&exp, &DesignSpec::single("condition"), &options()).unwrap();
        let t = transform_counts(&exp, Some(&model), TransformMode::Rlog, false, &options()).unwrap();
        assert_eq!(t.n_genes(), 6);
        assert!(!t.blind);
        assert!(t.get("g3", "s1").unwrap().abs() < 1e-12);
    }

    #[test]
    fn test_non_blind_without_model_fails() {
        let exp = experiment();
        let err = transform_counts(&exp, None, TransformMode::Vst, false, &options());
        assert!(matches!(err, Err(DeError::InvalidConfig { .. })));
    }
}
