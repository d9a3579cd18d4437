//! Whole-experiment negative binomial model

use ndarray::{Array1, Array2};

use super::design::{Design, DesignSpec};
use super::fitting::{default_ridge, fit_genes, GlmFitParams, GlmFits};
use crate::data::Experiment;
use crate::dispersion::{estimate_dispersions, DispersionFit, DispersionParams, TrendFitMethod};
use crate::error::{DeError, Result};
use crate::filter::cooks_distances;
use crate::normalization::{NormalizedCounts, SizeFactorMethod};

/// Options controlling [`fit_model`]
#[derive(Debug, Clone, Default)]
pub struct FitOptions {
    pub size_factor_method: SizeFactorMethod,
    pub fit_type: TrendFitMethod,
    pub dispersion: DispersionParams,
    pub glm: GlmFitParams,
}

/// Fitted model of every gene: size factors, dispersions and coefficients
#[derive(Debug, Clone)]
pub struct ModelFit {
    pub gene_ids: Vec<String>,
    pub sample_ids: Vec<String>,
    /// Raw counts (genes x samples)
    pub counts: Array2<f64>,
    pub normalized: NormalizedCounts,
    pub base_means: Array1<f64>,
    pub base_vars: Array1<f64>,
    pub design: Design,
    pub dispersions: DispersionFit,
    pub fits: GlmFits,
    /// Cook's distances (genes x samples)
    pub cooks: Array2<f64>,
    pub all_zero: Vec<bool>,
}

impl ModelFit {
    pub fn n_genes(&self) -> usize {
        self.gene_ids.len()
    }

    pub fn size_factors(&self) -> &Array1<f64> {
        &self.normalized.size_factors
    }
}

/// Normalize, estimate dispersions and fit the GLM of every gene
pub fn fit_model(experiment: &Experiment, spec: &DesignSpec, options: &FitOptions) -> Result<ModelFit> {
    let counts = experiment.counts();
    if counts.n_genes() == 0 {
        return Err(DeError::EmptyData {
            reason: "no genes left to model".to_string(),
        });
    }

    let design = Design::build(experiment.metadata(), spec)?;
    log::info!(
        "Fitting model {} with {} coefficients on {} genes x {} samples",
        design.formula(),
        design.n_coefs(),
        counts.n_genes(),
        counts.n_samples()
    );

    let normalized = NormalizedCounts::from_counts(counts, options.size_factor_method)?;
    let base_means = normalized.base_means();
    let base_vars = normalized.base_vars();
    let all_zero: Vec<bool> = counts.row_sums().iter().map(|s| *s == 0.0).collect();

    let dispersions = estimate_dispersions(
        counts.counts(),
        normalized.size_factors.view(),
        base_means.view(),
        &design,
        options.fit_type,
        &options.dispersion,
    )?;

    let fits = fit_genes(
        counts.counts(),
        design.matrix(),
        normalized.size_factors.view(),
        dispersions.final_dispersions.as_slice().unwrap_or(&[]),
        &default_ridge(design.n_coefs()),
        &options.glm,
    );

    let cooks = cooks_distances(counts.counts(), &normalized, &design, &fits);

    Ok(ModelFit {
        gene_ids: counts.gene_ids().to_vec(),
        sample_ids: counts.sample_ids().to_vec(),
        counts: counts.counts().to_owned(),
        normalized,
        base_means,
        base_vars,
        design,
        dispersions,
        fits,
        cooks,
        all_zero,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{small_experiment_counts, two_group_metadata};

    #[test]
    fn test_fit_model_two_groups() {
        let exp = Experiment::new(small_experiment_counts(), two_group_metadata(3)).unwrap();
        let options = FitOptions {
            fit_type: TrendFitMethod::Mean,
            ..Default::default()
        };
        let fit = fit_model(&exp, &DesignSpec::single("condition"), &options).unwrap();

        assert_eq!(fit.n_genes(), 6);
        assert_eq!(fit.all_zero, vec![false, false, true, false, false, false]);
        assert!(fit.dispersions.final_dispersions[2].is_nan());
        let coef = fit.design.coef_index("condition_b_vs_a").unwrap();
        assert!(fit.fits.coefficients[[0, coef]] > 1.5);
        assert!(fit.fits.coefficients[[4, coef]] < -1.0);
        assert!(fit.fits.coefficients[[1, coef]].abs() < 0.4);
        assert!(fit.size_factors().iter().all(|s| *s > 0.0));
    }
}
