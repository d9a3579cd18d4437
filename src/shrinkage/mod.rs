//! Log fold change shrinkage
//!
//! Maximum likelihood fold changes of genes with few counts or high
//! dispersion are noisy. Each prior pulls them toward zero by an amount that
//! depends on their uncertainty. Only the fold change and its standard error
//! are recomputed; p-values, adjusted p-values and statuses are carried over
//! from the unshrunk table so the significant set does not move.

mod adaptive_t;
mod mixture;
mod normal;

pub use adaptive_t::{shrink_adaptive_t, AdaptiveTParams};
pub use mixture::{fit_normal_mixture, MixtureFit, MixtureParams};
pub use normal::{normal_prior_variance, shrink_normal};

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::{DeError, Result};
use crate::glm::{Contrast, ModelFit};
use crate::testing::{GeneResult, ResultTable};

/// Prior used when recomputing fold changes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum ShrinkagePrior {
    /// Zero-centered normal prior with variance matched to the observed fold changes
    Normal,
    /// Heavy-tailed Cauchy prior on the tested coefficient, refit under the count likelihood
    AdaptiveT,
    /// Zero-centered scale mixture of normals fitted by empirical Bayes
    AdaptiveHeavyTailed,
}

/// Shrunken fold changes of one result table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShrunkenResults {
    pub prior: ShrinkagePrior,
    /// Same rows as the input table with `log2_fold_change` and `lfc_se` replaced
    pub table: ResultTable,
    /// Local false sign rate per row, for the priors that provide one
    pub lfsr: Vec<Option<f64>>,
}

impl ShrunkenResults {
    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    pub fn get(&self, gene_id: &str) -> Option<&GeneResult> {
        self.table.get(gene_id)
    }
}

/// Per-row shrunken estimates on the log2 scale; NaN keeps the unshrunk value
pub struct ShrunkenEstimates {
    pub log2_fold_change: Vec<f64>,
    pub lfc_se: Vec<f64>,
    pub lfsr: Vec<f64>,
}

fn check_rows_match(model: &ModelFit, results: &ResultTable) -> Result<()> {
    let same = results.len() == model.n_genes()
        && results
            .rows
            .iter()
            .zip(&model.gene_ids)
            .all(|(row, id)| &row.gene_id == id);
    if same {
        Ok(())
    } else {
        Err(DeError::InvalidContrast {
            reason: "result table rows do not match the genes of the fitted model".to_string(),
        })
    }
}

/// Recompute log2 fold changes of `results` under `prior`
///
/// `results` must come from [`crate::testing::results`] on the same `model`
/// and `contrast`.
pub fn shrink_lfc(
    model: &ModelFit,
    results: &ResultTable,
    contrast: &Contrast,
    prior: ShrinkagePrior,
) -> Result<ShrunkenResults> {
    check_rows_match(model, results)?;
    let estimates = match prior {
        ShrinkagePrior::Normal => shrink_normal(model, results, contrast)?,
        ShrinkagePrior::AdaptiveT => shrink_adaptive_t(model, results, contrast, &AdaptiveTParams::default())?,
        ShrinkagePrior::AdaptiveHeavyTailed => {
            let lfc: Vec<f64> = results.rows.iter().map(|r| r.log2_fold_change).collect();
            let se: Vec<f64> = results.rows.iter().map(|r| r.lfc_se).collect();
            let fit = fit_normal_mixture(&lfc, &se, &MixtureParams::default());
            ShrunkenEstimates {
                log2_fold_change: fit.posterior_mean,
                lfc_se: fit.posterior_sd,
                lfsr: fit.lfsr,
            }
        }
    };

    let rows: Vec<GeneResult> = results
        .rows
        .iter()
        .enumerate()
        .map(|(i, row)| {
            let mut out = row.clone();
            if estimates.log2_fold_change[i].is_finite() {
                out.log2_fold_change = estimates.log2_fold_change[i];
                out.lfc_se = estimates.lfc_se[i];
            }
            out
        })
        .collect();
    let lfsr = estimates
        .lfsr
        .iter()
        .map(|&v| if v.is_finite() { Some(v) } else { None })
        .collect();

    log::info!("Shrunk log2 fold changes of {} genes with the {:?} prior", rows.len(), prior);
    Ok(ShrunkenResults {
        prior,
        table: results.with_rows(rows),
        lfsr,
    })
}
