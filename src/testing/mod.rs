//! Statistical testing for differential expression

mod fdr;
mod pvalue;
mod results;
mod wald;

pub use fdr::{adjust_pvalues, benjamini_hochberg, bonferroni, PAdjustMethod};
pub use pvalue::{greater_abs_test, normal_pvalue, t_pvalue};
pub use results::{GeneResult, ResultTable, TestStatus};
pub use wald::{wald_test, WaldStatistics};

use crate::error::Result;
use crate::filter::{cooks_cutoff, flag_cooks_outliers, has_enough_replicates, independent_filter};
use crate::glm::{Contrast, ModelFit};

/// Options of [`results`]
#[derive(Debug, Clone)]
pub struct TestOptions {
    pub use_t: bool,
    /// log2 fold change below which genes count as unchanged
    pub lfc_threshold: f64,
    /// Target level for independent filtering
    pub alpha: f64,
    pub p_adjust: PAdjustMethod,
    pub cooks_filter: bool,
    /// Defaults to the 0.99 quantile of F(p, m - p)
    pub cooks_cutoff: Option<f64>,
    pub independent_filtering: bool,
}

impl Default for TestOptions {
    fn default() -> Self {
        Self {
            use_t: false,
            lfc_threshold: 0.0,
            alpha: 0.1,
            p_adjust: PAdjustMethod::BenjaminiHochberg,
            cooks_filter: true,
            cooks_cutoff: None,
            independent_filtering: true,
        }
    }
}

fn defined(v: f64) -> Option<f64> {
    if v.is_nan() {
        None
    } else {
        Some(v)
    }
}

/// Wald test of `contrast`, Cook's outlier removal, independent filtering
/// and multiple testing correction, one row per modeled gene
pub fn results(model: &ModelFit, contrast: &Contrast, options: &TestOptions) -> Result<ResultTable> {
    let wald = wald_test(model, contrast, options.use_t, options.lfc_threshold)?;
    let n = model.n_genes();

    let mut status: Vec<TestStatus> = (0..n)
        .map(|i| {
            if model.all_zero[i] {
                TestStatus::AllZero
            } else if wald.pvalue[i].is_nan() {
                TestStatus::NotConverged
            } else {
                TestStatus::Tested
            }
        })
        .collect();

    if options.cooks_filter && has_enough_replicates(&model.design) {
        let cutoff = options
            .cooks_cutoff
            .unwrap_or_else(|| cooks_cutoff(model.design.n_samples(), model.design.n_coefs()));
        let outliers = flag_cooks_outliers(&model.cooks, model.counts.view(), cutoff, model.design.is_two_level());
        for (s, outlier) in status.iter_mut().zip(outliers) {
            if outlier && *s == TestStatus::Tested {
                *s = TestStatus::CooksOutlier;
            }
        }
        log::info!(
            "{} genes flagged as Cook's distance outliers (cutoff {:.3})",
            status.iter().filter(|s| **s == TestStatus::CooksOutlier).count(),
            cutoff
        );
    } else if options.cooks_filter {
        log::info!("Fewer than 3 replicates in some group, Cook's outlier filtering skipped");
    }

    let pvalues: Vec<f64> = (0..n)
        .map(|i| {
            if status[i] == TestStatus::Tested {
                wald.pvalue[i]
            } else {
                f64::NAN
            }
        })
        .collect();

    let padj = if options.independent_filtering {
        let outcome = independent_filter(
            model.base_means.as_slice().unwrap_or(&[]),
            &pvalues,
            options.alpha,
            options.p_adjust,
        );
        for (s, filtered) in status.iter_mut().zip(&outcome.filtered) {
            if *filtered && *s == TestStatus::Tested {
                *s = TestStatus::LowMeanFiltered;
            }
        }
        outcome.padj
    } else {
        adjust_pvalues(&pvalues, options.p_adjust)
    };

    let rows = (0..n)
        .map(|i| GeneResult {
            gene_id: model.gene_ids[i].clone(),
            base_mean: model.base_means[i],
            log2_fold_change: wald.log2_fold_change[i],
            lfc_se: wald.lfc_se[i],
            stat: defined(wald.stat[i]),
            pvalue: match status[i] {
                TestStatus::Tested | TestStatus::LowMeanFiltered => defined(wald.pvalue[i]),
                _ => None,
            },
            padj: match status[i] {
                TestStatus::Tested => defined(padj[i]),
                _ => None,
            },
            status: status[i],
        })
        .collect();

    let table = ResultTable {
        contrast: contrast.label(),
        rows,
    };
    log::info!(
        "Tested {}: {} genes, {} with padj < {}",
        table.contrast,
        table.len(),
        table.n_rejected(options.alpha),
        options.alpha
    );
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Experiment;
    use crate::dispersion::TrendFitMethod;
    use crate::glm::{fit_model, DesignSpec, FitOptions};
    use crate::test_support::{small_experiment_counts, two_group_metadata};

    fn model() -> ModelFit {
        let exp = Experiment::new(small_experiment_counts(), two_group_metadata(3)).unwrap();
        let options = FitOptions {
            fit_type: TrendFitMethod::Mean,
            ..Default::default()
        };
        fit_model(&exp, &DesignSpec::single("condition"), &options).unwrap()
    }

    #[test]
    fn test_results_rows_and_statuses() {
        let model = model();
        let contrast = Contrast::new("condition", "b", "a");
        let table = results(&model, &contrast, &TestOptions::default()).unwrap();

        assert_eq!(table.len(), 6);
        assert_eq!(table.contrast, "condition b vs a");

        let g1 = table.get("g1").unwrap();
        assert!(g1.log2_fold_change > 2.0);
        assert!(g1.padj.unwrap() < 0.05);

        let g3 = table.get("g3").unwrap();
        assert_eq!(g3.status, TestStatus::AllZero);
        assert_eq!(g3.log2_fold_change, 0.0);
        assert_eq!(g3.lfc_se, 0.0);
        assert!(g3.pvalue.is_none() && g3.padj.is_none() && g3.stat.is_none());

        let g5 = table.get("g5").unwrap();
        assert!(g5.log2_fold_change < -1.5);

        for row in &table.rows {
            if let Some(p) = row.padj {
                assert!((0.0..=1.0).contains(&p));
            }
        }
    }

    #[test]
    fn test_reversed_contrast_flips_sign() {
        let model = model();
        let forward = results(&model, &Contrast::new("condition", "b", "a"), &TestOptions::default()).unwrap();
        let reverse = results(&model, &Contrast::new("condition", "a", "b"), &TestOptions::default()).unwrap();
        let f = forward.get("g1").unwrap();
        let r = reverse.get("g1").unwrap();
        assert!((f.log2_fold_change + r.log2_fold_change).abs() < 1e-10);
        assert!((f.pvalue.unwrap() - r.pvalue.unwrap()).abs() < 1e-10);
    }

    #[test]
    fn test_bonferroni_is_more_conservative() {
        let model = model();
        let contrast = Contrast::new("condition", "b", "a");
        let opts = TestOptions {
            independent_filtering: false,
            ..Default::default()
        };
        let bh = results(&model, &contrast, &opts).unwrap();
        let bonf = results(
            &model,
            &contrast,
            &TestOptions {
                p_adjust: PAdjustMethod::Bonferroni,
                ..opts.clone()
            },
        )
        .unwrap();
        for (a, b) in bh.rows.iter().zip(&bonf.rows) {
            if let (Some(pa), Some(pb)) = (a.padj, b.padj) {
                assert!(pb >= pa - 1e-12);
            }
        }
    }
}
