//! Independent filtering on mean expression
//!
//! Genes with low mean counts have little power. Dropping them before the
//! multiple testing correction raises the number of rejections; the filter
//! statistic (base mean) is independent of the p-value under the null.

use crate::stats::quantile_sorted;
use crate::testing::{adjust_pvalues, PAdjustMethod};

const N_THETA: usize = 50;

#[derive(Debug, Clone)]
pub struct IndependentFilterOutcome {
    /// Adjusted p-values at the chosen threshold, NaN for filtered genes
    pub padj: Vec<f64>,
    /// Genes below the chosen base mean threshold
    pub filtered: Vec<bool>,
    /// Chosen quantile of the base means
    pub theta: f64,
    /// Base mean threshold at that quantile
    pub threshold: f64,
    /// Rejections at each of the candidate quantiles
    pub rejections: Vec<usize>,
}

fn moving_average(values: &[usize], half: usize) -> Vec<f64> {
    let n = values.len();
    (0..n)
        .map(|i| {
            let lo = i.saturating_sub(half);
            let hi = (i + half + 1).min(n);
            values[lo..hi].iter().sum::<usize>() as f64 / (hi - lo) as f64
        })
        .collect()
}

/// Pick the base mean threshold maximizing rejections at level `alpha`
///
/// 50 quantiles of the base mean are tried. The first whose rejection count
/// exceeds the smoothed maximum minus the root-mean-square residual of the
/// smoothing is chosen. With at most 10 rejections anywhere nothing is
/// filtered.
pub fn independent_filter(
    base_means: &[f64],
    pvalues: &[f64],
    alpha: f64,
    method: PAdjustMethod,
) -> IndependentFilterOutcome {
    let n = base_means.len();
    let mut sorted: Vec<f64> = base_means.iter().copied().filter(|m| m.is_finite()).collect();
    sorted.sort_by(f64::total_cmp);
    if sorted.is_empty() {
        return IndependentFilterOutcome {
            padj: adjust_pvalues(pvalues, method),
            filtered: vec![false; n],
            theta: 0.0,
            threshold: 0.0,
            rejections: Vec::new(),
        };
    }

    let lower = base_means.iter().filter(|&&m| m == 0.0).count() as f64 / n as f64;
    let upper = if lower < 0.95 { 0.95 } else { 1.0 };
    let thetas: Vec<f64> = (0..N_THETA)
        .map(|i| lower + (upper - lower) * i as f64 / (N_THETA - 1) as f64)
        .collect();
    let cutoffs: Vec<f64> = thetas.iter().map(|&t| quantile_sorted(&sorted, t)).collect();

    let candidates: Vec<Vec<f64>> = cutoffs
        .iter()
        .map(|&cut| {
            let kept: Vec<f64> = pvalues
                .iter()
                .zip(base_means)
                .map(|(&p, &m)| if m >= cut { p } else { f64::NAN })
                .collect();
            adjust_pvalues(&kept, method)
        })
        .collect();
    let rejections: Vec<usize> = candidates
        .iter()
        .map(|padj| padj.iter().filter(|&&p| p < alpha).count())
        .collect();

    let max_rej = rejections.iter().copied().max().unwrap_or(0);
    let chosen = if max_rej <= 10 {
        0
    } else {
        let fit = moving_average(&rejections, N_THETA / 10);
        let residuals: Vec<f64> = rejections
            .iter()
            .zip(&fit)
            .filter(|(r, _)| **r > 0)
            .map(|(&r, &f)| r as f64 - f)
            .collect();
        let rmse = if residuals.is_empty() {
            0.0
        } else {
            (residuals.iter().map(|r| r * r).sum::<f64>() / residuals.len() as f64).sqrt()
        };
        let max_fit = fit.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        rejections
            .iter()
            .position(|&r| r as f64 > max_fit - rmse)
            .unwrap_or(0)
    };

    let threshold = cutoffs[chosen];
    log::info!(
        "Independent filtering: base mean threshold {:.3} (quantile {:.3}), {} rejections at alpha {}",
        threshold,
        thetas[chosen],
        rejections[chosen],
        alpha
    );

    IndependentFilterOutcome {
        padj: candidates.into_iter().nth(chosen).unwrap_or_default(),
        filtered: base_means.iter().map(|&m| !(m >= threshold)).collect(),
        theta: thetas[chosen],
        threshold,
        rejections,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_few_rejections_no_filtering() {
        let means = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        let pvals = vec![0.5, 0.4, 0.3, 0.2, 0.01];
        let out = independent_filter(&means, &pvals, 0.1, PAdjustMethod::BenjaminiHochberg);
        assert_eq!(out.theta, 0.0);
        assert!(out.filtered.iter().all(|f| !f));
    }

    #[test]
    fn test_low_mean_noise_is_filtered() {
        // 100 low-mean null genes, 100 high-mean genes of which the top 40
        // carry a signal that only survives a smaller multiple testing burden
        let mut means = Vec::new();
        let mut pvals = Vec::new();
        for i in 0..100 {
            means.push(1.0 + i as f64 * 0.01);
            pvals.push(0.2 + 0.8 * (i as f64 + 0.5) / 100.0);
        }
        for i in 0..100 {
            means.push(100.0 + i as f64);
            pvals.push(if i >= 60 { 0.03 } else { 0.5 });
        }
        let out = independent_filter(&means, &pvals, 0.1, PAdjustMethod::BenjaminiHochberg);
        assert!(out.threshold > 1.0);
        assert!(out.filtered[0]);
        assert!(!out.filtered[150]);
        assert!(out.padj[0].is_nan());
        let rejected = out.padj.iter().filter(|&&p| p < 0.1).count();
        assert_eq!(rejected, 40);
    }
}
