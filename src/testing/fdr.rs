//! Multiple testing correction
//!
//! Undefined (NaN) p-values pass through as undefined and are not counted
//! as tests.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum PAdjustMethod {
    /// False discovery rate
    #[default]
    BenjaminiHochberg,
    /// Family-wise error rate
    Bonferroni,
    /// Raw p-values
    None,
}

pub fn adjust_pvalues(pvalues: &[f64], method: PAdjustMethod) -> Vec<f64> {
    match method {
        PAdjustMethod::BenjaminiHochberg => benjamini_hochberg(pvalues),
        PAdjustMethod::Bonferroni => bonferroni(pvalues),
        PAdjustMethod::None => pvalues.to_vec(),
    }
}

pub fn benjamini_hochberg(pvalues: &[f64]) -> Vec<f64> {
    let mut order: Vec<usize> = (0..pvalues.len()).filter(|&i| !pvalues[i].is_nan()).collect();
    let m = order.len();
    let mut padj = vec![f64::NAN; pvalues.len()];
    if m == 0 {
        return padj;
    }
    order.sort_by(|&a, &b| pvalues[a].total_cmp(&pvalues[b]));

    let mut running_min = 1.0_f64;
    for (rank, &i) in order.iter().enumerate().rev() {
        let adj = pvalues[i] * m as f64 / (rank + 1) as f64;
        running_min = running_min.min(adj);
        padj[i] = running_min;
    }
    padj
}

pub fn bonferroni(pvalues: &[f64]) -> Vec<f64> {
    let m = pvalues.iter().filter(|p| !p.is_nan()).count() as f64;
    pvalues
        .iter()
        .map(|&p| if p.is_nan() { f64::NAN } else { (p * m).min(1.0) })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_bh_known_values() {
        // p.adjust(c(0.01, 0.04, 0.03, 0.02), "BH") = 0.04 0.04 0.04 0.04
        let padj = benjamini_hochberg(&[0.01, 0.04, 0.03, 0.02]);
        for v in padj {
            assert_relative_eq!(v, 0.04, epsilon = 1e-12);
        }
        // p.adjust(c(0.001, 0.01, 0.05, 0.1), "BH") = 0.004 0.02 0.0667 0.1
        let padj = benjamini_hochberg(&[0.001, 0.01, 0.05, 0.1]);
        assert_relative_eq!(padj[0], 0.004, epsilon = 1e-12);
        assert_relative_eq!(padj[1], 0.02, epsilon = 1e-12);
        assert_relative_eq!(padj[2], 0.05 * 4.0 / 3.0, epsilon = 1e-12);
        assert_relative_eq!(padj[3], 0.1, epsilon = 1e-12);
    }

    #[test]
    fn test_nan_passthrough() {
        let p = [0.01, f64::NAN, 0.03];
        let bh = benjamini_hochberg(&p);
        assert!(bh[1].is_nan());
        // only two tests are counted
        assert_relative_eq!(bh[0], 0.02, epsilon = 1e-12);
        let bonf = bonferroni(&p);
        assert!(bonf[1].is_nan());
        assert_relative_eq!(bonf[2], 0.06, epsilon = 1e-12);
    }

    #[test]
    fn test_bonferroni_capped() {
        assert_eq!(bonferroni(&[0.6, 0.5]), vec![1.0, 1.0]);
    }

    #[test]
    fn test_none_is_identity() {
        assert_eq!(adjust_pvalues(&[0.2, 0.3], PAdjustMethod::None), vec![0.2, 0.3]);
    }
}
