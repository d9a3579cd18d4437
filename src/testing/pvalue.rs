//! P-values from Wald statistics

use statrs::distribution::{ContinuousCDF, StudentsT};
use statrs::function::erf::erfc;

/// Two-sided normal p-value, 2 * Phi(-|z|)
pub fn normal_pvalue(z: f64) -> f64 {
    if !z.is_finite() {
        return f64::NAN;
    }
    erfc(z.abs() / std::f64::consts::SQRT_2)
}

/// Two-sided Student t p-value with `df` degrees of freedom
pub fn t_pvalue(stat: f64, df: f64) -> f64 {
    if !stat.is_finite() || df <= 0.0 {
        return f64::NAN;
    }
    match StudentsT::new(0.0, 1.0, df) {
        Ok(t) => 2.0 * t.cdf(-stat.abs()),
        Err(_) => f64::NAN,
    }
}

/// Test of |LFC| <= threshold against |LFC| > threshold
///
/// Returns (stat, pvalue). The statistic is the signed distance beyond the
/// threshold in standard errors, zero inside it.
pub fn greater_abs_test(lfc: f64, se: f64, threshold: f64, df: Option<f64>) -> (f64, f64) {
    let excess = (lfc.abs() - threshold) / se;
    let stat = lfc.signum() * excess.max(0.0);
    let upper_tail = match df {
        Some(df) => t_pvalue(excess, df) / 2.0,
        None => normal_pvalue(excess) / 2.0,
    };
    // one-sided tail beyond the threshold on either side
    let p = if excess >= 0.0 { upper_tail } else { 1.0 - upper_tail };
    (stat, (2.0 * p).min(1.0))
}
