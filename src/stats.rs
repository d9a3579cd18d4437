//! Statistical helpers shared by dispersion, shrinkage and transforms

use std::cmp::Ordering;

/// 97.5th percentile of the standard normal
pub const QNORM_0975: f64 = 1.959963984540054;

/// Scale making the MAD consistent with the standard deviation of a normal
pub const MAD_SCALE: f64 = 1.4826;

fn sorted_finite(x: &[f64]) -> Vec<f64> {
    let mut v: Vec<f64> = x.iter().copied().filter(|v| v.is_finite()).collect();
    v.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    v
}

/// Median of the finite values, `None` when there are none
pub fn median(x: &[f64]) -> Option<f64> {
    let v = sorted_finite(x);
    let n = v.len();
    match n {
        0 => None,
        _ if n % 2 == 1 => Some(v[n / 2]),
        _ => Some((v[n / 2 - 1] + v[n / 2]) / 2.0),
    }
}

/// Median absolute deviation around the median, scaled by [`MAD_SCALE`]
pub fn mad(x: &[f64]) -> Option<f64> {
    let center = median(x)?;
    let dev: Vec<f64> = x
        .iter()
        .filter(|v| v.is_finite())
        .map(|v| (v - center).abs())
        .collect();
    median(&dev).map(|m| m * MAD_SCALE)
}

pub fn mean(x: &[f64]) -> f64 {
    if x.is_empty() {
        return f64::NAN;
    }
    x.iter().sum::<f64>() / x.len() as f64
}

/// Sample variance (n - 1 denominator)
pub fn variance(x: &[f64]) -> f64 {
    let n = x.len();
    if n < 2 {
        return f64::NAN;
    }
    let m = mean(x);
    x.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (n - 1) as f64
}

/// Mean after dropping `trim` of the sorted values at each end
pub fn trimmed_mean(x: &[f64], trim: f64) -> Option<f64> {
    let v = sorted_finite(x);
    if v.is_empty() {
        return None;
    }
    let cut = ((v.len() as f64) * trim.clamp(0.0, 0.5)).floor() as usize;
    let kept = if 2 * cut < v.len() { &v[cut..v.len() - cut] } else { &v[..] };
    Some(mean(kept))
}

/// Trigamma function, the second derivative of ln Γ
///
/// Recurrence up to x >= 6, then the asymptotic series.
pub fn trigamma(x: f64) -> f64 {
    if !x.is_finite() || x <= 0.0 {
        return f64::NAN;
    }
    let mut x = x;
    let mut acc = 0.0;
    while x < 6.0 {
        acc += 1.0 / (x * x);
        x += 1.0;
    }
    let x2 = 1.0 / (x * x);
    acc + 1.0 / x
        + x2 / 2.0
        + (1.0 / 6.0 - x2 * (1.0 / 30.0 - x2 * (1.0 / 42.0 - x2 / 30.0))) * x2 / x
}

/// Type 7 quantile of sorted values: linear interpolation between order statistics
pub fn quantile_sorted(sorted: &[f64], p: f64) -> f64 {
    let n = sorted.len();
    if n == 0 {
        return f64::NAN;
    }
    if n == 1 {
        return sorted[0];
    }
    let h = (n - 1) as f64 * p.clamp(0.0, 1.0);
    let lo = h.floor() as usize;
    let hi = (lo + 1).min(n - 1);
    sorted[lo] + (h - lo as f64) * (sorted[hi] - sorted[lo])
}

/// Piecewise linear through increasing knots `xs`, constant outside them
pub fn interpolate(xs: &[f64], ys: &[f64], x: f64) -> f64 {
    let last = xs.len() - 1;
    if x <= xs[0] {
        return ys[0];
    }
    if x >= xs[last] {
        return ys[last];
    }
    let j = xs.partition_point(|&v| v <= x);
    let (x0, x1) = (xs[j - 1], xs[j]);
    let t = if x1 > x0 { (x - x0) / (x1 - x0) } else { 0.0 };
    ys[j - 1] + t * (ys[j] - ys[j - 1])
}

/// Weighted quantile with weights normalized to sum to the number of observations
///
/// Ties in `x` are pooled, the order statistic `1 + (n - 1) * prob` is located
/// on the cumulative weights with a right-continuous step, and neighbouring
/// order statistics are blended by the fractional part.
pub fn weighted_quantile(x: &[f64], weights: &[f64], prob: f64) -> f64 {
    let mut pairs: Vec<(f64, f64)> = x
        .iter()
        .zip(weights)
        .filter(|(&xi, &wi)| wi > 0.0 && xi.is_finite() && wi.is_finite())
        .map(|(&xi, &wi)| (xi, wi))
        .collect();
    if pairs.is_empty() {
        return 0.0;
    }
    pairs.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(Ordering::Equal));

    let scale = pairs.len() as f64 / pairs.iter().map(|p| p.1).sum::<f64>();

    let mut values: Vec<f64> = Vec::new();
    let mut cumulative: Vec<f64> = Vec::new();
    let mut total = 0.0;
    for (xi, wi) in pairs {
        total += wi * scale;
        if values.last() == Some(&xi) {
            if let Some(last) = cumulative.last_mut() {
                *last = total;
            }
        } else {
            values.push(xi);
            cumulative.push(total);
        }
    }

    let order = 1.0 + (total - 1.0) * prob;
    let low = order.floor().max(1.0);
    let high = (low + 1.0).min(total);
    let frac = order - order.floor();

    (1.0 - frac) * step_right(&cumulative, &values, low) + frac * step_right(&cumulative, &values, high)
}

/// Value of the first step whose cumulative weight reaches `at`, clamped at both ends
fn step_right(cumulative: &[f64], values: &[f64], at: f64) -> f64 {
    let idx = cumulative.partition_point(|&c| c < at);
    values[idx.min(values.len() - 1)]
}

/// Variance of a zero-centered normal whose upper `upper_quantile` tail matches
/// the weighted quantile of |x|
pub fn match_weighted_upper_quantile_for_variance(x: &[f64], weights: &[f64], upper_quantile: f64) -> f64 {
    let abs_x: Vec<f64> = x.iter().map(|v| v.abs()).collect();
    let q = weighted_quantile(&abs_x, weights, 1.0 - upper_quantile);
    let z = if (upper_quantile - 0.05).abs() < 1e-12 {
        QNORM_0975
    } else {
        use statrs::distribution::{ContinuousCDF, Normal};
        Normal::new(0.0, 1.0)
            .map(|n| n.inverse_cdf(1.0 - upper_quantile / 2.0))
            .unwrap_or(QNORM_0975)
    };
    (q / z).powi(2)
}
