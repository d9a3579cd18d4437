//! Dispersion trend as a function of mean expression

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::{DeError, Result};
use crate::stats::{interpolate, median, trimmed_mean};

/// How the mean-dispersion trend is fitted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum TrendFitMethod {
    /// dispersion = a0 + a1 / mean
    #[default]
    Parametric,
    /// Moving median of log dispersions over log means
    Local,
    /// A single trimmed mean of the gene-wise estimates
    Mean,
}

/// Fitted trend, evaluated at a gene's mean of normalized counts
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DispersionTrend {
    Parametric { asymptotic: f64, extra_poisson: f64 },
    Mean { value: f64 },
    Local { log_means: Vec<f64>, log_dispersions: Vec<f64> },
}

impl DispersionTrend {
    pub fn evaluate(&self, mean: f64) -> f64 {
        match self {
            DispersionTrend::Parametric {
                asymptotic,
                extra_poisson,
            } => {
                if mean > 0.0 {
                    asymptotic + extra_poisson / mean
                } else {
                    f64::NAN
                }
            }
            DispersionTrend::Mean { value } => *value,
            DispersionTrend::Local {
                log_means,
                log_dispersions,
            } => {
                if mean <= 0.0 {
                    return f64::NAN;
                }
                interpolate(log_means, log_dispersions, mean.ln()).exp()
            }
        }
    }

    pub fn method(&self) -> TrendFitMethod {
        match self {
            DispersionTrend::Parametric { .. } => TrendFitMethod::Parametric,
            DispersionTrend::Mean { .. } => TrendFitMethod::Mean,
            DispersionTrend::Local { .. } => TrendFitMethod::Local,
        }
    }
}

/// Fit the trend; a failed parametric fit falls back to the mean trend
pub fn fit_trend(
    base_means: &[f64],
    gene_wise: &[f64],
    method: TrendFitMethod,
    min_disp: f64,
) -> Result<DispersionTrend> {
    match method {
        TrendFitMethod::Parametric => match fit_parametric(base_means, gene_wise, min_disp) {
            Ok(trend) => Ok(trend),
            Err(e) => {
                log::info!("{}; falling back to the mean dispersion trend", e);
                fit_mean(gene_wise, min_disp)
            }
        },
        TrendFitMethod::Local => match fit_local(base_means, gene_wise, min_disp) {
            Ok(trend) => Ok(trend),
            Err(e) => {
                log::info!("{}; falling back to the mean dispersion trend", e);
                fit_mean(gene_wise, min_disp)
            }
        },
        TrendFitMethod::Mean => fit_mean(gene_wise, min_disp),
    }
}

fn fit_mean(gene_wise: &[f64], min_disp: f64) -> Result<DispersionTrend> {
    let usable: Vec<f64> = gene_wise
        .iter()
        .copied()
        .filter(|d| d.is_finite() && *d > 10.0 * min_disp)
        .collect();
    let value = trimmed_mean(&usable, 0.1).ok_or_else(|| DeError::TrendFittingFailed {
        reason: "all gene-wise dispersion estimates are at the lower bound".to_string(),
    })?;
    log::debug!("Mean dispersion trend: {:.6}", value);
    Ok(DispersionTrend::Mean { value })
}

fn usable_points(base_means: &[f64], gene_wise: &[f64], min_disp: f64) -> Vec<(f64, f64)> {
    base_means
        .iter()
        .zip(gene_wise)
        .filter(|(&m, &d)| m > 0.0 && d.is_finite() && d > 100.0 * min_disp)
        .map(|(&m, &d)| (m, d))
        .collect()
}

fn fit_parametric(base_means: &[f64], gene_wise: &[f64], min_disp: f64) -> Result<DispersionTrend> {
    const MAX_ITER: usize = 10;
    let points = usable_points(base_means, gene_wise, min_disp);
    if points.len() < 3 {
        return Err(DeError::TrendFittingFailed {
            reason: format!("parametric trend needs at least 3 usable genes, found {}", points.len()),
        });
    }

    let mut coefs = (0.1_f64, 1.0_f64);
    for iter in 0..MAX_ITER {
        let kept: Vec<(f64, f64)> = points
            .iter()
            .copied()
            .filter(|&(m, d)| {
                let fitted = coefs.0 + coefs.1 / m;
                let ratio = d / fitted;
                fitted > 0.0 && ratio > 1e-4 && ratio < 15.0
            })
            .collect();
        if kept.len() < 3 {
            return Err(DeError::TrendFittingFailed {
                reason: "too few genes with moderate residuals for the parametric trend".to_string(),
            });
        }

        let old = coefs;
        let (next, glm_converged) = fit_gamma_identity(&kept, coefs);
        coefs = next;
        if !(coefs.0 > 0.0 && coefs.1 > 0.0) {
            return Err(DeError::TrendFittingFailed {
                reason: format!(
                    "parametric trend coefficients are not positive (a0 = {:.4}, a1 = {:.4})",
                    coefs.0, coefs.1
                ),
            });
        }

        let change = (coefs.0 / old.0).ln().powi(2) + (coefs.1 / old.1).ln().powi(2);
        log::debug!(
            "Parametric trend iteration {}: a0 = {:.6}, a1 = {:.6}, {} genes",
            iter + 1,
            coefs.0,
            coefs.1,
            kept.len()
        );
        if change < 1e-6 && glm_converged {
            return Ok(DispersionTrend::Parametric {
                asymptotic: coefs.0,
                extra_poisson: coefs.1,
            });
        }
    }

    Err(DeError::TrendFittingFailed {
        reason: "parametric trend did not converge".to_string(),
    })
}

fn gamma_deviance(points: &[(f64, f64)], a0: f64, a1: f64) -> f64 {
    points
        .iter()
        .map(|&(m, d)| {
            let mu = (a0 + a1 / m).max(1e-8);
            2.0 * (-(d / mu).ln() + (d - mu) / mu)
        })
        .sum()
}

/// Gamma GLM with identity link, dispersion ~ 1 + 1/mean, by IRLS
fn fit_gamma_identity(points: &[(f64, f64)], start: (f64, f64)) -> ((f64, f64), bool) {
    let (mut a0, mut a1) = start;
    let mut dev_old = gamma_deviance(points, a0, a1);

    for _ in 0..25 {
        let (mut sw, mut swx, mut swxx, mut swy, mut swxy) = (0.0, 0.0, 0.0, 0.0, 0.0);
        for &(m, d) in points {
            let x = 1.0 / m;
            let mu = (a0 + a1 * x).max(1e-8);
            let w = 1.0 / (mu * mu);
            sw += w;
            swx += w * x;
            swxx += w * x * x;
            swy += w * d;
            swxy += w * x * d;
        }
        let det = sw * swxx - swx * swx;
        if det.abs() < 1e-300 {
            return ((a0, a1), false);
        }
        a0 = (swxx * swy - swx * swxy) / det;
        a1 = (sw * swxy - swx * swy) / det;

        let dev = gamma_deviance(points, a0, a1);
        if (dev - dev_old).abs() / (dev.abs() + 0.1) < 1e-8 {
            return ((a0, a1), true);
        }
        dev_old = dev;
    }
    ((a0, a1), false)
}

fn fit_local(base_means: &[f64], gene_wise: &[f64], min_disp: f64) -> Result<DispersionTrend> {
    let mut points: Vec<(f64, f64)> = usable_points(base_means, gene_wise, min_disp)
        .into_iter()
        .map(|(m, d)| (m.ln(), d.ln()))
        .collect();
    if points.len() < 5 {
        return Err(DeError::TrendFittingFailed {
            reason: format!("local trend needs at least 5 usable genes, found {}", points.len()),
        });
    }
    points.sort_by(|a, b| a.0.total_cmp(&b.0));

    let n = points.len();
    let half = ((n as f64 * 0.2) as usize / 2).max(2);
    let mut log_means = Vec::with_capacity(n);
    let mut log_dispersions = Vec::with_capacity(n);
    for i in 0..n {
        let lo = i.saturating_sub(half);
        let hi = (i + half + 1).min(n);
        let window: Vec<f64> = points[lo..hi].iter().map(|p| p.1).collect();
        let smoothed = median(&window).unwrap_or(points[i].1);
        match log_means.last() {
            Some(&last) if points[i].0 <= last => {
                // tied means share one knot
                if let Some(v) = log_dispersions.last_mut() {
                    *v = 0.5 * (*v + smoothed);
                }
            }
            _ => {
                log_means.push(points[i].0);
                log_dispersions.push(smoothed);
            }
        }
    }

    Ok(DispersionTrend::Local {
        log_means,
        log_dispersions,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn synthetic(a0: f64, a1: f64) -> (Vec<f64>, Vec<f64>) {
        let means: Vec<f64> = (1..=200).map(|i| 2.0 + i as f64 * 5.0).collect();
        let disps: Vec<f64> = means
            .iter()
            .enumerate()
            .map(|(i, m)| {
                let noise = if i % 2 == 0 { 1.05 } else { 1.0 / 1.05 };
                (a0 + a1 / m) * noise
            })
            .collect();
        (means, disps)
    }

    #[test]
    fn test_parametric_recovers_coefficients() {
        let (means, disps) = synthetic(0.05, 2.0);
        let trend = fit_trend(&means, &disps, TrendFitMethod::Parametric, 1e-8).unwrap();
        match trend {
            DispersionTrend::Parametric {
                asymptotic,
                extra_poisson,
            } => {
                assert_relative_eq!(asymptotic, 0.05, max_relative = 0.05);
                assert_relative_eq!(extra_poisson, 2.0, max_relative = 0.05);
            }
            other => panic!("expected parametric trend, got {:?}", other),
        }
    }

    #[test]
    fn test_parametric_falls_back_to_mean() {
        // Dispersion increasing with the mean gives a negative a1
        let means: Vec<f64> = (1..=50).map(|i| i as f64 * 10.0).collect();
        let disps: Vec<f64> = means.iter().map(|m| 0.01 + m / 1000.0).collect();
        let trend = fit_trend(&means, &disps, TrendFitMethod::Parametric, 1e-8).unwrap();
        assert_eq!(trend.method(), TrendFitMethod::Mean);
    }

    #[test]
    fn test_mean_trend_ignores_boundary_genes() {
        let disps = vec![1e-8, 0.2, 0.2, 0.2, f64::NAN];
        let trend = fit_trend(&[1.0; 5], &disps, TrendFitMethod::Mean, 1e-8).unwrap();
        assert_relative_eq!(trend.evaluate(100.0), 0.2);
    }

    #[test]
    fn test_mean_trend_fails_without_estimates() {
        let disps = vec![1e-8, f64::NAN];
        assert!(fit_trend(&[1.0, 2.0], &disps, TrendFitMethod::Mean, 1e-8).is_err());
    }

    #[test]
    fn test_local_trend_decreasing() {
        let (means, disps) = synthetic(0.05, 2.0);
        let trend = fit_trend(&means, &disps, TrendFitMethod::Local, 1e-8).unwrap();
        assert_eq!(trend.method(), TrendFitMethod::Local);
        assert!(trend.evaluate(10.0) > trend.evaluate(900.0));
        assert_relative_eq!(trend.evaluate(500.0), 0.05 + 2.0 / 500.0, max_relative = 0.15);
    }

}
