//! Negative binomial distribution utilities
//!
//! Parameterized by mean `mu` and dispersion `alpha`, so that
//! Var(Y) = mu + alpha * mu^2.

use statrs::function::gamma::ln_gamma;

/// Lower bound on fitted means inside IRLS
pub const MIN_MU: f64 = 0.5;

/// Largest absolute coefficient (natural log scale) before a fit is declared divergent
pub const MAX_BETA: f64 = 30.0;

/// Linear predictor clamp preventing `exp` overflow
pub const MAX_ETA: f64 = 700.0;

/// mu = size_factor * exp(eta)
pub fn nb_mean(eta: f64, size_factor: f64) -> f64 {
    size_factor * eta.clamp(-MAX_ETA, MAX_ETA).exp()
}

pub fn nb_variance(mu: f64, alpha: f64) -> f64 {
    mu + alpha * mu * mu
}

/// Log probability of count `y`
pub fn nb_log_likelihood(y: f64, mu: f64, alpha: f64) -> f64 {
    if mu <= 0.0 || alpha <= 0.0 {
        return f64::NEG_INFINITY;
    }
    let r = 1.0 / alpha;
    let log_mu_r = (mu + r).ln();
    ln_gamma(y + r) - ln_gamma(r) - ln_gamma(y + 1.0) + r * (r.ln() - log_mu_r) + y * (mu.ln() - log_mu_r)
}

/// IRLS working weight mu / (1 + alpha * mu)
pub fn nb_weight(mu: f64, alpha: f64) -> f64 {
    mu / (1.0 + alpha * mu)
}

/// Deviance contribution -2 log L summed over samples
pub fn nb_deviance(y: &[f64], mu: &[f64], alpha: f64) -> f64 {
    y.iter()
        .zip(mu)
        .map(|(&yi, &mi)| -2.0 * nb_log_likelihood(yi, mi, alpha))
        .sum()
}
