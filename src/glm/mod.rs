//! Generalized Linear Model fitting for negative binomial data

mod design;
mod fitting;
pub mod linalg;
mod model;
mod negative_binomial;

pub use design::{check_full_rank, Contrast, Design, DesignSpec, FactorTerm};
pub use fitting::{
    default_ridge, fit_gene, fit_gene_newton, fit_genes, log_posterior, CoefficientPrior, GeneFit, GlmFitParams,
    GlmFits, NewtonFit, RidgePrior,
};
pub use model::{fit_model, FitOptions, ModelFit};
pub use negative_binomial::{nb_deviance, nb_log_likelihood, nb_mean, nb_variance, nb_weight, MAX_BETA, MIN_MU};
