//! Library-size normalization of RNA-seq count data

mod counts;
mod size_factors;

pub use counts::NormalizedCounts;
pub use size_factors::{estimate_size_factors, SizeFactorMethod};
