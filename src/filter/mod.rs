//! Gene filters: low total counts before modeling, Cook's outliers and
//! independent filtering after testing

mod cooks;
mod independent;
mod low_count;

pub use cooks::{
    cooks_cutoff, cooks_distances, flag_cooks_outliers, has_enough_replicates, robust_dispersions, MIN_REPLICATES,
};
pub use independent::{independent_filter, IndependentFilterOutcome};
pub use low_count::{filter_low_counts, FilterOutcome, DEFAULT_MIN_TOTAL_COUNT};
