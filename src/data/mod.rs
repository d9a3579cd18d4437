//! Input data structures: counts, sample metadata and their alignment

mod align;
mod count_matrix;
mod metadata;

pub use align::{check_alignment, reorder_to_metadata, Experiment};
pub use count_matrix::CountMatrix;
pub use metadata::SampleMetadata;
