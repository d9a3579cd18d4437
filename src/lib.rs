//! rnaseq_de: RNA-Seq differential expression workflow
//!
//! Counts and sample metadata go in; normalized and transformed matrices,
//! per-gene negative binomial test results, shrunken fold changes and an
//! annotated table of significant genes come out. Every stage takes its
//! inputs by reference and returns a new value.
//!
//! # Example
//!
//! ```ignore
//! use rnaseq_de::prelude::*;
//!
//! let counts = read_count_matrix("counts.tsv")?;
//! let metadata = read_metadata("samples.csv")?;
//!
//! let output = run_pipeline(counts, metadata, &PipelineConfig::default())?;
//! println!("{}", output.summary);
//! output.write_to("out")?;
//! ```

pub mod annotation;
pub mod cli;
pub mod config;
pub mod data;
pub mod dispersion;
pub mod error;
pub mod filter;
pub mod glm;
pub mod io;
pub mod normalization;
pub mod pipeline;
pub mod report;
pub mod shrinkage;
pub mod stats;
pub mod testing;
pub mod transform;

#[cfg(test)]
mod test_support;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::annotation::{left_join, AnnotatedTable, AnnotationSource, AnnotationTable, GeneClasses};
    pub use crate::config::{AnnotationConfig, PipelineConfig, ShrinkagePrior, TransformMode};
    pub use crate::data::{check_alignment, reorder_to_metadata, CountMatrix, Experiment, SampleMetadata};
    pub use crate::dispersion::{estimate_dispersions, DispersionFit, TrendFitMethod};
    pub use crate::error::{DeError, Result};
    pub use crate::filter::{filter_low_counts, FilterOutcome};
    pub use crate::glm::{fit_model, Contrast, DesignSpec, FitOptions, ModelFit};
    pub use crate::io::{
        read_count_matrix, read_metadata, read_results, write_annotated, write_count_matrix, write_json,
        write_normalized_counts, write_results, write_transformed,
    };
    pub use crate::normalization::{estimate_size_factors, NormalizedCounts, SizeFactorMethod};
    pub use crate::pipeline::{annotate, run_pipeline, PipelineOutput};
    pub use crate::report::{rank_by_padj, significant, summarize, top_n, ResultSummary};
    pub use crate::shrinkage::{shrink_lfc, ShrunkenResults};
    pub use crate::testing::{results, GeneResult, ResultTable, TestOptions, TestStatus};
    pub use crate::transform::{transform_counts, TransformedMatrix};
}
