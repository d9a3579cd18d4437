//! Error types for rnaseq_de
//!
//! Only run-level failures are errors. A gene whose model does not converge
//! is reported as a missing value in the result table, never as an `Err`.

use thiserror::Error;

/// Main error type for the differential expression workflow
#[derive(Error, Debug)]
pub enum DeError {
    #[error("Sample identifiers do not match between count matrix and metadata: {reason}")]
    SampleMismatch { reason: String },

    #[error("Sample order differs between count matrix and metadata: {reason}")]
    SampleOrder { reason: String },

    #[error("Invalid count matrix: {reason}")]
    InvalidCountMatrix { reason: String },

    #[error("Invalid metadata: {reason}")]
    InvalidMetadata { reason: String },

    #[error("Degenerate design: covariate '{variable}' has {n_levels} observed level(s), at least 2 are required")]
    DegenerateDesign { variable: String, n_levels: usize },

    #[error("Invalid design matrix: {reason}")]
    InvalidDesign { reason: String },

    #[error("Invalid contrast specification: {reason}")]
    InvalidContrast { reason: String },

    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    #[error("Empty data: {reason}")]
    EmptyData { reason: String },

    #[error("Size factor estimation failed: {reason}")]
    SizeFactorFailed { reason: String },

    #[error("Trend fitting failed: {reason}")]
    TrendFittingFailed { reason: String },

    #[error("Numerical instability in {operation}: {details}")]
    NumericalInstability { operation: String, details: String },

    #[error("Annotation source failed: {reason}")]
    AnnotationSource { reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV parsing error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Coarse classification of an error, mirroring how a failed run is reported
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Mismatched or malformed inputs, detected before any computation
    InputShape,
    /// A model covariate cannot support a contrast
    DegenerateDesign,
    /// Run-level numerical failure (size factors, trend)
    Numeric,
    /// External annotation source could not be read
    Annotation,
    /// Filesystem or parse failure
    Io,
}

impl DeError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            DeError::SampleMismatch { .. }
            | DeError::SampleOrder { .. }
            | DeError::InvalidCountMatrix { .. }
            | DeError::InvalidMetadata { .. }
            | DeError::InvalidConfig { .. }
            | DeError::EmptyData { .. } => ErrorCategory::InputShape,
            DeError::DegenerateDesign { .. }
            | DeError::InvalidDesign { .. }
            | DeError::InvalidContrast { .. } => ErrorCategory::DegenerateDesign,
            DeError::SizeFactorFailed { .. }
            | DeError::TrendFittingFailed { .. }
            | DeError::NumericalInstability { .. } => ErrorCategory::Numeric,
            DeError::AnnotationSource { .. } => ErrorCategory::Annotation,
            DeError::Io(_) | DeError::Csv(_) | DeError::Json(_) => ErrorCategory::Io,
        }
    }
}

/// Result type alias for workflow operations
pub type Result<T> = std::result::Result<T, DeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_categories() {
        let err = DeError::SampleMismatch {
            reason: "S4 missing".to_string(),
        };
        assert_eq!(err.category(), ErrorCategory::InputShape);

        let err = DeError::DegenerateDesign {
            variable: "condition".to_string(),
            n_levels: 1,
        };
        assert_eq!(err.category(), ErrorCategory::DegenerateDesign);
        assert_eq!(
            err.to_string(),
            "Degenerate design: covariate 'condition' has 1 observed level(s), at least 2 are required"
        );

        let err = DeError::NumericalInstability {
            operation: "IRLS".to_string(),
            details: "singular information matrix".to_string(),
        };
        assert_eq!(err.category(), ErrorCategory::Numeric);
        assert_eq!(err.to_string(), "Numerical instability in IRLS: singular information matrix");

        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        assert_eq!(DeError::from(io).category(), ErrorCategory::Io);
    }
}
