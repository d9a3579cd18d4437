//! Pipeline configuration
//!
//! Every option with a small fixed set of values is a closed enum. The whole
//! configuration can be read from JSON, and any field left out takes its
//! default.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::dispersion::{DispersionParams, TrendFitMethod};
use crate::error::{DeError, Result};
use crate::glm::{Contrast, DesignSpec, FitOptions, GlmFitParams};
use crate::normalization::SizeFactorMethod;
pub use crate::shrinkage::ShrinkagePrior;
use crate::testing::{PAdjustMethod, TestOptions};
pub use crate::transform::TransformMode;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Genes with total count below this value are dropped
    pub min_total_count: f64,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            min_total_count: 10.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizationConfig {
    pub size_factor_method: SizeFactorMethod,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Factors in formula order; the last one is reported by default
    pub design: Vec<String>,
    /// Add the interaction of the last two factors
    pub interaction: bool,
    /// Reference level per factor (alphabetically first when absent)
    pub reference_levels: HashMap<String, String>,
    /// Explicit contrast; defaults to last level vs reference of the last factor
    pub contrast: Option<Contrast>,
    pub fit_type: TrendFitMethod,
    /// Use a t distribution with residual degrees of freedom for Wald p-values
    pub use_t: bool,
    /// Test |log2FC| > threshold instead of log2FC != 0
    pub lfc_threshold: f64,
    /// FDR target for independent filtering
    pub alpha: f64,
    pub p_adjust: PAdjustMethod,
    pub cooks_filter: bool,
    pub cooks_cutoff: Option<f64>,
    pub independent_filtering: bool,
    pub max_iterations: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            design: vec!["condition".to_string()],
            interaction: false,
            reference_levels: HashMap::new(),
            contrast: None,
            fit_type: TrendFitMethod::Parametric,
            use_t: false,
            lfc_threshold: 0.0,
            alpha: 0.1,
            p_adjust: PAdjustMethod::BenjaminiHochberg,
            cooks_filter: true,
            cooks_cutoff: None,
            independent_filtering: true,
            max_iterations: 100,
        }
    }
}

impl ModelConfig {
    pub fn design_spec(&self) -> DesignSpec {
        DesignSpec {
            factors: self.design.clone(),
            interaction: self.interaction,
            reference_levels: self.reference_levels.clone(),
        }
    }

    pub fn fit_options(&self, size_factor_method: SizeFactorMethod) -> FitOptions {
        FitOptions {
            size_factor_method,
            fit_type: self.fit_type,
            dispersion: DispersionParams {
                maxit: self.max_iterations,
                ..Default::default()
            },
            glm: GlmFitParams {
                maxit: self.max_iterations,
                ..Default::default()
            },
        }
    }

    pub fn test_options(&self) -> TestOptions {
        TestOptions {
            use_t: self.use_t,
            lfc_threshold: self.lfc_threshold,
            alpha: self.alpha,
            p_adjust: self.p_adjust,
            cooks_filter: self.cooks_filter,
            cooks_cutoff: self.cooks_cutoff,
            independent_filtering: self.independent_filtering,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransformConfig {
    pub mode: TransformMode,
    /// Re-estimate dispersion ignoring the design (exploratory mode)
    pub blind: bool,
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            mode: TransformMode::Vst,
            blind: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShrinkageConfig {
    /// No shrinkage when absent
    pub prior: Option<ShrinkagePrior>,
}

impl Default for ShrinkageConfig {
    fn default() -> Self {
        Self {
            prior: Some(ShrinkagePrior::Normal),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    pub padj_cutoff: f64,
    pub lfc_cutoff: f64,
    pub top_n: Option<usize>,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            padj_cutoff: 0.05,
            lfc_cutoff: 1.0,
            top_n: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AnnotationConfig {
    /// Tab-delimited gene_id/symbol/term export of the annotation service
    pub mapping: Option<PathBuf>,
    /// Local cache file consulted before the mapping
    pub cache: Option<PathBuf>,
    /// Gene-list files of (gene_id, class) pairs
    pub classifiers: Vec<PathBuf>,
}

/// Full configuration of one workflow run
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub filter: FilterConfig,
    pub normalization: NormalizationConfig,
    pub model: ModelConfig,
    pub transform: TransformConfig,
    pub shrinkage: ShrinkageConfig,
    pub report: ReportConfig,
    pub annotation: AnnotationConfig,
}

fn invalid(reason: impl Into<String>) -> DeError {
    DeError::InvalidConfig {
        reason: reason.into(),
    }
}

impl PipelineConfig {
    /// Load and validate a JSON configuration file
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = std::fs::File::open(path.as_ref())?;
        let config: PipelineConfig = serde_json::from_reader(std::io::BufReader::new(file))?;
        config.validate()?;
        log::info!("Loaded configuration from {}", path.as_ref().display());
        Ok(config)
    }

    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Range checks run before any computation
    pub fn validate(&self) -> Result<()> {
        if !(self.filter.min_total_count >= 0.0) {
            return Err(invalid("filter.min_total_count must be >= 0"));
        }
        let m = &self.model;
        if m.design.is_empty() {
            return Err(invalid("model.design must name at least one factor"));
        }
        if m.interaction && m.design.len() < 2 {
            return Err(invalid("model.interaction needs at least two design factors"));
        }
        if !(m.alpha > 0.0 && m.alpha < 1.0) {
            return Err(invalid("model.alpha must be in (0, 1)"));
        }
        if !(m.lfc_threshold >= 0.0) {
            return Err(invalid("model.lfc_threshold must be >= 0"));
        }
        if m.max_iterations == 0 {
            return Err(invalid("model.max_iterations must be positive"));
        }
        if let Some(c) = m.cooks_cutoff {
            if !(c > 0.0) {
                return Err(invalid("model.cooks_cutoff must be positive"));
            }
        }
        if let Some(c) = &m.contrast {
            if c.numerator == c.denominator {
                return Err(invalid("contrast numerator and denominator must differ"));
            }
        }
        let r = &self.report;
        if !(r.padj_cutoff > 0.0 && r.padj_cutoff <= 1.0) {
            return Err(invalid("report.padj_cutoff must be in (0, 1]"));
        }
        if !(r.lfc_cutoff >= 0.0) {
            return Err(invalid("report.lfc_cutoff must be >= 0"));
        }
        Ok(())
    }
}
