//! Command-line interface for rnaseq-de

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::config::{PipelineConfig, ShrinkagePrior, TransformMode};
use crate::dispersion::TrendFitMethod;
use crate::error::{DeError, Result};
use crate::glm::Contrast;
use crate::normalization::SizeFactorMethod;

#[derive(Parser, Debug)]
#[command(name = "rnaseq-de")]
#[command(version)]
#[command(about = "RNA-Seq differential expression workflow")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the full workflow
    #[command(
        long_about = "Run the full workflow\n\n\
            Filters low-count genes, normalizes, fits the negative binomial model,\n\
            tests one contrast, shrinks fold changes, transforms the counts for\n\
            exploration and writes every table to the output directory.",
        after_long_help = "\
Examples:
  # Default design ~ condition, last level vs reference
  rnaseq-de run -c counts.tsv -m samples.csv -o out/

  # Batch-corrected, explicit contrast, adaptive t prior
  rnaseq-de run -c counts.tsv -m samples.csv -d batch -d treatment \\
    --numerator drug --denominator placebo --shrinkage adaptive-t

  # Settings from a JSON file, flags override it
  rnaseq-de run -c counts.tsv -m samples.csv --config run.json --top-n 50"
    )]
    Run(RunArgs),

    /// Write size-factor normalized counts
    #[command(after_long_help = "\
Examples:
  rnaseq-de normalize -c counts.tsv -o normalized.tsv
  rnaseq-de normalize -c counts.tsv -o normalized.tsv --method pos-counts")]
    Normalize {
        /// Tab-delimited count matrix
        #[arg(short, long)]
        counts: PathBuf,

        #[arg(short, long, default_value = "normalized_counts.tsv")]
        output: PathBuf,

        #[arg(long, value_enum, default_value_t = SizeFactorMethod::Ratio)]
        method: SizeFactorMethod,
    },

    /// Transform counts for exploration (log2, VST or rlog)
    #[command(
        long_about = "Transform counts for exploration\n\n\
            The output suits clustering and PCA. It is never used for testing.\n\
            By default dispersions are re-estimated blind to the design; with\n\
            --design-aware the dispersion trend of the fitted model is reused.",
        after_long_help = "\
Examples:
  rnaseq-de transform -c counts.tsv -m samples.csv --mode vst -o vst.tsv
  rnaseq-de transform -c counts.tsv -m samples.csv --mode rlog --design-aware"
    )]
    Transform {
        #[arg(short, long)]
        counts: PathBuf,

        /// Comma-delimited sample metadata
        #[arg(short, long)]
        metadata: PathBuf,

        /// Design factors for a design-aware transform
        #[arg(short, long, default_value = "condition")]
        design: Vec<String>,

        #[arg(long, value_enum, default_value_t = TransformMode::Vst)]
        mode: TransformMode,

        /// Reuse the model's dispersion trend instead of a blind estimate
        #[arg(long)]
        design_aware: bool,

        #[arg(long, value_enum, default_value_t = TrendFitMethod::Parametric)]
        fit_type: TrendFitMethod,

        #[arg(short, long, default_value = "transformed.tsv")]
        output: PathBuf,
    },

    /// Drop genes with total count below a threshold
    Filter {
        #[arg(short, long)]
        counts: PathBuf,

        /// Minimum total count across samples
        #[arg(long, default_value = "10")]
        min_total_count: f64,

        /// Filtered count matrix
        #[arg(short, long, default_value = "filtered_counts.tsv")]
        output: PathBuf,
    },

    /// Join a result table with gene annotation
    #[command(after_long_help = "\
Examples:
  rnaseq-de annotate -r out/significant.tsv --mapping go_export.tsv --cache annot_cache.tsv
  rnaseq-de annotate -r out/results.tsv --cache annot_cache.tsv --classifier receptors.tsv")]
    Annotate {
        /// Result table written by `run`
        #[arg(short, long)]
        results: PathBuf,

        /// Tab-delimited gene_id/symbol/term export
        #[arg(long)]
        mapping: Option<PathBuf>,

        /// Local annotation cache, created when missing
        #[arg(long)]
        cache: Option<PathBuf>,

        /// Gene-list file of (gene_id, class) pairs; repeatable
        #[arg(long)]
        classifier: Vec<PathBuf>,

        #[arg(short, long, default_value = "annotated.tsv")]
        output: PathBuf,
    },
}

/// Arguments of `run`; every set flag overrides the configuration file
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Tab-delimited count matrix (genes x samples)
    #[arg(short, long)]
    pub counts: PathBuf,

    /// Comma-delimited sample metadata (samples x covariates)
    #[arg(short, long)]
    pub metadata: PathBuf,

    /// JSON configuration file
    #[arg(long)]
    pub config: Option<PathBuf>,

    #[arg(short, long, default_value = "rnaseq_de_out")]
    pub output: PathBuf,

    /// Design factor, repeatable; the last one is tested by default
    #[arg(short, long)]
    pub design: Vec<String>,

    /// Reference level as FACTOR=LEVEL, repeatable
    #[arg(long, value_name = "FACTOR=LEVEL")]
    pub reference: Vec<String>,

    /// Add the interaction of the last two design factors
    #[arg(long)]
    pub interaction: bool,

    /// Numerator level of the contrast on the last design factor
    #[arg(long, requires = "denominator")]
    pub numerator: Option<String>,

    #[arg(long, requires = "numerator")]
    pub denominator: Option<String>,

    /// Reorder count columns to metadata order instead of failing
    #[arg(long)]
    pub reorder_samples: bool,

    #[arg(long)]
    pub min_total_count: Option<f64>,

    #[arg(long, value_enum)]
    pub size_factors: Option<SizeFactorMethod>,

    #[arg(long, value_enum)]
    pub fit_type: Option<TrendFitMethod>,

    /// FDR target of independent filtering
    #[arg(long)]
    pub alpha: Option<f64>,

    /// Use t-distribution p-values
    #[arg(long)]
    pub use_t: bool,

    #[arg(long, value_enum)]
    pub transform: Option<TransformMode>,

    /// Reuse the model's dispersion trend for the transform
    #[arg(long)]
    pub design_aware: bool,

    #[arg(long, value_enum, conflicts_with = "no_shrinkage")]
    pub shrinkage: Option<ShrinkagePrior>,

    #[arg(long)]
    pub no_shrinkage: bool,

    #[arg(long)]
    pub padj_cutoff: Option<f64>,

    #[arg(long)]
    pub lfc_cutoff: Option<f64>,

    /// Keep only the N best-ranked significant genes
    #[arg(long)]
    pub top_n: Option<usize>,

    #[arg(long)]
    pub annotation_mapping: Option<PathBuf>,

    #[arg(long)]
    pub annotation_cache: Option<PathBuf>,

    #[arg(long)]
    pub classifier: Vec<PathBuf>,

    /// Number of threads (0 = all cores)
    #[arg(short = 't', long, default_value = "0")]
    pub threads: usize,
}

impl RunArgs {
    /// Configuration file (or defaults) with command-line overrides applied
    pub fn load_config(&self) -> Result<PipelineConfig> {
        let mut config = match &self.config {
            Some(path) => PipelineConfig::from_json_file(path)?,
            None => PipelineConfig::default(),
        };
        self.apply(&mut config)?;
        config.validate()?;
        Ok(config)
    }

    pub fn apply(&self, config: &mut PipelineConfig) -> Result<()> {
        if !self.design.is_empty() {
            config.model.design = self.design.clone();
        }
        for entry in &self.reference {
            let (factor, level) = entry.split_once('=').ok_or_else(|| DeError::InvalidConfig {
                reason: format!("--reference expects FACTOR=LEVEL, got '{}'", entry),
            })?;
            config
                .model
                .reference_levels
                .insert(factor.trim().to_string(), level.trim().to_string());
        }
        if self.interaction {
            config.model.interaction = true;
        }
        if let (Some(num), Some(den)) = (&self.numerator, &self.denominator) {
            let factor = config.model.design.last().ok_or_else(|| DeError::InvalidConfig {
                reason: "a contrast needs at least one design factor".to_string(),
            })?;
            config.model.contrast = Some(Contrast::new(factor, num, den));
        }
        if let Some(v) = self.min_total_count {
            config.filter.min_total_count = v;
        }
        if let Some(m) = self.size_factors {
            config.normalization.size_factor_method = m;
        }
        if let Some(f) = self.fit_type {
            config.model.fit_type = f;
        }
        if let Some(a) = self.alpha {
            config.model.alpha = a;
        }
        if self.use_t {
            config.model.use_t = true;
        }
        if let Some(mode) = self.transform {
            config.transform.mode = mode;
        }
        if self.design_aware {
            config.transform.blind = false;
        }
        if self.no_shrinkage {
            config.shrinkage.prior = None;
        } else if let Some(prior) = self.shrinkage {
            config.shrinkage.prior = Some(prior);
        }
        if let Some(v) = self.padj_cutoff {
            config.report.padj_cutoff = v;
        }
        if let Some(v) = self.lfc_cutoff {
            config.report.lfc_cutoff = v;
        }
        if self.top_n.is_some() {
            config.report.top_n = self.top_n;
        }
        if self.annotation_mapping.is_some() {
            config.annotation.mapping = self.annotation_mapping.clone();
        }
        if self.annotation_cache.is_some() {
            config.annotation.cache = self.annotation_cache.clone();
        }
        config.annotation.classifiers.extend(self.classifier.iter().cloned());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_args(extra: &[&str]) -> RunArgs {
        let mut argv = vec!["rnaseq-de", "run", "-c", "counts.tsv", "-m", "samples.csv"];
        argv.extend_from_slice(extra);
        match Cli::try_parse_from(argv).unwrap().command {
            Commands::Run(args) => args,
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_run_defaults_leave_config_untouched() {
        let args = run_args(&[]);
        let mut config = PipelineConfig::default();
        args.apply(&mut config).unwrap();
        assert_eq!(config, PipelineConfig::default());
        assert_eq!(args.output, PathBuf::from("rnaseq_de_out"));
    }

    #[test]
    fn test_run_overrides() {
        let args = run_args(&[
            "-d",
            "batch",
            "-d",
            "treatment",
            "--reference",
            "treatment=placebo",
            "--numerator",
            "drug",
            "--denominator",
            "placebo",
            "--shrinkage",
            "adaptive-t",
            "--transform",
            "rlog",
            "--design-aware",
            "--top-n",
            "25",
        ]);
        let mut config = PipelineConfig::default();
        args.apply(&mut config).unwrap();

        assert_eq!(config.model.design, vec!["batch", "treatment"]);
        assert_eq!(config.model.reference_levels["treatment"], "placebo");
        assert_eq!(config.model.contrast, Some(Contrast::new("treatment", "drug", "placebo")));
        assert_eq!(config.shrinkage.prior, Some(ShrinkagePrior::AdaptiveT));
        assert_eq!(config.transform.mode, TransformMode::Rlog);
        assert!(!config.transform.blind);
        assert_eq!(config.report.top_n, Some(25));
    }

    #[test]
    fn test_bad_reference_rejected() {
        let args = run_args(&["--reference", "treatment"]);
        let mut config = PipelineConfig::default();
        assert!(args.apply(&mut config).is_err());
    }

    #[test]
    fn test_numerator_requires_denominator() {
        let argv = ["rnaseq-de", "run", "-c", "c.tsv", "-m", "m.csv", "--numerator", "b"];
        assert!(Cli::try_parse_from(argv).is_err());
    }

    #[test]
    fn test_no_shrinkage_clears_prior() {
        let args = run_args(&["--no-shrinkage"]);
        let mut config = PipelineConfig::default();
        args.apply(&mut config).unwrap();
        assert_eq!(config.shrinkage.prior, None);
    }
}
