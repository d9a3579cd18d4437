//! End-to-end workflow: filter, model, test, transform, shrink, report, annotate

use std::path::Path;

use crate::annotation::{
    left_join, AnnotatedTable, AnnotationSource, AnnotationTable, CachedAnnotationSource, FileAnnotationSource,
    GeneClasses,
};
use crate::config::{AnnotationConfig, PipelineConfig};
use crate::data::{CountMatrix, Experiment, SampleMetadata};
use crate::error::Result;
use crate::filter::{filter_low_counts, FilterOutcome};
use crate::glm::{fit_model, Contrast, ModelFit};
use crate::io::{
    read_gene_classes, write_annotated, write_json, write_normalized_counts, write_results, write_shrunken_results,
    write_transformed,
};
use crate::report::{rank_by_padj, significant, summarize, top_n, ResultSummary};
use crate::shrinkage::{shrink_lfc, ShrunkenResults};
use crate::testing::{results, ResultTable};
use crate::transform::{transform_counts, TransformedMatrix};

/// Everything one run produces
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub filter: FilterOutcome,
    pub model: ModelFit,
    pub contrast: Contrast,
    /// Unshrunk results, one row per modeled gene
    pub results: ResultTable,
    pub shrunken: Option<ShrunkenResults>,
    pub transformed: TransformedMatrix,
    /// Significant genes ranked by padj, cut to `top_n` when configured
    pub significant: ResultTable,
    /// Annotation of the significant genes
    pub annotated: AnnotatedTable,
    pub summary: ResultSummary,
}

/// Run the whole workflow on aligned inputs
///
/// Count columns must already be in metadata order; reorder with
/// [`crate::data::reorder_to_metadata`] first when they are not.
pub fn run_pipeline(counts: CountMatrix, metadata: SampleMetadata, config: &PipelineConfig) -> Result<PipelineOutput> {
    config.validate()?;
    let experiment = Experiment::new(counts, metadata)?;

    let filter = filter_low_counts(experiment.counts(), config.filter.min_total_count);
    let experiment = experiment.with_counts(filter.counts.clone())?;

    let fit_options = config.model.fit_options(config.normalization.size_factor_method);
    let model = fit_model(&experiment, &config.model.design_spec(), &fit_options)?;

    let contrast = match &config.model.contrast {
        Some(c) => c.clone(),
        None => model.design.default_contrast()?,
    };
    let table = results(&model, &contrast, &config.model.test_options())?;

    let transformed = transform_counts(
        &experiment,
        Some(&model),
        config.transform.mode,
        config.transform.blind,
        &fit_options,
    )?;

    let shrunken = match config.shrinkage.prior {
        Some(prior) => Some(shrink_lfc(&model, &table, &contrast, prior)?),
        None => None,
    };

    // Significance calls come from the unshrunk estimates so shrinkage
    // cannot change the set.
    let report = &config.report;
    let called = significant(&table, report.padj_cutoff, report.lfc_cutoff);
    let called = match report.top_n {
        Some(n) => top_n(&called, n),
        None => rank_by_padj(&called),
    };
    log::info!(
        "{} genes with padj < {} and |log2FC| >= {}",
        called.len(),
        report.padj_cutoff,
        report.lfc_cutoff
    );

    let annotated = annotate(&called, &config.annotation)?;
    let summary = summarize(&table, report.padj_cutoff, report.lfc_cutoff);

    Ok(PipelineOutput {
        filter,
        model,
        contrast,
        results: table,
        shrunken,
        transformed,
        significant: called,
        annotated,
        summary,
    })
}

fn lookup_annotation(ids: &[String], config: &AnnotationConfig) -> Result<AnnotationTable> {
    match (&config.mapping, &config.cache) {
        (Some(mapping), Some(cache)) => {
            CachedAnnotationSource::new(cache, Some(FileAnnotationSource::new(mapping))).lookup(ids)
        }
        (None, Some(cache)) => CachedAnnotationSource::<FileAnnotationSource>::new(cache, None).lookup(ids),
        (Some(mapping), None) => FileAnnotationSource::new(mapping).lookup(ids),
        (None, None) => Ok(AnnotationTable::default()),
    }
}

/// Join `table` with the configured annotation source and classifier lists
pub fn annotate(table: &ResultTable, config: &AnnotationConfig) -> Result<AnnotatedTable> {
    let ids: Vec<String> = table.rows.iter().map(|r| r.gene_id.clone()).collect();
    let annotation = lookup_annotation(&ids, config)?;
    let joined = left_join(table, &annotation);
    if config.classifiers.is_empty() {
        return Ok(joined);
    }

    let mut classes = GeneClasses::default();
    for path in &config.classifiers {
        let list = read_gene_classes(path)?;
        classes.merge(list);
    }
    Ok(joined.with_classes(&classes))
}

impl PipelineOutput {
    /// Write every table of the run into `dir`, creating it when missing
    pub fn write_to<P: AsRef<Path>>(&self, dir: P) -> Result<()> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;

        write_normalized_counts(dir.join("normalized_counts.tsv"), &self.model.normalized)?;
        write_transformed(dir.join("transformed.tsv"), &self.transformed)?;
        write_results(dir.join("results.tsv"), &rank_by_padj(&self.results))?;
        if let Some(shrunk) = &self.shrunken {
            write_shrunken_results(dir.join("results_shrunken.tsv"), shrunk)?;
        }
        write_results(dir.join("significant.tsv"), &self.significant)?;
        write_annotated(dir.join("significant_annotated.tsv"), &self.annotated)?;
        if !self.filter.dropped.is_empty() {
            std::fs::write(dir.join("filtered_genes.txt"), self.filter.dropped.join("\n") + "\n")?;
        }
        write_json(dir.join("summary.json"), &self.summary)?;

        log::info!("Wrote results to {}", dir.display());
        Ok(())
    }
}
