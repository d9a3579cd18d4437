//! Tab-delimited and JSON writers; undefined values are written as NA

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use csv::WriterBuilder;
use ndarray::ArrayView2;
use serde::Serialize;

use crate::annotation::AnnotatedTable;
use crate::data::CountMatrix;
use crate::error::Result;
use crate::normalization::NormalizedCounts;
use crate::shrinkage::ShrunkenResults;
use crate::testing::{GeneResult, ResultTable};
use crate::transform::TransformedMatrix;

const NA: &str = "NA";

fn fmt_value(v: f64) -> String {
    if v.is_nan() {
        NA.to_string()
    } else {
        format!("{:.6}", v)
    }
}

fn fmt_pvalue(v: Option<f64>) -> String {
    match v {
        Some(p) if !p.is_nan() => format!("{:.6e}", p),
        _ => NA.to_string(),
    }
}

fn tsv_writer(path: &Path) -> Result<csv::Writer<File>> {
    Ok(WriterBuilder::new().delimiter(b'\t').from_path(path)?)
}

fn write_matrix(
    path: &Path,
    gene_ids: &[String],
    sample_ids: &[String],
    values: ArrayView2<f64>,
    format: fn(f64) -> String,
) -> Result<()> {
    let mut wtr = tsv_writer(path)?;
    let mut header = vec!["gene_id".to_string()];
    header.extend(sample_ids.iter().cloned());
    wtr.write_record(&header)?;
    for (id, row) in gene_ids.iter().zip(values.outer_iter()) {
        let mut record = vec![id.clone()];
        record.extend(row.iter().map(|&v| format(v)));
        wtr.write_record(&record)?;
    }
    wtr.flush()?;
    Ok(())
}

/// Raw counts in the layout [`crate::io::read_count_matrix`] reads
pub fn write_count_matrix<P: AsRef<Path>>(path: P, counts: &CountMatrix) -> Result<()> {
    write_matrix(
        path.as_ref(),
        counts.gene_ids(),
        counts.sample_ids(),
        counts.counts(),
        |v| format!("{}", v),
    )
}

pub fn write_normalized_counts<P: AsRef<Path>>(path: P, normalized: &NormalizedCounts) -> Result<()> {
    write_matrix(
        path.as_ref(),
        &normalized.gene_ids,
        &normalized.sample_ids,
        normalized.values.view(),
        fmt_value,
    )
}

pub fn write_transformed<P: AsRef<Path>>(path: P, transformed: &TransformedMatrix) -> Result<()> {
    write_matrix(
        path.as_ref(),
        &transformed.gene_ids,
        &transformed.sample_ids,
        transformed.values.view(),
        fmt_value,
    )
}

const RESULT_COLUMNS: [&str; 9] = [
    "gene_id",
    "baseMean",
    "log2FoldChange",
    "lfcSE",
    "stat",
    "pvalue",
    "padj",
    "status",
    "contrast",
];

fn result_fields(row: &GeneResult, contrast: &str) -> Vec<String> {
    vec![
        row.gene_id.clone(),
        fmt_value(row.base_mean),
        fmt_value(row.log2_fold_change),
        fmt_value(row.lfc_se),
        row.stat.map(fmt_value).unwrap_or_else(|| NA.to_string()),
        fmt_pvalue(row.pvalue),
        fmt_pvalue(row.padj),
        row.status.as_str().to_string(),
        contrast.to_string(),
    ]
}

pub fn write_results<P: AsRef<Path>>(path: P, table: &ResultTable) -> Result<()> {
    let mut wtr = tsv_writer(path.as_ref())?;
    wtr.write_record(RESULT_COLUMNS)?;
    for row in &table.rows {
        wtr.write_record(result_fields(row, &table.contrast))?;
    }
    wtr.flush()?;
    log::info!("Wrote {} result rows to {}", table.len(), path.as_ref().display());
    Ok(())
}

/// Result columns plus the local false sign rate
pub fn write_shrunken_results<P: AsRef<Path>>(path: P, shrunk: &ShrunkenResults) -> Result<()> {
    let mut wtr = tsv_writer(path.as_ref())?;
    let mut header: Vec<&str> = RESULT_COLUMNS.to_vec();
    header.push("lfsr");
    wtr.write_record(&header)?;
    for (row, lfsr) in shrunk.table.rows.iter().zip(&shrunk.lfsr) {
        let mut fields = result_fields(row, &shrunk.table.contrast);
        fields.push(fmt_pvalue(*lfsr));
        wtr.write_record(&fields)?;
    }
    wtr.flush()?;
    Ok(())
}

pub fn write_annotated<P: AsRef<Path>>(path: P, table: &AnnotatedTable) -> Result<()> {
    let mut wtr = tsv_writer(path.as_ref())?;
    let mut header: Vec<&str> = RESULT_COLUMNS.to_vec();
    header.extend(["symbol", "term", "class"]);
    wtr.write_record(&header)?;
    for row in &table.rows {
        let mut fields = result_fields(&row.result, &table.contrast);
        for extra in [&row.symbol, &row.term, &row.class] {
            fields.push(extra.clone().unwrap_or_else(|| NA.to_string()));
        }
        wtr.write_record(&fields)?;
    }
    wtr.flush()?;
    Ok(())
}

/// Pretty-printed JSON of any serializable output
pub fn write_json<P: AsRef<Path>, T: Serialize>(path: P, value: &T) -> Result<()> {
    let file = File::create(path.as_ref())?;
    serde_json::to_writer_pretty(BufWriter::new(file), value)?;
    Ok(())
}
