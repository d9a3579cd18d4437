//! Count matrix, metadata and annotation readers

use std::fs::OpenOptions;
use std::path::Path;

use csv::{ReaderBuilder, StringRecord, Trim, WriterBuilder};
use ndarray::Array2;

use crate::annotation::{AnnotationRecord, AnnotationTable, GeneClasses};
use crate::data::{CountMatrix, SampleMetadata};
use crate::error::{DeError, Result};
use crate::testing::{GeneResult, ResultTable, TestStatus};

/// Strip surrounding single quotes left after CSV unquoting
fn strip_quotes(s: &str) -> String {
    let s = s.trim();
    if s.len() >= 2 && ((s.starts_with('"') && s.ends_with('"')) || (s.starts_with('\'') && s.ends_with('\''))) {
        s[1..s.len() - 1].to_string()
    } else {
        s.to_string()
    }
}

fn reader(path: &Path, delimiter: u8) -> Result<csv::Reader<std::fs::File>> {
    Ok(ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .flexible(true)
        .trim(Trim::All)
        .from_path(path)?)
}

fn optional(field: Option<&str>) -> Option<String> {
    field.map(strip_quotes).filter(|s| !s.is_empty() && s != "NA")
}

/// Read a tab-delimited count matrix
///
/// The header holds the sample ids after a label for the gene id column;
/// every following line is one gene.
pub fn read_count_matrix<P: AsRef<Path>>(path: P) -> Result<CountMatrix> {
    let mut rdr = reader(path.as_ref(), b'\t')?;
    let header = rdr.headers()?.clone();
    if header.len() < 2 {
        return Err(DeError::InvalidCountMatrix {
            reason: "header needs a gene id column and at least one sample".to_string(),
        });
    }
    let sample_ids: Vec<String> = header.iter().skip(1).map(strip_quotes).collect();
    let n_samples = sample_ids.len();

    let mut gene_ids = Vec::new();
    let mut values = Vec::new();
    let mut record = StringRecord::new();
    let mut line = 1;
    while rdr.read_record(&mut record)? {
        line += 1;
        if record.iter().all(|f| f.is_empty()) {
            continue;
        }
        if record.len() != n_samples + 1 {
            return Err(DeError::InvalidCountMatrix {
                reason: format!("line {} has {} columns, expected {}", line, record.len(), n_samples + 1),
            });
        }
        gene_ids.push(strip_quotes(&record[0]));
        for field in record.iter().skip(1) {
            let v = strip_quotes(field);
            values.push(v.parse::<f64>().map_err(|_| DeError::InvalidCountMatrix {
                reason: format!("line {}: invalid count '{}'", line, v),
            })?);
        }
    }

    if gene_ids.is_empty() {
        return Err(DeError::EmptyData {
            reason: "no genes found in count matrix".to_string(),
        });
    }
    let counts = Array2::from_shape_vec((gene_ids.len(), n_samples), values).map_err(|e| {
        DeError::InvalidCountMatrix {
            reason: e.to_string(),
        }
    })?;
    let matrix = CountMatrix::new(counts, gene_ids, sample_ids)?;
    log::info!(
        "Read {} genes x {} samples from {}",
        matrix.n_genes(),
        matrix.n_samples(),
        path.as_ref().display()
    );
    Ok(matrix)
}

/// Read comma-delimited sample metadata: sample ids first, one covariate per column
pub fn read_metadata<P: AsRef<Path>>(path: P) -> Result<SampleMetadata> {
    let mut rdr = reader(path.as_ref(), b',')?;
    let header = rdr.headers()?.clone();
    let names: Vec<String> = header.iter().skip(1).map(strip_quotes).collect();

    let mut sample_ids = Vec::new();
    let mut columns: Vec<Vec<String>> = vec![Vec::new(); names.len()];
    let mut record = StringRecord::new();
    let mut line = 1;
    while rdr.read_record(&mut record)? {
        line += 1;
        if record.iter().all(|f| f.is_empty()) {
            continue;
        }
        if record.len() != names.len() + 1 {
            return Err(DeError::InvalidMetadata {
                reason: format!("line {} has {} columns, expected {}", line, record.len(), names.len() + 1),
            });
        }
        sample_ids.push(strip_quotes(&record[0]));
        for (column, field) in columns.iter_mut().zip(record.iter().skip(1)) {
            column.push(strip_quotes(field));
        }
    }

    if sample_ids.is_empty() {
        return Err(DeError::EmptyData {
            reason: "no samples found in metadata".to_string(),
        });
    }
    let mut metadata = SampleMetadata::new(sample_ids)?;
    for (name, values) in names.iter().zip(columns) {
        metadata.add_condition(name, values)?;
    }
    log::info!(
        "Read metadata of {} samples with covariates [{}] from {}",
        metadata.n_samples(),
        names.join(", "),
        path.as_ref().display()
    );
    Ok(metadata)
}

/// Read a tab-delimited `gene_id, symbol, term` table; empty or NA fields are null
pub fn read_annotation_table<P: AsRef<Path>>(path: P) -> Result<AnnotationTable> {
    let mut rdr = reader(path.as_ref(), b'\t')?;
    let mut records = Vec::new();
    for row in rdr.records() {
        let row = row?;
        let gene_id = match row.get(0).map(strip_quotes) {
            Some(id) if !id.is_empty() => id,
            _ => continue,
        };
        records.push(AnnotationRecord {
            gene_id,
            symbol: optional(row.get(1)),
            term: optional(row.get(2)),
        });
    }
    Ok(AnnotationTable::new(records))
}

/// Append records to an annotation TSV, writing the header if the file is new
pub fn append_annotation_records<P: AsRef<Path>>(path: P, records: &[AnnotationRecord]) -> Result<()> {
    let path = path.as_ref();
    let is_new = !path.exists() || std::fs::metadata(path)?.len() == 0;
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    let mut wtr = WriterBuilder::new().delimiter(b'\t').from_writer(file);
    if is_new {
        wtr.write_record(["gene_id", "symbol", "term"])?;
    }
    for r in records {
        wtr.write_record([
            r.gene_id.as_str(),
            r.symbol.as_deref().unwrap_or(""),
            r.term.as_deref().unwrap_or(""),
        ])?;
    }
    wtr.flush()?;
    Ok(())
}

/// Read a classifier gene list of tab-delimited (gene_id, class) pairs with a header
pub fn read_gene_classes<P: AsRef<Path>>(path: P) -> Result<GeneClasses> {
    let mut rdr = reader(path.as_ref(), b'\t')?;
    let mut pairs = Vec::new();
    for row in rdr.records() {
        let row = row?;
        if let (Some(gene), Some(class)) = (optional(row.get(0)), optional(row.get(1))) {
            pairs.push((gene, class));
        }
    }
    log::info!("Read {} classified genes from {}", pairs.len(), path.as_ref().display());
    Ok(GeneClasses::from_pairs(pairs))
}

fn parse_value(field: Option<&str>, line: usize, column: &str) -> Result<Option<f64>> {
    match optional(field) {
        None => Ok(None),
        Some(v) => v.parse::<f64>().map(Some).map_err(|_| DeError::InvalidConfig {
            reason: format!("results line {}: invalid {} '{}'", line, column, v),
        }),
    }
}

/// Read a result table written by [`crate::io::write_results`]
///
/// Extra trailing columns (lfsr, annotation) are ignored.
pub fn read_results<P: AsRef<Path>>(path: P) -> Result<ResultTable> {
    let mut rdr = reader(path.as_ref(), b'\t')?;
    let mut rows = Vec::new();
    let mut contrast = String::new();
    let mut record = StringRecord::new();
    let mut line = 1;
    while rdr.read_record(&mut record)? {
        line += 1;
        if record.iter().all(|f| f.is_empty()) {
            continue;
        }
        let gene_id = match optional(record.get(0)) {
            Some(id) => id,
            None => continue,
        };
        let status = record
            .get(7)
            .and_then(TestStatus::parse)
            .ok_or_else(|| DeError::InvalidConfig {
                reason: format!("results line {}: unknown status", line),
            })?;
        if let Some(c) = optional(record.get(8)) {
            contrast = c;
        }
        rows.push(GeneResult {
            gene_id,
            base_mean: parse_value(record.get(1), line, "baseMean")?.unwrap_or(f64::NAN),
            log2_fold_change: parse_value(record.get(2), line, "log2FoldChange")?.unwrap_or(f64::NAN),
            lfc_se: parse_value(record.get(3), line, "lfcSE")?.unwrap_or(f64::NAN),
            stat: parse_value(record.get(4), line, "stat")?,
            pvalue: parse_value(record.get(5), line, "pvalue")?,
            padj: parse_value(record.get(6), line, "padj")?,
            status,
        });
    }
    log::info!("Read {} result rows from {}", rows.len(), path.as_ref().display());
    Ok(ResultTable { contrast, rows })
}
