//! Count matrix representation for RNA-seq data

use std::collections::HashSet;

use ndarray::{Array2, ArrayView1, ArrayView2, Axis};

use crate::error::{DeError, Result};

/// Reject duplicated labels, naming the first offender
fn ensure_unique(ids: &[String], what: &str) -> Result<()> {
    let mut seen = HashSet::with_capacity(ids.len());
    for id in ids {
        if !seen.insert(id.as_str()) {
            return Err(DeError::InvalidCountMatrix {
                reason: format!("duplicate {} identifier '{}'", what, id),
            });
        }
    }
    Ok(())
}

/// A count matrix of RNA-seq read counts
/// Rows are genes, columns are samples. Never mutated after construction;
/// every filtering or reordering step yields a new matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct CountMatrix {
    /// Raw count data (genes x samples)
    counts: Array2<f64>,
    /// Gene identifiers
    gene_ids: Vec<String>,
    /// Sample identifiers
    sample_ids: Vec<String>,
}

impl CountMatrix {
    /// Create a new count matrix from raw data, validating its schema
    pub fn new(counts: Array2<f64>, gene_ids: Vec<String>, sample_ids: Vec<String>) -> Result<Self> {
        let (n_genes, n_samples) = counts.dim();

        if gene_ids.len() != n_genes {
            return Err(DeError::InvalidCountMatrix {
                reason: format!("{} rows but {} gene identifiers", n_genes, gene_ids.len()),
            });
        }
        if sample_ids.len() != n_samples {
            return Err(DeError::InvalidCountMatrix {
                reason: format!("{} columns but {} sample identifiers", n_samples, sample_ids.len()),
            });
        }
        if n_samples == 0 {
            return Err(DeError::EmptyData {
                reason: "count matrix has no samples".to_string(),
            });
        }

        if counts.iter().any(|&x| x < 0.0 || !x.is_finite()) {
            return Err(DeError::InvalidCountMatrix {
                reason: "counts must be non-negative finite values".to_string(),
            });
        }
        if counts.iter().any(|&x| x != x.round()) {
            return Err(DeError::InvalidCountMatrix {
                reason: "counts must be integers".to_string(),
            });
        }
        if !counts.is_empty() && counts.iter().all(|&x| x == 0.0) {
            return Err(DeError::InvalidCountMatrix {
                reason: "all samples have 0 counts for all genes".to_string(),
            });
        }

        ensure_unique(&gene_ids, "gene")?;
        ensure_unique(&sample_ids, "sample")?;

        Ok(Self {
            counts,
            gene_ids,
            sample_ids,
        })
    }

    pub fn n_genes(&self) -> usize {
        self.counts.nrows()
    }

    pub fn n_samples(&self) -> usize {
        self.counts.ncols()
    }

    /// Raw counts as a view
    pub fn counts(&self) -> ArrayView2<'_, f64> {
        self.counts.view()
    }

    pub fn gene_ids(&self) -> &[String] {
        &self.gene_ids
    }

    pub fn sample_ids(&self) -> &[String] {
        &self.sample_ids
    }

    /// Counts for a specific gene
    pub fn gene_counts(&self, gene_idx: usize) -> ArrayView1<'_, f64> {
        self.counts.row(gene_idx)
    }

    pub fn gene_index(&self, gene_id: &str) -> Option<usize> {
        self.gene_ids.iter().position(|id| id == gene_id)
    }

    /// Total count per gene across all samples
    pub fn row_sums(&self) -> Vec<f64> {
        self.counts.axis_iter(Axis(0)).map(|row| row.sum()).collect()
    }

    /// Sum of counts per sample (library size)
    pub fn library_sizes(&self) -> Vec<f64> {
        self.counts.axis_iter(Axis(1)).map(|col| col.sum()).collect()
    }

    /// Subset to specific genes, keeping their relative order
    ///
    /// The result may have zero genes; an empty matrix is a valid filter output.
    pub fn subset_genes(&self, gene_indices: &[usize]) -> Self {
        Self {
            counts: self.counts.select(Axis(0), gene_indices),
            gene_ids: gene_indices.iter().map(|&i| self.gene_ids[i].clone()).collect(),
            sample_ids: self.sample_ids.clone(),
        }
    }

    /// Reorder (or subset) columns
    pub fn select_samples(&self, sample_indices: &[usize]) -> Self {
        Self {
            counts: self.counts.select(Axis(1), sample_indices),
            gene_ids: self.gene_ids.clone(),
            sample_ids: sample_indices.iter().map(|&i| self.sample_ids[i].clone()).collect(),
        }
    }
}
