//! Significance calls, ranking and run summaries

use std::cmp::Ordering;

use serde::Serialize;

use crate::testing::{GeneResult, ResultTable, TestStatus};

/// Rows with padj < `padj_cutoff` and |log2FC| >= `lfc_cutoff`
///
/// Rows without an adjusted p-value are never significant.
pub fn significant(table: &ResultTable, padj_cutoff: f64, lfc_cutoff: f64) -> ResultTable {
    let rows = table
        .rows
        .iter()
        .filter(|r| is_significant(r, padj_cutoff, lfc_cutoff))
        .cloned()
        .collect();
    table.with_rows(rows)
}

pub fn is_significant(row: &GeneResult, padj_cutoff: f64, lfc_cutoff: f64) -> bool {
    matches!(row.padj, Some(p) if p < padj_cutoff) && row.log2_fold_change.abs() >= lfc_cutoff
}

fn by_padj(a: &GeneResult, b: &GeneResult) -> Ordering {
    match (a.padj, b.padj) {
        (Some(x), Some(y)) => x.total_cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
    .then_with(|| a.gene_id.cmp(&b.gene_id))
}

/// Ascending adjusted p-value, undefined last, ties broken by gene id
pub fn rank_by_padj(table: &ResultTable) -> ResultTable {
    let mut rows = table.rows.clone();
    rows.sort_by(by_padj);
    table.with_rows(rows)
}

/// The `n` best-ranked rows
pub fn top_n(table: &ResultTable, n: usize) -> ResultTable {
    let mut ranked = rank_by_padj(table);
    ranked.rows.truncate(n);
    ranked
}

/// Counts printed at the end of a run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultSummary {
    pub contrast: String,
    pub n_genes: usize,
    pub padj_cutoff: f64,
    pub lfc_cutoff: f64,
    pub up: usize,
    pub down: usize,
    pub cooks_outliers: usize,
    pub low_mean_filtered: usize,
    pub all_zero: usize,
    pub not_converged: usize,
}

pub fn summarize(table: &ResultTable, padj_cutoff: f64, lfc_cutoff: f64) -> ResultSummary {
    let count = |status: TestStatus| table.rows.iter().filter(|r| r.status == status).count();
    let sig = significant(table, padj_cutoff, lfc_cutoff);
    ResultSummary {
        contrast: table.contrast.clone(),
        n_genes: table.len(),
        padj_cutoff,
        lfc_cutoff,
        up: sig.rows.iter().filter(|r| r.log2_fold_change > 0.0).count(),
        down: sig.rows.iter().filter(|r| r.log2_fold_change < 0.0).count(),
        cooks_outliers: count(TestStatus::CooksOutlier),
        low_mean_filtered: count(TestStatus::LowMeanFiltered),
        all_zero: count(TestStatus::AllZero),
        not_converged: count(TestStatus::NotConverged),
    }
}

impl std::fmt::Display for ResultSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Contrast: {}", self.contrast)?;
        writeln!(f, "Genes with results:     {}", self.n_genes)?;
        writeln!(
            f,
            "padj < {}, |log2FC| >= {}: {} up, {} down",
            self.padj_cutoff, self.lfc_cutoff, self.up, self.down
        )?;
        writeln!(f, "Cook's outliers:        {}", self.cooks_outliers)?;
        writeln!(f, "Low mean (filtered):    {}", self.low_mean_filtered)?;
        writeln!(f, "All-zero counts:        {}", self.all_zero)?;
        write!(f, "Not converged:          {}", self.not_converged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(id: &str, lfc: f64, padj: Option<f64>) -> GeneResult {
        GeneResult {
            gene_id: id.to_string(),
            base_mean: 10.0,
            log2_fold_change: lfc,
            lfc_se: 0.2,
            stat: Some(lfc / 0.2),
            pvalue: padj,
            padj,
            status: if padj.is_some() {
                TestStatus::Tested
            } else {
                TestStatus::LowMeanFiltered
            },
        }
    }

    fn table() -> ResultTable {
        ResultTable {
            contrast: "condition b vs a".to_string(),
            rows: vec![
                row("d", 2.0, Some(0.01)),
                row("b", -1.5, Some(0.001)),
                row("c", 0.5, Some(0.001)),
                row("a", 3.0, None),
                row("e", -1.0, Some(0.01)),
            ],
        }
    }

    #[test]
    fn test_significant_needs_both_cutoffs() {
        let sig = significant(&table(), 0.05, 1.0);
        assert_eq!(sig.gene_ids(), vec!["d", "b", "e"]);
    }

    #[test]
    fn test_rank_by_padj_ties_and_missing() {
        let ranked = rank_by_padj(&table());
        assert_eq!(ranked.gene_ids(), vec!["b", "c", "d", "e", "a"]);
        assert_eq!(rank_by_padj(&ranked), ranked);
    }

    #[test]
    fn test_top_n() {
        assert_eq!(top_n(&table(), 2).gene_ids(), vec!["b", "c"]);
        assert_eq!(top_n(&table(), 10).len(), 5);
    }

    #[test]
    fn test_summary_counts() {
        let s = summarize(&table(), 0.05, 1.0);
        assert_eq!((s.up, s.down), (1, 2));
        assert_eq!(s.low_mean_filtered, 1);
        assert!(s.to_string().contains("1 up, 2 down"));
    }
}
