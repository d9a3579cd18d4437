//! Per-gene result rows

use serde::{Deserialize, Serialize};

/// Why a gene has, or lacks, a p-value and adjusted p-value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestStatus {
    Tested,
    /// No counts in any sample
    AllZero,
    /// The GLM did not converge
    NotConverged,
    /// Cook's distance above the cutoff; p-value not computed
    CooksOutlier,
    /// Removed by independent filtering; p-value kept, no adjusted p-value
    LowMeanFiltered,
}

impl TestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TestStatus::Tested => "tested",
            TestStatus::AllZero => "all_zero",
            TestStatus::NotConverged => "not_converged",
            TestStatus::CooksOutlier => "cooks_outlier",
            TestStatus::LowMeanFiltered => "low_mean_filtered",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "tested" => Some(TestStatus::Tested),
            "all_zero" => Some(TestStatus::AllZero),
            "not_converged" => Some(TestStatus::NotConverged),
            "cooks_outlier" => Some(TestStatus::CooksOutlier),
            "low_mean_filtered" => Some(TestStatus::LowMeanFiltered),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneResult {
    pub gene_id: String,
    pub base_mean: f64,
    pub log2_fold_change: f64,
    pub lfc_se: f64,
    pub stat: Option<f64>,
    pub pvalue: Option<f64>,
    pub padj: Option<f64>,
    pub status: TestStatus,
}

/// One row per gene that reached the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultTable {
    /// e.g. "condition treated vs control"
    pub contrast: String,
    pub rows: Vec<GeneResult>,
}

impl ResultTable {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn get(&self, gene_id: &str) -> Option<&GeneResult> {
        self.rows.iter().find(|r| r.gene_id == gene_id)
    }

    pub fn gene_ids(&self) -> Vec<&str> {
        self.rows.iter().map(|r| r.gene_id.as_str()).collect()
    }

    /// Rows with padj below `alpha`
    pub fn n_rejected(&self, alpha: f64) -> usize {
        self.rows
            .iter()
            .filter(|r| matches!(r.padj, Some(p) if p < alpha))
            .count()
    }

    /// New table sharing the contrast label
    pub fn with_rows(&self, rows: Vec<GeneResult>) -> Self {
        Self {
            contrast: self.contrast.clone(),
            rows,
        }
    }
}
