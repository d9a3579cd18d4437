//! Gene annotation and classifier joins
//!
//! Annotation comes from an external service as flat files mapping gene ids
//! to symbols and ontology terms. The mapping is many-to-many, so a join can
//! duplicate result rows; it never drops them.

mod source;

pub use source::{AnnotationSource, CachedAnnotationSource, FileAnnotationSource};

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::testing::{GeneResult, ResultTable};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnotationRecord {
    pub gene_id: String,
    pub symbol: Option<String>,
    pub term: Option<String>,
}

/// Annotation records, possibly several per gene
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnnotationTable {
    records: Vec<AnnotationRecord>,
    by_gene: HashMap<String, Vec<usize>>,
}

impl AnnotationTable {
    pub fn new(records: Vec<AnnotationRecord>) -> Self {
        let mut table = Self::default();
        table.extend(records);
        table
    }

    pub fn extend(&mut self, records: Vec<AnnotationRecord>) {
        for record in records {
            self.by_gene
                .entry(record.gene_id.clone())
                .or_default()
                .push(self.records.len());
            self.records.push(record);
        }
    }

    pub fn records(&self) -> &[AnnotationRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn contains(&self, gene_id: &str) -> bool {
        self.by_gene.contains_key(gene_id)
    }

    /// Records of one gene in input order
    pub fn for_gene(&self, gene_id: &str) -> Vec<&AnnotationRecord> {
        self.by_gene
            .get(gene_id)
            .map(|idx| idx.iter().map(|&i| &self.records[i]).collect())
            .unwrap_or_default()
    }

    /// Only the records of `ids`
    pub fn restrict_to(&self, ids: &[String]) -> Self {
        let wanted: BTreeSet<&str> = ids.iter().map(String::as_str).collect();
        Self::new(
            self.records
                .iter()
                .filter(|r| wanted.contains(r.gene_id.as_str()))
                .cloned()
                .collect(),
        )
    }
}

/// Gene classes read from classifier gene lists
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GeneClasses {
    classes: BTreeMap<String, BTreeSet<String>>,
}

impl GeneClasses {
    pub fn from_pairs<I: IntoIterator<Item = (String, String)>>(pairs: I) -> Self {
        let mut out = Self::default();
        out.extend(pairs);
        out
    }

    pub fn extend<I: IntoIterator<Item = (String, String)>>(&mut self, pairs: I) {
        for (gene, class) in pairs {
            self.classes.entry(gene).or_default().insert(class);
        }
    }

    pub fn merge(&mut self, other: GeneClasses) {
        for (gene, set) in other.classes {
            self.classes.entry(gene).or_default().extend(set);
        }
    }

    /// All classes of a gene joined by ';', in sorted order
    pub fn label(&self, gene_id: &str) -> Option<String> {
        self.classes
            .get(gene_id)
            .map(|set| set.iter().cloned().collect::<Vec<_>>().join(";"))
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotatedRow {
    #[serde(flatten)]
    pub result: GeneResult,
    pub symbol: Option<String>,
    pub term: Option<String>,
    pub class: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotatedTable {
    pub contrast: String,
    pub rows: Vec<AnnotatedRow>,
}

impl AnnotatedTable {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Distinct gene ids in first-appearance order
    pub fn gene_ids(&self) -> Vec<&str> {
        let mut seen = BTreeSet::new();
        self.rows
            .iter()
            .map(|r| r.result.gene_id.as_str())
            .filter(|id| seen.insert(*id))
            .collect()
    }

    /// Set the class column from classifier gene lists
    pub fn with_classes(&self, classes: &GeneClasses) -> Self {
        Self {
            contrast: self.contrast.clone(),
            rows: self
                .rows
                .iter()
                .map(|r| AnnotatedRow {
                    class: classes.label(&r.result.gene_id),
                    ..r.clone()
                })
                .collect(),
        }
    }
}

/// Left outer join of result rows with annotation records
///
/// Row order is kept. A gene with k records yields k rows; a gene without
/// records yields one row with empty annotation fields.
pub fn left_join(results: &ResultTable, annotation: &AnnotationTable) -> AnnotatedTable {
    let mut rows = Vec::with_capacity(results.len());
    let mut unmatched = 0;
    for result in &results.rows {
        let records = annotation.for_gene(&result.gene_id);
        if records.is_empty() {
            unmatched += 1;
            rows.push(AnnotatedRow {
                result: result.clone(),
                symbol: None,
                term: None,
                class: None,
            });
        }
        for record in records {
            rows.push(AnnotatedRow {
                result: result.clone(),
                symbol: record.symbol.clone(),
                term: record.term.clone(),
                class: None,
            });
        }
    }
    log::info!(
        "Annotated {} genes into {} rows, {} without annotation",
        results.len(),
        rows.len(),
        unmatched
    );
    AnnotatedTable {
        contrast: results.contrast.clone(),
        rows,
    }
}
