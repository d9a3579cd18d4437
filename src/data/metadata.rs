//! Sample metadata: one row per sample, categorical covariates as columns

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::{DeError, Result};

/// Sample metadata containing experimental conditions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleMetadata {
    /// Sample identifiers
    sample_ids: Vec<String>,
    /// Covariate names in file order
    columns: Vec<String>,
    /// Covariate name -> value for each sample
    conditions: HashMap<String, Vec<String>>,
}

impl SampleMetadata {
    /// Create empty metadata for the given samples; identifiers must be unique
    pub fn new(sample_ids: Vec<String>) -> Result<Self> {
        let mut seen = HashSet::with_capacity(sample_ids.len());
        for id in &sample_ids {
            if !seen.insert(id.as_str()) {
                return Err(DeError::InvalidMetadata {
                    reason: format!("duplicate sample identifier '{}'", id),
                });
            }
        }
        Ok(Self {
            sample_ids,
            columns: Vec::new(),
            conditions: HashMap::new(),
        })
    }

    /// Add a categorical covariate column
    pub fn add_condition(&mut self, name: &str, values: Vec<String>) -> Result<()> {
        if values.len() != self.sample_ids.len() {
            return Err(DeError::InvalidMetadata {
                reason: format!(
                    "covariate '{}' has {} values for {} samples",
                    name,
                    values.len(),
                    self.sample_ids.len()
                ),
            });
        }
        if self.conditions.insert(name.to_string(), values).is_none() {
            self.columns.push(name.to_string());
        }
        Ok(())
    }

    /// Values of a covariate, one per sample
    pub fn condition(&self, name: &str) -> Option<&[String]> {
        self.conditions.get(name).map(|v| v.as_slice())
    }

    /// Covariate names in the order they were added
    pub fn condition_names(&self) -> &[String] {
        &self.columns
    }

    pub fn sample_ids(&self) -> &[String] {
        &self.sample_ids
    }

    pub fn n_samples(&self) -> usize {
        self.sample_ids.len()
    }

    /// Observed levels of a covariate, sorted
    pub fn levels(&self, name: &str) -> Option<Vec<String>> {
        self.conditions.get(name).map(|values| {
            let mut unique = values.clone();
            unique.sort();
            unique.dedup();
            unique
        })
    }

    /// Observed levels of a model covariate, which must exist and have at least two levels
    pub fn model_levels(&self, name: &str) -> Result<Vec<String>> {
        let levels = self.levels(name).ok_or_else(|| DeError::InvalidMetadata {
            reason: format!(
                "covariate '{}' not found (available: {})",
                name,
                self.columns.join(", ")
            ),
        })?;
        if levels.len() < 2 {
            return Err(DeError::DegenerateDesign {
                variable: name.to_string(),
                n_levels: levels.len(),
            });
        }
        Ok(levels)
    }

    /// Sample indices carrying a given level
    pub fn samples_with_level(&self, name: &str, level: &str) -> Vec<usize> {
        self.conditions
            .get(name)
            .map(|values| {
                values
                    .iter()
                    .enumerate()
                    .filter(|(_, v)| v.as_str() == level)
                    .map(|(i, _)| i)
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata() -> SampleMetadata {
        let ids: Vec<String> = ["s1", "s2", "s3", "s4"].iter().map(|s| s.to_string()).collect();
        let mut meta = SampleMetadata::new(ids).unwrap();
        meta.add_condition(
            "condition",
            vec!["treated".into(), "treated".into(), "control".into(), "control".into()],
        )
        .unwrap();
        meta.add_condition("batch", vec!["b1".into(); 4]).unwrap();
        meta
    }

    #[test]
    fn test_levels_sorted() {
        let meta = metadata();
        assert_eq!(meta.levels("condition").unwrap(), vec!["control", "treated"]);
        assert_eq!(meta.samples_with_level("condition", "control"), vec![2, 3]);
        assert_eq!(meta.condition_names(), &["condition", "batch"]);
    }

    #[test]
    fn test_single_level_is_degenerate() {
        let meta = metadata();
        match meta.model_levels("batch") {
            Err(DeError::DegenerateDesign { variable, n_levels }) => {
                assert_eq!(variable, "batch");
                assert_eq!(n_levels, 1);
            }
            other => panic!("expected degenerate design, got {:?}", other),
        }
        assert!(matches!(
            meta.model_levels("missing"),
            Err(DeError::InvalidMetadata { .. })
        ));
    }

    #[test]
    fn test_duplicate_samples_rejected() {
        let ids = vec!["s1".to_string(), "s1".to_string()];
        assert!(SampleMetadata::new(ids).is_err());
    }

    #[test]
    fn test_wrong_length_rejected() {
        let mut meta = metadata();
        assert!(meta.add_condition("x", vec!["a".into()]).is_err());
    }
}
