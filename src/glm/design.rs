//! Design matrix creation with treatment contrasts
//!
//! Factors are coded in formula order after the intercept. The last listed
//! factor is the main factor: its last level against its reference level is
//! the coefficient reported when no contrast is given. An optional
//! interaction multiplies the non-reference indicators of the last two
//! factors and is appended after all main effects.

use std::collections::{HashMap, HashSet};

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

use crate::data::SampleMetadata;
use crate::error::{DeError, Result};

/// Which factors enter the model and how they are coded
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DesignSpec {
    pub factors: Vec<String>,
    pub interaction: bool,
    pub reference_levels: HashMap<String, String>,
}

impl DesignSpec {
    /// Single-factor design `~ factor`
    pub fn single(factor: &str) -> Self {
        Self {
            factors: vec![factor.to_string()],
            ..Default::default()
        }
    }

    pub fn with_reference(mut self, factor: &str, level: &str) -> Self {
        self.reference_levels.insert(factor.to_string(), level.to_string());
        self
    }

    pub fn with_interaction(mut self) -> Self {
        self.interaction = true;
        self
    }

    /// Formula text, e.g. `~ batch + condition + batch:condition`
    pub fn formula(&self) -> String {
        if self.factors.is_empty() {
            return "~ 1".to_string();
        }
        let mut terms = self.factors.clone();
        if self.interaction && self.factors.len() >= 2 {
            let n = self.factors.len();
            terms.push(format!("{}:{}", self.factors[n - 2], self.factors[n - 1]));
        }
        format!("~ {}", terms.join(" + "))
    }
}

/// Comparison of two levels of one factor (numerator over denominator)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contrast {
    pub variable: String,
    pub numerator: String,
    pub denominator: String,
}

impl Contrast {
    pub fn new(variable: &str, numerator: &str, denominator: &str) -> Self {
        Self {
            variable: variable.to_string(),
            numerator: numerator.to_string(),
            denominator: denominator.to_string(),
        }
    }

    pub fn label(&self) -> String {
        format!("{} {} vs {}", self.variable, self.numerator, self.denominator)
    }
}

/// Coding of one categorical factor
#[derive(Debug, Clone)]
pub struct FactorTerm {
    pub name: String,
    pub reference: String,
    /// Non-reference levels in sorted order, one column each
    pub levels: Vec<String>,
    /// Column index of each non-reference level
    pub columns: Vec<usize>,
}

impl FactorTerm {
    fn column_of(&self, level: &str) -> Option<usize> {
        self.levels.iter().position(|l| l == level).map(|k| self.columns[k])
    }

    fn has_level(&self, level: &str) -> bool {
        level == self.reference || self.levels.iter().any(|l| l == level)
    }
}

/// Model matrix plus the bookkeeping needed to name and contrast its columns
#[derive(Debug, Clone)]
pub struct Design {
    matrix: Array2<f64>,
    coef_names: Vec<String>,
    factors: Vec<FactorTerm>,
    interaction_columns: Vec<usize>,
    formula: String,
}

impl Design {
    /// Build the design for `spec` from sample metadata
    pub fn build(metadata: &SampleMetadata, spec: &DesignSpec) -> Result<Self> {
        if spec.factors.is_empty() {
            return Ok(Self::intercept_only(metadata.n_samples()));
        }
        let mut seen = HashSet::new();
        for f in &spec.factors {
            if !seen.insert(f.as_str()) {
                return Err(DeError::InvalidDesign {
                    reason: format!("factor '{}' listed twice", f),
                });
            }
        }

        let n_samples = metadata.n_samples();
        let mut coef_names = vec!["Intercept".to_string()];
        let mut factors: Vec<FactorTerm> = Vec::with_capacity(spec.factors.len());

        for name in &spec.factors {
            let observed = metadata.model_levels(name)?;
            let reference = match spec.reference_levels.get(name) {
                Some(r) if observed.contains(r) => r.clone(),
                Some(r) => {
                    return Err(DeError::InvalidDesign {
                        reason: format!(
                            "reference level '{}' is not an observed level of '{}' ({})",
                            r,
                            name,
                            observed.join(", ")
                        ),
                    })
                }
                None => observed[0].clone(),
            };
            let levels: Vec<String> = observed.into_iter().filter(|l| *l != reference).collect();
            let columns: Vec<usize> = (0..levels.len()).map(|k| coef_names.len() + k).collect();
            for level in &levels {
                coef_names.push(format!("{}_{}_vs_{}", name, level, reference));
            }
            factors.push(FactorTerm {
                name: name.clone(),
                reference,
                levels,
                columns,
            });
        }

        let mut interaction_columns = Vec::new();
        if spec.interaction {
            if factors.len() < 2 {
                return Err(DeError::InvalidDesign {
                    reason: "an interaction term needs at least two factors".to_string(),
                });
            }
            let (a, b) = (&factors[factors.len() - 2], &factors[factors.len() - 1]);
            for la in &a.levels {
                for lb in &b.levels {
                    interaction_columns.push(coef_names.len());
                    coef_names.push(format!("{}_{}_x_{}_{}", a.name, la, b.name, lb));
                }
            }
        }

        let mut matrix = Array2::zeros((n_samples, coef_names.len()));
        for i in 0..n_samples {
            matrix[[i, 0]] = 1.0;
        }
        for term in &factors {
            let values = metadata.condition(&term.name).unwrap_or(&[]);
            for (i, value) in values.iter().enumerate() {
                if let Some(col) = term.column_of(value) {
                    matrix[[i, col]] = 1.0;
                }
            }
        }
        if !interaction_columns.is_empty() {
            let (a, b) = (&factors[factors.len() - 2], &factors[factors.len() - 1]);
            let va = metadata.condition(&a.name).unwrap_or(&[]);
            let vb = metadata.condition(&b.name).unwrap_or(&[]);
            let mut col = interaction_columns.iter();
            for la in &a.levels {
                for lb in &b.levels {
                    if let Some(&c) = col.next() {
                        for i in 0..n_samples {
                            if va[i] == *la && vb[i] == *lb {
                                matrix[[i, c]] = 1.0;
                            }
                        }
                    }
                }
            }
        }

        check_full_rank(&matrix)?;

        let design = Self {
            matrix,
            coef_names,
            factors,
            interaction_columns,
            formula: spec.formula(),
        };
        log::info!(
            "Design {}: {} samples x {} coefficients [{}]",
            design.formula,
            n_samples,
            design.n_coefs(),
            design.coef_names.join(", ")
        );
        Ok(design)
    }

    /// The `~ 1` design used for blind dispersion estimation
    pub fn intercept_only(n_samples: usize) -> Self {
        Self {
            matrix: Array2::ones((n_samples, 1)),
            coef_names: vec!["Intercept".to_string()],
            factors: Vec::new(),
            interaction_columns: Vec::new(),
            formula: "~ 1".to_string(),
        }
    }

    pub fn matrix(&self) -> &Array2<f64> {
        &self.matrix
    }

    pub fn coef_names(&self) -> &[String] {
        &self.coef_names
    }

    pub fn formula(&self) -> &str {
        &self.formula
    }

    pub fn n_samples(&self) -> usize {
        self.matrix.nrows()
    }

    pub fn n_coefs(&self) -> usize {
        self.matrix.ncols()
    }

    /// Residual degrees of freedom m - p
    pub fn residual_df(&self) -> usize {
        self.n_samples().saturating_sub(self.n_coefs())
    }

    pub fn coef_index(&self, name: &str) -> Option<usize> {
        self.coef_names.iter().position(|n| n == name)
    }

    pub fn factor(&self, name: &str) -> Option<&FactorTerm> {
        self.factors.iter().find(|f| f.name == name)
    }

    pub fn factors(&self) -> &[FactorTerm] {
        &self.factors
    }

    pub fn interaction_columns(&self) -> &[usize] {
        &self.interaction_columns
    }

    /// The final listed factor
    pub fn main_factor(&self) -> Option<&FactorTerm> {
        self.factors.last()
    }

    /// Last level vs reference of the main factor
    pub fn default_contrast(&self) -> Result<Contrast> {
        let main = self.main_factor().ok_or_else(|| DeError::InvalidContrast {
            reason: "intercept-only design has no contrast".to_string(),
        })?;
        let numerator = main.levels.last().ok_or_else(|| DeError::InvalidContrast {
            reason: format!("factor '{}' has no non-reference level", main.name),
        })?;
        Ok(Contrast::new(&main.name, numerator, &main.reference))
    }

    /// Coefficient weights c so that c'beta is the contrast's log fold change
    pub fn contrast_vector(&self, contrast: &Contrast) -> Result<Array1<f64>> {
        let term = self.factor(&contrast.variable).ok_or_else(|| DeError::InvalidContrast {
            reason: format!("'{}' is not a factor of the design {}", contrast.variable, self.formula),
        })?;
        for level in [&contrast.numerator, &contrast.denominator] {
            if !term.has_level(level) {
                return Err(DeError::InvalidContrast {
                    reason: format!("'{}' is not a level of '{}'", level, term.name),
                });
            }
        }
        if contrast.numerator == contrast.denominator {
            return Err(DeError::InvalidContrast {
                reason: "numerator and denominator are the same level".to_string(),
            });
        }

        let mut c = Array1::zeros(self.n_coefs());
        if let Some(col) = term.column_of(&contrast.numerator) {
            c[col] += 1.0;
        }
        if let Some(col) = term.column_of(&contrast.denominator) {
            c[col] -= 1.0;
        }
        Ok(c)
    }

    /// Samples grouped by identical model matrix rows, in order of first appearance
    pub fn cells(&self) -> Vec<Vec<usize>> {
        let mut keys: Vec<Vec<u64>> = Vec::new();
        let mut cells: Vec<Vec<usize>> = Vec::new();
        for (i, row) in self.matrix.rows().into_iter().enumerate() {
            let key: Vec<u64> = row.iter().map(|v| v.to_bits()).collect();
            match keys.iter().position(|k| *k == key) {
                Some(c) => cells[c].push(i),
                None => {
                    keys.push(key);
                    cells.push(vec![i]);
                }
            }
        }
        cells
    }

    /// True when every fitted mean is a group mean (one cell per coefficient)
    pub fn is_group_design(&self) -> bool {
        self.cells().len() == self.n_coefs()
    }

    /// A single factor with exactly two levels and no interaction
    pub fn is_two_level(&self) -> bool {
        self.factors.len() == 1 && self.factors[0].levels.len() == 1 && self.interaction_columns.is_empty()
    }
}

/// Fail unless the model matrix has full column rank
pub fn check_full_rank(matrix: &Array2<f64>) -> Result<()> {
    let (nrow, ncol) = matrix.dim();
    if nrow == 0 || ncol == 0 {
        return Err(DeError::InvalidDesign {
            reason: "design matrix has zero rows or columns".to_string(),
        });
    }
    if qr_rank(matrix) < ncol {
        let zero_column = (0..ncol).any(|j| matrix.column(j).iter().all(|&v| v == 0.0));
        let reason = if zero_column {
            "the model matrix is not full rank: a level or combination of levels has no samples"
        } else {
            "the model matrix is not full rank: some terms are linear combinations of others"
        };
        return Err(DeError::InvalidDesign {
            reason: reason.to_string(),
        });
    }
    Ok(())
}

/// Numerical rank by Householder QR with column pivoting
///
/// Counts diagonal entries of R above `max(nrow, ncol) * eps * max|diag R|`.
fn qr_rank(matrix: &Array2<f64>) -> usize {
    let (nrow, ncol) = matrix.dim();
    let k = nrow.min(ncol);
    let mut r = matrix.to_owned();
    let mut norms: Vec<f64> = (0..ncol).map(|j| r.column(j).dot(&r.column(j))).collect();

    for step in 0..k {
        let best = (step..ncol)
            .max_by(|&a, &b| norms[a].partial_cmp(&norms[b]).unwrap_or(std::cmp::Ordering::Equal))
            .unwrap_or(step);
        if best != step {
            for i in 0..nrow {
                r.swap([i, step], [i, best]);
            }
            norms.swap(step, best);
        }

        let mut alpha = (step..nrow).map(|i| r[[i, step]].powi(2)).sum::<f64>().sqrt();
        if alpha < f64::EPSILON * 1e3 {
            break;
        }
        if r[[step, step]] > 0.0 {
            alpha = -alpha;
        }
        let v0 = r[[step, step]] - alpha;
        r[[step, step]] = alpha;
        let v_norm_sq = v0 * v0 + ((step + 1)..nrow).map(|i| r[[i, step]].powi(2)).sum::<f64>();
        if v_norm_sq < f64::MIN_POSITIVE {
            continue;
        }
        let tau = 2.0 / v_norm_sq;

        for j in (step + 1)..ncol {
            let dot = v0 * r[[step, j]] + ((step + 1)..nrow).map(|i| r[[i, step]] * r[[i, j]]).sum::<f64>();
            let scale = tau * dot;
            r[[step, j]] -= scale * v0;
            for i in (step + 1)..nrow {
                r[[i, j]] -= scale * r[[i, step]];
            }
            norms[j] = (norms[j] - r[[step, j]].powi(2)).max(0.0);
        }
    }

    let max_diag = (0..k).map(|i| r[[i, i]].abs()).fold(0.0, f64::max);
    let tol = nrow.max(ncol) as f64 * f64::EPSILON * max_diag;
    (0..k).filter(|&i| r[[i, i]].abs() > tol).count()
}
