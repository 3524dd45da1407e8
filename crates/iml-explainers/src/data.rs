//! Dataset container and the row sampler shared by all experiments.
//!
//! `Dataset` keeps the feature matrix together with per-column metadata
//! (name, numeric vs categorical, level names) and an optional target.
//! `DataSampler` draws or replicates rows from it for the design stage.
use anyhow::Result;
use ndarray::{Array1, Array2, ArrayView1, Axis};
use rand::rngs::StdRng;
use rand::seq::index;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::ExplainError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureKind {
    Numeric,
    Categorical,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    pub name: String,
    pub kind: FeatureKind,
    /// Level names for categorical features; the matrix stores level indices.
    pub levels: Vec<String>,
}

impl Feature {
    pub fn numeric(name: impl Into<String>) -> Self {
        Feature {
            name: name.into(),
            kind: FeatureKind::Numeric,
            levels: Vec::new(),
        }
    }

    pub fn categorical(name: impl Into<String>, levels: Vec<String>) -> Self {
        Feature {
            name: name.into(),
            kind: FeatureKind::Categorical,
            levels,
        }
    }

    pub fn is_categorical(&self) -> bool {
        self.kind == FeatureKind::Categorical
    }
}

#[derive(Debug, Clone)]
pub struct Dataset {
    pub x: Array2<f64>,
    pub y: Option<Array1<f64>>,
    pub features: Vec<Feature>,
}

impl Dataset {
    pub fn new(x: Array2<f64>, features: Vec<Feature>) -> Result<Self> {
        if features.len() != x.ncols() {
            return Err(ExplainError::ShapeMismatch {
                what: "feature list".to_string(),
                expected: x.ncols(),
                found: features.len(),
            }
            .into());
        }
        if x.nrows() == 0 || x.ncols() == 0 {
            return Err(ExplainError::InvalidParameter(
                "dataset must have at least one row and one column".to_string(),
            )
            .into());
        }
        for (j, feature) in features.iter().enumerate() {
            if feature.is_categorical() {
                let n_levels = feature.levels.len() as f64;
                let valid = x
                    .column(j)
                    .iter()
                    .all(|&v| v >= 0.0 && v < n_levels && v.fract() == 0.0);
                if !valid {
                    anyhow::bail!(
                        "Categorical feature '{}' holds values outside its {} levels",
                        feature.name,
                        feature.levels.len()
                    );
                }
            }
        }
        Ok(Dataset { x, y: None, features })
    }

    /// All-numeric dataset from a matrix and column names.
    pub fn from_matrix<S: AsRef<str>>(x: Array2<f64>, names: &[S]) -> Result<Self> {
        let features = names.iter().map(|n| Feature::numeric(n.as_ref())).collect();
        Dataset::new(x, features)
    }

    pub fn with_target(mut self, y: Array1<f64>) -> Result<Self> {
        if y.len() != self.x.nrows() {
            return Err(ExplainError::ShapeMismatch {
                what: "target".to_string(),
                expected: self.x.nrows(),
                found: y.len(),
            }
            .into());
        }
        self.y = Some(y);
        Ok(self)
    }

    pub fn nrows(&self) -> usize {
        self.x.nrows()
    }

    pub fn ncols(&self) -> usize {
        self.x.ncols()
    }

    pub fn feature_names(&self) -> Vec<String> {
        self.features.iter().map(|f| f.name.clone()).collect()
    }

    pub fn feature_index(&self, name: &str) -> Result<usize> {
        self.features
            .iter()
            .position(|f| f.name == name)
            .ok_or_else(|| ExplainError::UnknownFeature(name.to_string()).into())
    }

    /// Check that `idx` refers to a column of this dataset.
    pub fn check_feature(&self, idx: usize) -> Result<()> {
        if idx >= self.ncols() {
            return Err(ExplainError::UnknownFeature(format!(
                "index {} (dataset has {} features)",
                idx,
                self.ncols()
            ))
            .into());
        }
        Ok(())
    }

    /// Check that a single observation has one value per feature.
    pub fn check_instance(&self, x: &[f64]) -> Result<()> {
        if x.len() != self.ncols() {
            return Err(ExplainError::ShapeMismatch {
                what: "x_interest".to_string(),
                expected: self.ncols(),
                found: x.len(),
            }
            .into());
        }
        Ok(())
    }

    pub fn row(&self, i: usize) -> ArrayView1<'_, f64> {
        self.x.row(i)
    }

    pub fn select_rows(&self, indices: &[usize]) -> Dataset {
        Dataset {
            x: self.x.select(Axis(0), indices),
            y: self.y.as_ref().map(|y| y.select(Axis(0), indices)),
            features: self.features.clone(),
        }
    }

    /// Render a value of feature `j` for display: the level name for
    /// categoricals, a trimmed number otherwise.
    pub fn format_value(&self, j: usize, value: f64) -> String {
        let feature = &self.features[j];
        if feature.is_categorical() {
            let level = value.round();
            if level >= 0.0 {
                if let Some(name) = feature.levels.get(level as usize) {
                    return name.clone();
                }
            }
        }
        format_number(value)
    }

    pub fn log_summary(&self) {
        let n_cat = self.features.iter().filter(|f| f.is_categorical()).count();
        log::info!(
            "Dataset: {} rows, {} features ({} numeric, {} categorical), target: {}",
            self.nrows(),
            self.ncols(),
            self.ncols() - n_cat,
            n_cat,
            if self.y.is_some() { "yes" } else { "no" }
        );
    }
}

pub(crate) fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{:.4}", value)
    }
}

/// Draws or replicates rows from a reference dataset.
#[derive(Debug, Clone)]
pub struct DataSampler {
    dataset: Dataset,
}

impl DataSampler {
    pub fn new(dataset: Dataset) -> Self {
        DataSampler { dataset }
    }

    pub fn dataset(&self) -> &Dataset {
        &self.dataset
    }

    pub fn all(&self) -> &Array2<f64> {
        &self.dataset.x
    }

    pub fn target(&self) -> Option<&Array1<f64>> {
        self.dataset.y.as_ref()
    }

    pub fn n_rows(&self) -> usize {
        self.dataset.nrows()
    }

    pub fn n_features(&self) -> usize {
        self.dataset.ncols()
    }

    /// Draw `n` rows. Without replacement `n` cannot exceed the number of rows.
    pub fn sample(&self, n: usize, replace: bool, rng: &mut StdRng) -> Result<Array2<f64>> {
        let n_rows = self.n_rows();
        if n == 0 {
            return Err(ExplainError::InvalidParameter("sample size must be at least 1".to_string()).into());
        }
        let indices: Vec<usize> = if replace {
            (0..n).map(|_| rng.gen_range(0..n_rows)).collect()
        } else {
            if n > n_rows {
                return Err(ExplainError::InvalidParameter(format!(
                    "cannot draw {} rows without replacement from {}",
                    n, n_rows
                ))
                .into());
            }
            let mut picked = index::sample(rng, n_rows, n).into_vec();
            picked.sort_unstable();
            picked
        };
        Ok(self.dataset.x.select(Axis(0), &indices))
    }

    /// `None` returns every row; `Some(n)` a sample without replacement,
    /// capped at the dataset size.
    pub fn sample_rows(&self, n: Option<usize>, rng: &mut StdRng) -> Result<Array2<f64>> {
        match n {
            Some(n) if n < self.n_rows() => self.sample(n, false, rng),
            _ => Ok(self.dataset.x.clone()),
        }
    }

    /// Stack `times` copies of `rows` on top of each other.
    pub fn replicate(rows: &Array2<f64>, times: usize) -> Array2<f64> {
        let (n, p) = rows.dim();
        let mut out = Array2::zeros((n * times, p));
        for t in 0..times {
            out.slice_mut(ndarray::s![t * n..(t + 1) * n, ..]).assign(rows);
        }
        out
    }
}
