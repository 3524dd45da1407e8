//! Prediction adapter.
//!
//! Any trained model is reached through the `Predictor` trait, which maps a
//! feature matrix to an `n x k` output matrix (one column per output or
//! class). `Model` wraps a predictor with class selection, batching and
//! shape validation so the experiments never talk to a model directly.
use std::sync::Arc;

use anyhow::{Context, Result};
use ndarray::{concatenate, s, Array1, Array2, ArrayView1, Axis};
use rayon::prelude::*;

use crate::error::ExplainError;

pub trait Predictor: Send + Sync {
    /// Predict an `n x k` matrix for the `n` rows of `x`.
    fn predict(&self, x: &Array2<f64>) -> Result<Array2<f64>>;

    /// Names of the `k` output columns.
    fn output_names(&self) -> Vec<String> {
        vec!["prediction".to_string()]
    }

    fn name(&self) -> &str {
        "model"
    }
}

impl<P: Predictor + ?Sized> Predictor for Arc<P> {
    fn predict(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        (**self).predict(x)
    }

    fn output_names(&self) -> Vec<String> {
        (**self).output_names()
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// Single-output predictor backed by a closure.
pub struct FnPredictor<F> {
    f: F,
    name: String,
}

impl<F> FnPredictor<F>
where
    F: Fn(&Array2<f64>) -> Result<Array1<f64>> + Send + Sync,
{
    pub fn new(f: F) -> Self {
        FnPredictor {
            f,
            name: "function".to_string(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

impl<F> Predictor for FnPredictor<F>
where
    F: Fn(&Array2<f64>) -> Result<Array1<f64>> + Send + Sync,
{
    fn predict(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        let y = (self.f)(x)?;
        let n = y.len();
        Ok(y.into_shape((n, 1))?)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Multi-output predictor backed by a closure, e.g. class probabilities.
pub struct FnMultiPredictor<F> {
    f: F,
    outputs: Vec<String>,
}

impl<F> FnMultiPredictor<F>
where
    F: Fn(&Array2<f64>) -> Result<Array2<f64>> + Send + Sync,
{
    pub fn new(f: F, outputs: Vec<String>) -> Self {
        FnMultiPredictor { f, outputs }
    }
}

impl<F> Predictor for FnMultiPredictor<F>
where
    F: Fn(&Array2<f64>) -> Result<Array2<f64>> + Send + Sync,
{
    fn predict(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        (self.f)(x)
    }

    fn output_names(&self) -> Vec<String> {
        self.outputs.clone()
    }
}

/// Output of `Model::predict`.
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub values: Array2<f64>,
    pub outputs: Vec<String>,
}

impl Prediction {
    pub fn n_rows(&self) -> usize {
        self.values.nrows()
    }

    pub fn n_outputs(&self) -> usize {
        self.values.ncols()
    }

    pub fn is_single(&self) -> bool {
        self.n_outputs() == 1
    }

    pub fn column(&self, k: usize) -> ArrayView1<'_, f64> {
        self.values.column(k)
    }

    /// Per-output mean over all rows.
    pub fn mean(&self) -> Array1<f64> {
        self.values
            .mean_axis(Axis(0))
            .unwrap_or_else(|| Array1::zeros(self.n_outputs()))
    }
}

/// Which output column to keep when a model returns several.
#[derive(Debug, Clone, PartialEq)]
pub enum ClassSelection {
    Index(usize),
    Name(String),
}

/// Uniform prediction contract around any `Predictor`.
#[derive(Clone)]
pub struct Model {
    inner: Arc<dyn Predictor>,
    class: Option<ClassSelection>,
    batch_size: usize,
}

impl Model {
    /// Rows per predict call when the design is split into batches.
    pub const DEFAULT_BATCH_SIZE: usize = 1000;

    pub fn new<P: Predictor + 'static>(predictor: P) -> Self {
        Model::from_arc(Arc::new(predictor))
    }

    pub fn from_arc(inner: Arc<dyn Predictor>) -> Self {
        Model {
            inner,
            class: None,
            batch_size: Self::DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_class(mut self, class: ClassSelection) -> Self {
        self.class = Some(class);
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn name(&self) -> &str {
        self.inner.name()
    }

    pub fn predictor(&self) -> Arc<dyn Predictor> {
        Arc::clone(&self.inner)
    }

    /// Replace the wrapped predictor, keeping class selection and batching.
    pub fn map_predictor(&self, inner: Arc<dyn Predictor>) -> Model {
        Model {
            inner,
            class: self.class.clone(),
            batch_size: self.batch_size,
        }
    }

    /// Output column names after class selection.
    pub fn output_names(&self) -> Result<Vec<String>> {
        let names = self.inner.output_names();
        match self.selected_column(&names)? {
            Some(k) => Ok(vec![names[k].clone()]),
            None => Ok(names),
        }
    }

    fn selected_column(&self, names: &[String]) -> Result<Option<usize>> {
        match &self.class {
            None => Ok(None),
            Some(ClassSelection::Index(k)) => {
                if *k >= names.len() {
                    return Err(ExplainError::InvalidParameter(format!(
                        "class index {} out of range, model has {} outputs",
                        k,
                        names.len()
                    ))
                    .into());
                }
                Ok(Some(*k))
            }
            Some(ClassSelection::Name(name)) => names
                .iter()
                .position(|n| n == name)
                .map(Some)
                .ok_or_else(|| {
                    ExplainError::InvalidParameter(format!("model has no output named '{}'", name)).into()
                }),
        }
    }

    pub fn predict(&self, x: &Array2<f64>) -> Result<Prediction> {
        let names = self.inner.output_names();
        let n = x.nrows();

        let values = if n <= self.batch_size {
            self.predict_checked(x, names.len())?
        } else {
            let starts: Vec<usize> = (0..n).step_by(self.batch_size).collect();
            log::trace!("Predicting {} rows in {} batches", n, starts.len());
            let chunks = starts
                .par_iter()
                .map(|&start| {
                    let end = (start + self.batch_size).min(n);
                    let batch = x.slice(s![start..end, ..]).to_owned();
                    self.predict_checked(&batch, names.len())
                })
                .collect::<Result<Vec<_>>>()?;
            let views: Vec<_> = chunks.iter().map(|c| c.view()).collect();
            concatenate(Axis(0), &views).context("Failed to stitch prediction batches")?
        };

        match self.selected_column(&names)? {
            Some(k) => Ok(Prediction {
                values: values.slice(s![.., k..k + 1]).to_owned(),
                outputs: vec![names[k].clone()],
            }),
            None => Ok(Prediction { values, outputs: names }),
        }
    }

    fn predict_checked(&self, x: &Array2<f64>, n_outputs: usize) -> Result<Array2<f64>> {
        let values = self
            .inner
            .predict(x)
            .with_context(|| format!("Model '{}' failed to predict {} rows", self.inner.name(), x.nrows()))?;
        if values.nrows() != x.nrows() || values.ncols() != n_outputs {
            return Err(ExplainError::PredictionShape {
                rows: values.nrows(),
                expected_rows: x.nrows(),
                cols: values.ncols(),
                expected_cols: n_outputs,
            }
            .into());
        }
        Ok(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array2};

    fn sum_model() -> Model {
        Model::new(FnPredictor::new(|x: &Array2<f64>| Ok(x.sum_axis(Axis(1)))))
    }

    #[test]
    fn test_single_output_prediction() {
        let pred = sum_model().predict(&array![[1.0, 2.0], [3.0, 4.0]]).unwrap();
        assert!(pred.is_single());
        assert_eq!(pred.column(0).to_vec(), vec![3.0, 7.0]);
    }

    #[test]
    fn test_batched_prediction_keeps_order() {
        let x = Array2::from_shape_fn((25, 2), |(i, j)| (i * 2 + j) as f64);
        let full = sum_model().predict(&x).unwrap();
        let batched = sum_model().with_batch_size(4).predict(&x).unwrap();
        assert_eq!(full, batched);
    }

    #[test]
    fn test_class_selection() {
        let model = Model::new(FnMultiPredictor::new(
            |x: &Array2<f64>| {
                let p = x.column(0).mapv(|v| v / 10.0);
                let mut out = Array2::zeros((x.nrows(), 2));
                out.column_mut(0).assign(&p.mapv(|v| 1.0 - v));
                out.column_mut(1).assign(&p);
                Ok(out)
            },
            vec!["neg".to_string(), "pos".to_string()],
        ))
        .with_class(ClassSelection::Name("pos".to_string()));

        let pred = model.predict(&array![[2.0], [5.0]]).unwrap();
        assert_eq!(pred.outputs, vec!["pos".to_string()]);
        assert_eq!(pred.column(0).to_vec(), vec![0.2, 0.5]);

        let bad = model.with_class(ClassSelection::Index(3));
        assert!(bad.predict(&array![[1.0]]).is_err());
    }

    #[test]
    fn test_wrong_row_count_is_rejected() {
        let model = Model::new(FnPredictor::new(|_x: &Array2<f64>| Ok(array![1.0])));
        let err = model.predict(&array![[1.0], [2.0]]).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ExplainError>(),
            Some(ExplainError::PredictionShape { rows: 1, expected_rows: 2, .. })
        ));
    }
}
