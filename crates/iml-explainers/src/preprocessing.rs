//! Column scaling used by the local surrogate's distance functions.
//!
//! `Scaler` standardises columns to zero mean and unit variance; `Ranges`
//! keeps per-column ranges for Gower distances.
use ndarray::{Array1, Array2, ArrayView1, Axis};

/// Per-column mean/std standardisation.
#[derive(Clone, Debug)]
pub struct Scaler {
    pub mean: Array1<f64>,
    pub std: Array1<f64>,
}

impl Scaler {
    /// Minimum stddev to avoid division by zero when transforming.
    const MIN_STD: f64 = 1e-12;

    /// Fit on `x` where rows are samples and columns are features.
    pub fn fit(x: &Array2<f64>) -> Scaler {
        let n = x.nrows().max(1) as f64;
        let mean = x.mean_axis(Axis(0)).unwrap_or_else(|| Array1::zeros(x.ncols()));
        let mut std = Array1::zeros(x.ncols());
        for (j, column) in x.axis_iter(Axis(1)).enumerate() {
            let var = column.iter().map(|v| (v - mean[j]).powi(2)).sum::<f64>() / n;
            std[j] = var.sqrt().max(Self::MIN_STD);
        }
        Scaler { mean, std }
    }

    pub fn transform(&self, x: &Array2<f64>) -> Array2<f64> {
        let mut out = x.clone();
        for mut row in out.outer_iter_mut() {
            row -= &self.mean;
            row /= &self.std;
        }
        out
    }

    pub fn transform_row(&self, row: ArrayView1<f64>) -> Array1<f64> {
        (&row - &self.mean) / &self.std
    }
}

/// Per-column ranges for Gower distances.
#[derive(Clone, Debug)]
pub struct Ranges {
    pub range: Array1<f64>,
}

impl Ranges {
    /// Ranges over the rows of `x` and `point` together, so every distance
    /// from `point` to a row of `x` is at most one range.
    pub fn fit_including(x: &Array2<f64>, point: ArrayView1<f64>) -> Ranges {
        let range = x
            .axis_iter(Axis(1))
            .zip(point.iter())
            .map(|(column, &p)| {
                let values: Vec<f64> = column.iter().copied().chain(std::iter::once(p)).collect();
                match crate::stats::min_max(&values) {
                    Some((lo, hi)) => hi - lo,
                    None => 0.0,
                }
            })
            .collect();
        Ranges { range }
    }
}
