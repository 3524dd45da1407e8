//! Local surrogate model (LIME).
//!
//! Reference rows are weighted by their proximity to the point of interest
//! and a sparse weighted linear model is fitted to the model's predictions on
//! them. Categorical features enter the linear model as indicators of
//! matching the point of interest.
use anyhow::Result;
use ndarray::{concatenate, s, Array1, Array2, Axis};
use plotly::Plot;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

use crate::data::{DataSampler, Dataset};
use crate::error::ExplainError;
use crate::experiment::{Design, Experiment, Present};
use crate::predictor::Prediction;
use crate::preprocessing::{Ranges, Scaler};
use crate::report::plots::{horizontal_bars, BarSeries};
use crate::stats::{weighted_least_squares, weighted_r_squared};
use crate::table::ResultTable;

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Distance {
    #[default]
    Gower,
    Euclidean,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct LimeConfig {
    pub x_interest: Vec<f64>,
    /// Number of features in the local model.
    pub k: usize,
    pub distance: Distance,
    /// Kernel width for the Euclidean distance; `0.75 * sqrt(p)` when unset.
    pub kernel_width: Option<f64>,
    pub sample_size: Option<usize>,
}

impl Default for LimeConfig {
    fn default() -> Self {
        LimeConfig {
            x_interest: Vec::new(),
            k: 3,
            distance: Distance::Gower,
            kernel_width: None,
            sample_size: None,
        }
    }
}

pub struct Lime {
    config: LimeConfig,
}

impl Lime {
    pub fn new(config: LimeConfig) -> Result<Self> {
        if config.k == 0 {
            return Err(ExplainError::InvalidParameter("k must be at least 1".to_string()).into());
        }
        if matches!(config.kernel_width, Some(w) if w <= 0.0) {
            return Err(ExplainError::InvalidParameter("kernel_width must be positive".to_string()).into());
        }
        Ok(Lime { config })
    }

    fn kernel_width(&self, p: usize) -> f64 {
        self.config.kernel_width.unwrap_or(0.75 * (p as f64).sqrt())
    }

    /// Proximity weight of every row of `rows` to the point of interest.
    fn weights(&self, data: &Dataset, rows: &Array2<f64>, x: &Array1<f64>) -> Vec<f64> {
        let p = data.ncols();
        match self.config.distance {
            Distance::Gower => {
                let ranges = Ranges::fit_including(&data.x, x.view());
                rows.outer_iter()
                    .map(|row| {
                        let d: f64 = (0..p)
                            .map(|j| {
                                if data.features[j].is_categorical() {
                                    if row[j] == x[j] { 0.0 } else { 1.0 }
                                } else if ranges.range[j] > 0.0 {
                                    ((row[j] - x[j]).abs() / ranges.range[j]).min(1.0)
                                } else {
                                    0.0
                                }
                            })
                            .sum::<f64>()
                            / p as f64;
                        1.0 - d
                    })
                    .collect()
            }
            Distance::Euclidean => {
                let scaler = Scaler::fit(&data.x);
                let scaled = scaler.transform(rows);
                let target = scaler.transform_row(x.view());
                let width = self.kernel_width(p);
                scaled
                    .outer_iter()
                    .zip(rows.outer_iter())
                    .map(|(z, raw)| {
                        let d2: f64 = (0..p)
                            .map(|j| {
                                if data.features[j].is_categorical() {
                                    if raw[j] == x[j] { 0.0 } else { 1.0 }
                                } else {
                                    (z[j] - target[j]).powi(2)
                                }
                            })
                            .sum();
                        (-d2 / (width * width)).exp().sqrt()
                    })
                    .collect()
            }
        }
    }
}

/// Recode categorical columns as indicators of equality with `x`.
fn recode(data: &Dataset, rows: &Array2<f64>, x: &Array1<f64>) -> Array2<f64> {
    let mut out = rows.clone();
    for (j, feature) in data.features.iter().enumerate() {
        if feature.is_categorical() {
            out.column_mut(j).mapv_inplace(|v| if v == x[j] { 1.0 } else { 0.0 });
        }
    }
    out
}

/// Greedy forward selection of up to `k` columns by weighted squared error.
fn forward_select(x: &Array2<f64>, y: &[f64], w: &[f64], k: usize) -> Vec<usize> {
    let mut selected: Vec<usize> = Vec::new();
    while selected.len() < k.min(x.ncols()) {
        let mut best: Option<(usize, f64)> = None;
        for j in (0..x.ncols()).filter(|j| !selected.contains(j)) {
            let mut cols = selected.clone();
            cols.push(j);
            let sub = x.select(Axis(1), &cols);
            if let Some((intercept, beta)) = weighted_least_squares(&sub, y, w) {
                let sse: f64 = sub
                    .outer_iter()
                    .zip(y.iter().zip(w))
                    .map(|(row, (yi, wi))| {
                        let fit = intercept + row.iter().zip(&beta).map(|(a, b)| a * b).sum::<f64>();
                        wi * (yi - fit).powi(2)
                    })
                    .sum();
                if best.map_or(true, |(_, b)| sse < b - 1e-12) {
                    best = Some((j, sse));
                }
            }
        }
        match best {
            Some((j, _)) => selected.push(j),
            None => break,
        }
    }
    selected
}

/// Reference rows with the point of interest appended as the last row.
pub struct LimeDesign {
    matrix: Array2<f64>,
    x_interest: Array1<f64>,
}

impl Design for LimeDesign {
    fn matrix(&self) -> &Array2<f64> {
        &self.matrix
    }
}

impl Experiment for Lime {
    type Design = LimeDesign;
    type Quantity = Prediction;
    type Output = LimeResult;

    fn name(&self) -> &'static str {
        "lime"
    }

    fn sample(&self, sampler: &DataSampler, rng: &mut StdRng) -> Result<Array2<f64>> {
        sampler.sample_rows(self.config.sample_size, rng)
    }

    fn intervene(&self, sampled: Array2<f64>, sampler: &DataSampler, _rng: &mut StdRng) -> Result<Self::Design> {
        sampler.dataset().check_instance(&self.config.x_interest)?;
        let x_interest = Array1::from_vec(self.config.x_interest.clone());
        let last = x_interest.view().insert_axis(Axis(0));
        let matrix = concatenate(Axis(0), &[sampled.view(), last])?;
        Ok(LimeDesign { matrix, x_interest })
    }

    fn quantity(&self, _design: &Self::Design, predictions: &Prediction) -> Result<Self::Quantity> {
        Ok(predictions.clone())
    }

    fn aggregate(
        &self,
        design: Self::Design,
        quantity: Self::Quantity,
        sampler: &DataSampler,
    ) -> Result<Self::Output> {
        let data = sampler.dataset();
        let n = design.matrix.nrows() - 1;
        let rows = design.matrix.slice(s![..n, ..]).to_owned();
        let x = &design.x_interest;

        let weights = self.weights(data, &rows, x);
        if weights.iter().all(|&w| w <= 0.0) {
            anyhow::bail!("all reference rows have zero weight; increase the kernel width");
        }
        let recoded = recode(data, &rows, x);
        let x_recoded: Vec<f64> = (0..data.ncols())
            .map(|j| if data.features[j].is_categorical() { 1.0 } else { x[j] })
            .collect();

        let mut models = Vec::with_capacity(quantity.n_outputs());
        for (k, output) in quantity.outputs.iter().enumerate() {
            let y: Vec<f64> = quantity.values.slice(s![..n, k]).to_vec();
            let selected = forward_select(&recoded, &y, &weights, self.config.k);
            let sub = recoded.select(Axis(1), &selected);
            let (intercept, beta) = weighted_least_squares(&sub, &y, &weights)
                .ok_or_else(|| anyhow::anyhow!("local model for '{}' is singular", output))?;

            let fitted: Vec<f64> = sub
                .outer_iter()
                .map(|row| intercept + row.iter().zip(&beta).map(|(a, b)| a * b).sum::<f64>())
                .collect();
            let terms: Vec<LimeTerm> = selected
                .iter()
                .zip(&beta)
                .map(|(&j, &b)| LimeTerm {
                    feature: data.features[j].name.clone(),
                    feature_value: format!("{}={}", data.features[j].name, data.format_value(j, x[j])),
                    beta: b,
                    effect: b * x_recoded[j],
                })
                .collect();
            let prediction = intercept + terms.iter().map(|t| t.effect).sum::<f64>();

            models.push(LocalModel {
                output: output.clone(),
                intercept,
                terms,
                prediction,
                model_prediction: quantity.values[[n, k]],
                r_squared: weighted_r_squared(&y, &fitted, &weights),
            });
        }
        log::info!(
            "Local model fitted on {} rows with {} feature(s) per output",
            n,
            self.config.k.min(data.ncols())
        );

        Ok(LimeResult {
            x_interest: x.to_vec(),
            distance: self.config.distance,
            models,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimeTerm {
    pub feature: String,
    /// `name=value` of the point of interest.
    pub feature_value: String,
    pub beta: f64,
    /// `beta` times the recoded value at the point of interest.
    pub effect: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalModel {
    pub output: String,
    pub intercept: f64,
    pub terms: Vec<LimeTerm>,
    /// Local model at the point of interest.
    pub prediction: f64,
    /// Black-box model at the point of interest.
    pub model_prediction: f64,
    pub r_squared: f64,
}

impl LocalModel {
    pub fn term(&self, feature: &str) -> Option<&LimeTerm> {
        self.terms.iter().find(|t| t.feature == feature)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimeResult {
    pub x_interest: Vec<f64>,
    pub distance: Distance,
    pub models: Vec<LocalModel>,
}

impl Present for LimeResult {
    fn title(&self) -> String {
        let parts: Vec<String> = self
            .models
            .iter()
            .map(|m| {
                format!(
                    "{}: local {:.3}, model {:.3}",
                    m.output, m.prediction, m.model_prediction
                )
            })
            .collect();
        format!("Local model ({})", parts.join("; "))
    }

    fn table(&self) -> ResultTable {
        let mut table = ResultTable::new(vec!["feature", "feature.value", ".class", "beta", "effect"]);
        for model in &self.models {
            table.push(vec![
                "(intercept)".into(),
                "".into(),
                model.output.clone().into(),
                model.intercept.into(),
                model.intercept.into(),
            ]);
            for term in &model.terms {
                table.push(vec![
                    term.feature.clone().into(),
                    term.feature_value.clone().into(),
                    model.output.clone().into(),
                    term.beta.into(),
                    term.effect.into(),
                ]);
            }
        }
        table
    }

    fn plot(&self) -> Plot {
        let series = self
            .models
            .iter()
            .map(|model| BarSeries {
                name: model.output.clone(),
                values: model.terms.iter().map(|t| t.effect).collect(),
                labels: model.terms.iter().map(|t| t.feature_value.clone()).collect(),
            })
            .collect();
        horizontal_bars(series, &self.title(), "Effect", "Feature value")
    }
}
