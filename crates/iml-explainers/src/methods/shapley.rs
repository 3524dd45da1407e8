//! Shapley values by Monte Carlo sampling.
//!
//! For each feature and draw, a background row and a feature permutation
//! are sampled. Two rows are built: the features up to and including the
//! explained one (in permutation order) come from the point of interest and
//! the rest from the background row; the second row additionally takes the
//! explained feature from the background. The difference of their
//! predictions is one sample of the feature's marginal contribution.
use anyhow::Result;
use ndarray::{s, Array1, Array2, Axis};
use plotly::Plot;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

use crate::data::DataSampler;
use crate::error::ExplainError;
use crate::experiment::{Design, Experiment, Present};
use crate::predictor::Prediction;
use crate::report::plots::{horizontal_bars, BarSeries};
use crate::stats;
use crate::table::ResultTable;

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct ShapleyConfig {
    pub x_interest: Vec<f64>,
    /// Draws per feature.
    pub sample_size: usize,
}

impl Default for ShapleyConfig {
    fn default() -> Self {
        ShapleyConfig {
            x_interest: Vec::new(),
            sample_size: 100,
        }
    }
}

pub struct Shapley {
    config: ShapleyConfig,
}

impl Shapley {
    pub fn new(config: ShapleyConfig) -> Result<Self> {
        if config.sample_size == 0 {
            return Err(ExplainError::InvalidParameter("sample_size must be at least 1".to_string()).into());
        }
        Ok(Shapley { config })
    }
}

/// Layout of the design matrix:
/// - rows `2 * (j * m + d)` and `2 * (j * m + d) + 1` hold x₊ⱼ and x₋ⱼ of
///   draw `d` for feature `j`;
/// - row `2 * p * m` holds the point of interest;
/// - the remaining rows are the reference data, for the average prediction.
pub struct ShapleyDesign {
    matrix: Array2<f64>,
    n_features: usize,
    sample_size: usize,
}

impl Design for ShapleyDesign {
    fn matrix(&self) -> &Array2<f64> {
        &self.matrix
    }
}

impl ShapleyDesign {
    fn n_pairs(&self) -> usize {
        self.n_features * self.sample_size
    }
}

/// Marginal contributions `diffs[k][j][d]` plus the two reference predictions.
pub struct Contributions {
    diffs: Vec<Vec<Vec<f64>>>,
    y_hat_interest: Vec<f64>,
    y_hat_average: Vec<f64>,
    outputs: Vec<String>,
}

impl Experiment for Shapley {
    type Design = ShapleyDesign;
    type Quantity = Contributions;
    type Output = ShapleyResult;

    fn name(&self) -> &'static str {
        "shapley"
    }

    /// One background row per (feature, draw), drawn with replacement.
    fn sample(&self, sampler: &DataSampler, rng: &mut StdRng) -> Result<Array2<f64>> {
        sampler.sample(sampler.n_features() * self.config.sample_size, true, rng)
    }

    fn intervene(&self, sampled: Array2<f64>, sampler: &DataSampler, rng: &mut StdRng) -> Result<Self::Design> {
        sampler.dataset().check_instance(&self.config.x_interest)?;
        let x = Array1::from_vec(self.config.x_interest.clone());
        let p = sampler.n_features();
        let m = self.config.sample_size;
        let n_pairs = p * m;
        let reference = sampler.all();

        let mut matrix = Array2::zeros((2 * n_pairs + 1 + reference.nrows(), p));
        let mut order: Vec<usize> = (0..p).collect();
        for j in 0..p {
            for d in 0..m {
                let pair = j * m + d;
                let z = sampled.row(pair);
                order.shuffle(rng);
                let mut plus = z.to_owned();
                for &f in order.iter().take_while(|&&f| f != j) {
                    plus[f] = x[f];
                }
                plus[j] = x[j];
                let mut minus = plus.clone();
                minus[j] = z[j];
                matrix.row_mut(2 * pair).assign(&plus);
                matrix.row_mut(2 * pair + 1).assign(&minus);
            }
        }
        matrix.row_mut(2 * n_pairs).assign(&x);
        matrix.slice_mut(s![2 * n_pairs + 1.., ..]).assign(reference);

        Ok(ShapleyDesign {
            matrix,
            n_features: p,
            sample_size: m,
        })
    }

    fn quantity(&self, design: &Self::Design, predictions: &Prediction) -> Result<Self::Quantity> {
        let n_pairs = design.n_pairs();
        let m = design.sample_size;
        let values = &predictions.values;
        let diffs = (0..predictions.n_outputs())
            .map(|k| {
                (0..design.n_features)
                    .map(|j| {
                        (0..m)
                            .map(|d| {
                                let pair = j * m + d;
                                values[[2 * pair, k]] - values[[2 * pair + 1, k]]
                            })
                            .collect()
                    })
                    .collect()
            })
            .collect();
        let y_hat_interest = values.row(2 * n_pairs).to_vec();
        let y_hat_average = values
            .slice(s![2 * n_pairs + 1.., ..])
            .mean_axis(Axis(0))
            .map(|a| a.to_vec())
            .ok_or_else(|| anyhow::anyhow!("no reference rows to average"))?;
        Ok(Contributions {
            diffs,
            y_hat_interest,
            y_hat_average,
            outputs: predictions.outputs.clone(),
        })
    }

    fn aggregate(
        &self,
        _design: Self::Design,
        quantity: Self::Quantity,
        sampler: &DataSampler,
    ) -> Result<Self::Output> {
        let data = sampler.dataset();
        let phi: Vec<Vec<f64>> = quantity
            .diffs
            .iter()
            .map(|per_feature| per_feature.iter().map(|d| stats::mean(d)).collect())
            .collect();
        let phi_var: Vec<Vec<f64>> = quantity
            .diffs
            .iter()
            .map(|per_feature| per_feature.iter().map(|d| stats::variance(d)).collect())
            .collect();

        for (k, output) in quantity.outputs.iter().enumerate() {
            let total: f64 = phi[k].iter().sum();
            log::debug!(
                "[shapley] {}: sum of phi {:.4}, prediction gap {:.4}",
                output,
                total,
                quantity.y_hat_interest[k] - quantity.y_hat_average[k]
            );
        }

        Ok(ShapleyResult {
            features: data.feature_names(),
            feature_values: (0..data.ncols())
                .map(|j| format!("{}={}", data.features[j].name, data.format_value(j, self.config.x_interest[j])))
                .collect(),
            x_interest: self.config.x_interest.clone(),
            outputs: quantity.outputs,
            sample_size: self.config.sample_size,
            phi,
            phi_var,
            y_hat_interest: quantity.y_hat_interest,
            y_hat_average: quantity.y_hat_average,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShapleyResult {
    pub features: Vec<String>,
    pub feature_values: Vec<String>,
    pub x_interest: Vec<f64>,
    pub outputs: Vec<String>,
    pub sample_size: usize,
    /// `phi[k][j]`: contribution of feature `j` to output `k`.
    pub phi: Vec<Vec<f64>>,
    pub phi_var: Vec<Vec<f64>>,
    pub y_hat_interest: Vec<f64>,
    pub y_hat_average: Vec<f64>,
}

impl ShapleyResult {
    pub fn phi_of(&self, feature: &str, output: usize) -> Option<f64> {
        let j = self.features.iter().position(|f| f == feature)?;
        self.phi.get(output).map(|row| row[j])
    }
}

impl Present for ShapleyResult {
    fn title(&self) -> String {
        let parts: Vec<String> = self
            .outputs
            .iter()
            .enumerate()
            .map(|(k, o)| {
                format!(
                    "{}: actual {:.3}, average {:.3}",
                    o, self.y_hat_interest[k], self.y_hat_average[k]
                )
            })
            .collect();
        format!("Shapley values ({})", parts.join("; "))
    }

    fn table(&self) -> ResultTable {
        let mut table = ResultTable::new(vec!["feature", "feature.value", ".class", "phi", "phi.var"]);
        for (k, output) in self.outputs.iter().enumerate() {
            for j in 0..self.features.len() {
                table.push(vec![
                    self.features[j].clone().into(),
                    self.feature_values[j].clone().into(),
                    output.clone().into(),
                    self.phi[k][j].into(),
                    self.phi_var[k][j].into(),
                ]);
            }
        }
        table
    }

    fn plot(&self) -> Plot {
        let series = self
            .outputs
            .iter()
            .zip(&self.phi)
            .map(|(output, phi)| BarSeries {
                name: output.clone(),
                values: phi.clone(),
                labels: self.feature_values.clone(),
            })
            .collect();
        horizontal_bars(series, &self.title(), "phi", "Feature value")
    }
}
