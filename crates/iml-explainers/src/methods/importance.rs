//! Permutation feature importance.
//!
//! The loss of the model on the observed data is compared with its loss
//! after the values of one feature have been shuffled across rows. A feature
//! the model relies on loses information when shuffled, and the loss grows.
use anyhow::Result;
use ndarray::{s, Array1, Array2};
use plotly::common::{ErrorData, ErrorType, Orientation};
use plotly::layout::{Axis, Layout};
use plotly::{Bar, Plot};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

use crate::data::DataSampler;
use crate::error::ExplainError;
use crate::experiment::{Design, Experiment, Present};
use crate::loss::Loss;
use crate::predictor::Prediction;
use crate::stats;
use crate::table::ResultTable;

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Compare {
    /// permuted error / original error
    Ratio,
    /// permuted error - original error
    Difference,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct FeatureImportanceConfig {
    pub loss: Loss,
    pub compare: Compare,
    pub n_repetitions: usize,
    /// Feature indices to score; `None` scores all of them.
    pub features: Option<Vec<usize>>,
}

impl Default for FeatureImportanceConfig {
    fn default() -> Self {
        FeatureImportanceConfig {
            loss: Loss::Mae,
            compare: Compare::Ratio,
            n_repetitions: 5,
            features: None,
        }
    }
}

pub struct FeatureImportance {
    config: FeatureImportanceConfig,
}

impl FeatureImportance {
    pub fn new(config: FeatureImportanceConfig) -> Result<Self> {
        if config.n_repetitions == 0 {
            return Err(ExplainError::InvalidParameter("n_repetitions must be at least 1".to_string()).into());
        }
        if let Some(features) = &config.features {
            let mut sorted = features.clone();
            sorted.sort_unstable();
            if let Some(w) = sorted.windows(2).find(|w| w[0] == w[1]) {
                return Err(ExplainError::InvalidParameter(format!("feature {} is listed more than once", w[0])).into());
            }
        }
        Ok(FeatureImportance { config })
    }

    fn features(&self, sampler: &DataSampler) -> Result<Vec<usize>> {
        match &self.config.features {
            Some(features) => {
                for &j in features {
                    sampler.dataset().check_feature(j)?;
                }
                Ok(features.clone())
            }
            None => Ok((0..sampler.n_features()).collect()),
        }
    }
}

/// Original data followed by one shuffled copy per (feature, repetition).
pub struct PermutationDesign {
    matrix: Array2<f64>,
    y: Array1<f64>,
    n_rows: usize,
    blocks: Vec<(usize, usize)>,
}

impl Design for PermutationDesign {
    fn matrix(&self) -> &Array2<f64> {
        &self.matrix
    }
}

pub struct PermutationErrors {
    original: f64,
    /// (feature, repetition, error)
    permuted: Vec<(usize, usize, f64)>,
}

impl Experiment for FeatureImportance {
    type Design = PermutationDesign;
    type Quantity = PermutationErrors;
    type Output = FeatureImportanceResult;

    fn name(&self) -> &'static str {
        "feature_importance"
    }

    fn sample(&self, sampler: &DataSampler, _rng: &mut StdRng) -> Result<Array2<f64>> {
        if sampler.target().is_none() {
            return Err(ExplainError::MissingTarget.into());
        }
        Ok(sampler.all().clone())
    }

    fn intervene(&self, sampled: Array2<f64>, sampler: &DataSampler, rng: &mut StdRng) -> Result<Self::Design> {
        let y = sampler.target().ok_or(ExplainError::MissingTarget)?.clone();
        let features = self.features(sampler)?;
        let n = sampled.nrows();
        let reps = self.config.n_repetitions;
        let blocks: Vec<(usize, usize)> = features
            .iter()
            .flat_map(|&j| (0..reps).map(move |r| (j, r)))
            .collect();

        let mut matrix = DataSampler::replicate(&sampled, blocks.len() + 1);
        let mut order: Vec<usize> = (0..n).collect();
        for (b, &(j, _)) in blocks.iter().enumerate() {
            order.shuffle(rng);
            let start = (b + 1) * n;
            let mut column = matrix.slice_mut(s![start..start + n, j]);
            for (i, &src) in order.iter().enumerate() {
                column[i] = sampled[[src, j]];
            }
        }

        Ok(PermutationDesign {
            matrix,
            y,
            n_rows: n,
            blocks,
        })
    }

    fn quantity(&self, design: &Self::Design, predictions: &Prediction) -> Result<Self::Quantity> {
        let n = design.n_rows;
        let block = |b: usize| Prediction {
            values: predictions.values.slice(s![b * n..(b + 1) * n, ..]).to_owned(),
            outputs: predictions.outputs.clone(),
        };

        let original = self.config.loss.evaluate(&design.y, &block(0))?;
        let permuted = design
            .blocks
            .iter()
            .enumerate()
            .map(|(b, &(j, r))| Ok((j, r, self.config.loss.evaluate(&design.y, &block(b + 1))?)))
            .collect::<Result<Vec<_>>>()?;
        Ok(PermutationErrors { original, permuted })
    }

    fn aggregate(
        &self,
        _design: Self::Design,
        quantity: Self::Quantity,
        sampler: &DataSampler,
    ) -> Result<Self::Output> {
        let original = quantity.original;
        if self.config.compare == Compare::Ratio && original == 0.0 {
            anyhow::bail!("original error is 0, use compare = difference instead of ratio");
        }
        let compare = |err: f64| match self.config.compare {
            Compare::Ratio => err / original,
            Compare::Difference => err - original,
        };

        let mut rows = Vec::new();
        for j in self.features(sampler)? {
            let errors: Vec<f64> = quantity
                .permuted
                .iter()
                .filter(|(f, _, _)| *f == j)
                .map(|(_, _, e)| *e)
                .collect();
            let scores: Vec<f64> = errors.iter().map(|&e| compare(e)).collect();
            rows.push(FeatureImportanceRow {
                feature: sampler.dataset().features[j].name.clone(),
                importance: stats::median(&scores),
                importance_05: stats::quantile(&scores, 0.05),
                importance_95: stats::quantile(&scores, 0.95),
                permutation_error: stats::median(&errors),
            });
        }
        rows.sort_by(|a, b| {
            b.importance
                .partial_cmp(&a.importance)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        Ok(FeatureImportanceResult {
            loss: self.config.loss,
            compare: self.config.compare,
            original_error: original,
            rows,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureImportanceRow {
    pub feature: String,
    /// Median over repetitions
    pub importance: f64,
    pub importance_05: f64,
    pub importance_95: f64,
    pub permutation_error: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureImportanceResult {
    pub loss: Loss,
    pub compare: Compare,
    pub original_error: f64,
    /// Sorted by importance, most important first.
    pub rows: Vec<FeatureImportanceRow>,
}

impl FeatureImportanceResult {
    pub fn get(&self, feature: &str) -> Option<&FeatureImportanceRow> {
        self.rows.iter().find(|r| r.feature == feature)
    }
}

impl Present for FeatureImportanceResult {
    fn title(&self) -> String {
        format!("Permutation feature importance (loss: {})", self.loss)
    }

    fn table(&self) -> ResultTable {
        let mut table = ResultTable::new(vec![
            "feature",
            "importance.05",
            "importance",
            "importance.95",
            "permutation.error",
        ]);
        for r in &self.rows {
            table.push(vec![
                r.feature.clone().into(),
                r.importance_05.into(),
                r.importance.into(),
                r.importance_95.into(),
                r.permutation_error.into(),
            ]);
        }
        table
    }

    fn plot(&self) -> Plot {
        // Horizontal bars read top-down, so plot the least important first.
        let rows: Vec<&FeatureImportanceRow> = self.rows.iter().rev().collect();
        let names: Vec<String> = rows.iter().map(|r| r.feature.clone()).collect();
        let values: Vec<f64> = rows.iter().map(|r| r.importance).collect();
        let upper: Vec<f64> = rows.iter().map(|r| r.importance_95 - r.importance).collect();
        let lower: Vec<f64> = rows.iter().map(|r| r.importance - r.importance_05).collect();

        let trace = Bar::new(values, names)
            .orientation(Orientation::Horizontal)
            .name("importance")
            .error_x(ErrorData::new(ErrorType::Data).array(upper).array_minus(lower));

        let x_title = match self.compare {
            Compare::Ratio => format!("Feature importance ({} ratio)", self.loss),
            Compare::Difference => format!("Feature importance ({} difference)", self.loss),
        };
        let mut plot = Plot::new();
        plot.add_trace(trace);
        plot.set_layout(
            Layout::new()
                .title(self.title().as_str())
                .x_axis(Axis::new().title(x_title.as_str()))
                .y_axis(Axis::new().title("Feature")),
        );
        plot
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Dataset;
    use crate::experiment::run;
    use crate::predictor::{FnPredictor, Model};
    use ndarray::{Array1, Array2};

    fn linear_setup() -> (Model, DataSampler) {
        // y = 3 * x0 + 0 * x1
        let x = Array2::from_shape_fn((50, 2), |(i, j)| if j == 0 { i as f64 } else { ((i * 7) % 11) as f64 });
        let y: Array1<f64> = x.column(0).mapv(|v| 3.0 * v + 1.0);
        let data = Dataset::from_matrix(x, &["signal", "noise"]).unwrap().with_target(y).unwrap();
        let model = Model::new(FnPredictor::new(|x: &Array2<f64>| {
            Ok(x.column(0).mapv(|v| 3.0 * v) + 0.5)
        }));
        (model, DataSampler::new(data))
    }

    #[test]
    fn test_signal_feature_ranks_first() {
        let (model, sampler) = linear_setup();
        let exp = FeatureImportance::new(FeatureImportanceConfig {
            compare: Compare::Ratio,
            ..Default::default()
        })
        .unwrap();
        let res = run(&exp, &model, &sampler, Some(42)).unwrap();

        assert!((res.original_error - 0.5).abs() < 1e-12);
        assert_eq!(res.rows[0].feature, "signal");
        assert!(res.get("signal").unwrap().importance > 10.0);
        // The model ignores the noise column entirely.
        assert!((res.get("noise").unwrap().importance - 1.0).abs() < 1e-12);
        let r = res.get("signal").unwrap();
        assert!(r.importance_05 <= r.importance && r.importance <= r.importance_95);
    }

    #[test]
    fn test_ratio_needs_nonzero_original_error() {
        let (_, sampler) = linear_setup();
        let exact = Model::new(FnPredictor::new(|x: &Array2<f64>| Ok(x.column(0).mapv(|v| 3.0 * v + 1.0))));
        let ratio = FeatureImportance::new(FeatureImportanceConfig::default()).unwrap();
        let err = run(&ratio, &exact, &sampler, Some(1)).unwrap_err();
        assert!(format!("{:#}", err).contains("original error is 0"));

        let difference = FeatureImportance::new(FeatureImportanceConfig {
            compare: Compare::Difference,
            ..Default::default()
        })
        .unwrap();
        let res = run(&difference, &exact, &sampler, Some(1)).unwrap();
        assert_eq!(res.original_error, 0.0);
        assert_eq!(res.get("noise").unwrap().importance, 0.0);
    }

    #[test]
    fn test_duplicate_features_rejected() {
        let err = FeatureImportance::new(FeatureImportanceConfig {
            features: Some(vec![1, 0, 1]),
            ..Default::default()
        })
        .err()
        .unwrap();
        assert!(matches!(
            err.downcast_ref::<ExplainError>(),
            Some(ExplainError::InvalidParameter(_))
        ));
        assert!(FeatureImportance::new(FeatureImportanceConfig {
            features: Some(vec![1, 0]),
            ..Default::default()
        })
        .is_ok());
    }

    #[test]
    fn test_difference_and_subset() {
        let (model, sampler) = linear_setup();
        let exp = FeatureImportance::new(FeatureImportanceConfig {
            compare: Compare::Difference,
            features: Some(vec![1]),
            n_repetitions: 3,
            ..Default::default()
        })
        .unwrap();
        let res = run(&exp, &model, &sampler, Some(1)).unwrap();
        assert_eq!(res.rows.len(), 1);
        assert!(res.rows[0].importance.abs() < 1e-12);
        assert_eq!(res.table().len(), 1);
    }

    #[test]
    fn test_requires_target() {
        let (model, sampler) = linear_setup();
        let data = sampler.dataset().clone();
        let no_target = DataSampler::new(Dataset { y: None, ..data });
        let exp = FeatureImportance::new(FeatureImportanceConfig::default()).unwrap();
        let err = run(&exp, &model, &no_target, Some(1)).unwrap_err();
        assert!(err.chain().any(|e| matches!(
            e.downcast_ref::<ExplainError>(),
            Some(ExplainError::MissingTarget)
        )));
    }

    #[test]
    fn test_zero_repetitions_rejected() {
        let cfg = FeatureImportanceConfig {
            n_repetitions: 0,
            ..Default::default()
        };
        assert!(FeatureImportance::new(cfg).is_err());
    }

    #[test]
    fn test_same_seed_same_result() {
        let (model, sampler) = linear_setup();
        let exp = FeatureImportance::new(FeatureImportanceConfig::default()).unwrap();
        let a = run(&exp, &model, &sampler, Some(9)).unwrap();
        let b = run(&exp, &model, &sampler, Some(9)).unwrap();
        assert_eq!(a.table(), b.table());
    }
}
