use anyhow::Result;
use gbdt::config::Config;
use gbdt::decision_tree::{Data, DataVec};
use gbdt::gradient_boost::GBDT;
use ndarray::{Array1, Array2};

use crate::config::{ModelConfig, ModelType};
use crate::error::ExplainError;
use crate::predictor::Predictor;

/// Gradient boosted decision trees from the `gbdt` crate, exposed as a
/// `Predictor`.
pub struct GbdtModel {
    model: GBDT,
    n_features: usize,
    classification: bool,
}

fn to_data_vec(x: &Array2<f64>, y: Option<&Array1<f64>>) -> DataVec {
    let mut data = DataVec::new();
    for (i, row) in x.outer_iter().enumerate() {
        let features: Vec<f32> = row.iter().map(|&v| v as f32).collect();
        let label = y.map(|y| y[i] as f32).unwrap_or(0.0);
        data.push(Data::new_training_data(features, 1.0, label, None));
    }
    data
}

impl GbdtModel {
    /// Fit on `x` and `y`. Classification targets are read as `y > 0.5`.
    pub fn fit(params: &ModelConfig, x: &Array2<f64>, y: &Array1<f64>) -> Result<Self> {
        if x.nrows() != y.len() {
            return Err(ExplainError::ShapeMismatch {
                what: "target".to_string(),
                expected: x.nrows(),
                found: y.len(),
            }
            .into());
        }
        let feature_size = x.ncols();

        match &params.model_type {
            ModelType::GBDT {
                max_depth,
                num_boost_round,
                debug,
                training_optimization_level,
                loss_type,
            } => {
                let classification = loss_type == "LogLikelyhood";
                let mut config = Config::new();

                config.set_feature_size(feature_size);
                config.set_shrinkage(params.learning_rate);
                config.set_max_depth(*max_depth);
                config.set_iterations(*num_boost_round as usize);
                config.set_debug(*debug);
                config.set_training_optimization_level(*training_optimization_level);
                config.set_loss(loss_type);

                let mut gbdt = GBDT::new(&config);

                // LogLikelyhood expects labels in {-1, 1}
                let labels = if classification {
                    y.mapv(|v| if v > 0.5 { 1.0 } else { -1.0 })
                } else {
                    y.clone()
                };
                let mut train_x = to_data_vec(x, Some(&labels));

                log::info!(
                    "Fitting GBDT ({}) on {} rows x {} features, {} rounds",
                    loss_type,
                    x.nrows(),
                    feature_size,
                    num_boost_round
                );
                gbdt.fit(&mut train_x);

                Ok(GbdtModel {
                    model: gbdt,
                    n_features: feature_size,
                    classification,
                })
            }
        }
    }
}

impl Predictor for GbdtModel {
    fn predict(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        if x.ncols() != self.n_features {
            return Err(ExplainError::ShapeMismatch {
                what: "model input columns".to_string(),
                expected: self.n_features,
                found: x.ncols(),
            }
            .into());
        }
        let test_x = to_data_vec(x, None);
        let predictions = self.model.predict(&test_x);
        let values: Vec<f64> = predictions.iter().map(|&p| p as f64).collect();
        Ok(Array2::from_shape_vec((x.nrows(), 1), values)?)
    }

    fn output_names(&self) -> Vec<String> {
        if self.classification {
            vec!["probability".to_string()]
        } else {
            vec!["prediction".to_string()]
        }
    }

    fn name(&self) -> &str {
        "gbdt"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gbdt_regression_tracks_signal() {
        let x = Array2::from_shape_fn((60, 2), |(i, j)| if j == 0 { (i % 12) as f64 } else { (i % 5) as f64 });
        let y: Array1<f64> = x.column(0).mapv(|a| if a > 5.0 { 10.0 } else { 0.0 });
        let params = ModelConfig::new(
            0.3,
            ModelType::GBDT {
                max_depth: 3,
                num_boost_round: 30,
                debug: false,
                training_optimization_level: 2,
                loss_type: "SquaredError".to_string(),
            },
        );
        let model = GbdtModel::fit(&params, &x, &y).unwrap();
        let pred = model.predict(&x).unwrap();
        assert_eq!(pred.dim(), (60, 1));
        let low = pred[[0, 0]];
        let high = pred[[11, 0]];
        assert!(high > low);
        assert_eq!(model.output_names(), vec!["prediction".to_string()]);
        assert!(model.predict(&Array2::zeros((1, 3))).is_err());
    }
}
