use anyhow::Result;
use ndarray::{Array1, Array2};

use crate::config::{ModelConfig, ModelType};
use crate::predictor::Model;

/// Fit the model described by `params` and wrap it for the experiments.
pub fn build_model(params: &ModelConfig, x: &Array2<f64>, y: &Array1<f64>) -> Result<Model> {
    match params.model_type {
        ModelType::GBDT { .. } => {
            let model = crate::models::gbdt::GbdtModel::fit(params, x, y)?;
            Ok(Model::new(model))
        }
    }
}
