use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Configuration of the model the CLI fits before explaining it.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct ModelConfig {
    pub learning_rate: f32,

    #[serde(flatten)]
    pub model_type: ModelType,
}

/// Supported model types and their hyper-parameters.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub enum ModelType {
    GBDT {
        max_depth: u32,
        num_boost_round: u32,
        debug: bool,
        training_optimization_level: u8,
        /// `SquaredError` and `LAD` regress, `LogLikelyhood` classifies.
        loss_type: String,
    },
}

impl Default for ModelType {
    fn default() -> Self {
        ModelType::GBDT {
            max_depth: 4,
            num_boost_round: 50,
            debug: false,
            training_optimization_level: 2,
            loss_type: "SquaredError".to_string(),
        }
    }
}

impl FromStr for ModelType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "gbdt" | "gbdt_regression" => Ok(ModelType::default()),
            "gbdt_classification" => Ok(ModelType::GBDT {
                max_depth: 4,
                num_boost_round: 50,
                debug: false,
                training_optimization_level: 2,
                loss_type: "LogLikelyhood".to_string(),
            }),
            _ => Err(format!(
                "Unknown model type: {}. Expected one of gbdt, gbdt_regression, gbdt_classification",
                s
            )),
        }
    }
}

impl ModelConfig {
    pub fn new(learning_rate: f32, model_type: ModelType) -> Self {
        Self {
            learning_rate,
            model_type,
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            learning_rate: 0.1,
            model_type: ModelType::default(),
        }
    }
}
