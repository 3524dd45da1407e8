use std::fmt;
use std::str::FromStr;

use anyhow::Result;
use ndarray::{Array1, Axis};
use serde::{Deserialize, Serialize};

use crate::error::ExplainError;
use crate::predictor::Prediction;

/// Loss functions used to score a model against the observed target.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Loss {
    Mae,
    Mse,
    Rmse,
    Mape,
    /// Binary log loss; column 0 is P(y = 1).
    LogLoss,
    /// Multi-class cross entropy; `y` holds the class index.
    CrossEntropy,
    /// Share of misclassified rows.
    ClassificationError,
}

impl Default for Loss {
    fn default() -> Self {
        Loss::Mae
    }
}

impl FromStr for Loss {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mae" => Ok(Loss::Mae),
            "mse" => Ok(Loss::Mse),
            "rmse" => Ok(Loss::Rmse),
            "mape" => Ok(Loss::Mape),
            "logloss" | "log_loss" => Ok(Loss::LogLoss),
            "ce" | "crossentropy" | "cross_entropy" => Ok(Loss::CrossEntropy),
            "ce01" | "classification_error" => Ok(Loss::ClassificationError),
            _ => Err(format!(
                "Unknown loss: {}. Expected one of mae, mse, rmse, mape, logloss, ce, ce01",
                s
            )),
        }
    }
}

impl fmt::Display for Loss {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Loss::Mae => "mae",
            Loss::Mse => "mse",
            Loss::Rmse => "rmse",
            Loss::Mape => "mape",
            Loss::LogLoss => "logloss",
            Loss::CrossEntropy => "ce",
            Loss::ClassificationError => "ce01",
        };
        write!(f, "{}", name)
    }
}

const EPS: f64 = 1e-15;

impl Loss {
    pub fn evaluate(&self, y: &Array1<f64>, pred: &Prediction) -> Result<f64> {
        if y.len() != pred.n_rows() {
            return Err(ExplainError::ShapeMismatch {
                what: "prediction".to_string(),
                expected: y.len(),
                found: pred.n_rows(),
            }
            .into());
        }
        if y.is_empty() {
            return Err(ExplainError::InvalidParameter("cannot evaluate a loss on zero rows".to_string()).into());
        }
        let n = y.len() as f64;
        let yhat = pred.column(0);

        let value = match self {
            Loss::Mae => y.iter().zip(yhat.iter()).map(|(a, p)| (a - p).abs()).sum::<f64>() / n,
            Loss::Mse => y.iter().zip(yhat.iter()).map(|(a, p)| (a - p).powi(2)).sum::<f64>() / n,
            Loss::Rmse => (y.iter().zip(yhat.iter()).map(|(a, p)| (a - p).powi(2)).sum::<f64>() / n).sqrt(),
            Loss::Mape => {
                if y.iter().any(|&a| a == 0.0) {
                    anyhow::bail!("mape is undefined when the target contains zeros");
                }
                y.iter().zip(yhat.iter()).map(|(a, p)| ((a - p) / a).abs()).sum::<f64>() / n
            }
            Loss::LogLoss => {
                -y.iter()
                    .zip(yhat.iter())
                    .map(|(a, p)| {
                        let p = p.clamp(EPS, 1.0 - EPS);
                        a * p.ln() + (1.0 - a) * (1.0 - p).ln()
                    })
                    .sum::<f64>()
                    / n
            }
            Loss::CrossEntropy => {
                let k = pred.n_outputs();
                let mut total = 0.0;
                for (i, &a) in y.iter().enumerate() {
                    let class = class_index(a, k)?;
                    total -= pred.values[[i, class]].clamp(EPS, 1.0).ln();
                }
                total / n
            }
            Loss::ClassificationError => {
                let k = pred.n_outputs();
                let mut wrong = 0usize;
                for (i, (&a, row)) in y.iter().zip(pred.values.axis_iter(Axis(0))).enumerate() {
                    let predicted = if k == 1 {
                        if row[0] >= 0.5 { 1 } else { 0 }
                    } else {
                        argmax(row.iter().copied())
                    };
                    let actual = class_index(a, k.max(2)).map_err(|e| e.context(format!("row {}", i)))?;
                    if predicted != actual {
                        wrong += 1;
                    }
                }
                wrong as f64 / n
            }
        };
        Ok(value)
    }
}

fn class_index(value: f64, n_classes: usize) -> Result<usize> {
    if value < 0.0 || value.fract() != 0.0 || value as usize >= n_classes {
        anyhow::bail!("target value {} is not a class index below {}", value, n_classes);
    }
    Ok(value as usize)
}

fn argmax<I: Iterator<Item = f64>>(values: I) -> usize {
    values
        .enumerate()
        .fold((0, f64::NEG_INFINITY), |(best, best_v), (i, v)| if v > best_v { (i, v) } else { (best, best_v) })
        .0
}
