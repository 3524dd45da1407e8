use std::error::Error;
use std::fmt;

/// Validation failures raised while setting up or running an experiment.
///
/// Library functions return `anyhow::Result`; these variants travel inside
/// the `anyhow::Error` and can be recovered with `downcast_ref`.
#[derive(Debug, Clone, PartialEq)]
pub enum ExplainError {
    /// Expected and actual lengths/shapes differ.
    ShapeMismatch { what: String, expected: usize, found: usize },
    /// Feature index or name not present in the dataset.
    UnknownFeature(String),
    /// The method needs a target column but the dataset has none.
    MissingTarget,
    /// A configuration value is out of its valid range.
    InvalidParameter(String),
    /// The wrapped model returned an output of the wrong shape.
    PredictionShape { rows: usize, expected_rows: usize, cols: usize, expected_cols: usize },
}

impl fmt::Display for ExplainError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ExplainError::ShapeMismatch { what, expected, found } => {
                write!(f, "{} has length {}, expected {}", what, found, expected)
            }
            ExplainError::UnknownFeature(name) => write!(f, "Unknown feature: {}", name),
            ExplainError::MissingTarget => {
                write!(f, "This method requires a target (y), but the dataset has none")
            }
            ExplainError::InvalidParameter(msg) => write!(f, "Invalid parameter: {}", msg),
            ExplainError::PredictionShape { rows, expected_rows, cols, expected_cols } => write!(
                f,
                "Model returned a {}x{} prediction, expected {}x{}",
                rows, cols, expected_rows, expected_cols
            ),
        }
    }
}

impl Error for ExplainError {}
