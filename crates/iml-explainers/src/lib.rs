//! iml-explainers: model-agnostic interpretability for tabular models.
//!
//! Every method is an [`experiment::Experiment`] run through the same four
//! stages: sample rows from the reference data and intervene on them,
//! predict the resulting design with the wrapped [`predictor::Model`],
//! extract and aggregate the quantity of interest, and present the result as
//! a table and a plotly chart.
//!
//! Methods: permutation feature importance, partial dependence, individual
//! conditional expectation, a tree surrogate, LIME and Shapley values.
//! [`interpretation::Interpretation`] runs several of them against one model
//! and dataset, optionally memoising predictions.
pub mod cache;
pub mod config;
pub mod data;
pub mod error;
pub mod experiment;
pub mod interpretation;
pub mod io;
pub mod loss;
pub mod methods;
pub mod models;
pub mod predictor;
pub mod preprocessing;
pub mod report;
pub mod stats;
pub mod table;
