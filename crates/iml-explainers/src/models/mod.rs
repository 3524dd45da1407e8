//! The external model the CLI fits and then explains.
pub mod factory;
pub mod gbdt;
