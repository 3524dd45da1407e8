use anyhow::{Context, Result};
use clap::ArgMatches;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

use iml_explainers::cache::DEFAULT_CACHE_CAPACITY;
use iml_explainers::config::ModelConfig;
use iml_explainers::methods::MethodConfig;

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ExplainConfig {
    pub version: String,
    /// CSV or TSV dataset; the model is fitted and explained on it.
    pub data: String,
    pub target_column: String,
    pub ignore_columns: Vec<String>,
    pub model: ModelConfig,
    pub methods: Vec<MethodConfig>,
    /// Row used as the point of interest by methods whose `x_interest` is empty.
    pub x_interest_row: usize,
    pub output_dir: String,
    pub seed: Option<u64>,
    pub report: bool,
    pub cache: bool,
    /// Rows kept by the prediction cache.
    pub cache_capacity: usize,
}

impl Default for ExplainConfig {
    fn default() -> Self {
        ExplainConfig {
            version: clap::crate_version!().to_string(),
            data: String::new(),
            target_column: String::from("y"),
            ignore_columns: Vec::new(),
            model: ModelConfig::default(),
            methods: MethodConfig::all_defaults(),
            x_interest_row: 0,
            output_dir: String::from("iml_output"),
            seed: Some(42),
            report: true,
            cache: true,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
        }
    }
}

impl ExplainConfig {
    /// Template printed when no configuration file is given.
    pub fn template_json() -> Result<String> {
        serde_json::to_string_pretty(&ExplainConfig::default()).context("Failed to render config template")
    }

    /// Load `config_path` (fields missing from the file keep their
    /// defaults) and apply the command line overrides in `matches`.
    pub fn from_arguments(config_path: Option<&PathBuf>, matches: &ArgMatches) -> Result<Self> {
        let mut config = match config_path {
            Some(path) => Self::from_file(path)?,
            None => ExplainConfig::default(),
        };

        if let Some(data) = matches.get_one::<String>("data") {
            config.data = data.clone();
        }
        if let Some(target) = matches.get_one::<String>("target") {
            config.target_column = target.clone();
        }
        if let Some(output_dir) = matches.get_one::<String>("output_dir") {
            config.output_dir = output_dir.clone();
        }
        if let Some(seed) = matches.get_one::<u64>("seed") {
            config.seed = Some(*seed);
        }
        if matches.get_flag("no_report") {
            config.report = false;
        }

        Ok(config)
    }

    pub fn from_file(config_path: &PathBuf) -> Result<Self> {
        let config_json = fs::read_to_string(config_path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file: {}", e))?;
        Self::from_json(&config_json)
    }

    pub fn from_json(config_json: &str) -> Result<Self> {
        let partial: serde_json::Value = serde_json::from_str(config_json)?;
        let mut config = ExplainConfig::default();

        macro_rules! load_or_default {
            ($field:ident) => {
                if let Some(val) = partial.get(stringify!($field)) {
                    match serde_json::from_value(val.clone()) {
                        Ok(parsed) => config.$field = parsed,
                        Err(e) => {
                            log::warn!(
                                "Config Invalid value for '{}' ({}), using default: {:?}",
                                stringify!($field),
                                e,
                                config.$field
                            );
                        }
                    }
                } else {
                    log::debug!(
                        "Config Missing field '{}', using default: {:?}",
                        stringify!($field),
                        config.$field
                    );
                }
            };
        }

        load_or_default!(data);
        load_or_default!(target_column);
        load_or_default!(ignore_columns);
        load_or_default!(model);
        load_or_default!(methods);
        load_or_default!(x_interest_row);
        load_or_default!(output_dir);
        load_or_default!(seed);
        load_or_default!(report);
        load_or_default!(cache);
        load_or_default!(cache_capacity);

        Ok(config)
    }
}
