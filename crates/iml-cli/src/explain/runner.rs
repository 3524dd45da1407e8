use anyhow::{Context, Result};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use maud::html;

use iml_explainers::io::{read_dataset, write_table, DatasetReaderConfig};
use iml_explainers::interpretation::Interpretation;
use iml_explainers::models::factory::build_model;
use iml_explainers::report::{Report, ReportSection};

use crate::explain::input::ExplainConfig;
use crate::util::validate_tsv_or_csv_file;

/// Files written by one explain run.
#[derive(Debug, Default)]
pub struct ExplainOutput {
    pub tables: Vec<PathBuf>,
    pub report: Option<PathBuf>,
    pub config: PathBuf,
}

/// `<method>.csv` for the first table of a method, `<method>_<n>.csv` after.
fn table_file_name(method: &str, occurrence: usize) -> String {
    if occurrence <= 1 {
        format!("{}.csv", method)
    } else {
        format!("{}_{}.csv", method, occurrence)
    }
}

pub fn run_explain(config: &ExplainConfig) -> Result<ExplainOutput> {
    let start_time = Instant::now();
    validate_tsv_or_csv_file(&config.data)?;

    let reader = DatasetReaderConfig {
        target_column: Some(config.target_column.clone()),
        ignore_columns: config.ignore_columns.clone(),
        delimiter: None,
    };
    let dataset = read_dataset(&config.data, &reader)
        .with_context(|| format!("Failed to load dataset {}", config.data))?;
    let y = dataset
        .y
        .clone()
        .ok_or_else(|| anyhow::anyhow!("Dataset has no target column '{}'", config.target_column))?;

    let model = build_model(&config.model, &dataset.x, &y).context("Model fitting failed")?;
    log::info!("Model fitted in {:?}", start_time.elapsed());

    if config.x_interest_row >= dataset.nrows() {
        anyhow::bail!(
            "x_interest_row {} is out of range for {} rows",
            config.x_interest_row,
            dataset.nrows()
        );
    }
    let x_interest = dataset.row(config.x_interest_row).to_vec();

    let out_dir = Path::new(&config.output_dir);
    fs::create_dir_all(out_dir).with_context(|| format!("Failed to create {}", out_dir.display()))?;

    let mut interp = Interpretation::new(model, dataset).with_seed(config.seed);
    if config.cache {
        interp = interp.with_cache_capacity(config.cache_capacity);
    }

    let mut report = Report::new("iml", &config.version, "Model interpretation report");
    let mut output = ExplainOutput::default();
    let mut seen: HashMap<&'static str, usize> = HashMap::new();
    for method in &config.methods {
        let mut method = method.clone();
        if let Some(x) = method.x_interest_mut() {
            if x.is_empty() {
                *x = x_interest.clone();
            }
        }
        log::info!("[iml::explain] Running {}", method.name());
        let result = interp
            .run(&method)
            .with_context(|| format!("Method {} failed", method.name()))?;

        let count = seen.entry(method.name()).or_insert(0);
        *count += 1;
        let table_path = out_dir.join(table_file_name(method.name(), *count));
        write_table(&table_path, &result.table())?;
        output.tables.push(table_path);
        if config.report {
            report.add_section(ReportSection::from_result(&*result));
        }
    }
    if let Some((hits, misses)) = interp.cache_stats() {
        log::info!("Prediction cache: {} hits, {} misses", hits, misses);
    }

    if config.report {
        let config_json = serde_json::to_string_pretty(&config)?;
        let mut config_section = ReportSection::new("Configuration");
        config_section.add_content(html! {
            div class="code-container" {
                pre {
                    code { (config_json) }
                }
            }
        });
        report.add_section(config_section);

        let report_path = out_dir.join("report.html");
        report.save_to_file(&report_path)?;
        output.report = Some(report_path);
    }

    let config_path = out_dir.join("iml_config.json");
    fs::write(&config_path, serde_json::to_vec_pretty(&config)?)
        .with_context(|| format!("Failed to write {}", config_path.display()))?;
    output.config = config_path;

    log::info!(
        "[iml::explain] {} method(s) completed in {:?}",
        config.methods.len(),
        start_time.elapsed()
    );
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_file_names_are_numbered() {
        assert_eq!(table_file_name("lime", 1), "lime.csv");
        assert_eq!(table_file_name("lime", 2), "lime_2.csv");
    }
}
