//! Delimited text reader for datasets and writer for result tables.
use std::collections::HashMap;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use csv::StringRecord;
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

use crate::data::{Dataset, Feature};
use crate::error::ExplainError;
use crate::table::ResultTable;

/// Configuration for reading a CSV/TSV dataset.
#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct DatasetReaderConfig {
    /// Column split off as the target; it must be numeric.
    pub target_column: Option<String>,
    /// Columns dropped before the feature matrix is built.
    pub ignore_columns: Vec<String>,
    /// Field delimiter; inferred from the file extension when unset.
    pub delimiter: Option<char>,
}

fn infer_delimiter(path: &Path) -> u8 {
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("tsv") || ext.eq_ignore_ascii_case("tab") => b'\t',
        _ => b',',
    }
}

fn find_column(headers: &StringRecord, name: &str) -> Option<usize> {
    headers.iter().position(|h| h.trim() == name)
}

/// Turn one raw column into matrix values, detecting its kind.
fn parse_column(name: &str, raw: &[String]) -> (Feature, Vec<f64>) {
    let parsed: Option<Vec<f64>> = raw.iter().map(|v| v.trim().parse::<f64>().ok()).collect();
    match parsed {
        Some(values) => (Feature::numeric(name), values),
        None => {
            let mut levels: Vec<String> = Vec::new();
            let mut index: HashMap<String, usize> = HashMap::new();
            let values = raw
                .iter()
                .map(|v| {
                    let v = v.trim().to_string();
                    let next = levels.len();
                    let idx = *index.entry(v.clone()).or_insert_with(|| {
                        levels.push(v);
                        next
                    });
                    idx as f64
                })
                .collect();
            (Feature::categorical(name, levels), values)
        }
    }
}

/// Read a delimited file into a `Dataset`.
pub fn read_dataset<P: AsRef<Path>>(path: P, config: &DatasetReaderConfig) -> Result<Dataset> {
    let path = path.as_ref();
    let delimiter = match config.delimiter {
        Some(c) if c.is_ascii() => c as u8,
        Some(c) => return Err(anyhow!("Delimiter '{}' is not a single-byte character", c)),
        None => infer_delimiter(path),
    };
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .from_path(path)
        .with_context(|| format!("Failed to open dataset: {}", path.display()))?;

    let headers = reader.headers().context("Failed to read header row")?.clone();

    let target_idx = match &config.target_column {
        Some(name) => Some(find_column(&headers, name).ok_or(ExplainError::MissingTarget)?),
        None => None,
    };
    for name in &config.ignore_columns {
        if find_column(&headers, name).is_none() {
            log::warn!("Ignored column '{}' is not in {}", name, path.display());
        }
    }
    let feature_idx: Vec<usize> = headers
        .iter()
        .enumerate()
        .filter(|(i, h)| Some(*i) != target_idx && !config.ignore_columns.iter().any(|c| c == h.trim()))
        .map(|(i, _)| i)
        .collect();
    if feature_idx.is_empty() {
        return Err(anyhow!("No feature columns left in {}", path.display()));
    }

    let mut columns: Vec<Vec<String>> = vec![Vec::new(); headers.len()];
    for (row_idx, result) in reader.records().enumerate() {
        let record = result.with_context(|| format!("Failed to read row {}", row_idx + 1))?;
        for (j, column) in columns.iter_mut().enumerate() {
            let value = record
                .get(j)
                .ok_or_else(|| anyhow!("Row {} has {} fields, expected {}", row_idx + 1, record.len(), headers.len()))?;
            column.push(value.to_string());
        }
    }
    let n_rows = columns.first().map(|c| c.len()).unwrap_or(0);
    if n_rows == 0 {
        return Err(anyhow!("Dataset {} has no rows", path.display()));
    }

    let mut features = Vec::with_capacity(feature_idx.len());
    let mut x = Array2::zeros((n_rows, feature_idx.len()));
    for (out_j, &j) in feature_idx.iter().enumerate() {
        let (feature, values) = parse_column(headers[j].trim(), &columns[j]);
        for (i, v) in values.into_iter().enumerate() {
            x[[i, out_j]] = v;
        }
        features.push(feature);
    }

    let mut dataset = Dataset::new(x, features)?;
    if let Some(t) = target_idx {
        let y = columns[t]
            .iter()
            .enumerate()
            .map(|(i, v)| {
                v.trim()
                    .parse::<f64>()
                    .with_context(|| format!("Non-numeric target '{}' at row {}", v, i + 1))
            })
            .collect::<Result<Vec<f64>>>()?;
        dataset = dataset.with_target(Array1::from_vec(y))?;
    }
    log::debug!("Read {} columns from {}", headers.len(), path.display());
    dataset.log_summary();
    Ok(dataset)
}

/// Write a result table as CSV.
pub fn write_table<P: AsRef<Path>>(path: P, table: &ResultTable) -> Result<()> {
    let path = path.as_ref();
    let mut writer = csv::Writer::from_path(path).with_context(|| format!("Failed to create {}", path.display()))?;
    writer.write_record(&table.columns)?;
    for row in &table.rows {
        writer.write_record(row.iter().map(|cell| cell.to_string()))?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_file(dir: &tempfile::TempDir, name: &str, content: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(content.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_read_dataset_detects_kinds() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            &dir,
            "bikes.csv",
            "id,temp,season,count\n1,10.5,winter,100\n2,20.0,summer,300\n3,15.0,winter,150\n",
        );
        let config = DatasetReaderConfig {
            target_column: Some("count".to_string()),
            ignore_columns: vec!["id".to_string()],
            delimiter: None,
        };
        let data = read_dataset(&path, &config).unwrap();
        assert_eq!(data.feature_names(), vec!["temp".to_string(), "season".to_string()]);
        assert!(!data.features[0].is_categorical());
        assert_eq!(data.features[1].levels, vec!["winter".to_string(), "summer".to_string()]);
        assert_eq!(data.x[[1, 1]], 1.0);
        assert_eq!(data.y.as_ref().unwrap()[2], 150.0);
    }

    #[test]
    fn test_tsv_and_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "d.tsv", "a\tb\n1\t2\n3\t4\n");
        let data = read_dataset(&path, &DatasetReaderConfig::default()).unwrap();
        assert_eq!(data.ncols(), 2);
        assert!(data.y.is_none());

        let missing = DatasetReaderConfig {
            target_column: Some("y".to_string()),
            ..Default::default()
        };
        let err = read_dataset(&path, &missing).unwrap_err();
        assert!(matches!(err.downcast_ref::<ExplainError>(), Some(ExplainError::MissingTarget)));

        let empty = write_file(&dir, "e.csv", "a,b\n");
        assert!(read_dataset(&empty, &DatasetReaderConfig::default()).is_err());
    }

    #[test]
    fn test_write_table() {
        let dir = tempfile::tempdir().unwrap();
        let mut table = ResultTable::new(vec!["feature", "importance"]);
        table.push(vec!["a".into(), 2.5.into()]);
        let path = dir.path().join("t.csv");
        write_table(&path, &table).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text, "feature,importance\na,2.5000\n");
    }
}
