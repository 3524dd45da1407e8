use anyhow::Result;
use std::path::Path;

use iml_explainers::data::FeatureKind;
use iml_explainers::io::{read_dataset, DatasetReaderConfig};
use iml_explainers::table::{Cell, ResultTable};

/// One row per column of the dataset: name, detected kind and levels.
pub fn inspect_dataset<P: AsRef<Path>>(path: P) -> Result<ResultTable> {
    let data = read_dataset(path, &DatasetReaderConfig::default())?;
    let mut table = ResultTable::new(vec!["feature", "kind", "levels", "min", "max"]);
    for (j, feature) in data.features.iter().enumerate() {
        let column = data.x.column(j);
        let (lo, hi) = column
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
        let (kind, levels, min, max) = match feature.kind {
            FeatureKind::Numeric => ("numeric", Cell::from(""), Cell::from(lo), Cell::from(hi)),
            FeatureKind::Categorical => (
                "categorical",
                Cell::from(feature.levels.join("|")),
                Cell::from(""),
                Cell::from(""),
            ),
        };
        table.push(vec![feature.name.clone().into(), kind.into(), levels, min, max]);
    }
    Ok(table)
}
