use std::io::Write;

use iml_explainers::experiment::Present;
use iml_explainers::interpretation::Interpretation;
use iml_explainers::io::{read_dataset, write_table, DatasetReaderConfig};
use iml_explainers::methods::pdp::PartialDependenceConfig;
use iml_explainers::methods::MethodConfig;
use iml_explainers::predictor::{FnPredictor, Model};
use iml_explainers::report::{Report, ReportSection};
use ndarray::{Array1, Array2};

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

fn write_bikes(dir: &tempfile::TempDir) -> std::path::PathBuf {
    let path = dir.path().join("bikes.csv");
    let mut f = std::fs::File::create(&path).unwrap();
    writeln!(f, "temp,season,count").unwrap();
    let seasons = ["winter", "spring", "summer", "fall"];
    for i in 0..40 {
        let temp = (i % 10) as f64 * 3.0;
        let season = i % 4;
        let count = 10.0 * temp + if season == 2 { 50.0 } else { 0.0 };
        writeln!(f, "{},{},{}", temp, seasons[season], count).unwrap();
    }
    path
}

/// Close to the generating function of `write_bikes`, on the encoded matrix.
fn bikes_model() -> Model {
    Model::new(
        FnPredictor::new(|x: &Array2<f64>| {
            Ok(x.outer_iter()
                .map(|r| 10.0 * r[0] + if r[1] == 2.0 { 45.0 } else { 0.0 })
                .collect::<Array1<f64>>())
        })
        .with_name("bikes"),
    )
}

// ---------------------------------------------------------------------------
// End to end
// ---------------------------------------------------------------------------

#[test]
fn test_csv_to_report() {
    init_logger();
    let dir = tempfile::tempdir().unwrap();
    let path = write_bikes(&dir);
    let data = read_dataset(
        &path,
        &DatasetReaderConfig {
            target_column: Some("count".to_string()),
            ..Default::default()
        },
    )
    .unwrap();
    assert!(data.features[1].is_categorical());

    let interp = Interpretation::new(bikes_model(), data).with_seed(Some(1));
    let mut report = Report::new("iml", env!("CARGO_PKG_VERSION"), "Bike rentals");
    for mut method in MethodConfig::all_defaults() {
        if let Some(x) = method.x_interest_mut() {
            *x = vec![12.0, 2.0];
        }
        let result = interp.run(&method).unwrap();
        write_table(dir.path().join(format!("{}.csv", method.name())), &result.table()).unwrap();
        report.add_section(ReportSection::from_result(result.as_ref()));
    }
    report.save_to_file(dir.path().join("report.html")).unwrap();

    let html = std::fs::read_to_string(dir.path().join("report.html")).unwrap();
    assert!(html.contains("Bike rentals"));
    assert!(html.contains("Shapley values"));
    assert!(dir.path().join("feature_importance.csv").exists());
    assert!(dir.path().join("tree_surrogate.csv").exists());
}

#[test]
fn test_categorical_pdp_uses_level_names() {
    init_logger();
    let dir = tempfile::tempdir().unwrap();
    let data = read_dataset(write_bikes(&dir), &DatasetReaderConfig::default()).unwrap();
    // without a target column `count` is read as a third feature
    assert_eq!(data.ncols(), 3);

    let model = Model::new(FnPredictor::new(|x: &Array2<f64>| {
        Ok(x.column(1).mapv(|s| if s == 2.0 { 1.0 } else { 0.0 }))
    }));
    let interp = Interpretation::new(model, data);
    let pdp = interp
        .partial_dependence(PartialDependenceConfig {
            features: vec![1],
            ..Default::default()
        })
        .unwrap();
    let labels: Vec<String> = pdp.grid_labels.iter().map(|l| l[0].clone()).collect();
    assert_eq!(labels, vec!["winter", "spring", "summer", "fall"]);
    assert_eq!(pdp.curve(0), vec![0.0, 0.0, 1.0, 0.0]);
    assert!(pdp.title().contains("season"));
}
