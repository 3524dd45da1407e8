//! Integration tests for explain config parsing, util helpers and inspection.

use std::io::Write;

use clap::{Arg, ArgAction, Command};
use iml_cli::explain::input::ExplainConfig;
use iml_cli::explain::runner::run_explain;
use iml_cli::inspect::inspect_dataset;
use iml_cli::util::validate_tsv_or_csv_file;
use iml_explainers::methods::MethodConfig;

fn explain_command() -> Command {
    Command::new("explain")
        .arg(Arg::new("config"))
        .arg(Arg::new("data").short('d').long("data"))
        .arg(Arg::new("target").short('t').long("target"))
        .arg(Arg::new("output_dir").short('o').long("output-dir"))
        .arg(
            Arg::new("seed")
                .long("seed")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(Arg::new("no_report").long("no-report").action(ArgAction::SetTrue))
}

fn write_dataset(dir: &tempfile::TempDir, name: &str) -> std::path::PathBuf {
    let path = dir.path().join(name);
    let mut f = std::fs::File::create(&path).unwrap();
    writeln!(f, "x1,x2,target").unwrap();
    for i in 0..40 {
        let x1 = (i % 8) as f64;
        let x2 = (i % 5) as f64;
        let noise = ((i * 13) % 5) as f64 * 0.05;
        writeln!(f, "{},{},{:.3}", x1, x2, 3.0 * x1 - x2 + noise).unwrap();
    }
    path
}

// ---------------------------------------------------------------------------
// validate_tsv_or_csv_file
// ---------------------------------------------------------------------------

#[test]
fn validate_csv_file_exists() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("data.csv");
    std::fs::File::create(&path).unwrap();
    assert!(validate_tsv_or_csv_file(path.to_str().unwrap()).is_ok());
}

#[test]
fn validate_wrong_extension_errors() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("data.txt");
    std::fs::File::create(&path).unwrap();
    assert!(validate_tsv_or_csv_file(path.to_str().unwrap()).is_err());
}

#[test]
fn validate_nonexistent_file_errors() {
    assert!(validate_tsv_or_csv_file("/nonexistent/path/data.tsv").is_err());
}

// ---------------------------------------------------------------------------
// ExplainConfig
// ---------------------------------------------------------------------------

#[test]
fn explain_config_default_values() {
    let cfg = ExplainConfig::default();
    assert_eq!(cfg.methods.len(), 6);
    assert!(cfg.report);
    assert!(cfg.cache);
    assert!(cfg.cache_capacity > 0);
    assert_eq!(cfg.seed, Some(42));
    assert_eq!(cfg.x_interest_row, 0);
}

#[test]
fn explain_config_template_round_trips() {
    let json = ExplainConfig::template_json().unwrap();
    let parsed = ExplainConfig::from_json(&json).unwrap();
    assert_eq!(parsed, ExplainConfig::default());
}

#[test]
fn explain_config_partial_json_keeps_defaults() {
    let cfg = ExplainConfig::from_json(
        r#"{"data": "d.csv", "seed": 3, "report": "not a bool", "cache_capacity": 64, "methods": [{"shapley": {"sample_size": 5}}]}"#,
    )
    .unwrap();
    assert_eq!(cfg.data, "d.csv");
    assert_eq!(cfg.seed, Some(3));
    assert_eq!(cfg.cache_capacity, 64);
    // invalid values fall back to the default
    assert!(cfg.report);
    assert_eq!(cfg.methods.len(), 1);
    match &cfg.methods[0] {
        MethodConfig::Shapley(s) => assert_eq!(s.sample_size, 5),
        other => panic!("unexpected method {:?}", other),
    }
    assert_eq!(cfg.target_column, "y");
}

#[test]
fn explain_config_cli_overrides_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.json");
    std::fs::write(&path, r#"{"data": "a.csv", "target_column": "t", "output_dir": "o1"}"#).unwrap();

    let matches = explain_command()
        .try_get_matches_from(["explain", "-d", "b.csv", "--seed", "9", "--no-report"])
        .unwrap();
    let cfg = ExplainConfig::from_arguments(Some(&path), &matches).unwrap();
    assert_eq!(cfg.data, "b.csv");
    assert_eq!(cfg.target_column, "t");
    assert_eq!(cfg.output_dir, "o1");
    assert_eq!(cfg.seed, Some(9));
    assert!(!cfg.report);
}

#[test]
fn explain_config_missing_file_errors() {
    let matches = explain_command().try_get_matches_from(["explain"]).unwrap();
    let missing = std::path::PathBuf::from("/nonexistent/config.json");
    assert!(ExplainConfig::from_arguments(Some(&missing), &matches).is_err());
}

// ---------------------------------------------------------------------------
// Runner and inspection
// ---------------------------------------------------------------------------

#[test]
fn run_explain_writes_outputs() {
    let dir = tempfile::tempdir().unwrap();
    let data = write_dataset(&dir, "train.csv");
    let out = dir.path().join("results");
    let cfg = ExplainConfig {
        data: data.to_str().unwrap().to_string(),
        target_column: "target".to_string(),
        output_dir: out.to_str().unwrap().to_string(),
        x_interest_row: 5,
        ..Default::default()
    };
    let output = run_explain(&cfg).unwrap();
    assert_eq!(output.tables.len(), 6);
    assert!(output.report.unwrap().exists());

    let shapley = std::fs::read_to_string(out.join("shapley.csv")).unwrap();
    assert!(shapley.starts_with("feature,feature.value,.class,phi,phi.var"));
    // row 5 is x1 = 5, x2 = 0
    assert!(shapley.contains("x1=5"));
}

#[test]
fn run_explain_rejects_out_of_range_row() {
    let dir = tempfile::tempdir().unwrap();
    let data = write_dataset(&dir, "train.csv");
    let cfg = ExplainConfig {
        data: data.to_str().unwrap().to_string(),
        target_column: "target".to_string(),
        output_dir: dir.path().join("r").to_str().unwrap().to_string(),
        x_interest_row: 400,
        methods: vec![],
        ..Default::default()
    };
    assert!(run_explain(&cfg).is_err());
}

#[test]
fn inspect_reports_kinds_and_ranges() {
    let dir = tempfile::tempdir().unwrap();
    let data = write_dataset(&dir, "train.tsv");
    // tsv extension but comma separated content collapses into one text column
    let table = inspect_dataset(&data).unwrap();
    assert_eq!(table.len(), 1);

    let csv = write_dataset(&dir, "train.csv");
    let table = inspect_dataset(&csv).unwrap();
    assert_eq!(table.len(), 3);
    assert_eq!(table.numbers("max")[0], 7.0);
}
