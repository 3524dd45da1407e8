use anyhow::Result;
use clap::{Arg, ArgAction, ArgMatches, Command, ValueHint};
use log::LevelFilter;
use std::path::PathBuf;

use iml_cli::explain::input::ExplainConfig;
use iml_cli::explain::runner;
use iml_cli::inspect::inspect_dataset;

fn main() -> Result<()> {
    env_logger::Builder::default()
        .filter_level(LevelFilter::Error)
        .parse_env(env_logger::Env::default().filter_or("IML_LOG", "error,iml=info"))
        .init();

    let matches = Command::new("iml")
        .version(clap::crate_version!())
        .author("Justin Sing <justincsing@gmail.com>")
        .about("iml - Model-agnostic interpretation of tabular prediction models")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(
            Command::new("explain")
                .about("Fit a model on a dataset and run interpretation methods on it")
                .arg(
                    Arg::new("config")
                        .help("Path to explain configuration file")
                        .required(false)
                        .value_parser(clap::value_parser!(PathBuf))
                        .value_hint(ValueHint::FilePath),
                )
                .arg(
                    Arg::new("data")
                        .short('d')
                        .long("data")
                        .value_parser(clap::builder::NonEmptyStringValueParser::new())
                        .help(
                            "Path to the dataset (*.csv or *.tsv). Overrides the data file \
                             specified in the configuration file.",
                        )
                        .value_hint(ValueHint::FilePath),
                )
                .arg(
                    Arg::new("target")
                        .short('t')
                        .long("target")
                        .value_parser(clap::builder::NonEmptyStringValueParser::new())
                        .help("Name of the target column. Overrides the configuration file.")
                        .value_hint(ValueHint::Other),
                )
                .arg(
                    Arg::new("output_dir")
                        .short('o')
                        .long("output-dir")
                        .value_parser(clap::builder::NonEmptyStringValueParser::new())
                        .help("Directory that result tables and the report are written to.")
                        .value_hint(ValueHint::DirPath),
                )
                .arg(
                    Arg::new("seed")
                        .long("seed")
                        .value_parser(clap::value_parser!(u64))
                        .help("Random seed for the sampling done by the methods."),
                )
                .arg(
                    Arg::new("no_report")
                        .long("no-report")
                        .help("Disable HTML report generation.")
                        .action(ArgAction::SetTrue),
                ),
        )
        .subcommand(Command::new("template").about("Print the default explain configuration"))
        .subcommand(
            Command::new("inspect")
                .about("List the columns of a dataset and their detected kinds")
                .arg(
                    Arg::new("data")
                        .help("Path to the dataset (*.csv or *.tsv)")
                        .required(true)
                        .value_parser(clap::value_parser!(PathBuf))
                        .value_hint(ValueHint::FilePath),
                ),
        )
        .help_template(
            "{usage-heading} {usage}\n\n\
             {about-with-newline}\n\
             Written by {author-with-newline}Version {version}\n\n\
             {all-args}{after-help}",
        )
        .get_matches();

    match matches.subcommand() {
        Some(("explain", sub_m)) => handle_explain(sub_m),
        Some(("template", _)) => {
            println!("{}", ExplainConfig::template_json()?);
            Ok(())
        }
        Some(("inspect", sub_m)) => {
            let data_path: &PathBuf = sub_m
                .get_one("data")
                .ok_or_else(|| anyhow::anyhow!("missing dataset path"))?;
            let table = inspect_dataset(data_path)?;
            print!("{}", table);
            Ok(())
        }
        _ => unreachable!("Subcommand is required by CLI configuration"),
    }
}

fn handle_explain(matches: &ArgMatches) -> Result<()> {
    let config_path: Option<&PathBuf> = matches.get_one("config");
    if config_path.is_none() && matches.get_one::<String>("data").is_none() {
        eprintln!("[iml::explain] No config file provided; printing a template configuration.");
        println!("{}", ExplainConfig::template_json()?);
        return Ok(());
    }
    if let Some(path) = config_path {
        log::info!("[iml::explain] Using config: {:?}", path);
    }

    let params = ExplainConfig::from_arguments(config_path, matches)?;
    match runner::run_explain(&params) {
        Ok(output) => {
            eprintln!(
                "[iml::explain] Wrote {} table(s) to {}",
                output.tables.len(),
                params.output_dir
            );
            if let Some(report) = output.report {
                eprintln!("[iml::explain] Report: {}", report.display());
            }
            Ok(())
        }
        Err(e) => {
            log::error!("Explain failed: {:#}", e);
            std::process::exit(1)
        }
    }
}
