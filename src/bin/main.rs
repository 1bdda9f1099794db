mod common;
use std::env::{set_var, var};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use chrono::prelude::*;
use clap::{arg, command, Parser};

use common::config::ConfigContainer;
use common::helpers::{write_csv, CliError};
use log::{info, trace, warn};
use roscube::modules::{
    fetch::client::MirrorArchiveClient,
    pipeline::{
        progress::{CancellationToken, LogProgress},
        Pipeline, PredictionRequest, RequestOutcome,
    },
    predict::models::LinearModel,
};
use roscube::version::LONG_VERSION;

#[derive(Parser, Debug)]
#[command(
    version,
    long_version=LONG_VERSION,
    about="ros-cube wildfire rate-of-spread feature cache and prediction pipeline",
    long_about="ros-cube serves rate-of-spread predictions for a start time and a set of duration buckets.
Meteorological inputs are fetched from the reanalysis archive, harmonized onto a regular grid, averaged over the requested window and kept in an incremental on-disk cache."
)]
struct Args {
    #[arg(
        required = true,
        help = "Start date in the format YYYYMMDDHHMM",
        index = 1
    )]
    date: String,

    #[arg(required = true, help = "Path to the configuration file", index = 2)]
    config_path: String,

    #[arg(short, long, default_value_t = 3, help = "Window length in hours")]
    duration: u32,

    #[arg(short, long, default_value_t = 0, help = "Minutes between fire start and start date")]
    offset: u32,

    #[arg(long, help = "Write the served slice as csv")]
    csv: Option<PathBuf>,
}

fn run(args: &Args) -> Result<RequestOutcome, CliError> {
    let date = NaiveDateTime::parse_from_str(&args.date, "%Y%m%d%H%M")
        .map_err(|error| format!("Could not parse date {}: {error}", args.date))?
        .and_utc();

    let current_time = Utc::now();
    let config = ConfigContainer::from_file(&args.config_path)?;
    let model = LinearModel::from_file(&config.model_path)?;
    let client = MirrorArchiveClient::new(&config.mirror_dir);
    let pipeline = Pipeline::new(config.pipeline, Arc::new(client), Arc::new(model))?;
    trace!(
        "Loading configuration took {} seconds",
        Utc::now() - current_time
    );

    let request = PredictionRequest::new(date, args.duration, args.offset);
    let outcome = pipeline.run(&request, &LogProgress, &CancellationToken::new())?;
    for warning in &outcome.warnings {
        warn!("{}", warning);
    }
    if !outcome.low_confidence.is_empty() {
        warn!("Low confidence variables: {}", outcome.low_confidence.join(", "));
    }
    Ok(outcome)
}

fn main() -> ExitCode {
    if var("RUST_LOG").is_err() {
        set_var("RUST_LOG", "info")
    }
    pretty_env_logger::init();

    let args = Args::parse();
    let start_time = Utc::now();

    let outcome = match run(&args) {
        Ok(outcome) => outcome,
        Err(err) => {
            let report = err.report();
            match serde_json::to_string(&report) {
                Ok(json) => println!("{}", json),
                Err(_) => println!("{}", err),
            }
            return ExitCode::FAILURE;
        }
    };

    info!(
        "Served {} durations {:?} (cache hit: {}, archive fetches: {})",
        outcome.start_time.format("%Y-%m-%d %H:%M"),
        outcome.slice.durations,
        outcome.cache_hit,
        outcome.archive_fetches
    );
    if let Some(stats) = &outcome.merge {
        info!(
            "Merged {} cells, {} conflicts, {} overwritten",
            stats.filled, stats.conflicts, stats.overwritten
        );
    }

    if let Some(path) = &args.csv {
        match write_csv(&outcome.slice, path) {
            Ok(rows) => info!("Wrote {} rows to {}", rows, path.display()),
            Err(err) => {
                println!("{}", err);
                return ExitCode::FAILURE;
            }
        }
    }

    info!("Total time: {} seconds", Utc::now() - start_time);
    ExitCode::SUCCESS
}
