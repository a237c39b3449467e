use std::{path::PathBuf, process};

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use linefault_prep::{
    log_event, select_and_save_features, PipelineConfig, PipelineContext, PipelineError,
    PrepTelemetry, SelectionRequest,
};
use serde_json::json;
use shared_logging::LogLevel;
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(
    name = "select-features",
    version,
    about = "Selects fault-relevant features for a production line and writes train/test datasets"
)]
struct Cli {
    /// Production line code (1-4).
    #[arg(long = "production_line")]
    production_line: i64,
    /// Fault code to predict.
    #[arg(long = "fault_code")]
    fault_code: i64,
    /// Target negative:positive ratio for the training side.
    #[arg(long, default_value_t = 10.0)]
    ratio: f64,
    /// Cumulative importance threshold in (0, 1].
    #[arg(long, default_value_t = 0.9)]
    threshold: f64,
    /// Use the raw dataset instead of the temporal one.
    #[arg(long = "no-temporal")]
    no_temporal: bool,
    /// Skip negative under-sampling.
    #[arg(long = "no-balance")]
    no_balance: bool,
    /// Reuse the stored selection for this line, fault and threshold.
    #[arg(long)]
    model_exist: bool,
    /// Pipeline configuration (TOML).
    #[arg(long)]
    config: Option<PathBuf>,
    /// Overrides the configured JSON-lines log file.
    #[arg(long)]
    log_file: Option<PathBuf>,
}

impl Cli {
    fn request(&self) -> SelectionRequest {
        SelectionRequest {
            production_line: self.production_line,
            fault_code: self.fault_code,
            threshold: self.threshold,
            ratio: self.ratio,
            balance: !self.no_balance,
            temporal: !self.no_temporal,
            model_exist: self.model_exist,
        }
    }
}

fn main() {
    let cli = Cli::parse();
    if let Err(err) = run(&cli) {
        eprintln!("error: {}", render_error(&err));
        process::exit(1);
    }
}

fn run(cli: &Cli) -> Result<()> {
    let mut config = match &cli.config {
        Some(path) => PipelineConfig::load(path)?,
        None => PipelineConfig::default(),
    };
    if let Some(path) = &cli.log_file {
        config.logging.path = Some(path.clone());
    }

    let run_id = format!("select-{}", Uuid::new_v4());
    let telemetry = PrepTelemetry::builder("select_cli")
        .from_config(&config.logging)
        .run_id(&run_id)
        .build()
        .context("initialising telemetry")?;
    let request = cli.request();
    log_event(
        Some(&telemetry),
        LogLevel::Info,
        "cli_invoked",
        json!({ "request": request, "config": cli.config }),
    );

    let ctx = PipelineContext::new(config).with_telemetry(telemetry);
    let outcome = select_and_save_features(&ctx, &request)?;
    let report = &outcome.report;
    let summary = json!({
        "run_id": run_id,
        "production_line": request.production_line,
        "fault_code": request.fault_code,
        "selected_features": report.selected_features,
        "replayed": report.replayed,
        "train": report.balanced_train,
        "test": report.balanced_test,
        "train_path": report.train_path,
        "test_path": report.test_path,
        "report_path": outcome.report_path,
        "finished_at": Utc::now(),
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

/// Stage failures already carry their cause; other errors print their context chain.
fn render_error(err: &anyhow::Error) -> String {
    err.downcast_ref::<PipelineError>()
        .map_or_else(|| format!("{err:#}"), ToString::to_string)
}
