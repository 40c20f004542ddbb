//! `preprocess` command-line entry point.
//!
//! Parses the five positional arguments, initializes logging and runs the
//! preprocessing chain for one subject.

use clap::{Parser, ValueEnum};
use seegprep::prelude::*;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "preprocess")]
#[command(about = "Preprocess SEEG implantation imaging for one subject")]
struct Cli {
    /// Directory containing both DICOM series
    input_dir: PathBuf,

    /// Pre-implant MR series directory name, inside the input directory
    pre_imp_mr: String,

    /// Post-implant CT series directory name, inside the input directory
    post_imp_ct: String,

    /// Subject id; artifacts are written to <output_dir>/<subject>
    subject: String,

    /// Existing output directory
    output_dir: PathBuf,

    /// JSON settings overriding models, registration parameters and tools
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Write a JSON run report to this path, also when the run fails
    #[arg(long)]
    report: Option<PathBuf>,

    /// Fail any step that runs longer than this many seconds
    #[arg(long)]
    step_timeout: Option<f64>,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Log level used when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn init_tracing(cli: &Cli) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    let registry = tracing_subscriber::registry().with(filter);
    match cli.log_format {
        LogFormat::Text => registry.with(fmt::layer().with_writer(std::io::stderr)).init(),
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init(),
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<PipelineConfig> {
    let mut settings = match &cli.config {
        Some(path) => PreprocessSettings::from_json_file(path)?,
        None => PreprocessSettings::default(),
    };
    if cli.step_timeout.is_some() {
        settings.runner.step_timeout_seconds = cli.step_timeout;
    }

    let config = PipelineConfig::new(
        &cli.input_dir,
        &cli.pre_imp_mr,
        &cli.post_imp_ct,
        &cli.subject,
        &cli.output_dir,
    )?
    .with_settings(settings);
    config.check_directories()?;
    Ok(config)
}

async fn run(cli: &Cli) -> anyhow::Result<()> {
    let config = load_config(cli)?;

    let mut preprocessor = Preprocessor::new(config, Arc::new(ProcessExecutor::new()))
        .with_event_sink(Arc::new(LoggingEventSink::default()));
    if let Some(path) = &cli.report {
        preprocessor = preprocessor.with_report_path(path);
    }
    let result = preprocessor.run().await;

    if let Err(ref err) = result {
        if let Some(step) = err.step() {
            error!(step, "Step failed");
        }
    }
    let run = result?;

    info!(
        executed = run.report.executed_steps().len(),
        skipped = run.report.skipped_steps().len(),
        scene = %preprocessor.store().scene_path().display(),
        "Subject preprocessed"
    );
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(&cli);

    match run(&cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("preprocess: {err:#}");
            ExitCode::FAILURE
        }
    }
}
