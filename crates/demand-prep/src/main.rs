//! CLI entry point for the demand dataset preparation pipeline.

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use demand_prep::utils::parse_timestamp;
use demand_prep::{
    DirectorySink, ExportedFiles, Pipeline, PipelineConfig, PipelineError, PipelineResult,
    PipelineSummary,
};
use dotenv::dotenv;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};

/// File name of the report written by `--emit-report`.
const REPORT_FILE: &str = "preparation_report.json";

#[derive(Parser, Debug)]
#[command(
    version,
    about = "Hourly demand and weather dataset preparation",
    long_about = "Merges an hourly demand series with weather observations, fills gaps, \
                  adds calendar and lag features and writes train/test splits.\n\n\
                  ENVIRONMENT VARIABLES:\n  \
                  RUST_LOG    Overrides --log-level (may be set in a .env file)\n\n\
                  EXAMPLES:\n  \
                  # Basic usage\n  \
                  demand-prep --demand demand.csv --weather weather.csv\n\n  \
                  # Custom cutoff and lag depth\n  \
                  demand-prep --demand demand.csv --weather weather.csv --cutoff 2016-12-01 --lag-depth 3\n\n  \
                  # Register outputs in a local dataset registry\n  \
                  demand-prep --demand demand.csv --weather weather.csv --registry ./registry"
)]
struct Args {
    /// Path to the demand CSV
    #[arg(long)]
    demand: Option<PathBuf>,

    /// Path to the weather CSV
    #[arg(long)]
    weather: Option<PathBuf>,

    /// Output directory for the processed/train/test files
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// JSON configuration file
    ///
    /// Command line flags override values from the file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Train/test cutoff; rows at or after it go to the test split
    #[arg(long)]
    cutoff: Option<String>,

    /// Number of lag columns per variable
    #[arg(long)]
    lag_depth: Option<usize>,

    /// Longest run of missing values that interpolation may fill
    #[arg(long)]
    interpolation_limit: Option<usize>,

    /// Column filled with its mode instead of interpolation (repeatable)
    #[arg(long = "mode-fill", value_name = "COLUMN")]
    mode_fill: Vec<String>,

    /// Variable to lag (repeatable); defaults to demand and every weather column
    #[arg(long = "lag-var", value_name = "COLUMN")]
    lag_var: Vec<String>,

    /// Register the outputs in a local dataset registry at this directory
    #[arg(long)]
    registry: Option<PathBuf>,

    /// Skip dataset registration
    #[arg(long)]
    no_register: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Suppress progress output (only show errors and final result)
    #[arg(short, long)]
    quiet: bool,

    /// Output JSON to stdout instead of human-readable summary
    ///
    /// Disables all progress logs; only outputs the final JSON summary.
    #[arg(long)]
    json: bool,

    /// Write a detailed JSON report to the output directory
    #[arg(short = 'r', long)]
    emit_report: bool,
}

/// JSON document written by `--emit-report` and printed by `--json`.
#[derive(Debug, Serialize)]
struct PreparationReport<'a> {
    config: &'a PipelineConfig,
    files: Option<&'a ExportedFiles>,
    summary: &'a PipelineSummary,
    registration_failures: &'a [PipelineError],
}

/// Initialize the tracing subscriber for logging.
///
/// When `json_output` is true, logging is completely disabled to ensure
/// only JSON is written to stdout.
fn init_logging(level: &str, quiet: bool, json_output: bool) {
    if json_output {
        return;
    }

    use tracing_subscriber::EnvFilter;

    let effective_level = if quiet { "warn" } else { level };

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(effective_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn main() -> Result<()> {
    // Load .env before the subscriber reads RUST_LOG
    dotenv().ok();

    let args = Args::parse();
    init_logging(&args.log_level, args.quiet, args.json);

    let config = build_config(&args)?;
    let pipeline = build_pipeline(&args, config)?;

    info!("{}", "=".repeat(80));
    info!("Starting dataset preparation...");
    info!("{}", "=".repeat(80));

    match pipeline.run() {
        Ok(result) => handle_pipeline_output(&result, pipeline.config(), &args),
        Err(e) => {
            error!("Pipeline failed: {}", e);
            if args.json {
                println!("{}", serde_json::to_string_pretty(&e)?);
            }
            Err(anyhow!("Pipeline failed: {}", e))
        }
    }
}

/// Merge the optional JSON config file with command line overrides.
fn build_config(args: &Args) -> Result<PipelineConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("Cannot read config file {}", path.display()))?;
            serde_json::from_str::<PipelineConfig>(&raw)
                .with_context(|| format!("Invalid config file {}", path.display()))?
        }
        None => PipelineConfig::default(),
    };

    if let Some(path) = &args.demand {
        config.demand_path = Some(path.clone());
    }
    if let Some(path) = &args.weather {
        config.weather_path = Some(path.clone());
    }
    if let Some(dir) = &args.output {
        config.output_dir = dir.clone();
    }
    if let Some(raw) = &args.cutoff {
        config.split_cutoff =
            parse_timestamp(raw).ok_or_else(|| anyhow!("Invalid cutoff timestamp: {}", raw))?;
    }
    if let Some(depth) = args.lag_depth {
        config.lag_depth = depth;
    }
    if let Some(limit) = args.interpolation_limit {
        config.interpolation_limit = limit;
    }
    if !args.mode_fill.is_empty() {
        config.mode_fill_columns = args.mode_fill.clone();
    }
    if !args.lag_var.is_empty() {
        config.lag_variables = Some(args.lag_var.clone());
    }
    if args.no_register {
        config.register_artifacts = false;
    }

    for (flag, path) in [("--demand", &config.demand_path), ("--weather", &config.weather_path)] {
        match path {
            None => return Err(anyhow!("Missing input: pass {} or set it in --config", flag)),
            Some(p) if !p.exists() => return Err(anyhow!("Input file not found: {}", p.display())),
            Some(_) => {}
        }
    }

    config.validate()?;
    Ok(config)
}

fn build_pipeline(args: &Args, config: PipelineConfig) -> Result<Pipeline> {
    let float_precision = config.float_precision;
    let register = config.register_artifacts;
    let output_dir = config.output_dir.clone();
    let mut builder = Pipeline::builder().config(config);

    match &args.registry {
        Some(dir) if register => {
            let sink = DirectorySink::new(dir).with_float_precision(float_precision);
            if sink.shares_directory_with(&output_dir) {
                return Err(anyhow!(
                    "--registry must differ from the output directory {}",
                    output_dir.display()
                ));
            }
            info!("Registering datasets in {}", dir.display());
            builder = builder.artifact_sink(Arc::new(sink));
        }
        Some(_) => warn!("--registry ignored because registration is disabled"),
        None => {}
    }

    if !args.quiet && !args.json {
        builder = builder.on_progress(|update| {
            info!(
                "[{:.0}%] {}: {}",
                update.progress * 100.0,
                update.stage.display_name(),
                update.message
            );
        });
    }

    Ok(builder.build()?)
}

/// Handle pipeline output based on CLI flags.
///
/// Output behavior:
/// - Default: Print human-readable summary to stdout
/// - `--json`: Print JSON to stdout only (no logs)
/// - `--emit-report`: Write JSON report to the output directory
fn handle_pipeline_output(
    result: &PipelineResult,
    config: &PipelineConfig,
    args: &Args,
) -> Result<()> {
    let report = PreparationReport {
        config,
        files: result.files.as_ref(),
        summary: &result.summary,
        registration_failures: &result.registration_failures,
    };

    if args.emit_report {
        let path = write_report(&report, &config.output_dir)?;
        info!("Report written to: {}", path.display());
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    print_human_readable_summary(result);
    Ok(())
}

fn write_report(report: &PreparationReport<'_>, output_dir: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(output_dir)?;
    let path = output_dir.join(REPORT_FILE);
    std::fs::write(&path, serde_json::to_string_pretty(report)?)
        .with_context(|| format!("Cannot write report to {}", path.display()))?;
    Ok(path)
}

/// Print a human-readable summary of the preparation results.
fn print_human_readable_summary(result: &PipelineResult) {
    let summary = &result.summary;

    println!();
    println!("{}", "=".repeat(80));
    println!("PREPARATION COMPLETE");
    println!("{}", "=".repeat(80));
    println!();

    println!(
        "Sources: {} demand rows, {} weather rows -> {} merged rows",
        summary.demand_rows, summary.weather_rows, summary.merged_rows
    );
    println!(
        "Timeline: {} hourly rows ({} synthesized)",
        summary.regularized_rows, summary.synthesized_rows
    );
    println!();

    println!("Processing Summary:");
    println!("  Duration: {}ms", summary.duration_ms);
    println!(
        "  Missing cells: {} -> {} ({} interpolated, {} mode-filled)",
        summary.nulls_before_fill,
        summary.nulls_after_fill,
        summary.fill.interpolated.values().sum::<usize>(),
        summary.fill.mode_filled.values().sum::<usize>()
    );
    println!(
        "  Features: {} columns added (lags of {})",
        summary.feature_columns,
        summary.lag_variables.join(", ")
    );
    println!(
        "  Rows: {} -> {} ({} dropped, {:.1}%)",
        summary.regularized_rows,
        summary.processed_rows,
        summary.rows_dropped,
        summary.rows_dropped_percentage()
    );
    if let Some(cutoff) = summary.split_cutoff {
        println!(
            "  Split at {}: {} train / {} test",
            cutoff, summary.train_rows, summary.test_rows
        );
    }
    println!();

    if let Some(files) = &result.files {
        println!("Output:");
        println!("  - {}", files.processed.display());
        println!("  - {}", files.train.display());
        println!("  - {}", files.test.display());
        println!();
    }

    if !summary.registered.is_empty() {
        println!("Registered: {}", summary.registered.join(", "));
    }

    if !summary.warnings.is_empty() {
        println!("Warnings:");
        for warning in &summary.warnings {
            println!("  ! {}", warning);
        }
        println!();
    }

    println!("Use --json for machine-readable output");
    println!("Use --emit-report to save a detailed JSON report");
    println!("{}", "=".repeat(80));
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::OsString;

    #[test]
    fn test_registry_in_output_directory_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let registry = dir.path().join(".");
        let args = Args::parse_from([
            OsString::from("demand-prep"),
            OsString::from("--registry"),
            registry.into_os_string(),
        ]);
        let config = PipelineConfig {
            output_dir: dir.path().to_path_buf(),
            ..PipelineConfig::default()
        };

        match build_pipeline(&args, config) {
            Ok(_) => panic!("registry sharing the output directory was accepted"),
            Err(e) => assert!(e.to_string().contains("--registry")),
        }
    }

    #[test]
    fn test_separate_registry_is_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let registry = dir.path().join("registry");
        let args = Args::parse_from([
            OsString::from("demand-prep"),
            OsString::from("--registry"),
            registry.into_os_string(),
        ]);
        let config = PipelineConfig {
            output_dir: dir.path().join("output"),
            ..PipelineConfig::default()
        };

        assert!(build_pipeline(&args, config).is_ok());
    }
}
