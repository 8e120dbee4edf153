//! Calib CLI - Command-line interface for Pulse Calib
//!
//! Commands:
//! - calibrate: Train context models on a scan CSV and a reference export
//! - apply: Calibrate a new scan CSV with a saved model summary
//! - inspect: Print a saved model summary

use clap::{Parser, Subcommand, ValueEnum};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::info;
use tracing_subscriber::EnvFilter;

use pulse_calib::annotator::ContextAnnotator;
use pulse_calib::export::{
    read_summary_path, write_pairs_csv_path, write_predictions_csv, write_summary_path,
};
use pulse_calib::resampler::OverlapResampler;
use pulse_calib::source::read_scan_csv_path;
use pulse_calib::types::{BinContext, CalibrationSummary, MetricsRow};
use pulse_calib::{
    BinSize, CalibrationConfig, CalibrationError, Context, ContextualTrainer, JsonReference,
    ModelKind, ModelSet, ReferenceSource, PRODUCER_NAME, VERSION,
};

/// Calib - Contextual heart-rate calibration against a reference device
#[derive(Parser)]
#[command(name = "calib")]
#[command(author = "Synheart AI Inc")]
#[command(version = VERSION)]
#[command(about = "Calibrate scan heart rate against a reference device", long_about = None)]
struct Cli {
    /// Log filter (error, warn, info, debug, trace or an EnvFilter directive)
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Train context models and write the calibrated dataset
    Calibrate {
        /// Scan CSV (start, duration, value)
        #[arg(short, long)]
        scan: PathBuf,

        /// Reference JSON export (heartRate, sleep, sport)
        #[arg(short, long)]
        reference: PathBuf,

        /// Directory receiving dataset.csv and models.json
        #[arg(short, long, default_value = ".")]
        output_dir: PathBuf,

        /// Run configuration JSON; flags below override it
        #[arg(long)]
        config: Option<PathBuf>,

        /// Bin width (e.g. 1min, 30s, 1h)
        #[arg(long)]
        bin_size: Option<BinSize>,

        /// Minimum seconds of scan data per bin
        #[arg(long)]
        min_coverage: Option<f64>,

        /// Model family (isotonic or piecewise_monotone)
        #[arg(long)]
        model_kind: Option<ModelKind>,

        /// Pairs a context needs before it gets its own model
        #[arg(long)]
        min_samples: Option<usize>,

        /// Restrict reference rows to this user
        #[arg(long)]
        user_id: Option<i64>,

        /// Print the summary as JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Calibrate a scan CSV with saved models
    Apply {
        /// Model summary written by `calibrate`
        #[arg(short, long)]
        models: PathBuf,

        /// Scan CSV (start, duration, value)
        #[arg(short, long)]
        scan: PathBuf,

        /// Output CSV path (use - for stdout)
        #[arg(short, long, default_value = "-")]
        output: PathBuf,

        /// Reference export used only for sleep and activity labels
        #[arg(short, long)]
        reference: Option<PathBuf>,

        /// Use this context's model for every bin
        #[arg(long, value_enum)]
        context: Option<ContextArg>,

        /// Bin width (e.g. 1min, 30s, 1h)
        #[arg(long, default_value = "1min")]
        bin_size: BinSize,

        /// Minimum seconds of scan data per bin
        #[arg(long, default_value = "30")]
        min_coverage: f64,

        /// Restrict reference rows to this user
        #[arg(long)]
        user_id: Option<i64>,
    },

    /// Print a saved model summary
    Inspect {
        /// Model summary written by `calibrate`
        #[arg(short, long)]
        models: PathBuf,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ContextArg {
    Rest,
    Active,
    Global,
}

impl From<ContextArg> for Context {
    fn from(arg: ContextArg) -> Self {
        match arg {
            ContextArg::Rest => Context::Rest,
            ContextArg::Active => Context::Active,
            ContextArg::Global => Context::Global,
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.log_level.as_deref());

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!(
                "{}",
                serde_json::to_string(&CliError::from(e)).unwrap_or_else(|_| "Unknown error".to_string())
            );
            ExitCode::FAILURE
        }
    }
}

/// Install a stderr fmt subscriber; an explicit level beats RUST_LOG
fn init_logging(level: Option<&str>) {
    let filter = match level {
        Some(directive) => EnvFilter::new(directive),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn run(cli: Cli) -> Result<(), CalibCliError> {
    match cli.command {
        Commands::Calibrate {
            scan,
            reference,
            output_dir,
            config,
            bin_size,
            min_coverage,
            model_kind,
            min_samples,
            user_id,
            json,
        } => {
            let mut config = match config {
                Some(path) => CalibrationConfig::from_json(&fs::read_to_string(path)?)?,
                None => CalibrationConfig::default(),
            };
            if let Some(bin_size) = bin_size {
                config.bin_size = bin_size;
            }
            if let Some(min_coverage) = min_coverage {
                config.min_scan_coverage_s = min_coverage;
            }
            if let Some(model_kind) = model_kind {
                config.model_kind = model_kind;
            }
            if let Some(min_samples) = min_samples {
                config.min_samples_per_context = min_samples;
            }
            if user_id.is_some() {
                config.user_id = user_id;
            }
            cmd_calibrate(&scan, &reference, &output_dir, config, json)
        }

        Commands::Apply {
            models,
            scan,
            output,
            reference,
            context,
            bin_size,
            min_coverage,
            user_id,
        } => cmd_apply(
            &models,
            &scan,
            &output,
            reference.as_deref(),
            context.map(Context::from),
            bin_size,
            min_coverage,
            user_id,
        ),

        Commands::Inspect { models, json } => cmd_inspect(&models, json),
    }
}

fn cmd_calibrate(
    scan: &Path,
    reference: &Path,
    output_dir: &Path,
    config: CalibrationConfig,
    json: bool,
) -> Result<(), CalibCliError> {
    let trainer = ContextualTrainer::new(config)?;
    let scan_records = read_scan_csv_path(scan)?;
    let reference = JsonReference::from_path(reference, trainer.config().user_id)?;

    let run = trainer.train_and_apply(&scan_records, &reference)?;

    fs::create_dir_all(output_dir)?;
    let dataset_path = output_dir.join("dataset.csv");
    let models_path = output_dir.join("models.json");
    write_pairs_csv_path(&run.records, &dataset_path)?;
    write_summary_path(&run.summary, &models_path)?;

    info!(
        dataset = %dataset_path.display(),
        models = %models_path.display(),
        "calibration written"
    );

    if json {
        println!("{}", serde_json::to_string_pretty(&run.summary)?);
    } else {
        print_summary(&run.summary);
    }

    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn cmd_apply(
    models: &Path,
    scan: &Path,
    output: &Path,
    reference: Option<&Path>,
    context: Option<Context>,
    bin_size: BinSize,
    min_coverage: f64,
    user_id: Option<i64>,
) -> Result<(), CalibCliError> {
    let summary = read_summary_path(models)?;
    let model_set = ModelSet::from_summary(&summary);
    if model_set.is_empty() {
        return Err(CalibCliError::NoModels);
    }

    let scan_records = read_scan_csv_path(scan)?;
    let points = OverlapResampler::resample(&scan_records, min_coverage, bin_size);

    let contexts = match reference {
        Some(path) => {
            let reference = JsonReference::from_path(path, user_id)?;
            let starts: Vec<_> = points.iter().map(|p| p.window_start).collect();
            ContextAnnotator::annotate(
                &starts,
                &reference.sleep_intervals()?,
                &reference.activity_intervals()?,
                bin_size,
            )
        }
        None => vec![BinContext::default(); points.len()],
    };

    let predictions = model_set.calibrate_scan(&points, &contexts, context)?;
    info!(bins = predictions.len(), "calibrated scan bins");

    if output.to_string_lossy() == "-" {
        let stdout = io::stdout();
        let mut handle = stdout.lock();
        write_predictions_csv(&predictions, &mut handle)?;
        handle.flush()?;
    } else {
        write_predictions_csv(&predictions, fs::File::create(output)?)?;
    }

    Ok(())
}

fn cmd_inspect(models: &Path, json: bool) -> Result<(), CalibCliError> {
    let summary = read_summary_path(models)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print_summary(&summary);
    }

    Ok(())
}

fn print_summary(summary: &CalibrationSummary) {
    println!("Calibration Summary ({} {})", PRODUCER_NAME, VERSION);
    println!("=====================");

    for (context, report) in &summary.contexts {
        println!(
            "\n[{}] {} model, {} knots, trained on {} pairs",
            context,
            report.model.kind,
            report.model.x_knots.len(),
            report.n
        );
        print_metrics(&report.metrics);
    }

    println!("\n[overall] {} records", summary.overall.n);
    print_metrics(&summary.overall.metrics);
}

fn print_metrics(rows: &[MetricsRow]) {
    println!("  {:<8} {:>6} {:>8} {:>8}", "zone", "n", "mae", "bias");
    for row in rows {
        println!(
            "  {:<8} {:>6} {:>8.2} {:>8.2}",
            row.zone.as_str(),
            row.n,
            row.mae,
            row.bias
        );
    }
}

// Error handling

#[derive(Debug)]
enum CalibCliError {
    Io(io::Error),
    Calibration(CalibrationError),
    Json(serde_json::Error),
    NoModels,
}

impl From<io::Error> for CalibCliError {
    fn from(e: io::Error) -> Self {
        CalibCliError::Io(e)
    }
}

impl From<CalibrationError> for CalibCliError {
    fn from(e: CalibrationError) -> Self {
        CalibCliError::Calibration(e)
    }
}

impl From<serde_json::Error> for CalibCliError {
    fn from(e: serde_json::Error) -> Self {
        CalibCliError::Json(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<CalibCliError> for CliError {
    fn from(e: CalibCliError) -> Self {
        match e {
            CalibCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            CalibCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            CalibCliError::NoModels => CliError {
                code: "NO_MODELS".to_string(),
                message: "Model summary contains no models".to_string(),
                hint: Some("Re-run 'calib calibrate' to produce models.json".to_string()),
            },
            CalibCliError::Calibration(e) => {
                let (code, hint) = calibration_code(&e);
                CliError {
                    code: code.to_string(),
                    message: e.to_string(),
                    hint: hint.map(str::to_string),
                }
            }
        }
    }
}

fn calibration_code(e: &CalibrationError) -> (&'static str, Option<&'static str>) {
    match e {
        CalibrationError::NoData(_) => (
            "NO_DATA",
            Some("Check that scan and reference data cover the same period"),
        ),
        CalibrationError::InsufficientData(_) => ("INSUFFICIENT_DATA", None),
        CalibrationError::InvalidInput(_) => (
            "INVALID_INPUT",
            Some("Scan CSV needs start, duration and value columns"),
        ),
        CalibrationError::InvalidInterval(_) => (
            "INVALID_INTERVAL",
            Some("Sleep and sport records must end after they start"),
        ),
        CalibrationError::UnsupportedModel(_) => (
            "UNSUPPORTED_MODEL",
            Some("Use isotonic or piecewise_monotone"),
        ),
        CalibrationError::InvalidModel(_) => ("INVALID_MODEL", Some("Re-run 'calib calibrate'")),
        CalibrationError::NoSuitableModel(_) => (
            "NO_SUITABLE_MODEL",
            Some("Pass --context with a context present in the summary"),
        ),
        CalibrationError::DateParseError(_) => (
            "DATE_PARSE_ERROR",
            Some("Timestamps need an explicit UTC offset"),
        ),
        CalibrationError::InvalidBinSize(_) => ("INVALID_BIN_SIZE", Some("Use e.g. 1min, 30s or 1h")),
        CalibrationError::JsonError(_) => ("JSON_ERROR", Some("Check JSON syntax")),
        CalibrationError::CsvError(_) => ("CSV_ERROR", Some("Check CSV headers and quoting")),
        CalibrationError::Io(_) => ("IO_ERROR", Some("Check file paths and permissions")),
    }
}
