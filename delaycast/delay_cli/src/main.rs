mod manifest;
mod render;

use std::{
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use delaycast_forecast::{
    features::FeatureBuilder, pipeline::check_schema, DelayPredictor, DelaycastConfig,
    PredictionTable, ReferenceSource, ResourceLoader, Table,
};
use serde_json::{json, Value};
use shared_logging::{JsonLogger, LogLevel, LogRecord};

use manifest::{append_manifest, read_manifest, update_run, RunManifestEntry};

#[derive(Parser, Debug)]
#[command(name = "delaycast", version, about = "Activity delay classification")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Predicts delay status for every activity in an upload.
    Predict(PredictArgs),
    /// Writes the engineered feature table without scoring it.
    Features {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Renders a saved prediction CSV.
    Show {
        #[arg(long)]
        predictions: PathBuf,
        #[arg(long)]
        no_color: bool,
    },
    /// Loads the reference workbook and artifacts and reports their shape.
    Check {
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Lists most recent prediction runs.
    Runs {
        /// Number of entries to display.
        #[arg(long, default_value_t = 10)]
        limit: usize,
        #[arg(long, default_value = "logs/runs.jsonl")]
        manifest: PathBuf,
    },
}

#[derive(Parser, Debug)]
struct PredictArgs {
    #[arg(long)]
    input: PathBuf,
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
    format: OutputFormat,
    #[arg(long)]
    output: Option<PathBuf>,
    /// Prints per-row scores and scaled inputs before the result.
    #[arg(long)]
    explain: bool,
    #[arg(long)]
    no_color: bool,
    #[arg(long, default_value = "logs/runs.jsonl")]
    manifest: PathBuf,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Table,
    Csv,
    Json,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Predict(args) => handle_predict(&args),
        Commands::Features {
            input,
            config,
            output,
        } => handle_features(&input, config.as_deref(), output.as_deref()),
        Commands::Show {
            predictions,
            no_color,
        } => {
            let table = PredictionTable::read_csv_path(&predictions)
                .with_context(|| format!("reading predictions {}", predictions.display()))?;
            print!("{}", render::prediction_table(&table, render::use_color(no_color)));
            Ok(())
        }
        Commands::Check { config } => handle_check(config.as_deref()),
        Commands::Runs { limit, manifest } => {
            let entries = read_manifest(&manifest)?;
            for entry in entries.into_iter().rev().take(limit) {
                println!(
                    "{} | {} | {} | {} | {} | rows {}",
                    entry.run_id,
                    entry.command,
                    entry.status,
                    entry.started_at,
                    entry.input.display(),
                    entry
                        .output_rows
                        .map_or_else(|| "-".to_string(), |rows| rows.to_string())
                );
            }
            Ok(())
        }
    }
}

fn handle_predict(args: &PredictArgs) -> Result<()> {
    let config = DelaycastConfig::load_or_default(args.config.as_deref())?;
    let entry = RunManifestEntry::new("predict", args.input.clone(), args.config.clone());
    append_manifest(&args.manifest, &entry)?;
    log_run_event(
        &config,
        LogLevel::Info,
        "run started",
        json!({ "run_id": entry.run_id, "input": entry.input }),
    )?;

    match run_predict(args, &config) {
        Ok((input_rows, output_rows)) => {
            update_run(&args.manifest, &entry.run_id, |run| {
                run.status = "completed".into();
                run.finished_at = Some(Utc::now());
                run.input_rows = Some(input_rows);
                run.output_rows = Some(output_rows);
            })?;
            log_run_event(
                &config,
                LogLevel::Info,
                "run completed",
                json!({ "run_id": entry.run_id, "output_rows": output_rows }),
            )?;
            Ok(())
        }
        Err(err) => {
            record_failure(&args.manifest, &entry.run_id, &config, &err);
            Err(err)
        }
    }
}

/// Marks the run failed in the manifest and the log. Bookkeeping errors go to
/// stderr so the pipeline error is the one returned.
fn record_failure(manifest: &Path, run_id: &str, config: &DelaycastConfig, err: &anyhow::Error) {
    let message = format!("{err:#}");
    if let Err(update_err) = update_run(manifest, run_id, |run| {
        run.status = "failed".into();
        run.finished_at = Some(Utc::now());
        run.error = Some(message.clone());
    }) {
        eprintln!("failed to record run {run_id} in {}: {update_err:#}", manifest.display());
    }
    if let Err(log_err) = log_run_event(
        config,
        LogLevel::Error,
        "run failed",
        json!({ "run_id": run_id, "error": message }),
    ) {
        eprintln!("failed to log run {run_id}: {log_err:#}");
    }
}

/// Runs the pipeline and emits the result only once it is complete.
fn run_predict(args: &PredictArgs, config: &DelaycastConfig) -> Result<(usize, usize)> {
    let predictor = DelayPredictor::from_config(config)?;
    let upload = read_upload(&args.input)?;
    let scored = predictor.predict_detailed(&upload)?;
    let table = scored.to_table();

    let mut rendered = String::new();
    if args.explain {
        rendered.push_str(&render::explain(&scored));
        rendered.push('\n');
    }
    let color = args.output.is_none() && render::use_color(args.no_color);
    match args.format {
        OutputFormat::Table => rendered.push_str(&render::prediction_table(&table, color)),
        OutputFormat::Csv => {
            let mut buffer = Vec::new();
            table.write_csv(&mut buffer)?;
            rendered.push_str(&String::from_utf8(buffer)?);
        }
        OutputFormat::Json => {
            rendered.push_str(&table.to_json()?);
            rendered.push('\n');
        }
    }
    emit(args.output.as_deref(), rendered.as_bytes())?;
    Ok((upload.len(), table.len()))
}

fn handle_features(input: &Path, config: Option<&Path>, output: Option<&Path>) -> Result<()> {
    let config = DelaycastConfig::load_or_default(config)?;
    let predictor = DelayPredictor::from_config(&config)?;
    let frame = predictor.engineer(&read_upload(input)?)?;
    let mut buffer = Vec::new();
    frame.write_csv(&mut buffer)?;
    emit(output, &buffer)?;
    eprintln!(
        "{} feature rows ({} input rows, {} dropped unmatched)",
        frame.rows.len(),
        frame.stats.input_rows,
        frame.stats.unmatched_rows
    );
    Ok(())
}

fn handle_check(config: Option<&Path>) -> Result<()> {
    let config = DelaycastConfig::load_or_default(config)?;
    let source = config.workbook_source();
    let reference = source.load()?;
    FeatureBuilder::check_reference(&reference)?;
    let resources = ResourceLoader::new(config.artifact_paths()).load_resources()?;
    check_schema(&resources)?;

    let report = json!({
        "reference": {
            "source": source.describe(),
            "tasks": reference.tasks.len(),
            "dependencies": reference.dependencies.len(),
        },
        "model": {
            "kind": resources.model.kind(),
            "features": resources.model.feature_names(),
        },
        "scaler": { "features": resources.scaler.width() },
        "encoder": resources.encoder.as_ref().map_or(Value::Null, |encoder| json!({
            "column": encoder.column,
            "classes": encoder.classes.len(),
        })),
        "threshold": config.prediction.threshold,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn read_upload(path: &Path) -> Result<Table> {
    Table::from_csv_path("upload", path)
        .with_context(|| format!("reading upload {}", path.display()))
}

fn emit(output: Option<&Path>, bytes: &[u8]) -> Result<()> {
    if let Some(path) = output {
        if let Some(parent) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, bytes).with_context(|| format!("writing {}", path.display()))?;
    } else {
        let mut stdout = io::stdout().lock();
        stdout.write_all(bytes)?;
        stdout.flush()?;
    }
    Ok(())
}

fn log_run_event(
    config: &DelaycastConfig,
    level: LogLevel,
    message: &str,
    metadata: Value,
) -> Result<()> {
    let Some(path) = &config.logging.path else {
        return Ok(());
    };
    let logger = JsonLogger::with_min_level(path, config.logging.level)?;
    logger.log(&LogRecord::new("delaycast", level, message).with_metadata(metadata))
}
