//! CLI command definitions for flowforge.
//!
//! This module provides the command-line interface for running pipelines
//! defined in a YAML configuration file.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::pipeline::{AppConfig, PipelineOrchestrator, PipelineRun, StageRunner};
use crate::record::Record;
use crate::registry::StageRegistry;

/// Default pipeline configuration file.
const DEFAULT_CONFIG_PATH: &str = "./pipelines.yaml";

/// Linear multi-stage data pipeline runner.
#[derive(Parser)]
#[command(name = "flowforge")]
#[command(about = "Run linear multi-stage data pipelines defined in YAML")]
#[command(version)]
#[command(
    long_about = "flowforge runs named pipelines of pluggable stages over a stream of records.\n\nEach stage processes the full output of the previous one, optionally in concurrent batches.\n\nExample usage:\n  flowforge run --config ./pipelines.yaml --pipelines contacts,analytics"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Run one or more pipelines from a configuration file.
    Run(RunArgs),

    /// List the pipelines and stages defined in a configuration file.
    #[command(alias = "ls")]
    List(ListArgs),

    /// List the registered stage types.
    Stages,
}

/// Arguments for `flowforge run`.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Path to the pipeline configuration file.
    #[arg(short, long, env = "FLOWFORGE_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Comma-separated pipeline names to run (default: all, in name order).
    #[arg(short, long, value_delimiter = ',')]
    pub pipelines: Vec<String>,

    /// Print a JSON summary of each successful run to stdout.
    #[arg(long)]
    pub json: bool,

    /// Include the final records in the JSON summary.
    #[arg(long, requires = "json")]
    pub records: bool,

    /// Let remaining workers drain a stage's queue after a batch fails.
    #[arg(long)]
    pub no_fail_fast: bool,
}

/// Arguments for `flowforge list`.
#[derive(Parser, Debug)]
pub struct ListArgs {
    /// Path to the pipeline configuration file.
    #[arg(short, long, env = "FLOWFORGE_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,
}

/// Parse CLI arguments.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI by parsing arguments and executing the command.
///
/// For more control over logging initialization, use `parse_cli()` and
/// `run_with_cli()`.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Run(args) => run_pipelines_command(args).await,
        Commands::List(args) => run_list_command(args),
        Commands::Stages => run_stages_command(),
    }
}

// ============================================================================
// Run Command Implementation
// ============================================================================

async fn run_pipelines_command(args: RunArgs) -> anyhow::Result<()> {
    let config = AppConfig::load(&args.config)
        .map_err(|e| anyhow::anyhow!("Failed to load {}: {}", args.config.display(), e))?;
    let selected = config.select(&args.pipelines)?;

    let registry = Arc::new(StageRegistry::with_builtin_stages());
    let orchestrator = PipelineOrchestrator::new(registry)
        .with_runner(StageRunner::new().with_fail_fast(!args.no_fail_fast));

    let cancel = CancellationToken::new();
    let signal_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling running pipelines");
            signal_token.cancel();
        }
    });

    let mut failures = Vec::new();
    for (name, stages) in selected {
        if cancel.is_cancelled() {
            warn!(pipeline = %name, "Skipping pipeline after interrupt");
            failures.push(format!("{}: cancelled before start", name));
            continue;
        }

        match orchestrator.run_pipeline(&cancel, name, stages).await {
            Ok(run) => {
                info!(
                    pipeline = %name,
                    run_id = %run.run_id,
                    records = run.records.len(),
                    duration_ms = run.duration.as_millis() as u64,
                    "Pipeline succeeded"
                );
                if args.json {
                    let summary = RunSummary::from_run(&run, args.records);
                    let json_output = serde_json::to_string_pretty(&summary)
                        .map_err(|e| anyhow::anyhow!("Failed to serialize JSON output: {}", e))?;
                    println!("{}", json_output);
                }
            }
            Err(e) => {
                error!(pipeline = %name, error = %e, "Pipeline failed");
                failures.push(format!("{}: {}", name, e));
            }
        }
    }

    if !failures.is_empty() {
        anyhow::bail!(
            "{} pipeline(s) failed:\n  {}",
            failures.len(),
            failures.join("\n  ")
        );
    }
    Ok(())
}

/// JSON summary of one pipeline run.
#[derive(Debug, Serialize)]
struct RunSummary<'a> {
    run_id: String,
    pipeline: &'a str,
    duration_ms: u64,
    output_items: usize,
    stages: Vec<StageSummary<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    records: Option<&'a [Record]>,
}

#[derive(Debug, Serialize)]
struct StageSummary<'a> {
    name: &'a str,
    #[serde(rename = "type")]
    stage_type: &'a str,
    input_items: usize,
    output_items: usize,
    batches: usize,
    duration_ms: u64,
}

impl<'a> RunSummary<'a> {
    fn from_run(run: &'a PipelineRun, include_records: bool) -> Self {
        Self {
            run_id: run.run_id.to_string(),
            pipeline: &run.pipeline,
            duration_ms: run.duration.as_millis() as u64,
            output_items: run.records.len(),
            stages: run
                .stages
                .iter()
                .map(|stage| StageSummary {
                    name: &stage.name,
                    stage_type: &stage.stage_type,
                    input_items: stage.input_items,
                    output_items: stage.output_items,
                    batches: stage.batches,
                    duration_ms: stage.duration.as_millis() as u64,
                })
                .collect(),
            records: include_records.then_some(run.records.as_slice()),
        }
    }
}

// ============================================================================
// List Commands
// ============================================================================

fn run_list_command(args: ListArgs) -> anyhow::Result<()> {
    let config = AppConfig::load(&args.config)
        .map_err(|e| anyhow::anyhow!("Failed to load {}: {}", args.config.display(), e))?;

    for (name, stages) in &config.pipelines {
        println!("{} ({} stage(s))", name, stages.len());
        for (index, stage) in stages.iter().enumerate() {
            println!(
                "  {}. {} [{}] concurrency={} batch_size={}{}",
                index + 1,
                stage.name,
                stage.stage_type,
                stage.concurrency.max(1),
                if stage.batch_size == 0 {
                    "all".to_string()
                } else {
                    stage.batch_size.to_string()
                },
                if stage.ordered { " ordered" } else { "" }
            );
        }
    }
    Ok(())
}

fn run_stages_command() -> anyhow::Result<()> {
    let registry = StageRegistry::with_builtin_stages();
    for stage_type in registry.stage_types() {
        println!("{}", stage_type);
    }
    Ok(())
}
