//! CLI binary for running and validating the crimeflow batch pipeline.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crimeflow_pipeline::{
    graph_from_config, validate, PipelineConfig, PipelineEvent, PipelineExecutor, Severity,
    SourceConfig,
};
use crimeflow_types::RunId;

#[derive(Parser)]
#[command(
    name = "crimeflow",
    version,
    about = "Batch pipeline loading Boston crime, shooting and weather data into SQLite"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the pipeline once
    Run {
        /// JSON configuration file (defaults apply when omitted)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Run id scoping this run's artifacts (default: generated)
        #[arg(long)]
        run_id: Option<String>,

        /// Directory artifacts are written under
        #[arg(long)]
        work_dir: Option<PathBuf>,

        /// Target database, e.g. sqlite://crimeflow.db
        #[arg(long)]
        database_url: Option<String>,

        /// Maximum number of tasks running at once
        #[arg(long)]
        max_parallel: Option<usize>,
    },

    /// Check the configuration and the task graph
    Validate {
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Show the configured sources and the task graph
    Info {
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Run {
            config,
            run_id,
            work_dir,
            database_url,
            max_parallel,
        } => {
            let mut config = load_config(config.as_deref())?;
            if let Some(dir) = work_dir {
                config.work_dir = dir;
            }
            if let Some(url) = database_url {
                config.database_url = url;
            }
            if let Some(n) = max_parallel {
                config.max_parallel = n;
            }
            config.check()?;
            let run_id = match run_id {
                Some(id) => RunId::new(id)?,
                None => RunId::generate(),
            };
            cmd_run(&config, run_id).await?;
        }
        Commands::Validate { config } => {
            cmd_validate(&load_config(config.as_deref())?)?;
        }
        Commands::Info { config } => {
            cmd_info(&load_config(config.as_deref())?)?;
        }
    }

    Ok(())
}

fn load_config(path: Option<&Path>) -> anyhow::Result<PipelineConfig> {
    let config = match path {
        Some(p) => PipelineConfig::load(p)?,
        None => {
            let config = PipelineConfig::default();
            config.check()?;
            config
        }
    };
    Ok(config)
}

fn cmd_validate(config: &PipelineConfig) -> anyhow::Result<()> {
    let graph = graph_from_config(config)?;
    let diagnostics = validate(&graph, &[]);

    if diagnostics.is_empty() {
        println!("Pipeline '{}' is valid ({} tasks)", graph.name, graph.len());
        return Ok(());
    }

    let mut has_error = false;
    for diag in &diagnostics {
        let severity = match diag.severity {
            Severity::Error => {
                has_error = true;
                "ERROR"
            }
            Severity::Warning => "WARN",
            };
        println!("[{}] {}: {}", severity, diag.rule, diag.message);
        if let Some(fix) = &diag.fix {
            println!("    fix: {fix}");
        }
    }

    if has_error {
        std::process::exit(1);
    }
    Ok(())
}

fn describe(source: &SourceConfig) -> String {
    match source {
        SourceConfig::Http { url, encoding } => format!("http {url} ({encoding:?})"),
        SourceConfig::File { path, encoding } => {
            format!("file {} ({encoding:?})", path.display())
        }
        SourceConfig::Kaggle {
            dataset, member, ..
        } => format!("kaggle {dataset} / {member}"),
        SourceConfig::Meteostat {
            station, start, end, ..
        } => format!("meteostat station {station}, {start} to {end}"),
    }
}

fn cmd_info(config: &PipelineConfig) -> anyhow::Result<()> {
    let graph = graph_from_config(config)?;

    println!("Pipeline: {}", graph.name);
    println!("Database: {}", config.database_url);
    println!("Work dir: {}", config.work_dir.display());
    println!(
        "Retries: {} (delay {}s, {:?} backoff, {:?} policy)",
        config.retry.retries, config.retry.delay_secs, config.retry.backoff, config.retry.policy
    );
    println!("Max parallel: {}", config.max_parallel);

    println!("\nSources:");
    println!("  shootings: {}", describe(&config.sources.shootings));
    println!("  crimes:    {}", describe(&config.sources.crimes));
    println!("  weather:   {}", describe(&config.sources.weather));

    println!("\nTasks ({}, {} edges):", graph.len(), graph.edges().len());
    for id in graph.execution_order() {
        let kind = graph.node(id).map(|n| n.task.kind()).unwrap_or("?");
        let preds = graph.predecessors(id);
        if preds.is_empty() {
            println!("  {id} [{kind}]");
        } else {
            println!("  {id} [{kind}] <- {}", preds.join(", "));
        }
    }

    Ok(())
}

async fn cmd_run(config: &PipelineConfig, run_id: RunId) -> anyhow::Result<()> {
    let graph = graph_from_config(config)?;
    let executor = PipelineExecutor::new(config.engine_config());
    tracing::debug!(
        run_id = %run_id,
        work_dir = %config.work_dir.display(),
        max_parallel = config.max_parallel,
        "Executor ready"
    );

    println!("Running pipeline: {}", graph.name);
    println!("Run id: {run_id}");
    println!("Database: {}", config.database_url);

    let mut events = executor.events().subscribe();
    let progress = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                PipelineEvent::TaskRetrying {
                    task_id,
                    attempt,
                    delay_ms,
                    error,
                } => println!("  {task_id}: attempt {attempt} failed ({error}), retrying in {delay_ms} ms"),
                PipelineEvent::TaskSucceeded {
                    task_id, attempts, ..
                } => println!("  {task_id}: succeeded after {attempts} attempt(s)"),
                PipelineEvent::TaskFailed { task_id, error, .. } => {
                    println!("  {task_id}: FAILED: {error}")
                }
                PipelineEvent::RunCompleted { .. } | PipelineEvent::RunFailed { .. } => break,
                _ => {}
            }
        }
    });

    let report = executor.run(&graph, run_id).await?;
    let _ = progress.await;

    println!("\nRun {} {:?} in {} ms", report.run_id, report.status, report.duration_ms);
    if let Some(failed) = &report.failed_task {
        println!("Failed task: {}", failed.task_id);
        println!("Error: {}", failed.error);
        if !report.blocked.is_empty() {
            println!("Blocked: {}", report.blocked.join(", "));
        }
        std::process::exit(1);
    }
    Ok(())
}
