//! Reforge CLI Binary
//!
//! Thin command-line wrapper around the enhancement pipeline: load config,
//! initialize logging, run one pass over the project root, print the summary.

use anyhow::Context;
use clap::Parser;
use reforge::backend::OllamaClient;
use reforge::config::ReforgeConfig;
use reforge::logging::init_logging;
use reforge::merge::PatchDecision;
use reforge::pipeline::{Pipeline, RunReport};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tracing::error;

#[derive(Parser)]
#[command(
    name = "reforge",
    about = "Dependency-ordered multi-backend content enhancement",
    version
)]
struct Cli {
    /// Project root to enhance
    #[arg(default_value = ".")]
    root: PathBuf,

    /// Apply merges without interactive confirmation
    #[arg(long)]
    auto_approve: bool,

    /// Override the backend host from config
    #[arg(long)]
    host: Option<String>,

    /// Override the concurrency cap from config
    #[arg(long)]
    concurrency: Option<usize>,
}

fn main() {
    let cli = Cli::parse();

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            process::exit(1);
        }
    };

    if let Err(e) = init_logging(Some(&config.logging)) {
        eprintln!("Failed to initialize logging: {}", e);
        process::exit(1);
    }

    match run(cli.root, config) {
        Ok(report) => print_summary(&report),
        Err(e) => {
            error!("run failed: {:#}", e);
            eprintln!("Error: {:#}", e);
            process::exit(1);
        }
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<ReforgeConfig> {
    let mut config = ReforgeConfig::load(&cli.root).context("failed to load configuration")?;
    if let Some(ref host) = cli.host {
        config.host = host.clone();
    }
    if let Some(concurrency) = cli.concurrency {
        config.concurrency = concurrency;
    }
    if cli.auto_approve {
        config.auto_approve = true;
    }
    config.validate().context("invalid configuration")?;
    Ok(config)
}

fn run(root: PathBuf, config: ReforgeConfig) -> anyhow::Result<RunReport> {
    let client = Arc::new(OllamaClient::new(config.host.clone())?);
    let pipeline = Pipeline::new(root, config, client)?;

    let runtime = tokio::runtime::Runtime::new().context("failed to start async runtime")?;
    let report = runtime.block_on(pipeline.process())?;
    Ok(report)
}

fn print_summary(report: &RunReport) {
    let count = |wanted: PatchDecision| {
        report
            .decisions
            .values()
            .filter(|d| **d == wanted)
            .count()
    };
    println!(
        "{} file(s) in {} level(s){}",
        report.levels.file_count(),
        report.levels.levels.len(),
        if report.levels.cycle {
            " (cycle detected)"
        } else {
            ""
        }
    );
    println!(
        "applied: {}  replaced: {}  unchanged: {}  skipped: {}  failed: {}",
        count(PatchDecision::Applied),
        count(PatchDecision::Replaced),
        count(PatchDecision::NoChange),
        count(PatchDecision::Skipped),
        report.failed.len()
    );
    for (backend, record) in &report.scoreboard {
        println!(
            "  {}: score {:.1} over {} run(s), {} applied",
            backend, record.score, record.runs, record.applied
        );
    }
}
