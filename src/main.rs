//! NetPulse CLI entry point

use anyhow::{Context, Result};
use netpulse::bench::RunOutcome;
use netpulse::config::cli::Cli;
use netpulse::config::toml::{merge_cli_with_config, parse_toml_file};
use netpulse::config::BenchConfig;
use netpulse::output::json::write_json_report;
use netpulse::LocalCluster;

fn main() -> Result<()> {
    println!("NetPulse v{}", env!("CARGO_PKG_VERSION"));
    println!("Cluster messaging throughput benchmark");
    println!();

    // Parse CLI arguments and merge them over the optional config file
    let cli = Cli::parse_args();
    let file_config = match cli.config {
        Some(ref path) => parse_toml_file(path)?,
        None => BenchConfig::default(),
    };
    let config = merge_cli_with_config(&cli, file_config)?;

    if let Err(msg) = config.validate() {
        anyhow::bail!("Configuration validation failed: {}", msg);
    }

    println!("{}", config);

    if cli.dry_run {
        println!();
        println!("Dry run mode - configuration validated successfully");
        return Ok(());
    }

    init_logging();

    println!();
    println!("Starting benchmark...");
    println!();

    let runtime = tokio::runtime::Runtime::new().context("Failed to create tokio runtime")?;
    runtime.block_on(run(config))
}

/// Stand the cluster up, drive the benchmark, write the report
async fn run(config: BenchConfig) -> Result<()> {
    let cluster = LocalCluster::new(config.clone());
    for i in 1..=config.nodes {
        cluster.add_node(&format!("node-{}", i))?;
    }

    let report = cluster.run_benchmark().await?;

    if let Some(ref path) = config.report_path {
        write_json_report(path, &config, &report)
            .with_context(|| format!("Failed to write report to {}", path.display()))?;
        println!("Report written to {}", path.display());
    }

    match report.outcome {
        RunOutcome::Completed => Ok(()),
        RunOutcome::InsufficientMembers { have, need } => {
            anyhow::bail!("benchmark aborted: {} members joined, {} required", have, need)
        }
        RunOutcome::RetriesExhausted { round } => {
            anyhow::bail!("benchmark failed: round {} exhausted its retries", round)
        }
    }
}

/// Route diagnostics to stderr so the results table stays clean
fn init_logging() {
    use tracing_subscriber::EnvFilter;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("netpulse=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
