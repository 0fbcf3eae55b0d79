//! CLI argument parsing using clap

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;

/// NetPulse - Cluster messaging throughput benchmark
#[derive(Parser, Debug)]
#[command(name = "netpulse")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Number of nodes to start in the local cluster
    #[arg(short = 'n', long)]
    pub nodes: Option<usize>,

    /// Benchmark rounds to run
    #[arg(short = 'r', long)]
    pub rounds: Option<u32>,

    /// Fewest members required before the benchmark starts
    #[arg(long)]
    pub min_participants: Option<usize>,

    /// Message budget per node pair per round (e.g. 500, 100k, 2m)
    #[arg(short = 'm', long)]
    pub messages_per_pair: Option<String>,

    // === Timing Options ===
    /// Quiet period before membership counts as stable (e.g. 20s, 500ms)
    #[arg(long)]
    pub stable_after: Option<String>,

    /// Deadline for each handshake leg (e.g. 3s, 750ms)
    #[arg(long)]
    pub handshake_timeout: Option<String>,

    /// Deadline for resolving a node's benchmark host
    #[arg(long)]
    pub resolve_timeout: Option<String>,

    // === Failure Handling Options ===
    /// Pause before retrying a failed round
    #[arg(long)]
    pub retry_delay: Option<String>,

    /// Retries allowed per round, first round excluded
    #[arg(long)]
    pub max_round_retries: Option<u32>,

    /// Pause before restarting a failed coordinator
    #[arg(long)]
    pub restart_backoff: Option<String>,

    /// Coordinator restarts allowed before the run is abandoned
    #[arg(long)]
    pub max_coordinator_restarts: Option<u32>,

    // === Output Options ===
    /// Write the final report as JSON to this path
    #[arg(long)]
    pub report: Option<PathBuf>,

    // === Configuration File ===
    /// TOML configuration file
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,

    /// Dry run - validate configuration without executing
    #[arg(long)]
    pub dry_run: bool,
}

impl Cli {
    /// Parse CLI arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

/// Parse a count string (e.g. "500", "100k", "2m") to a number.
///
/// Suffixes are decimal: `k` is thousands and `m` is millions.
pub fn parse_count(s: &str) -> Result<u64> {
    let s = s.trim().to_lowercase();
    if s.is_empty() {
        anyhow::bail!("Empty count string");
    }

    let (num_str, multiplier) = if s.ends_with('k') {
        (&s[..s.len() - 1], 1_000u64)
    } else if s.ends_with('m') {
        (&s[..s.len() - 1], 1_000_000)
    } else {
        (s.as_str(), 1)
    };

    let num: u64 = num_str
        .parse()
        .with_context(|| format!("Invalid count format: {}", s))?;

    Ok(num * multiplier)
}

/// Parse a duration string (e.g. "500ms", "20s", "2m") to milliseconds
pub fn parse_duration_ms(s: &str) -> Result<u64> {
    let s = s.trim().to_lowercase();
    if s.is_empty() {
        anyhow::bail!("Empty duration string");
    }

    let (num_str, multiplier) = if s.ends_with("ms") {
        (&s[..s.len() - 2], 1u64)
    } else if s.ends_with('s') {
        (&s[..s.len() - 1], 1_000)
    } else if s.ends_with('m') {
        (&s[..s.len() - 1], 60_000)
    } else {
        (s.as_str(), 1)
    };

    let num: u64 = num_str
        .parse()
        .with_context(|| format!("Invalid duration format: {}", s))?;

    Ok(num * multiplier)
}
