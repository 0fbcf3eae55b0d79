//! TOML configuration file parsing

use super::BenchConfig;
use crate::config::cli::{parse_count, parse_duration_ms, Cli};
use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

/// Parse TOML configuration file
pub fn parse_toml_file(path: &Path) -> Result<BenchConfig> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    parse_toml_string(&contents)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Parse TOML configuration from string
pub fn parse_toml_string(contents: &str) -> Result<BenchConfig> {
    let config: BenchConfig =
        ::toml::from_str(contents).context("Failed to parse TOML configuration")?;

    Ok(config)
}

/// Merge CLI arguments with TOML configuration (CLI takes precedence)
pub fn merge_cli_with_config(cli: &Cli, mut config: BenchConfig) -> Result<BenchConfig> {
    if let Some(nodes) = cli.nodes {
        config.nodes = nodes;
    }
    if let Some(rounds) = cli.rounds {
        config.rounds = rounds;
    }
    if let Some(min) = cli.min_participants {
        config.min_participants = min;
    }
    if let Some(ref count) = cli.messages_per_pair {
        config.messages_per_pair = parse_count(count)?;
    }

    if let Some(ref window) = cli.stable_after {
        config.stable_after_ms = parse_duration_ms(window)?;
    }
    if let Some(ref deadline) = cli.handshake_timeout {
        config.handshake_timeout_ms = parse_duration_ms(deadline)?;
    }
    if let Some(ref deadline) = cli.resolve_timeout {
        config.resolve_timeout_ms = parse_duration_ms(deadline)?;
    }

    if let Some(ref delay) = cli.retry_delay {
        config.retry_delay_ms = parse_duration_ms(delay)?;
    }
    if let Some(retries) = cli.max_round_retries {
        config.max_round_retries = retries;
    }
    if let Some(ref backoff) = cli.restart_backoff {
        config.restart_backoff_ms = parse_duration_ms(backoff)?;
    }
    if let Some(restarts) = cli.max_coordinator_restarts {
        config.max_coordinator_restarts = restarts;
    }

    if let Some(ref path) = cli.report {
        config.report_path = Some(path.clone());
    }

    Ok(config)
}
