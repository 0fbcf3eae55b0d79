//! JSON report output
//!
//! Serializes the end-of-run report for downstream tooling: the machine,
//! the configuration the run used, how it ended and one record per
//! completed round.

use crate::bench::{RunOutcome, RunReport};
use crate::config::BenchConfig;
use crate::stats::RoundSummary;
use crate::Result;
use serde::Serialize;
use std::fs::File;
use std::path::Path;

/// The slice of configuration worth keeping next to the results
#[derive(Debug, Clone, Serialize)]
pub struct JsonBenchConfig {
    pub nodes: usize,
    pub rounds: u32,
    pub min_participants: usize,
    pub messages_per_pair: u64,
}

/// How the run ended
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JsonOutcome {
    Completed,
    InsufficientMembers { have: usize, need: usize },
    RetriesExhausted { round: u32 },
}

impl From<&RunOutcome> for JsonOutcome {
    fn from(outcome: &RunOutcome) -> Self {
        match outcome {
            RunOutcome::Completed => JsonOutcome::Completed,
            RunOutcome::InsufficientMembers { have, need } => JsonOutcome::InsufficientMembers {
                have: *have,
                need: *need,
            },
            RunOutcome::RetriesExhausted { round } => {
                JsonOutcome::RetriesExhausted { round: *round }
            }
        }
    }
}

/// Complete report written at the end of a run
#[derive(Debug, Clone, Serialize)]
pub struct JsonReport {
    pub timestamp: String,
    pub hostname: String,
    pub os: String,
    pub arch: String,
    pub cpus: usize,
    pub config: JsonBenchConfig,
    pub outcome: JsonOutcome,
    pub rounds: Vec<RoundSummary>,
}

impl JsonReport {
    /// Build the report from the run's inputs and results
    pub fn new(config: &BenchConfig, report: &RunReport) -> Self {
        let hostname = hostname::get()
            .map(|h| h.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "unknown".to_string());

        Self {
            timestamp: chrono::Utc::now().to_rfc3339(),
            hostname,
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
            cpus: num_cpus::get(),
            config: JsonBenchConfig {
                nodes: config.nodes,
                rounds: config.rounds,
                min_participants: config.min_participants,
                messages_per_pair: config.messages_per_pair,
            },
            outcome: JsonOutcome::from(&report.outcome),
            rounds: report.rounds.clone(),
        }
    }
}

/// Write the end-of-run report as pretty-printed JSON
pub fn write_json_report(path: &Path, config: &BenchConfig, report: &RunReport) -> Result<()> {
    let file = File::create(path)?;
    serde_json::to_writer_pretty(file, &JsonReport::new(config, report))?;
    Ok(())
}
