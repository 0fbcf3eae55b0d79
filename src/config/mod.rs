//! Configuration module
//!
//! Handles CLI argument parsing, TOML configuration files, and validation.

pub mod cli;
pub mod toml;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Complete benchmark configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchConfig {
    /// Number of nodes to start in the local cluster
    #[serde(default = "default_nodes")]
    pub nodes: usize,
    /// Benchmark rounds to run
    #[serde(default = "default_rounds")]
    pub rounds: u32,
    /// Fewest members the benchmark will run with
    #[serde(default = "default_min_participants")]
    pub min_participants: usize,
    /// Message budget per node pair per round, split across the pair's workers
    #[serde(default = "default_messages_per_pair")]
    pub messages_per_pair: u64,
    /// Quiet period before membership counts as stable (milliseconds)
    #[serde(default = "default_stable_after_ms")]
    pub stable_after_ms: u64,
    /// Deadline for each handshake leg (milliseconds)
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,
    /// Deadline for resolving a node's benchmark host (milliseconds)
    #[serde(default = "default_resolve_timeout_ms")]
    pub resolve_timeout_ms: u64,
    /// Pause before retrying a failed round (milliseconds)
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// Retries allowed per round, first round excluded
    #[serde(default = "default_max_round_retries")]
    pub max_round_retries: u32,
    /// Pause before restarting a failed coordinator (milliseconds)
    #[serde(default = "default_restart_backoff_ms")]
    pub restart_backoff_ms: u64,
    /// Coordinator restarts allowed before the run is abandoned
    #[serde(default = "default_max_coordinator_restarts")]
    pub max_coordinator_restarts: u32,
    /// Write the final report as JSON to this path
    #[serde(default)]
    pub report_path: Option<PathBuf>,
}

fn default_nodes() -> usize {
    2
}

fn default_rounds() -> u32 {
    6
}

fn default_min_participants() -> usize {
    2
}

fn default_messages_per_pair() -> u64 {
    100_000
}

fn default_stable_after_ms() -> u64 {
    20_000
}

fn default_handshake_timeout_ms() -> u64 {
    3_000
}

fn default_resolve_timeout_ms() -> u64 {
    3_000
}

fn default_retry_delay_ms() -> u64 {
    500
}

fn default_max_round_retries() -> u32 {
    5
}

fn default_restart_backoff_ms() -> u64 {
    1_000
}

fn default_max_coordinator_restarts() -> u32 {
    3
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            nodes: default_nodes(),
            rounds: default_rounds(),
            min_participants: default_min_participants(),
            messages_per_pair: default_messages_per_pair(),
            stable_after_ms: default_stable_after_ms(),
            handshake_timeout_ms: default_handshake_timeout_ms(),
            resolve_timeout_ms: default_resolve_timeout_ms(),
            retry_delay_ms: default_retry_delay_ms(),
            max_round_retries: default_max_round_retries(),
            restart_backoff_ms: default_restart_backoff_ms(),
            max_coordinator_restarts: default_max_coordinator_restarts(),
            report_path: None,
        }
    }
}

impl BenchConfig {
    /// Quiet period as a [`Duration`]
    pub fn stable_after(&self) -> Duration {
        Duration::from_millis(self.stable_after_ms)
    }

    /// Handshake leg deadline as a [`Duration`]
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    /// Host resolution deadline as a [`Duration`]
    pub fn resolve_timeout(&self) -> Duration {
        Duration::from_millis(self.resolve_timeout_ms)
    }

    /// Round retry pause as a [`Duration`]
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// Coordinator restart pause as a [`Duration`]
    pub fn restart_backoff(&self) -> Duration {
        Duration::from_millis(self.restart_backoff_ms)
    }

    /// Validate the complete configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.nodes == 0 {
            return Err("nodes must be greater than 0".to_string());
        }
        if self.rounds == 0 {
            return Err("rounds must be greater than 0".to_string());
        }
        if self.min_participants < 2 {
            return Err(format!(
                "min_participants must be at least 2, got {}",
                self.min_participants
            ));
        }
        if self.nodes < self.min_participants {
            return Err(format!(
                "nodes must be at least min_participants ({} < {})",
                self.nodes, self.min_participants
            ));
        }
        if self.messages_per_pair == 0 {
            return Err("messages_per_pair must be greater than 0".to_string());
        }
        if self.stable_after_ms == 0 {
            return Err("stable_after_ms must be greater than 0".to_string());
        }
        if self.handshake_timeout_ms == 0 {
            return Err("handshake_timeout_ms must be greater than 0".to_string());
        }
        if self.resolve_timeout_ms == 0 {
            return Err("resolve_timeout_ms must be greater than 0".to_string());
        }
        Ok(())
    }
}

impl fmt::Display for BenchConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Configuration:")?;
        writeln!(f, "  Nodes: {} (min participants {})", self.nodes, self.min_participants)?;
        writeln!(f, "  Rounds: {}", self.rounds)?;
        writeln!(f, "  Messages per pair: {}", self.messages_per_pair)?;
        writeln!(f, "  Stability window: {}ms", self.stable_after_ms)?;
        writeln!(
            f,
            "  Timeouts: handshake={}ms, resolve={}ms",
            self.handshake_timeout_ms, self.resolve_timeout_ms
        )?;
        writeln!(
            f,
            "  Retries: {} per round ({}ms delay), {} coordinator restarts ({}ms backoff)",
            self.max_round_retries,
            self.retry_delay_ms,
            self.max_coordinator_restarts,
            self.restart_backoff_ms
        )?;
        if let Some(ref path) = self.report_path {
            writeln!(f, "  Report: {}", path.display())?;
        }
        Ok(())
    }
}
