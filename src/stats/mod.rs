//! Round statistics
//!
//! Plain-data statistics for benchmark rounds and the pure helpers that
//! combine them. Key features:
//!
//! - **Per-worker results**: each worker produces exactly one immutable
//!   [`RoundStats`] when it finishes its quota
//! - **Merge operations**: combine worker results into a per-pair result,
//!   summing messages and keeping the largest elapsed time
//! - **Quota splitting**: divide a pair's message budget across workers so
//!   the shares always sum exactly to the budget
//! - **Round summaries**: derive the printable per-round aggregate from the
//!   merged per-pair results
//!
//! # Example
//!
//! ```
//! use netpulse::cluster::NodeAddr;
//! use netpulse::stats::RoundStats;
//! use std::time::Duration;
//!
//! let a = NodeAddr::new("node-1");
//! let b = NodeAddr::new("node-2");
//!
//! let mut merged = RoundStats::new(a.clone(), b.clone(), 500, Duration::from_millis(20));
//! merged.merge(&RoundStats::new(a, b, 300, Duration::from_millis(35)));
//!
//! assert_eq!(merged.received_messages, 800);
//! assert_eq!(merged.elapsed, Duration::from_millis(35));
//! ```

use crate::cluster::NodeAddr;
use serde::Serialize;
use std::time::Duration;

/// Message-exchange result for one worker, or for a whole pair once merged.
///
/// Produced once by a worker when it reaches its quota, then folded together
/// by the pinger-side round host and finally recorded per pair by the
/// coordinator. The pair fields identify which connection the numbers belong
/// to and never change during merging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundStats {
    /// Node that initiated the message traffic
    pub pinger: NodeAddr,
    /// Node that hosted the echo responders
    pub pingee: NodeAddr,
    /// Messages received back by the counting side
    pub received_messages: u64,
    /// Wall-clock time from the priming burst to the final message
    pub elapsed: Duration,
}

impl RoundStats {
    /// Create a result for the given pair
    pub fn new(pinger: NodeAddr, pingee: NodeAddr, received_messages: u64, elapsed: Duration) -> Self {
        Self {
            pinger,
            pingee,
            received_messages,
            elapsed,
        }
    }

    /// Fold another result for the same pair into this one
    ///
    /// Message counts add up; elapsed time takes the maximum, since workers
    /// run concurrently and the pair is only done when the slowest worker is.
    /// The operation is associative and commutative, so the fold order over a
    /// set of worker results does not matter.
    pub fn merge(&mut self, other: &RoundStats) {
        self.received_messages += other.received_messages;
        self.elapsed = self.elapsed.max(other.elapsed);
    }
}

/// Number of workers each pair runs in the given round (1-based)
///
/// Concurrency scales linearly: 5 workers per pair in round 1, 10 in round 2,
/// and so on.
pub fn actors_per_round(round: u32) -> usize {
    (round as usize * 5).max(1)
}

/// Split a pair's message budget across `workers` workers
///
/// Every share is `quota / workers`, with the remainder spread one message
/// each over the first shares, so the shares always sum exactly to `quota`
/// and differ by at most one. Returns an empty vector when `workers` is zero.
pub fn split_quota(quota: u64, workers: usize) -> Vec<u64> {
    if workers == 0 {
        return Vec::new();
    }
    let n = workers as u64;
    let base = quota / n;
    let remainder = quota % n;
    (0..n).map(|i| base + u64::from(i < remainder)).collect()
}

/// Printable aggregate for one completed round
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoundSummary {
    /// Round number (1-based)
    pub round: u32,
    /// Benchmarked connections (node pairs)
    pub connections: usize,
    /// Workers on each side of a connection
    pub actors_per_node: usize,
    /// Workers plus responders across all connections
    pub total_actors: usize,
    /// Messages sent and received across all connections
    pub total_messages: u64,
    /// Throughput derived from the average connection elapsed time
    pub msgs_per_sec: u64,
    /// Average per-connection elapsed time in milliseconds
    pub avg_elapsed_ms: f64,
}

/// Compute the summary for a completed round from its merged per-pair results
///
/// Total messages double the received count because every received message
/// was also sent. Throughput divides that total by the mean per-pair elapsed
/// time, matching how the per-round console line is derived.
pub fn summarize_round(round: u32, actors_per_node: usize, pair_stats: &[RoundStats]) -> RoundSummary {
    let connections = pair_stats.len();
    let total_received: u64 = pair_stats.iter().map(|s| s.received_messages).sum();
    let total_messages = total_received * 2;

    let avg_elapsed = if connections == 0 {
        Duration::ZERO
    } else {
        let total_nanos: u128 = pair_stats.iter().map(|s| s.elapsed.as_nanos()).sum();
        Duration::from_nanos((total_nanos / connections as u128) as u64)
    };

    let avg_secs = avg_elapsed.as_secs_f64();
    let msgs_per_sec = if avg_secs > 0.0 {
        (total_messages as f64 / avg_secs).round() as u64
    } else {
        0
    };

    RoundSummary {
        round,
        connections,
        actors_per_node,
        total_actors: actors_per_node * connections * 2,
        total_messages,
        msgs_per_sec,
        avg_elapsed_ms: avg_elapsed.as_secs_f64() * 1000.0,
    }
}
