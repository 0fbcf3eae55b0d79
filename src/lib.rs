//! # NetPulse - Cluster Messaging Throughput Benchmark
//!
//! NetPulse measures message throughput between paired nodes of a cluster.
//! A coordinator waits for membership to settle, pairs the nodes up, and
//! drives a series of rounds. Each round spawns a growing set of worker
//! actors per pair that exchange a fixed message quota as fast as they can;
//! per-pair timings are merged into one summary line per round.
//!
//! # Architecture
//!
//! - **Coordinator** ([`bench::Coordinator`]): cluster singleton driving the
//!   round state machine from membership stability through the final report
//! - **Node hosts** ([`bench::NodeHost`]): one per node, spin up a fresh
//!   round host for every round and tear it down afterwards
//! - **Cluster substrate** ([`cluster::ClusterHandle`]): membership events,
//!   node resolution and administrative down, with an in-process
//!   [`cluster::LocalCluster`] implementation for running benchmarks
//! - **Configuration** ([`config::BenchConfig`]): TOML file plus CLI
//!   overrides with validation
//! - **Output** ([`output`]): console banner and round table, optional JSON
//!   report

pub mod bench;
pub mod cluster;
pub mod config;
pub mod error;
pub mod output;
pub mod stats;

pub use bench::{Coordinator, RunOutcome, RunReport};
pub use cluster::LocalCluster;
pub use config::BenchConfig;
pub use error::BenchError;

/// Result type used throughout the crate
pub type Result<T> = anyhow::Result<T>;
