//! Round-based ping-pong benchmark engine
//!
//! This module implements the benchmark itself: the processes, their
//! messages and the per-round choreography.
//!
//! # Architecture
//!
//! The benchmark uses a coordinator-host architecture:
//!
//! - **Coordinator**: Cluster-wide singleton. Watches membership, pairs the
//!   members, drives the per-round handshake, gates rounds on a readiness
//!   barrier and aggregates the per-pair results into round summaries.
//! - **NodeHost**: One per member. Entry point for coordinator traffic,
//!   owns at most one round host at a time and serializes rounds, routing
//!   every same-round handshake leg to that one host.
//! - **RoundHost**: One per node per round, state keyed by pair. Holds the
//!   node's side of every pair it serves that round: spawns workers and
//!   echo responders per pair, merges each pair's worker reports and hands
//!   one result per pair back.
//! - **Worker / Echo**: The paired leaf tasks that actually exchange the
//!   ball until the pinger side's quota is spent.
//!
//! # Modules
//!
//! - `protocol`: Message definitions, mailbox handles and pair generation
//! - `coordinator`: Benchmark coordinator state machine
//! - `node_host`: Per-node host process
//! - `round_host`: Per-round lifecycle process, tracking each served pair
//! - `worker`: Pinger-side ball exchange
//! - `echo`: Pingee-side responder

pub mod coordinator;
pub mod echo;
pub mod node_host;
pub mod protocol;
pub mod round_host;
pub mod worker;

pub use coordinator::{Coordinator, RunOutcome, RunReport};
pub use node_host::NodeHost;
pub use protocol::{generate_pairs, CoordMsg, CoordRef, HostMsg, HostRef, Pair, RoundSetup};
pub use round_host::RoundHost;
