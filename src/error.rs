//! Benchmark fault taxonomy
//!
//! Faults a coordinator incarnation can die with. Protocol violations are
//! deliberately absent: they are logged and dropped at the receiving process
//! and never escalate.

use crate::cluster::NodeAddr;
use thiserror::Error;

/// Fatal faults returned by a coordinator run.
///
/// In round 1 a handshake fault aborts the whole incarnation and the
/// singleton host starts a fresh one; in later rounds the same faults are
/// absorbed by the bounded round-retry policy instead.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BenchError {
    /// A handshake leg was not acknowledged within the deadline
    #[error("round {round} handshake with {node} timed out")]
    HandshakeTimeout { node: NodeAddr, round: u32 },

    /// The target node's benchmark host could not be resolved
    #[error("round {round}: no benchmark host reachable on {node}")]
    HostUnresolved { node: NodeAddr, round: u32 },
}
