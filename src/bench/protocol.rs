//! Benchmark control protocol
//!
//! The message vocabulary spoken between the coordinator, node hosts, round
//! hosts, workers and echo responders, plus the typed handles the messages
//! travel through. Handles are thin clonable wrappers over unbounded mpsc
//! senders; sends to an already-terminated process are silently dropped, the
//! way a dead letter would be.
//!
//! Delivery assumptions (provided by the substrate): messages between one
//! sender and one receiver arrive in send order; nothing is guaranteed
//! across different sender/receiver pairs; delivery is at-most-once.

use crate::cluster::NodeAddr;
use crate::stats::RoundStats;
use std::fmt;
use tokio::sync::mpsc;

/// Identifies one pending request awaiting acknowledgment
pub type CorrelationId = u64;

/// One benchmarked connection: roles are fixed when the pair is generated
/// and repeated in every message that concerns it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Pair {
    /// Side that drives the traffic
    pub pinger: NodeAddr,
    /// Side that echoes it back
    pub pingee: NodeAddr,
}

impl fmt::Display for Pair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.pinger, self.pingee)
    }
}

/// Generate every unordered pairing of the given members.
///
/// For members `[m0..mk]` this yields `(mi, mj)` for all `i < j` in input
/// order, so `k` members produce `k*(k-1)/2` pairs, each exactly once, with
/// the earlier member always taking the pinger role. Callers pass the member
/// list in ascending address order to make the result deterministic.
pub fn generate_pairs(members: &[NodeAddr]) -> Vec<Pair> {
    let mut pairs = Vec::with_capacity(members.len() * members.len().saturating_sub(1) / 2);
    for i in 0..members.len() {
        for j in (i + 1)..members.len() {
            pairs.push(Pair {
                pinger: members[i].clone(),
                pingee: members[j].clone(),
            });
        }
    }
    pairs
}

/// One leg of the round handshake: everything a node needs to stand up its
/// side of a pair.
#[derive(Debug, Clone)]
pub struct RoundSetup {
    /// Round this setup belongs to
    pub round: u32,
    /// Pinger-side node of the pair
    pub pinger: NodeAddr,
    /// Pingee-side node of the pair
    pub pingee: NodeAddr,
    /// Workers (and responders) to stand up for the pair
    pub workers: usize,
    /// Message budget for the whole pair, split across its workers
    pub quota: u64,
}

impl RoundSetup {
    /// The pair this setup concerns
    pub fn pair(&self) -> Pair {
        Pair {
            pinger: self.pinger.clone(),
            pingee: self.pingee.clone(),
        }
    }
}

/// Why a pending request was abandoned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AskFault {
    /// No acknowledgment arrived within the deadline
    TimedOut,
    /// The target's benchmark host could not be resolved
    Unresolved,
}

/// Messages handled by the coordinator
#[derive(Debug)]
pub enum CoordMsg {
    /// A round host accepted one leg of the handshake
    SetupAck { cid: CorrelationId },
    /// A pending handshake leg failed; synthetic, injected by the ask timer
    AskFailed { cid: CorrelationId, fault: AskFault },
    /// A pinger-side round host has all of its workers standing by
    NodeReady {
        round: u32,
        pinger: NodeAddr,
        pingee: NodeAddr,
    },
    /// Merged per-pair result from a pinger-side round host
    PairStats { round: u32, stats: RoundStats },
    /// The membership stability window elapsed; synthetic, injected by the
    /// debounce timer and ignored unless the epoch is still current
    StabilityReached { epoch: u64 },
    /// Kick off (or retry) the given round; always self-scheduled
    StartRound { round: u32 },
}

/// Messages handled by a node host
#[derive(Debug, Clone)]
pub enum HostMsg {
    /// Handshake leg from the coordinator
    Setup { setup: RoundSetup, cid: CorrelationId },
    /// The pingee's responders are up; relayed to the pinger-side round host
    PingeeAck {
        pingee: NodeAddr,
        responders: Vec<EchoRef>,
    },
    /// Start the message exchange (broadcast)
    Begin,
    /// The round finished everywhere; tear down round state (broadcast)
    RoundComplete,
    /// The round failed somewhere; tear down round state (broadcast)
    AbortRound,
}

/// Messages handled by a round host, mostly forwarded by its node host
#[derive(Debug)]
pub enum RoundMsg {
    /// Handshake leg for this round
    Setup { setup: RoundSetup, cid: CorrelationId },
    /// The pingee's responders are up (pinger side only)
    PingeeAck {
        pingee: NodeAddr,
        responders: Vec<EchoRef>,
    },
    /// Start the message exchange
    Begin,
    /// One worker finished its share
    WorkerReport(RoundStats),
    /// Stop processing; the parent node host is discarding this round
    Shutdown,
}

/// Messages handled by a worker
#[derive(Debug)]
pub enum WorkerMsg {
    /// Fire the priming burst and start counting
    Begin,
    /// The ball coming back from the responder
    Pong,
}

/// Messages handled by an echo responder
#[derive(Debug)]
pub enum EchoMsg {
    /// A ball to bounce straight back to its sender
    Ping { from: WorkerRef },
}

/// Handle to the coordinator's mailbox
#[derive(Debug, Clone)]
pub struct CoordRef(mpsc::UnboundedSender<CoordMsg>);

impl CoordRef {
    pub fn new(tx: mpsc::UnboundedSender<CoordMsg>) -> Self {
        Self(tx)
    }

    pub fn send(&self, msg: CoordMsg) {
        let _ = self.0.send(msg);
    }
}

/// Handle to a node host's mailbox
#[derive(Debug, Clone)]
pub struct HostRef(mpsc::UnboundedSender<HostMsg>);

impl HostRef {
    pub fn new(tx: mpsc::UnboundedSender<HostMsg>) -> Self {
        Self(tx)
    }

    pub fn send(&self, msg: HostMsg) {
        let _ = self.0.send(msg);
    }
}

/// Handle to a round host's mailbox
#[derive(Debug, Clone)]
pub struct RoundRef(mpsc::UnboundedSender<RoundMsg>);

impl RoundRef {
    pub fn new(tx: mpsc::UnboundedSender<RoundMsg>) -> Self {
        Self(tx)
    }

    pub fn send(&self, msg: RoundMsg) {
        let _ = self.0.send(msg);
    }

    /// Whether the round host has terminated and stopped accepting messages
    pub fn is_closed(&self) -> bool {
        self.0.is_closed()
    }
}

/// Handle to a worker's mailbox
#[derive(Debug, Clone)]
pub struct WorkerRef(mpsc::UnboundedSender<WorkerMsg>);

impl WorkerRef {
    pub fn new(tx: mpsc::UnboundedSender<WorkerMsg>) -> Self {
        Self(tx)
    }

    pub fn send(&self, msg: WorkerMsg) {
        let _ = self.0.send(msg);
    }

    /// Whether the worker has terminated and stopped accepting messages
    pub fn is_closed(&self) -> bool {
        self.0.is_closed()
    }
}

/// Handle to an echo responder's mailbox
#[derive(Debug, Clone)]
pub struct EchoRef(mpsc::UnboundedSender<EchoMsg>);

impl EchoRef {
    pub fn new(tx: mpsc::UnboundedSender<EchoMsg>) -> Self {
        Self(tx)
    }

    pub fn send(&self, msg: EchoMsg) {
        let _ = self.0.send(msg);
    }
}
