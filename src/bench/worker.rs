//! Ping-pong worker
//!
//! The pinger-side half of a connection. Each worker drives exactly one
//! responder: it fires a priming burst, then keeps one ball in flight per
//! burst slot, counting returns until its share of the pair's message budget
//! is exhausted, at which point it reports a single [`RoundStats`] upward
//! and terminates for good.

use crate::bench::protocol::{EchoMsg, EchoRef, RoundMsg, RoundRef, WorkerMsg, WorkerRef};
use crate::cluster::NodeAddr;
use crate::stats::RoundStats;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Balls thrown before counting starts, to saturate any batching in the
/// transport underneath the substrate.
pub const PRIMING_BURST: u64 = 50;

enum WorkerState {
    /// Waiting for the round to begin
    Idle,
    /// Counting returned balls
    Active { received: u64, started: Instant },
}

/// One ping-pong worker, created per responder handle by the pinger-side
/// round host.
pub struct Worker {
    quota: u64,
    peer: EchoRef,
    pinger: NodeAddr,
    pingee: NodeAddr,
    parent: RoundRef,
}

impl Worker {
    /// Create a worker for one connection slot
    ///
    /// # Arguments
    ///
    /// * `quota` - This worker's share of the pair's message budget
    /// * `peer` - The responder it plays against
    /// * `pinger` / `pingee` - Pair addresses stamped into the report
    /// * `parent` - Round host that receives the final report
    pub fn new(quota: u64, peer: EchoRef, pinger: NodeAddr, pingee: NodeAddr, parent: RoundRef) -> Self {
        Self {
            quota,
            peer,
            pinger,
            pingee,
            parent,
        }
    }

    /// Spawn the worker task and return its handle
    pub fn spawn(self) -> WorkerRef {
        let (tx, rx) = mpsc::unbounded_channel();
        let self_ref = WorkerRef::new(tx);
        tokio::spawn(self.run(rx, self_ref.clone()));
        self_ref
    }

    async fn run(self, mut rx: mpsc::UnboundedReceiver<WorkerMsg>, self_ref: WorkerRef) {
        let mut state = WorkerState::Idle;

        while let Some(msg) = rx.recv().await {
            match (&mut state, msg) {
                (WorkerState::Idle, WorkerMsg::Begin) => {
                    if self.quota == 0 {
                        // Nothing to exchange; report the empty share so the
                        // barrier still closes.
                        self.report(0, Duration::ZERO);
                        return;
                    }
                    for _ in 0..PRIMING_BURST {
                        self.peer.send(EchoMsg::Ping {
                            from: self_ref.clone(),
                        });
                    }
                    state = WorkerState::Active {
                        received: 0,
                        started: Instant::now(),
                    };
                }
                (WorkerState::Active { received, started }, WorkerMsg::Pong) => {
                    *received += 1;
                    if *received < self.quota {
                        self.peer.send(EchoMsg::Ping {
                            from: self_ref.clone(),
                        });
                    } else {
                        let elapsed = started.elapsed();
                        self.report(*received, elapsed);
                        // Terminated for good: the mailbox closes and any
                        // balls still in flight are dropped.
                        return;
                    }
                }
                (WorkerState::Idle, WorkerMsg::Pong) => {
                    warn!(pinger = %self.pinger, pingee = %self.pingee, "ball received before Begin, dropping");
                }
                (WorkerState::Active { .. }, WorkerMsg::Begin) => {
                    warn!(pinger = %self.pinger, pingee = %self.pingee, "duplicate Begin, dropping");
                }
            }
        }
    }

    fn report(&self, received: u64, elapsed: Duration) {
        debug!(
            pinger = %self.pinger,
            pingee = %self.pingee,
            received,
            elapsed_ms = elapsed.as_millis() as u64,
            "worker finished its share"
        );
        self.parent.send(RoundMsg::WorkerReport(RoundStats::new(
            self.pinger.clone(),
            self.pingee.clone(),
            received,
            elapsed,
        )));
    }
}
