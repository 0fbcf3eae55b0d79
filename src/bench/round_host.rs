//! Round host
//!
//! Per-(node, round) process, created by its node host when the round's
//! first handshake leg arrives and discarded when the round completes or
//! aborts. It owns its node's side of every pair the node serves that
//! round, keyed by pair: where the node is the pingee it stands up echo
//! responders and introduces them to the pinger's host, and where it is the
//! pinger it builds one worker per responder, runs the Begin fan-out and
//! merges the per-worker results into one result per pair. With three or
//! more members most nodes do both at once, pinging some peers while
//! echoing for others.

use crate::bench::echo;
use crate::bench::protocol::{
    CoordMsg, CoordRef, CorrelationId, EchoRef, HostMsg, Pair, RoundMsg, RoundRef, RoundSetup,
    WorkerMsg, WorkerRef,
};
use crate::bench::worker::Worker;
use crate::cluster::{ClusterHandle, NodeAddr};
use crate::stats::{split_quota, RoundStats};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RoundState {
    /// Collecting handshake legs; pairs become ready one by one
    Starting,
    /// Begin seen, workers exchanging and reporting
    Running,
    /// Every pinger-side pair reported; idle until torn down
    Done,
}

/// Progress of one pair on this node.
enum PairProgress {
    /// Pinger side, waiting for the pingee to introduce its responders
    AwaitingResponders { quota: u64 },
    /// Pinger side, workers standing by for Begin
    Ready { workers: Vec<WorkerRef> },
    /// Pinger side, workers exchanging, reports coming in
    Exchanging {
        workers: Vec<WorkerRef>,
        collected: Vec<RoundStats>,
    },
    /// Pinger side, merged result forwarded
    Reported,
    /// Pingee side, needs nothing further until teardown
    Hosting,
}

/// Host for one node's side of a single round.
pub struct RoundHost {
    node: NodeAddr,
    round: u32,
    cluster: Arc<dyn ClusterHandle>,
    coordinator: CoordRef,
    resolve_timeout: Duration,
    state: RoundState,
    /// Every pair this node serves in the round
    pairs: HashMap<Pair, PairProgress>,
    /// Responders hosted for remote pingers, alive until the host drops
    responders: Vec<EchoRef>,
}

impl RoundHost {
    /// Spawn the round host task for `round` on `node` and return its handle
    pub fn spawn(
        node: NodeAddr,
        round: u32,
        cluster: Arc<dyn ClusterHandle>,
        coordinator: CoordRef,
        resolve_timeout: Duration,
    ) -> RoundRef {
        let (tx, rx) = mpsc::unbounded_channel();
        let self_ref = RoundRef::new(tx);
        let host = Self {
            node,
            round,
            cluster,
            coordinator,
            resolve_timeout,
            state: RoundState::Starting,
            pairs: HashMap::new(),
            responders: Vec::new(),
        };
        tokio::spawn(host.run(rx, self_ref.clone()));
        self_ref
    }

    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<RoundMsg>, self_ref: RoundRef) {
        while let Some(msg) = rx.recv().await {
            match msg {
                RoundMsg::Setup { setup, cid } => self.on_setup(setup, cid).await,
                RoundMsg::PingeeAck { pingee, responders } => {
                    self.on_pingee_ack(pingee, responders, &self_ref)
                }
                RoundMsg::Begin => self.on_begin(),
                RoundMsg::WorkerReport(stats) => self.on_worker_report(stats),
                RoundMsg::Shutdown => break,
            }
        }
        // Dropping the owned handles tears down workers and responders.
        debug!(
            node = %self.node,
            round = self.round,
            pairs = self.pairs.len(),
            responders = self.responders.len(),
            "round host stopped"
        );
    }

    async fn on_setup(&mut self, setup: RoundSetup, cid: CorrelationId) {
        if self.state != RoundState::Starting {
            warn!(
                node = %self.node,
                round = self.round,
                state = ?self.state,
                "handshake request after Begin, dropping"
            );
            return;
        }
        let pair = setup.pair();
        if self.pairs.contains_key(&pair) {
            warn!(
                node = %self.node,
                round = self.round,
                pair = %pair,
                "duplicate handshake request for the pair, dropping"
            );
            return;
        }

        if setup.pingee == self.node {
            // Pingee side: stand up the responders and introduce them to the
            // pinger's host before acknowledging the leg.
            let responders: Vec<EchoRef> = (0..setup.workers).map(|_| echo::spawn()).collect();

            match self
                .cluster
                .resolve_host(&setup.pinger, self.resolve_timeout)
                .await
            {
                Ok(pinger_host) => {
                    pinger_host.send(HostMsg::PingeeAck {
                        pingee: self.node.clone(),
                        responders: responders.clone(),
                    });
                    info!(
                        node = %self.node,
                        round = self.round,
                        pair = %pair,
                        responders = responders.len(),
                        "responders up, pinger introduced"
                    );
                }
                Err(e) => {
                    // Without the introduction the handshake cannot finish.
                    // Withhold the acknowledgment and let the coordinator's
                    // deadline surface the fault.
                    warn!(
                        node = %self.node,
                        round = self.round,
                        pair = %pair,
                        error = %e,
                        "could not resolve pinger host, withholding acknowledgment"
                    );
                    self.responders.extend(responders);
                    self.pairs.insert(pair, PairProgress::Hosting);
                    return;
                }
            }
            self.responders.extend(responders);
            self.pairs.insert(pair, PairProgress::Hosting);
        } else if setup.pinger == self.node {
            // Pinger side: workers follow once the pingee introduces its
            // responders.
            self.pairs
                .insert(pair, PairProgress::AwaitingResponders { quota: setup.quota });
        } else {
            warn!(
                node = %self.node,
                round = self.round,
                pair = %pair,
                "handshake request for a pair not involving this node, dropping"
            );
            return;
        }

        self.coordinator.send(CoordMsg::SetupAck { cid });
    }

    fn on_pingee_ack(&mut self, pingee: NodeAddr, responders: Vec<EchoRef>, self_ref: &RoundRef) {
        if self.state != RoundState::Starting {
            warn!(
                node = %self.node,
                round = self.round,
                state = ?self.state,
                "pingee acknowledgment after Begin, dropping"
            );
            return;
        }
        let pair = Pair {
            pinger: self.node.clone(),
            pingee,
        };
        let quota = match self.pairs.get(&pair) {
            Some(PairProgress::AwaitingResponders { quota }) => *quota,
            Some(_) => {
                warn!(
                    node = %self.node,
                    round = self.round,
                    pair = %pair,
                    "duplicate pingee acknowledgment, dropping"
                );
                return;
            }
            None => {
                warn!(
                    node = %self.node,
                    round = self.round,
                    pair = %pair,
                    "pingee acknowledgment from unexpected node, dropping"
                );
                return;
            }
        };

        // One worker per responder; the pair budget is split so the shares
        // sum exactly to it.
        let shares = split_quota(quota, responders.len());
        let workers: Vec<WorkerRef> = responders
            .iter()
            .zip(shares)
            .map(|(responder, share)| {
                Worker::new(
                    share,
                    responder.clone(),
                    pair.pinger.clone(),
                    pair.pingee.clone(),
                    self_ref.clone(),
                )
                .spawn()
            })
            .collect();

        info!(
            node = %self.node,
            round = self.round,
            pair = %pair,
            workers = workers.len(),
            "workers up, pair ready"
        );
        self.coordinator.send(CoordMsg::NodeReady {
            round: self.round,
            pinger: pair.pinger.clone(),
            pingee: pair.pingee.clone(),
        });
        self.pairs.insert(pair, PairProgress::Ready { workers });
    }

    fn on_begin(&mut self) {
        if self.state != RoundState::Starting {
            warn!(
                node = %self.node,
                round = self.round,
                state = ?self.state,
                "duplicate Begin, dropping"
            );
            return;
        }
        let awaiting = self
            .pairs
            .values()
            .filter(|p| matches!(p, PairProgress::AwaitingResponders { .. }))
            .count();
        if awaiting > 0 {
            warn!(
                node = %self.node,
                round = self.round,
                awaiting,
                "Begin before every pair is ready, dropping"
            );
            return;
        }

        let mut started = 0;
        for progress in self.pairs.values_mut() {
            if let PairProgress::Ready { workers } = progress {
                for worker in workers.iter() {
                    worker.send(WorkerMsg::Begin);
                }
                started += workers.len();
                let workers = std::mem::take(workers);
                *progress = PairProgress::Exchanging {
                    workers,
                    collected: Vec::new(),
                };
            }
        }
        self.state = RoundState::Running;
        debug!(
            node = %self.node,
            round = self.round,
            workers = started,
            "exchange running"
        );
    }

    fn on_worker_report(&mut self, stats: RoundStats) {
        if self.state != RoundState::Running {
            warn!(
                node = %self.node,
                round = self.round,
                state = ?self.state,
                "worker report outside Running, dropping"
            );
            return;
        }
        let pair = Pair {
            pinger: stats.pinger.clone(),
            pingee: stats.pingee.clone(),
        };
        let merged = match self.pairs.get_mut(&pair) {
            Some(PairProgress::Exchanging { workers, collected }) => {
                collected.push(stats);
                if collected.len() < workers.len() {
                    return;
                }
                let mut merged = collected[0].clone();
                for stats in &collected[1..] {
                    merged.merge(stats);
                }
                merged
            }
            _ => {
                warn!(
                    node = %self.node,
                    round = self.round,
                    pair = %pair,
                    "worker report for an unknown or finished pair, dropping"
                );
                return;
            }
        };

        info!(
            node = %self.node,
            round = self.round,
            pair = %pair,
            received = merged.received_messages,
            elapsed_ms = merged.elapsed.as_millis() as u64,
            "pair complete"
        );
        self.coordinator.send(CoordMsg::PairStats {
            round: self.round,
            stats: merged,
        });
        self.pairs.insert(pair, PairProgress::Reported);

        let exchanging = self
            .pairs
            .values()
            .any(|p| matches!(p, PairProgress::Exchanging { .. }));
        if !exchanging {
            self.state = RoundState::Done;
            debug!(node = %self.node, round = self.round, "every pair reported");
        }
    }
}
