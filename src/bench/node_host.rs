//! Node host
//!
//! Per-node singleton, alive for the node's whole lifetime. It serializes
//! rounds on its node: at most one round host exists at a time, created when
//! the round's first handshake leg arrives and torn down on the
//! round-complete or round-abort broadcast. Further same-round legs and all
//! round-scoped traffic in between are forwarded to the current round host
//! untouched; only a leg for a different round is a protocol violation.

use crate::bench::protocol::{
    CoordRef, CorrelationId, HostMsg, HostRef, RoundMsg, RoundRef, RoundSetup,
};
use crate::bench::round_host::RoundHost;
use crate::cluster::{ClusterHandle, NodeAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

enum HostState {
    /// No round in progress on this node
    Idle,
    /// One round host active; everything round-scoped goes to it
    InRound { round: u32, host: RoundRef },
}

/// The per-node benchmark host.
pub struct NodeHost {
    addr: NodeAddr,
    cluster: Arc<dyn ClusterHandle>,
    coordinator: CoordRef,
    resolve_timeout: Duration,
    state: HostState,
}

impl NodeHost {
    /// Spawn the host task for `addr` and return its handle
    pub fn spawn(
        addr: NodeAddr,
        cluster: Arc<dyn ClusterHandle>,
        coordinator: CoordRef,
        resolve_timeout: Duration,
    ) -> HostRef {
        let (tx, rx) = mpsc::unbounded_channel();
        let host = Self {
            addr,
            cluster,
            coordinator,
            resolve_timeout,
            state: HostState::Idle,
        };
        tokio::spawn(host.run(rx));
        HostRef::new(tx)
    }

    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<HostMsg>) {
        info!(node = %self.addr, "benchmark host started");
        while let Some(msg) = rx.recv().await {
            self.handle(msg);
        }
        debug!(node = %self.addr, "benchmark host stopped");
    }

    fn handle(&mut self, msg: HostMsg) {
        match msg {
            HostMsg::Setup { setup, cid } => self.on_setup(setup, cid),
            HostMsg::PingeeAck { pingee, responders } => {
                self.forward(RoundMsg::PingeeAck { pingee, responders }, "pingee acknowledgment")
            }
            HostMsg::Begin => self.forward(RoundMsg::Begin, "Begin"),
            HostMsg::RoundComplete => self.teardown(false),
            HostMsg::AbortRound => self.teardown(true),
        }
    }

    fn on_setup(&mut self, setup: RoundSetup, cid: CorrelationId) {
        match &self.state {
            HostState::Idle => {
                let round = setup.round;
                let host = RoundHost::spawn(
                    self.addr.clone(),
                    round,
                    self.cluster.clone(),
                    self.coordinator.clone(),
                    self.resolve_timeout,
                );
                host.send(RoundMsg::Setup { setup, cid });
                info!(node = %self.addr, round, "round host created");
                self.state = HostState::InRound { round, host };
            }
            HostState::InRound { round, host } => {
                if setup.round == *round {
                    // One leg per pair: a node pinging or echoing for
                    // several peers sees several same-round legs.
                    host.send(RoundMsg::Setup { setup, cid });
                } else {
                    // The round boundary guarantees this should never happen.
                    warn!(
                        node = %self.addr,
                        active_round = *round,
                        requested_round = setup.round,
                        "handshake request for a different round, dropping"
                    );
                }
            }
        }
    }

    fn forward(&mut self, msg: RoundMsg, what: &str) {
        match &self.state {
            HostState::InRound { host, .. } => host.send(msg),
            HostState::Idle => {
                warn!(node = %self.addr, "{} while idle, dropping", what);
            }
        }
    }

    fn teardown(&mut self, aborted: bool) {
        match std::mem::replace(&mut self.state, HostState::Idle) {
            HostState::InRound { round, host } => {
                host.send(RoundMsg::Shutdown);
                if aborted {
                    warn!(node = %self.addr, round, "round aborted, tearing down");
                } else {
                    info!(node = %self.addr, round, "round complete, tearing down");
                }
            }
            HostState::Idle => {
                // Broadcasts legitimately reach hosts with nothing running.
                debug!(node = %self.addr, "no active round to tear down");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bench::echo;
    use crate::bench::protocol::CoordMsg;
    use crate::bench::testkit::StubCluster;

    fn addr(name: &str) -> NodeAddr {
        NodeAddr::new(name)
    }

    fn setup_msg(
        pinger: &str,
        pingee: &str,
        workers: usize,
        quota: u64,
        cid: CorrelationId,
    ) -> HostMsg {
        HostMsg::Setup {
            setup: RoundSetup {
                round: 1,
                pinger: addr(pinger),
                pingee: addr(pingee),
                workers,
                quota,
            },
            cid,
        }
    }

    fn spawn_host(node: &str) -> (HostRef, mpsc::UnboundedReceiver<CoordMsg>) {
        let (coord_tx, coord_rx) = mpsc::unbounded_channel();
        let host = NodeHost::spawn(
            addr(node),
            StubCluster::new(),
            CoordRef::new(coord_tx),
            Duration::from_millis(100),
        );
        (host, coord_rx)
    }

    async fn expect_setup_ack(rx: &mut mpsc::UnboundedReceiver<CoordMsg>, expected: CorrelationId) {
        match rx.recv().await {
            Some(CoordMsg::SetupAck { cid }) => assert_eq!(cid, expected),
            other => panic!("expected setup ack {}, got {:?}", expected, other),
        }
    }

    async fn assert_no_coord_msg(rx: &mut mpsc::UnboundedReceiver<CoordMsg>) {
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(rx.try_recv().is_err(), "unexpected coordinator message");
    }

    #[tokio::test]
    async fn test_setup_creates_round_host_and_forwards() {
        let (host, mut coord_rx) = spawn_host("a");

        host.send(setup_msg("a", "b", 2, 100, 5));
        expect_setup_ack(&mut coord_rx, 5).await;
    }

    #[tokio::test]
    async fn test_same_round_legs_share_the_round_host() {
        // Node a pings both b and c in the same round; the second leg joins
        // the round host created by the first instead of being dropped.
        let (host, mut coord_rx) = spawn_host("a");

        host.send(setup_msg("a", "b", 2, 100, 1));
        expect_setup_ack(&mut coord_rx, 1).await;

        host.send(setup_msg("a", "c", 2, 100, 2));
        expect_setup_ack(&mut coord_rx, 2).await;
    }

    #[tokio::test]
    async fn test_different_round_setup_is_dropped() {
        let (host, mut coord_rx) = spawn_host("a");

        host.send(setup_msg("a", "b", 2, 100, 1));
        expect_setup_ack(&mut coord_rx, 1).await;

        host.send(HostMsg::Setup {
            setup: RoundSetup {
                round: 2,
                pinger: addr("a"),
                pingee: addr("b"),
                workers: 2,
                quota: 100,
            },
            cid: 2,
        });
        assert_no_coord_msg(&mut coord_rx).await;
    }

    #[tokio::test]
    async fn test_round_complete_allows_next_round() {
        let (host, mut coord_rx) = spawn_host("a");

        host.send(setup_msg("a", "b", 2, 100, 1));
        expect_setup_ack(&mut coord_rx, 1).await;

        host.send(HostMsg::RoundComplete);
        host.send(setup_msg("a", "b", 4, 100, 2));
        expect_setup_ack(&mut coord_rx, 2).await;
    }

    #[tokio::test]
    async fn test_abort_allows_retry_of_same_round() {
        let (host, mut coord_rx) = spawn_host("a");

        host.send(setup_msg("a", "b", 2, 100, 1));
        expect_setup_ack(&mut coord_rx, 1).await;

        host.send(HostMsg::AbortRound);
        host.send(setup_msg("a", "b", 2, 100, 2));
        expect_setup_ack(&mut coord_rx, 2).await;
    }

    #[tokio::test]
    async fn test_round_traffic_is_forwarded_to_completion() {
        // Full pinger-side flow with every message routed through the host.
        let (host, mut coord_rx) = spawn_host("a");

        host.send(setup_msg("a", "b", 2, 80, 1));
        expect_setup_ack(&mut coord_rx, 1).await;

        host.send(HostMsg::PingeeAck {
            pingee: addr("b"),
            responders: vec![echo::spawn(), echo::spawn()],
        });
        assert!(matches!(
            coord_rx.recv().await,
            Some(CoordMsg::NodeReady { round: 1, .. })
        ));

        host.send(HostMsg::Begin);
        match coord_rx.recv().await {
            Some(CoordMsg::PairStats { stats, .. }) => {
                assert_eq!(stats.received_messages, 80)
            }
            other => panic!("expected pair stats, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_idle_host_ignores_teardown_broadcasts() {
        let (host, mut coord_rx) = spawn_host("a");

        host.send(HostMsg::RoundComplete);
        host.send(HostMsg::AbortRound);

        // Still functional afterwards.
        host.send(setup_msg("a", "b", 1, 10, 9));
        expect_setup_ack(&mut coord_rx, 9).await;
    }

    #[tokio::test]
    async fn test_idle_host_drops_round_traffic() {
        let (host, mut coord_rx) = spawn_host("a");

        host.send(HostMsg::Begin);
        host.send(HostMsg::PingeeAck {
            pingee: addr("b"),
            responders: Vec::new(),
        });
        assert_no_coord_msg(&mut coord_rx).await;
    }
}
