//! Benchmark coordinator
//!
//! The cluster-wide singleton that drives a benchmark run: it collects
//! members until the cluster holds still, pairs them, drives the two-leg
//! handshake per pair, gates each round on a readiness barrier, records the
//! merged per-pair results, prints the per-round summary and walks the round
//! counter forward. Failure handling is split by round: a failed handshake
//! in round 1 kills the incarnation (the singleton host starts a fresh one),
//! later rounds abort and retry in place, a bounded number of times.
//!
//! Everything the coordinator does is message-driven. Requests carry
//! correlation ids tracked in a pending map; every deadline is a spawned
//! timer that injects a synthetic message back into the coordinator's own
//! mailbox, so a timeout and an acknowledgment race through the same inbox
//! and the last state transition always wins.

use crate::bench::protocol::{
    generate_pairs, AskFault, CoordMsg, CoordRef, CorrelationId, HostMsg, Pair, RoundSetup,
};
use crate::cluster::{ClusterHandle, MemberEvent, NodeAddr};
use crate::config::BenchConfig;
use crate::error::BenchError;
use crate::output::text;
use crate::stats::{actors_per_round, summarize_round, RoundStats, RoundSummary};
use rand::Rng;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CoordState {
    /// Watching membership, waiting for the cluster to hold still
    CollectingMembers,
    /// Round chosen, waiting for the self-sent start signal
    Pairing,
    /// Handshakes in flight, waiting for every pair to report ready
    WaitingReady,
    /// Exchange in progress, waiting for every pair's merged result
    Running,
    /// Run over, cluster downed
    Finished,
}

/// Which side of the pair a pending handshake leg addresses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Leg {
    Pinger,
    Pingee,
}

struct PendingAsk {
    pair: Pair,
    leg: Leg,
}

/// How a benchmark run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every configured round completed
    Completed,
    /// The cluster stabilized with too few members
    InsufficientMembers { have: usize, need: usize },
    /// A round kept failing after every allowed retry
    RetriesExhausted { round: u32 },
}

/// Final result of a coordinator incarnation that reached an orderly end
#[derive(Debug, Clone)]
pub struct RunReport {
    pub outcome: RunOutcome,
    pub rounds: Vec<RoundSummary>,
}

impl RunReport {
    /// Whether the benchmark produced results for every configured round
    pub fn succeeded(&self) -> bool {
        matches!(self.outcome, RunOutcome::Completed)
    }
}

/// The benchmark coordinator state machine.
///
/// One instance runs per incarnation; [`Coordinator::run`] consumes it and
/// either returns an orderly [`RunReport`] or a [`BenchError`] the singleton
/// host reacts to by starting a fresh instance.
pub struct Coordinator {
    cluster: Arc<dyn ClusterHandle>,
    config: BenchConfig,
    tx: mpsc::UnboundedSender<CoordMsg>,
    state: CoordState,
    members: BTreeSet<NodeAddr>,
    stable_epoch: u64,
    round: u32,
    retries: u32,
    pairs: Vec<Pair>,
    ready: HashMap<Pair, bool>,
    stats: HashMap<Pair, Option<RoundStats>>,
    pending: HashMap<CorrelationId, PendingAsk>,
    next_cid: CorrelationId,
    banner_shown: bool,
    summaries: Vec<RoundSummary>,
}

impl Coordinator {
    /// Create a coordinator and the receiving end of its mailbox
    pub fn new(
        cluster: Arc<dyn ClusterHandle>,
        config: BenchConfig,
    ) -> (Self, mpsc::UnboundedReceiver<CoordMsg>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let coordinator = Self {
            cluster,
            config,
            tx,
            state: CoordState::CollectingMembers,
            members: BTreeSet::new(),
            stable_epoch: 0,
            round: 0,
            retries: 0,
            pairs: Vec::new(),
            ready: HashMap::new(),
            stats: HashMap::new(),
            pending: HashMap::new(),
            next_cid: 0,
            banner_shown: false,
            summaries: Vec::new(),
        };
        (coordinator, rx)
    }

    /// A handle for sending into this coordinator's mailbox
    pub fn handle(&self) -> CoordRef {
        CoordRef::new(self.tx.clone())
    }

    /// Drive the benchmark to its end.
    ///
    /// Subscribes to membership, then loops over membership events and
    /// mailbox messages until the run finishes or a fatal round-1 fault
    /// escalates to the singleton host.
    pub async fn run(
        mut self,
        mut rx: mpsc::UnboundedReceiver<CoordMsg>,
    ) -> Result<RunReport, BenchError> {
        let mut events = self.cluster.subscribe();
        info!("benchmark coordinator started, collecting members");
        // Arm the window immediately so an already-quiet cluster still
        // reaches the stability check.
        self.reset_stability();

        loop {
            tokio::select! {
                Some(event) = events.recv() => self.on_member_event(event),
                Some(msg) = rx.recv() => {
                    if let Some(report) = self.on_message(msg)? {
                        return Ok(report);
                    }
                }
                else => {
                    warn!("coordinator channels closed, stopping");
                    return Ok(RunReport {
                        outcome: RunOutcome::InsufficientMembers { have: 0, need: self.config.min_participants },
                        rounds: self.summaries,
                    });
                }
            }
        }
    }

    fn on_member_event(&mut self, event: MemberEvent) {
        if self.state != CoordState::CollectingMembers {
            debug!(event = ?event, "membership event outside collection, ignoring");
            return;
        }
        match event {
            MemberEvent::MemberUp(addr) => {
                if self.members.insert(addr.clone()) {
                    info!(member = %addr, members = self.members.len(), "added member to participating set");
                }
                self.reset_stability();
            }
            MemberEvent::MemberRemoved(addr) => {
                if self.members.remove(&addr) {
                    info!(member = %addr, members = self.members.len(), "removed member from participating set");
                }
                self.reset_stability();
            }
            MemberEvent::ReachabilityChanged { addr, reachable } => {
                debug!(member = %addr, reachable, "reachability changed");
                self.reset_stability();
            }
        }
    }

    fn on_message(&mut self, msg: CoordMsg) -> Result<Option<RunReport>, BenchError> {
        match msg {
            CoordMsg::StabilityReached { epoch } => self.on_stability(epoch),
            CoordMsg::StartRound { round } => {
                self.on_start_round(round);
                Ok(None)
            }
            CoordMsg::SetupAck { cid } => {
                self.on_setup_ack(cid);
                Ok(None)
            }
            CoordMsg::AskFailed { cid, fault } => self.on_ask_failed(cid, fault),
            CoordMsg::NodeReady { round, pinger, pingee } => {
                self.on_node_ready(round, pinger, pingee);
                Ok(None)
            }
            CoordMsg::PairStats { round, stats } => self.on_pair_stats(round, stats),
        }
    }

    /// Restart the stability window; only the newest epoch counts
    fn reset_stability(&mut self) {
        self.stable_epoch += 1;
        let epoch = self.stable_epoch;
        trace!(epoch, "membership changed, restarting stability window");
        self.schedule(self.config.stable_after(), CoordMsg::StabilityReached { epoch });
    }

    fn schedule(&self, after: Duration, msg: CoordMsg) {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            let _ = tx.send(msg);
        });
    }

    fn on_stability(&mut self, epoch: u64) -> Result<Option<RunReport>, BenchError> {
        if self.state != CoordState::CollectingMembers || epoch != self.stable_epoch {
            trace!(epoch, current = self.stable_epoch, "stale stability signal, ignoring");
            return Ok(None);
        }
        let have = self.members.len();
        let need = self.config.min_participants;
        if have < need {
            error!(have, need, "cluster stabilized with too few members, downing everyone");
            return Ok(Some(self.finish(RunOutcome::InsufficientMembers { have, need })));
        }

        let members: Vec<NodeAddr> = self.members.iter().cloned().collect();
        self.pairs = generate_pairs(&members);
        info!(
            members = have,
            pairs = self.pairs.len(),
            rounds = self.config.rounds,
            "membership stable, starting benchmark"
        );
        self.round = 1;
        self.retries = 0;
        self.state = CoordState::Pairing;
        let _ = self.tx.send(CoordMsg::StartRound { round: 1 });
        Ok(None)
    }

    fn on_start_round(&mut self, round: u32) {
        if self.state != CoordState::Pairing || round != self.round {
            warn!(round, current = self.round, state = ?self.state, "stray round start, ignoring");
            return;
        }
        // Fresh tables for every attempt, retries of the same round included.
        self.ready = self.pairs.iter().map(|p| (p.clone(), false)).collect();
        self.stats = self.pairs.iter().map(|p| (p.clone(), None)).collect();
        info!(
            round,
            pairs = self.pairs.len(),
            workers_per_pair = actors_per_round(round),
            "starting round"
        );
        for pair in self.pairs.clone() {
            self.dispatch_leg(pair, Leg::Pinger);
        }
        self.state = CoordState::WaitingReady;
    }

    /// Send one handshake leg and arm its deadline.
    ///
    /// The spawned task resolves the target, delivers the setup and then
    /// sleeps out the deadline before injecting a synthetic failure; the
    /// failure is ignored unless the correlation id is still pending, so an
    /// acknowledgment that arrived first wins.
    fn dispatch_leg(&mut self, pair: Pair, leg: Leg) {
        let cid = self.next_cid;
        self.next_cid += 1;
        let target = match leg {
            Leg::Pinger => pair.pinger.clone(),
            Leg::Pingee => pair.pingee.clone(),
        };
        let setup = RoundSetup {
            round: self.round,
            pinger: pair.pinger.clone(),
            pingee: pair.pingee.clone(),
            workers: actors_per_round(self.round),
            quota: self.config.messages_per_pair,
        };
        self.pending.insert(cid, PendingAsk { pair, leg });
        debug!(cid, target = %target, leg = ?leg, "dispatching handshake leg");

        let cluster = self.cluster.clone();
        let tx = self.tx.clone();
        let resolve_timeout = self.config.resolve_timeout();
        let deadline = self.config.handshake_timeout();
        tokio::spawn(async move {
            match cluster.resolve_host(&target, resolve_timeout).await {
                Ok(host) => {
                    host.send(HostMsg::Setup { setup, cid });
                    tokio::time::sleep(deadline).await;
                    let _ = tx.send(CoordMsg::AskFailed {
                        cid,
                        fault: AskFault::TimedOut,
                    });
                }
                Err(e) => {
                    warn!(cid, target = %target, error = %e, "handshake target did not resolve");
                    let _ = tx.send(CoordMsg::AskFailed {
                        cid,
                        fault: AskFault::Unresolved,
                    });
                }
            }
        });
    }

    fn on_setup_ack(&mut self, cid: CorrelationId) {
        let Some(ask) = self.pending.remove(&cid) else {
            debug!(cid, "ack for unknown or expired request, ignoring");
            return;
        };
        match ask.leg {
            Leg::Pinger => {
                debug!(cid, pair = %ask.pair, "pinger leg acknowledged, dispatching pingee leg");
                self.dispatch_leg(ask.pair, Leg::Pingee);
            }
            Leg::Pingee => {
                debug!(cid, pair = %ask.pair, "pingee leg acknowledged");
            }
        }
    }

    fn on_ask_failed(
        &mut self,
        cid: CorrelationId,
        fault: AskFault,
    ) -> Result<Option<RunReport>, BenchError> {
        let Some(ask) = self.pending.remove(&cid) else {
            // Deadlines of already-acknowledged requests land here.
            trace!(cid, "expired ask deadline, ignoring");
            return Ok(None);
        };
        if self.state != CoordState::WaitingReady {
            debug!(cid, fault = ?fault, "handshake failure after the phase ended, ignoring");
            return Ok(None);
        }
        let node = match ask.leg {
            Leg::Pinger => ask.pair.pinger.clone(),
            Leg::Pingee => ask.pair.pingee.clone(),
        };
        error!(
            round = self.round,
            pair = %ask.pair,
            node = %node,
            fault = ?fault,
            "handshake leg failed"
        );

        self.cluster.broadcast_hosts(HostMsg::AbortRound);

        if self.round == 1 {
            // Nothing worth salvaging yet: die and let the singleton host
            // start over from membership collection.
            error!("failure in the first round, escalating to a full restart");
            return Err(match fault {
                AskFault::TimedOut => BenchError::HandshakeTimeout { node, round: self.round },
                AskFault::Unresolved => BenchError::HostUnresolved { node, round: self.round },
            });
        }

        self.pending.clear();
        self.retries += 1;
        if self.retries > self.config.max_round_retries {
            error!(
                round = self.round,
                retries = self.retries - 1,
                "round retries exhausted, downing cluster"
            );
            return Ok(Some(self.finish(RunOutcome::RetriesExhausted { round: self.round })));
        }
        let delay = self.retry_delay_with_jitter();
        warn!(round = self.round, attempt = self.retries, delay = ?delay, "retrying round");
        self.state = CoordState::Pairing;
        self.schedule(delay, CoordMsg::StartRound { round: self.round });
        Ok(None)
    }

    fn on_node_ready(&mut self, round: u32, pinger: NodeAddr, pingee: NodeAddr) {
        if self.state != CoordState::WaitingReady || round != self.round {
            warn!(
                round,
                current = self.round,
                state = ?self.state,
                "stray node-ready, dropping"
            );
            return;
        }
        let pair = Pair { pinger, pingee };
        match self.ready.get_mut(&pair) {
            Some(flag) => {
                *flag = true;
                debug!(pair = %pair, "pair ready");
            }
            None => {
                warn!(pair = %pair, "node-ready for unknown pair, dropping");
                return;
            }
        }
        if !self.ready.values().all(|&ready| ready) {
            return;
        }

        if !self.banner_shown {
            text::print_banner(
                self.members.len(),
                self.pairs.len(),
                self.config.messages_per_pair * 2,
            );
            self.banner_shown = true;
        }
        info!(round = self.round, pairs = self.pairs.len(), "all pairs ready, beginning exchange");
        self.cluster.broadcast_hosts(HostMsg::Begin);
        self.state = CoordState::Running;
    }

    fn on_pair_stats(
        &mut self,
        round: u32,
        stats: RoundStats,
    ) -> Result<Option<RunReport>, BenchError> {
        if self.state != CoordState::Running || round != self.round {
            warn!(
                round,
                current = self.round,
                state = ?self.state,
                "stray pair stats, dropping"
            );
            return Ok(None);
        }
        let pair = Pair {
            pinger: stats.pinger.clone(),
            pingee: stats.pingee.clone(),
        };
        match self.stats.get_mut(&pair) {
            Some(slot) => {
                if slot.is_some() {
                    warn!(pair = %pair, "duplicate pair stats, dropping");
                    return Ok(None);
                }
                *slot = Some(stats);
            }
            None => {
                warn!(pair = %pair, "stats for unknown pair, dropping");
                return Ok(None);
            }
        }
        if self.stats.values().any(|slot| slot.is_none()) {
            return Ok(None);
        }

        let pair_stats: Vec<RoundStats> = self.stats.values().flatten().cloned().collect();
        let summary = summarize_round(self.round, actors_per_round(self.round), &pair_stats);
        text::print_round_line(&summary);
        self.summaries.push(summary);
        self.cluster.broadcast_hosts(HostMsg::RoundComplete);

        if self.round >= self.config.rounds {
            text::print_complete();
            info!(rounds = self.round, "benchmark complete, downing cluster");
            return Ok(Some(self.finish(RunOutcome::Completed)));
        }
        self.round += 1;
        self.retries = 0;
        self.state = CoordState::Pairing;
        let _ = self.tx.send(CoordMsg::StartRound { round: self.round });
        Ok(None)
    }

    /// Down every participant and seal the report
    fn finish(&mut self, outcome: RunOutcome) -> RunReport {
        for member in &self.members {
            self.cluster.down(member);
        }
        self.state = CoordState::Finished;
        RunReport {
            outcome,
            rounds: self.summaries.clone(),
        }
    }

    fn retry_delay_with_jitter(&self) -> Duration {
        let base = self.config.retry_delay();
        let jitter_ms = rand::thread_rng().gen_range(0..=base.as_millis() as u64 / 2);
        base + Duration::from_millis(jitter_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bench::protocol::HostRef;
    use crate::bench::testkit::StubCluster;

    fn addr(name: &str) -> NodeAddr {
        NodeAddr::new(name)
    }

    fn pair(pinger: &str, pingee: &str) -> Pair {
        Pair {
            pinger: addr(pinger),
            pingee: addr(pingee),
        }
    }

    fn test_config() -> BenchConfig {
        BenchConfig {
            nodes: 2,
            rounds: 2,
            min_participants: 2,
            messages_per_pair: 200,
            stable_after_ms: 20,
            handshake_timeout_ms: 200,
            resolve_timeout_ms: 50,
            retry_delay_ms: 10,
            max_round_retries: 2,
            restart_backoff_ms: 10,
            max_coordinator_restarts: 1,
            report_path: None,
        }
    }

    fn new_coordinator(
        cluster: &Arc<StubCluster>,
        config: BenchConfig,
    ) -> (Coordinator, mpsc::UnboundedReceiver<CoordMsg>) {
        Coordinator::new(cluster.clone(), config)
    }

    /// Prime the coordinator to the post-stability state for the members
    fn stabilize(coordinator: &mut Coordinator, members: &[&str]) {
        for member in members {
            coordinator.on_member_event(MemberEvent::MemberUp(addr(member)));
        }
        let epoch = coordinator.stable_epoch;
        let outcome = coordinator
            .on_stability(epoch)
            .expect("stability must not be fatal");
        assert!(outcome.is_none(), "run finished during stabilization");
    }

    /// Pump one self-sent message from the mailbox into the state machine
    async fn pump(
        coordinator: &mut Coordinator,
        rx: &mut mpsc::UnboundedReceiver<CoordMsg>,
    ) -> Result<Option<RunReport>, BenchError> {
        let msg = rx.recv().await.expect("mailbox closed");
        coordinator.on_message(msg)
    }

    #[tokio::test]
    async fn test_three_members_pair_up_with_five_workers() {
        let cluster = StubCluster::new();
        let (a_tx, mut a_rx) = mpsc::unbounded_channel();
        cluster.register(addr("a"), HostRef::new(a_tx));
        let (mut coordinator, mut rx) = new_coordinator(&cluster, test_config());

        stabilize(&mut coordinator, &["c", "a", "b"]);
        pump(&mut coordinator, &mut rx).await.unwrap();

        // Pairing is deterministic and ascending regardless of join order.
        assert_eq!(
            coordinator.pairs,
            vec![pair("a", "b"), pair("a", "c"), pair("b", "c")]
        );
        assert_eq!(coordinator.state, CoordState::WaitingReady);
        assert_eq!(coordinator.pending.len(), 3);
        assert!(coordinator.ready.values().all(|ready| !ready));

        // Node a hosts the pinger side of two pairs; round 1 runs 5 workers.
        for _ in 0..2 {
            match a_rx.recv().await {
                Some(HostMsg::Setup { setup, .. }) => {
                    assert_eq!(setup.round, 1);
                    assert_eq!(setup.workers, 5);
                    assert_eq!(setup.quota, 200);
                    assert_eq!(setup.pinger, addr("a"));
                }
                other => panic!("expected setup, got {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_insufficient_membership_downs_cluster() {
        let cluster = StubCluster::new();
        let (mut coordinator, _rx) = new_coordinator(&cluster, test_config());

        coordinator.on_member_event(MemberEvent::MemberUp(addr("only")));
        let epoch = coordinator.stable_epoch;
        let report = coordinator
            .on_stability(epoch)
            .unwrap()
            .expect("run should finish");

        assert_eq!(report.outcome, RunOutcome::InsufficientMembers { have: 1, need: 2 });
        assert!(report.rounds.is_empty());
        assert_eq!(cluster.downed(), vec![addr("only")]);
        assert_eq!(coordinator.state, CoordState::Finished);
    }

    #[tokio::test]
    async fn test_stale_stability_epoch_is_ignored() {
        let cluster = StubCluster::new();
        let (mut coordinator, _rx) = new_coordinator(&cluster, test_config());

        coordinator.on_member_event(MemberEvent::MemberUp(addr("a")));
        coordinator.on_member_event(MemberEvent::MemberUp(addr("b")));
        assert_eq!(coordinator.stable_epoch, 2);

        // The window armed by the first join elapsed before the second join.
        coordinator.on_stability(1).unwrap();
        assert_eq!(coordinator.state, CoordState::CollectingMembers);

        coordinator.on_stability(2).unwrap();
        assert_eq!(coordinator.state, CoordState::Pairing);
    }

    #[tokio::test]
    async fn test_reachability_change_restarts_the_window() {
        let cluster = StubCluster::new();
        let (mut coordinator, _rx) = new_coordinator(&cluster, test_config());

        coordinator.on_member_event(MemberEvent::MemberUp(addr("a")));
        coordinator.on_member_event(MemberEvent::MemberUp(addr("b")));
        coordinator.on_member_event(MemberEvent::ReachabilityChanged {
            addr: addr("b"),
            reachable: false,
        });

        // The flap invalidated the epoch armed by the join.
        coordinator.on_stability(2).unwrap();
        assert_eq!(coordinator.state, CoordState::CollectingMembers);
        coordinator.on_stability(3).unwrap();
        assert_eq!(coordinator.state, CoordState::Pairing);
    }

    #[tokio::test]
    async fn test_pinger_ack_dispatches_pingee_leg() {
        let cluster = StubCluster::new();
        let (b_tx, mut b_rx) = mpsc::unbounded_channel();
        cluster.register(addr("b"), HostRef::new(b_tx));
        let (mut coordinator, mut rx) = new_coordinator(&cluster, test_config());

        stabilize(&mut coordinator, &["a", "b"]);
        pump(&mut coordinator, &mut rx).await.unwrap();
        let (cid, leg) = coordinator.pending.iter().next().map(|(c, a)| (*c, a.leg)).unwrap();
        assert_eq!(leg, Leg::Pinger);

        coordinator.on_setup_ack(cid);

        assert_eq!(coordinator.pending.len(), 1);
        let pingee_leg = coordinator.pending.values().next().unwrap();
        assert_eq!(pingee_leg.leg, Leg::Pingee);
        match b_rx.recv().await {
            Some(HostMsg::Setup { setup, .. }) => assert_eq!(setup.pingee, addr("b")),
            other => panic!("expected pingee-leg setup, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_ack_with_unknown_correlation_is_ignored() {
        let cluster = StubCluster::new();
        let (mut coordinator, _rx) = new_coordinator(&cluster, test_config());

        coordinator.on_setup_ack(9999);
        assert!(coordinator.pending.is_empty());
    }

    #[tokio::test]
    async fn test_begin_broadcast_waits_for_every_pair() {
        let cluster = StubCluster::new();
        let (mut coordinator, mut rx) = new_coordinator(&cluster, test_config());

        stabilize(&mut coordinator, &["a", "b", "c"]);
        pump(&mut coordinator, &mut rx).await.unwrap();

        coordinator.on_node_ready(1, addr("a"), addr("b"));
        coordinator.on_node_ready(1, addr("a"), addr("c"));
        assert!(
            !cluster.broadcasts().iter().any(|msg| matches!(msg, HostMsg::Begin)),
            "Begin broadcast before the barrier closed"
        );
        assert_eq!(coordinator.state, CoordState::WaitingReady);

        coordinator.on_node_ready(1, addr("b"), addr("c"));
        assert!(cluster.broadcasts().iter().any(|msg| matches!(msg, HostMsg::Begin)));
        assert_eq!(coordinator.state, CoordState::Running);
    }

    #[tokio::test]
    async fn test_node_ready_for_wrong_round_is_dropped() {
        let cluster = StubCluster::new();
        let (mut coordinator, mut rx) = new_coordinator(&cluster, test_config());

        stabilize(&mut coordinator, &["a", "b"]);
        pump(&mut coordinator, &mut rx).await.unwrap();

        coordinator.on_node_ready(3, addr("a"), addr("b"));
        assert!(coordinator.ready.values().all(|ready| !ready));

        coordinator.on_node_ready(1, addr("a"), addr("b"));
        assert_eq!(coordinator.state, CoordState::Running);
    }

    #[tokio::test]
    async fn test_round_one_failure_escalates_to_restart() {
        let cluster = StubCluster::new();
        let (mut coordinator, mut rx) = new_coordinator(&cluster, test_config());

        stabilize(&mut coordinator, &["a", "b"]);
        pump(&mut coordinator, &mut rx).await.unwrap();
        let cid = *coordinator.pending.keys().next().unwrap();

        let err = coordinator
            .on_ask_failed(cid, AskFault::TimedOut)
            .expect_err("round 1 failure must be fatal");

        assert_eq!(err, BenchError::HandshakeTimeout { node: addr("a"), round: 1 });
        assert!(cluster.broadcasts().iter().any(|msg| matches!(msg, HostMsg::AbortRound)));
    }

    #[tokio::test]
    async fn test_later_round_failure_retries_in_place() {
        let cluster = StubCluster::new();
        let (mut coordinator, _rx) = new_coordinator(&cluster, test_config());

        // Drop the coordinator straight into round 3's handshake phase.
        coordinator.pairs = vec![pair("a", "b")];
        coordinator.round = 3;
        coordinator.state = CoordState::WaitingReady;
        coordinator.ready.insert(pair("a", "b"), false);
        coordinator.stats.insert(pair("a", "b"), None);
        coordinator.pending.insert(
            7,
            PendingAsk {
                pair: pair("a", "b"),
                leg: Leg::Pingee,
            },
        );

        let result = coordinator.on_ask_failed(7, AskFault::TimedOut).unwrap();

        assert!(result.is_none(), "a retryable failure must not end the run");
        assert_eq!(coordinator.round, 3);
        assert_eq!(coordinator.retries, 1);
        assert_eq!(coordinator.state, CoordState::Pairing);
        assert!(coordinator.pending.is_empty());
        assert!(cluster.broadcasts().iter().any(|msg| matches!(msg, HostMsg::AbortRound)));
        assert!(cluster.downed().is_empty());
    }

    #[tokio::test]
    async fn test_retries_exhausted_fails_the_run() {
        let cluster = StubCluster::new();
        let config = test_config();
        let (mut coordinator, _rx) = new_coordinator(&cluster, config);

        coordinator.members.insert(addr("a"));
        coordinator.members.insert(addr("b"));
        coordinator.pairs = vec![pair("a", "b")];
        coordinator.round = 2;
        coordinator.retries = 2; // already at max_round_retries
        coordinator.state = CoordState::WaitingReady;
        coordinator.pending.insert(
            3,
            PendingAsk {
                pair: pair("a", "b"),
                leg: Leg::Pinger,
            },
        );

        let report = coordinator
            .on_ask_failed(3, AskFault::Unresolved)
            .unwrap()
            .expect("run should finish");

        assert_eq!(report.outcome, RunOutcome::RetriesExhausted { round: 2 });
        assert_eq!(cluster.downed().len(), 2);
        assert_eq!(coordinator.state, CoordState::Finished);
    }

    #[tokio::test]
    async fn test_expired_deadline_after_ack_is_harmless() {
        let cluster = StubCluster::new();
        let (mut coordinator, mut rx) = new_coordinator(&cluster, test_config());

        stabilize(&mut coordinator, &["a", "b"]);
        pump(&mut coordinator, &mut rx).await.unwrap();
        let cid = *coordinator.pending.keys().next().unwrap();

        coordinator.on_setup_ack(cid);
        // The deadline for the acknowledged leg fires afterwards.
        let result = coordinator.on_ask_failed(cid, AskFault::TimedOut).unwrap();

        assert!(result.is_none());
        assert_eq!(coordinator.state, CoordState::WaitingReady);
        assert!(!cluster.broadcasts().iter().any(|msg| matches!(msg, HostMsg::AbortRound)));
    }

    #[tokio::test]
    async fn test_round_completion_advances_and_resets_tables() {
        let cluster = StubCluster::new();
        let (mut coordinator, mut rx) = new_coordinator(&cluster, test_config());

        stabilize(&mut coordinator, &["a", "b"]);
        pump(&mut coordinator, &mut rx).await.unwrap();
        coordinator.on_node_ready(1, addr("a"), addr("b"));
        assert_eq!(coordinator.state, CoordState::Running);

        let stats = RoundStats::new(addr("a"), addr("b"), 200, Duration::from_millis(40));
        let result = coordinator.on_pair_stats(1, stats).unwrap();
        assert!(result.is_none(), "round 1 of 2 must not finish the run");

        assert_eq!(coordinator.round, 2);
        assert_eq!(coordinator.state, CoordState::Pairing);
        assert_eq!(coordinator.summaries.len(), 1);
        assert_eq!(coordinator.summaries[0].total_messages, 400);
        assert!(cluster.broadcasts().iter().any(|msg| matches!(msg, HostMsg::RoundComplete)));

        // The self-sent start of round 2 rebuilds clean tables.
        loop {
            match rx.recv().await.expect("mailbox closed") {
                msg @ CoordMsg::StartRound { .. } => {
                    coordinator.on_message(msg).unwrap();
                    break;
                }
                // Leftover deadline messages from round 1's asks.
                other => {
                    coordinator.on_message(other).unwrap();
                }
            }
        }
        assert_eq!(coordinator.state, CoordState::WaitingReady);
        assert!(coordinator.ready.values().all(|ready| !ready));
        assert!(coordinator.stats.values().all(|slot| slot.is_none()));
    }

    #[tokio::test]
    async fn test_final_round_completion_finishes_and_downs() {
        let cluster = StubCluster::new();
        let mut config = test_config();
        config.rounds = 1;
        let (mut coordinator, mut rx) = new_coordinator(&cluster, config);

        stabilize(&mut coordinator, &["a", "b"]);
        pump(&mut coordinator, &mut rx).await.unwrap();
        coordinator.on_node_ready(1, addr("a"), addr("b"));

        let stats = RoundStats::new(addr("a"), addr("b"), 200, Duration::from_millis(10));
        let report = coordinator
            .on_pair_stats(1, stats)
            .unwrap()
            .expect("single-round run should finish");

        assert!(report.succeeded());
        assert_eq!(report.rounds.len(), 1);
        assert_eq!(report.rounds[0].total_messages, 400);
        assert_eq!(cluster.downed().len(), 2);
    }

    #[tokio::test]
    async fn test_run_loop_stops_on_insufficient_membership() {
        let cluster = StubCluster::new();
        let mut config = test_config();
        config.stable_after_ms = 300;
        let (coordinator, rx) = new_coordinator(&cluster, config);

        let running = tokio::spawn(coordinator.run(rx));
        while cluster.subscriber_count() == 0 {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        cluster.emit(MemberEvent::MemberUp(addr("solo")));

        let report = running.await.unwrap().unwrap();
        assert_eq!(report.outcome, RunOutcome::InsufficientMembers { have: 1, need: 2 });
        assert!(report.rounds.is_empty());
        assert_eq!(cluster.downed(), vec![addr("solo")]);
    }

    #[tokio::test]
    async fn test_duplicate_pair_stats_are_dropped() {
        let cluster = StubCluster::new();
        let (mut coordinator, mut rx) = new_coordinator(&cluster, test_config());

        stabilize(&mut coordinator, &["a", "b"]);
        pump(&mut coordinator, &mut rx).await.unwrap();
        coordinator.on_node_ready(1, addr("a"), addr("b"));

        let stats = RoundStats::new(addr("a"), addr("b"), 200, Duration::from_millis(10));
        coordinator.on_pair_stats(1, stats.clone()).unwrap();
        assert_eq!(coordinator.round, 2);

        // A late duplicate for round 1 must not disturb round 2.
        let result = coordinator.on_pair_stats(1, stats).unwrap();
        assert!(result.is_none());
        assert_eq!(coordinator.round, 2);
        assert_eq!(coordinator.summaries.len(), 1);
    }
}
