//! In-process cluster harness
//!
//! Runs a whole benchmark cluster inside one process: every node is a set
//! of Tokio tasks, membership is a shared table, and message passing is
//! plain channel sends. The harness also plays the singleton manager: it
//! owns a stable coordinator proxy for the node hosts and restarts the
//! coordinator when a run dies in its first round.
//!
//! Fault injection is part of the harness. [`LocalCluster::isolate`] makes
//! a node unresolvable and drops it from broadcasts without removing it
//! from membership, which is enough to exercise every failure path the
//! coordinator has.

use crate::bench::protocol::{CoordRef, HostMsg, HostRef};
use crate::bench::{Coordinator, NodeHost, RunReport};
use crate::cluster::{ClusterError, ClusterHandle, MemberEvent, NodeAddr};
use crate::config::BenchConfig;
use anyhow::Context;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, trace, warn};

struct NodeSlot {
    host: HostRef,
    unreachable: bool,
}

/// Membership table and event bus shared by every node's cluster handle
struct Shared {
    nodes: Mutex<BTreeMap<NodeAddr, NodeSlot>>,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<MemberEvent>>>,
}

impl Shared {
    fn emit(&self, event: MemberEvent) {
        self.subscribers
            .lock()
            .unwrap()
            .retain(|tx| tx.send(event.clone()).is_ok());
    }
}

/// The [`ClusterHandle`] all in-process participants share
struct LocalHandle {
    shared: Arc<Shared>,
}

#[async_trait]
impl ClusterHandle for LocalHandle {
    fn subscribe(&self) -> mpsc::UnboundedReceiver<MemberEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        let nodes = self.shared.nodes.lock().unwrap();
        // Replay the current membership so a late subscriber starts from a
        // complete picture instead of an empty one.
        for addr in nodes.keys() {
            let _ = tx.send(MemberEvent::MemberUp(addr.clone()));
        }
        drop(nodes);
        self.shared.subscribers.lock().unwrap().push(tx);
        rx
    }

    async fn resolve_host(
        &self,
        addr: &NodeAddr,
        timeout: Duration,
    ) -> Result<HostRef, ClusterError> {
        let slot = {
            let nodes = self.shared.nodes.lock().unwrap();
            match nodes.get(addr) {
                None => return Err(ClusterError::Unresolved(addr.clone())),
                Some(slot) if slot.unreachable => None,
                Some(slot) => Some(slot.host.clone()),
            }
        };
        match slot {
            Some(host) => Ok(host),
            None => {
                // An unreachable node does not refuse, it goes quiet; burn
                // the caller's deadline before failing.
                tokio::time::sleep(timeout).await;
                Err(ClusterError::ResolveTimeout(addr.clone()))
            }
        }
    }

    fn down(&self, addr: &NodeAddr) {
        let removed = self.shared.nodes.lock().unwrap().remove(addr);
        if removed.is_some() {
            info!(node = %addr, "downing node");
            self.shared.emit(MemberEvent::MemberRemoved(addr.clone()));
        }
    }

    fn broadcast_hosts(&self, msg: HostMsg) {
        let nodes = self.shared.nodes.lock().unwrap();
        for (addr, slot) in nodes.iter() {
            if slot.unreachable {
                debug!(node = %addr, "skipping unreachable node in broadcast");
                continue;
            }
            slot.host.send(msg.clone());
        }
    }
}

/// A complete benchmark cluster in one process.
///
/// Nodes added with [`LocalCluster::add_node`] immediately join membership;
/// [`LocalCluster::run_benchmark`] hosts the coordinator singleton on top of
/// them and supervises it across restarts. Create and use inside a Tokio
/// runtime.
///
/// # Example
///
/// ```no_run
/// # use netpulse::cluster::LocalCluster;
/// # use netpulse::config::BenchConfig;
/// # async fn demo() -> anyhow::Result<()> {
/// let cluster = LocalCluster::new(BenchConfig::default());
/// cluster.add_node("node-1")?;
/// cluster.add_node("node-2")?;
/// let report = cluster.run_benchmark().await?;
/// println!("rounds completed: {}", report.rounds.len());
/// # Ok(())
/// # }
/// ```
pub struct LocalCluster {
    shared: Arc<Shared>,
    handle: Arc<LocalHandle>,
    config: BenchConfig,
    proxy: CoordRef,
    coordinator_target: watch::Sender<Option<CoordRef>>,
    incarnations: AtomicU32,
}

impl LocalCluster {
    /// Create an empty cluster from the benchmark configuration
    pub fn new(config: BenchConfig) -> Self {
        let shared = Arc::new(Shared {
            nodes: Mutex::new(BTreeMap::new()),
            subscribers: Mutex::new(Vec::new()),
        });
        let handle = Arc::new(LocalHandle {
            shared: shared.clone(),
        });

        // Node hosts keep one stable coordinator handle across restarts;
        // the pump forwards into whichever incarnation is currently alive
        // and drops messages sent between incarnations.
        let (proxy_tx, mut proxy_rx) = mpsc::unbounded_channel();
        let (coordinator_target, mut target_rx) = watch::channel(None::<CoordRef>);
        tokio::spawn(async move {
            while let Some(msg) = proxy_rx.recv().await {
                let target = target_rx.borrow_and_update().clone();
                match target {
                    Some(coordinator) => coordinator.send(msg),
                    None => trace!("no live coordinator incarnation, dropping message"),
                }
            }
        });

        Self {
            shared,
            handle,
            config,
            proxy: CoordRef::new(proxy_tx),
            coordinator_target,
            incarnations: AtomicU32::new(0),
        }
    }

    /// The cluster handle participants use for membership and resolution
    pub fn handle(&self) -> Arc<dyn ClusterHandle> {
        self.handle.clone()
    }

    /// Start a node and join it to membership.
    ///
    /// Spawns the node's benchmark host and announces the member to every
    /// subscriber. Names must be unique within the cluster.
    pub fn add_node(&self, name: &str) -> Result<NodeAddr, ClusterError> {
        let addr = NodeAddr::new(name);
        {
            let mut nodes = self.shared.nodes.lock().unwrap();
            if nodes.contains_key(&addr) {
                return Err(ClusterError::DuplicateNode(addr));
            }
            let host = NodeHost::spawn(
                addr.clone(),
                self.handle(),
                self.proxy.clone(),
                self.config.resolve_timeout(),
            );
            nodes.insert(
                addr.clone(),
                NodeSlot {
                    host,
                    unreachable: false,
                },
            );
        }
        info!(node = %addr, "node joined");
        self.shared.emit(MemberEvent::MemberUp(addr.clone()));
        Ok(addr)
    }

    /// Cut a node off: resolution of it times out and broadcasts skip it.
    /// The node stays in membership, exactly like a network partition.
    pub fn isolate(&self, addr: &NodeAddr) {
        if self.set_reachability(addr, false) {
            warn!(node = %addr, "node isolated");
            self.shared.emit(MemberEvent::ReachabilityChanged {
                addr: addr.clone(),
                reachable: false,
            });
        }
    }

    /// Undo [`LocalCluster::isolate`]
    pub fn heal(&self, addr: &NodeAddr) {
        if self.set_reachability(addr, true) {
            info!(node = %addr, "node healed");
            self.shared.emit(MemberEvent::ReachabilityChanged {
                addr: addr.clone(),
                reachable: true,
            });
        }
    }

    fn set_reachability(&self, addr: &NodeAddr, reachable: bool) -> bool {
        let mut nodes = self.shared.nodes.lock().unwrap();
        match nodes.get_mut(addr) {
            Some(slot) if slot.unreachable == reachable => {
                slot.unreachable = !reachable;
                true
            }
            _ => false,
        }
    }

    /// How many coordinator incarnations have been started so far
    pub fn incarnations(&self) -> u32 {
        self.incarnations.load(Ordering::SeqCst)
    }

    /// Host the coordinator singleton and drive the benchmark to the end.
    ///
    /// A coordinator that fails in its first round is restarted with a
    /// fresh incarnation after a short backoff, up to the configured
    /// restart budget; an orderly finish ends the run.
    pub async fn run_benchmark(&self) -> crate::Result<RunReport> {
        loop {
            let incarnation = self.incarnations.fetch_add(1, Ordering::SeqCst) + 1;
            let (coordinator, rx) = Coordinator::new(self.handle(), self.config.clone());
            self.coordinator_target.send_replace(Some(coordinator.handle()));
            info!(incarnation, "starting benchmark coordinator");

            let result = coordinator.run(rx).await;
            self.coordinator_target.send_replace(None);
            match result {
                Ok(report) => return Ok(report),
                Err(err) => {
                    if incarnation > self.config.max_coordinator_restarts {
                        error!(
                            incarnation,
                            error = %err,
                            "coordinator failed with the restart budget spent"
                        );
                        return Err(err)
                            .context("benchmark coordinator failed after repeated restarts");
                    }
                    warn!(
                        incarnation,
                        error = %err,
                        backoff = ?self.config.restart_backoff(),
                        "coordinator failed, restarting"
                    );
                    tokio::time::sleep(self.config.restart_backoff()).await;
                }
            }
        }
    }
}
