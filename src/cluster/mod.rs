//! Cluster substrate interface
//!
//! The benchmark orchestration runs on top of an existing message-passing
//! cluster. Everything it needs from that substrate is expressed here as the
//! [`ClusterHandle`] trait:
//!
//! - **Membership events**: subscribe to member-up / member-removed /
//!   reachability changes, with the current member set replayed to new
//!   subscribers so a restarted coordinator can re-learn the cluster
//! - **Address resolution**: turn a logical node address into a live handle
//!   to that node's benchmark host, within a bounded timeout
//! - **Administrative down**: forcibly evict a member
//! - **Host broadcast**: deliver a control message to every reachable
//!   member's benchmark host
//!
//! The crate ships one implementation, [`local::LocalCluster`], which hosts
//! any number of virtual nodes inside the current process and doubles as the
//! test harness for the orchestration logic.

pub mod local;

pub use local::LocalCluster;

use crate::bench::protocol::{HostMsg, HostRef};
use async_trait::async_trait;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

/// Opaque logical address of a cluster node.
///
/// Purely a key: ordered so pairing is deterministic, hashable so it can key
/// the coordinator's tables, and cheap enough to travel in every protocol
/// message.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeAddr(String);

impl NodeAddr {
    /// Create an address from its string form
    pub fn new(addr: impl Into<String>) -> Self {
        Self(addr.into())
    }

    /// The address as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeAddr {
    fn from(addr: &str) -> Self {
        Self::new(addr)
    }
}

/// Membership change delivered on the event feed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemberEvent {
    /// A node has joined and is considered up
    MemberUp(NodeAddr),
    /// A node has left or was administratively downed
    MemberRemoved(NodeAddr),
    /// A node's reachability changed without a membership change
    ReachabilityChanged { addr: NodeAddr, reachable: bool },
}

/// Faults surfaced by the substrate
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClusterError {
    /// No benchmark host is registered under the address
    #[error("no benchmark host registered for {0}")]
    Unresolved(NodeAddr),
    /// Resolution did not complete within the allowed time
    #[error("resolving benchmark host on {0} timed out")]
    ResolveTimeout(NodeAddr),
    /// A node with the same address is already part of the cluster
    #[error("node {0} is already registered")]
    DuplicateNode(NodeAddr),
}

/// What the benchmark requires from the cluster it runs on.
///
/// Handles are shared across the coordinator and every per-node process, so
/// implementations must be cheaply clonable behind an `Arc`.
#[async_trait]
pub trait ClusterHandle: Send + Sync {
    /// Open a membership event subscription.
    ///
    /// The current member set is replayed as [`MemberEvent::MemberUp`] events
    /// before any live event is delivered, so subscribing late (or again,
    /// after a coordinator restart) still observes every member.
    fn subscribe(&self) -> mpsc::UnboundedReceiver<MemberEvent>;

    /// Resolve a node address to a live handle of its benchmark host.
    ///
    /// Resolution failure is an ordinary fault: callers treat it exactly
    /// like a request timeout.
    async fn resolve_host(&self, addr: &NodeAddr, timeout: Duration) -> Result<HostRef, ClusterError>;

    /// Administratively remove a member from the cluster
    fn down(&self, addr: &NodeAddr);

    /// Deliver a control message to every reachable member's benchmark host
    fn broadcast_hosts(&self, msg: HostMsg);
}
