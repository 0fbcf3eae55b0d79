//! Echo responder
//!
//! The pingee-side half of a connection: a stateless bouncer that returns
//! every ball to whoever threw it.

use crate::bench::protocol::{EchoMsg, EchoRef, WorkerMsg};
use tokio::sync::mpsc;
use tracing::trace;

/// Spawn an echo responder task and return its handle.
///
/// The responder holds no state and applies a single rule: a ball goes
/// straight back to its sender. It terminates when every handle to it has
/// been dropped at round teardown; balls aimed at an already-terminated
/// worker are silently discarded.
pub fn spawn() -> EchoRef {
    let (tx, mut rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        while let Some(EchoMsg::Ping { from }) = rx.recv().await {
            from.send(WorkerMsg::Pong);
        }
        trace!("echo responder stopped");
    });

    EchoRef::new(tx)
}
