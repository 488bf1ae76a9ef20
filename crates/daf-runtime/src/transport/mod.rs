//! Node-to-Node Transport
//!
//! One TCP listener per node accepts peer connections and runs a reader per
//! connection; one sender task drains the node's outbound queue into
//! persistent per-peer connections, reconnecting on failure. Inbound frames
//! are routed by `MessageDispatcher` (remove/return proxying plus normal
//! queue delivery); outbound destinations are resolved from queue ownership
//! and the task routing table.

mod dispatch;
mod listener;
mod routing;
mod sender;

pub(crate) use dispatch::MessageDispatcher;
pub(crate) use listener::{start_listener, ListenerHandle};
pub(crate) use routing::TaskRouter;
pub(crate) use sender::{spawn_sender, SenderConfig};

use tokio::sync::watch;

/// Resolve once the shutdown signal flips to true (or the sender is gone)
pub(crate) async fn wait_shutdown(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow() {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}
