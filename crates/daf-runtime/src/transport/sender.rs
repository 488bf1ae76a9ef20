//! Socket Sender
//!
//! One task per node drains the shared outbound queue and writes each
//! message to a persistent connection to its destination node. The link to
//! every peer is opened when the sender starts and reopened whenever a
//! write fails; the failed message is retransmitted head-of-line once the
//! link is back, so per-destination order survives a reconnect. Connect
//! attempts retry at a fixed interval forever; every tenth consecutive
//! failure also writes the configured error-marker file so an operator can
//! notice, without ever taking the node down.

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio::net::{TcpSocket, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tracing::{debug, error, info, warn};

use daf_core::{
    ClusterDef, Message, MessageCodec, NodeContext, OutboundReceiver, QueueManager,
    TransportStats,
};

use super::routing::TaskRouter;
use super::wait_shutdown;

/// Consecutive connect failures before the error marker is (re)written
const FAILURES_PER_MARKER: u32 = 10;

pub struct SenderConfig {
    pub retry: Duration,
    pub send_buffer_bytes: usize,
    pub max_frame_bytes: usize,
    pub error_file: Option<PathBuf>,
}

impl SenderConfig {
    pub fn from_context(ctx: &NodeContext) -> Self {
        let config = ctx.config();
        Self {
            retry: config.connection_retry(),
            send_buffer_bytes: config.send_buffer_bytes,
            max_frame_bytes: config.max_frame_bytes,
            error_file: config.connection_error_file.clone(),
        }
    }
}

pub fn spawn_sender(
    ctx: Arc<NodeContext>,
    cluster: &ClusterDef,
    router: Arc<TaskRouter>,
    rx: OutboundReceiver,
    shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    let sender = SocketSender {
        node: ctx.node_name().to_string(),
        peers: cluster
            .remote_nodes(ctx.node_name())
            .into_iter()
            .map(|n| {
                let addr = n.message_addr();
                (n.name, addr)
            })
            .collect(),
        config: SenderConfig::from_context(&ctx),
        queues: ctx.queues().clone(),
        router,
    };
    tokio::spawn(sender.run(rx, shutdown))
}

struct SocketSender {
    node: String,
    peers: HashMap<String, String>,
    config: SenderConfig,
    queues: Arc<QueueManager>,
    router: Arc<TaskRouter>,
}

impl SocketSender {
    async fn run(self, rx: OutboundReceiver, mut shutdown: watch::Receiver<bool>) {
        info!("socket sender started on node {}", self.node);
        self.drain(rx, &mut shutdown).await;
        info!("socket sender stopped");
    }

    /// Connect to every peer, then deliver outbound messages until the
    /// queue closes or shutdown is requested
    async fn drain(&self, mut rx: OutboundReceiver, shutdown: &mut watch::Receiver<bool>) {
        let stats = self.queues.stats();
        let mut codec = MessageCodec::new(self.config.max_frame_bytes);
        let mut links: HashMap<String, TcpStream> = HashMap::new();
        let mut frame = Vec::new();

        for (dest, addr) in &self.peers {
            match self.connect(dest, addr, shutdown).await {
                Some(stream) => {
                    links.insert(dest.clone(), stream);
                }
                None => return,
            }
        }

        loop {
            let msg = tokio::select! {
                received = rx.recv() => match received {
                    Some(msg) => msg,
                    None => return,
                },
                _ = wait_shutdown(shutdown) => return,
            };

            let Some((dest, addr)) = self.resolve_destination(&msg, &stats) else {
                continue;
            };
            if let Err(e) = codec.encode_frame(&msg, &mut frame) {
                error!("cannot encode message {}: {}", msg.id(), e);
                stats.record_dropped();
                continue;
            }

            // Deliver, reconnecting as often as needed. The frame is only
            // considered sent once a write succeeds, so a link failure
            // retransmits it before anything newer.
            loop {
                if let Some(link) = links.get_mut(&dest) {
                    match link.write_all(&frame).await {
                        Ok(_) => {
                            stats.record_sent();
                            break;
                        }
                        Err(e) => {
                            warn!("send to {} failed, reconnecting: {}", dest, e);
                            links.remove(&dest);
                            stats.record_reconnect();
                        }
                    }
                } else {
                    match self.connect(&dest, &addr, shutdown).await {
                        Some(stream) => {
                            links.insert(dest.clone(), stream);
                        }
                        None => return,
                    }
                }
            }
        }
    }

    /// Destination node and address for one outbound message
    ///
    /// Replies go to the node running the requesting task; everything else
    /// goes to the node owning the recipient queue.
    fn resolve_destination(
        &self,
        msg: &Message,
        stats: &TransportStats,
    ) -> Option<(String, String)> {
        let dest = if msg.is_return() {
            match self.router.node_for_task(msg.recipient()) {
                Some(node) => node,
                None => {
                    error!(
                        "no node runs task {}, dropping reply from queue {}",
                        msg.recipient(),
                        msg.sender()
                    );
                    stats.record_dropped();
                    return None;
                }
            }
        } else {
            match self.queues.owner_node(msg.recipient()) {
                Some(node) => node,
                None => {
                    error!(
                        "no node owns queue {}, dropping message {}",
                        msg.recipient(),
                        msg.id()
                    );
                    stats.record_dropped();
                    return None;
                }
            }
        };
        if dest == self.node {
            error!("message {} routed back to this node, dropping it", msg.id());
            stats.record_dropped();
            return None;
        }
        match self.peers.get(&dest) {
            Some(addr) => Some((dest, addr.clone())),
            None => {
                error!("node {} is not in the cluster, dropping message", dest);
                stats.record_dropped();
                None
            }
        }
    }

    /// Open a connection to a peer, retrying until it succeeds or shutdown
    /// is requested (`None`)
    async fn connect(
        &self,
        dest: &str,
        addr: &str,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Option<TcpStream> {
        let mut failures: u32 = 0;
        loop {
            if *shutdown.borrow() {
                return None;
            }
            match self.open(addr).await {
                Ok(stream) => {
                    info!("connected to node {} at {}", dest, addr);
                    return Some(stream);
                }
                Err(e) => {
                    failures += 1;
                    debug!(
                        "connect to node {} failed ({} consecutive): {}",
                        dest, failures, e
                    );
                    if failures >= FAILURES_PER_MARKER {
                        self.write_error_marker(dest, addr);
                        failures = 0;
                    }
                }
            }
            tokio::select! {
                _ = tokio::time::sleep(self.config.retry) => {}
                _ = wait_shutdown(shutdown) => return None,
            }
        }
    }

    async fn open(&self, addr: &str) -> io::Result<TcpStream> {
        let mut resolved = tokio::net::lookup_host(addr).await?;
        let addr = resolved.next().ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, "address resolved to nothing")
        })?;
        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        if let Err(e) = socket.set_send_buffer_size(self.config.send_buffer_bytes as u32) {
            warn!("could not size the send buffer: {}", e);
        }
        socket.connect(addr).await
    }

    fn write_error_marker(&self, dest: &str, addr: &str) {
        error!(
            "node {} at {} is not answering after {} attempts",
            dest, addr, FAILURES_PER_MARKER
        );
        let Some(path) = &self.config.error_file else {
            return;
        };
        let line = format!(
            "node {} cannot reach node {} at {}\n",
            self.node, dest, addr
        );
        if let Err(e) = std::fs::write(path, line) {
            error!(
                "cannot write connection error file {}: {}",
                path.display(),
                e
            );
        }
    }
}
