//! Message Listener
//!
//! Accepts inbound peer connections on the node's message port and runs one
//! reader task per connection. Each reader decodes length-prefixed frames in
//! arrival order and hands them to the dispatcher; decode failures are
//! logged and skipped, socket failures end that connection only.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use daf_core::{MessageCodec, NodeContext, Result};

use super::dispatch::MessageDispatcher;
use super::wait_shutdown;

pub struct ListenerHandle {
    local_addr: SocketAddr,
    pub(crate) join: JoinHandle<()>,
}

impl ListenerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

/// Bind the message port and start accepting peers
///
/// Binding failures are returned to the caller; they are fatal at node
/// startup.
pub async fn start_listener(
    ctx: Arc<NodeContext>,
    addr: String,
    mut shutdown: watch::Receiver<bool>,
) -> Result<ListenerHandle> {
    let listener = TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;
    info!("message listener on {}", local_addr);

    let dispatcher = Arc::new(MessageDispatcher::new(ctx.clone()));
    let max_frame = ctx.config().max_frame_bytes;
    let join = tokio::spawn(async move {
        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        debug!("peer connected from {}", peer);
                        let dispatcher = dispatcher.clone();
                        let mut conn_shutdown = shutdown.clone();
                        tokio::spawn(async move {
                            tokio::select! {
                                _ = read_connection(stream, peer, dispatcher, max_frame) => {}
                                _ = wait_shutdown(&mut conn_shutdown) => {}
                            }
                        });
                    }
                    Err(e) => {
                        warn!("accept failed: {}", e);
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                },
                _ = wait_shutdown(&mut shutdown) => break,
            }
        }
        info!("message listener stopped");
    });

    Ok(ListenerHandle { local_addr, join })
}

/// Decode frames from one peer until the connection ends
async fn read_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    dispatcher: Arc<MessageDispatcher>,
    max_frame: usize,
) {
    let mut codec = MessageCodec::new(max_frame);
    let mut header = [0u8; 4];
    let mut body = Vec::new();
    loop {
        match stream.read_exact(&mut header).await {
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                debug!("peer {} disconnected", peer);
                return;
            }
            Err(e) => {
                warn!("read from {} failed: {}", peer, e);
                return;
            }
        }
        let len = u32::from_be_bytes(header) as usize;
        if len > max_frame {
            error!(
                "frame of {} bytes from {} exceeds the {} byte limit, closing",
                len, peer, max_frame
            );
            return;
        }
        body.resize(len, 0);
        if let Err(e) = stream.read_exact(&mut body).await {
            warn!("read from {} failed: {}", peer, e);
            return;
        }
        match codec.decode(&body) {
            Ok(msg) => dispatcher.process_message(msg),
            Err(e) => error!("undecodable frame from {}: {}", peer, e),
        }
    }
}
