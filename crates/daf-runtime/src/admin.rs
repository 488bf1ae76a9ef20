//! Admin Control Surface
//!
//! Line-oriented text protocol on the node's admin port. Each connection
//! carries one command:
//!
//! ```text
//! startcluster
//! startapplication\n<base64 application def>
//! stopapplication\n<base64 application def>
//! listapplications
//! stopnode
//! ```
//!
//! Replies are one `ok` or `error: ...` line; `listapplications` writes the
//! running names first. Application definitions travel bincode-encoded then
//! base64-armored so they survive the line framing.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use daf_core::{ApplicationDef, DafError, Result};

use crate::managers::ApplicationManager;
use crate::transport::wait_shutdown;

pub const CMD_START_CLUSTER: &str = "startcluster";
pub const CMD_START_APPLICATION: &str = "startapplication";
pub const CMD_STOP_APPLICATION: &str = "stopapplication";
pub const CMD_LIST_APPLICATIONS: &str = "listapplications";
pub const CMD_STOP_NODE: &str = "stopnode";

/// Out-of-band instructions to the node runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum NodeControl {
    StopNode,
}

/// Armor an application definition for the admin protocol
pub fn encode_application_def(def: &ApplicationDef) -> Result<String> {
    let bytes = bincode::serialize(def)
        .map_err(|e| DafError::Admin(format!("cannot encode application def: {}", e)))?;
    Ok(BASE64.encode(bytes))
}

/// Inverse of [`encode_application_def`]
pub fn decode_application_def(text: &str) -> Result<ApplicationDef> {
    let bytes = BASE64
        .decode(text.trim())
        .map_err(|e| DafError::Admin(format!("bad application def encoding: {}", e)))?;
    bincode::deserialize(&bytes)
        .map_err(|e| DafError::Admin(format!("bad application def payload: {}", e)))
}

/// Bind the admin port and serve commands until shutdown
pub(crate) async fn start_admin(
    apps: Arc<ApplicationManager>,
    addr: String,
    control: mpsc::Sender<NodeControl>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(SocketAddr, JoinHandle<()>)> {
    let listener = TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;
    info!("admin listener on {}", local_addr);

    let join = tokio::spawn(async move {
        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let apps = apps.clone();
                        let control = control.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, peer, apps, control).await {
                                warn!("admin connection from {} failed: {}", peer, e);
                            }
                        });
                    }
                    Err(e) => {
                        warn!("admin accept failed: {}", e);
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                },
                _ = wait_shutdown(&mut shutdown) => break,
            }
        }
        info!("admin listener stopped");
    });

    Ok((local_addr, join))
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    apps: Arc<ApplicationManager>,
    control: mpsc::Sender<NodeControl>,
) -> std::io::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    let Some(command) = lines.next_line().await? else {
        return Ok(());
    };
    let command = command.trim().to_string();
    debug!("admin command {:?} from {}", command, peer);

    let reply = match command.as_str() {
        CMD_START_CLUSTER => status_line(apps.start_cluster().await),
        CMD_START_APPLICATION => match read_def(&mut lines).await? {
            Ok(def) => status_line(apps.start_application(&def).await),
            Err(e) => format!("error: {}", e),
        },
        CMD_STOP_APPLICATION => match read_def(&mut lines).await? {
            Ok(def) => status_line(apps.stop_application(&def.name).await),
            Err(e) => format!("error: {}", e),
        },
        CMD_LIST_APPLICATIONS => {
            let mut listing = String::new();
            for name in apps.running_applications() {
                listing.push_str(&name);
                listing.push('\n');
            }
            listing.push_str("ok");
            listing
        }
        CMD_STOP_NODE => {
            let _ = control.send(NodeControl::StopNode).await;
            "ok".to_string()
        }
        other => format!("error: unknown command {:?}", other),
    };

    writer.write_all(reply.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.shutdown().await
}

/// Read and decode the base64 definition line following a command
async fn read_def(
    lines: &mut tokio::io::Lines<BufReader<tokio::net::tcp::OwnedReadHalf>>,
) -> std::io::Result<Result<ApplicationDef>> {
    match lines.next_line().await? {
        Some(line) => Ok(decode_application_def(&line)),
        None => Ok(Err(DafError::Admin(
            "missing application def line".to_string(),
        ))),
    }
}

fn status_line(result: Result<()>) -> String {
    match result {
        Ok(()) => "ok".to_string(),
        Err(e) => format!("error: {}", e),
    }
}
