//! Node Runtime
//!
//! `NodeRuntime` owns everything one cluster node runs: the per-node
//! context from `daf-core`, the TCP transport, the admin listener, the
//! optional command-file monitor, and the lifecycle managers. `start`
//! brings the node up (the message listener binds first so peers can
//! connect before anything is sent), `run` serves until a stop-node command
//! arrives, and `shutdown` stops applications before tearing the transport
//! down, aborting anything that outlives the grace period.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant};
use tracing::{info, warn};

use daf_core::{ApplicationDef, ClusterDef, DafError, NodeContext, Result};

use crate::admin::{start_admin, NodeControl};
use crate::filemon::start_monitor;
use crate::managers::{ApplicationManager, TaskManager};
use crate::transport::{spawn_sender, start_listener, TaskRouter};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

pub struct NodeRuntime {
    ctx: Arc<NodeContext>,
    cluster: ClusterDef,
    router: Arc<TaskRouter>,
    tasks: Arc<TaskManager>,
    apps: Arc<ApplicationManager>,
    known_apps: HashMap<String, ApplicationDef>,
    shutdown: watch::Sender<bool>,
    control_tx: mpsc::Sender<NodeControl>,
    control_rx: Option<mpsc::Receiver<NodeControl>>,
    handles: Vec<JoinHandle<()>>,
    message_addr: Option<SocketAddr>,
    admin_addr: Option<SocketAddr>,
    started: bool,
}

impl std::fmt::Debug for NodeRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeRuntime")
            .field("node", &self.ctx.node_name())
            .field("started", &self.started)
            .field("message_addr", &self.message_addr)
            .field("admin_addr", &self.admin_addr)
            .finish_non_exhaustive()
    }
}

impl NodeRuntime {
    pub(crate) fn assemble(
        ctx: Arc<NodeContext>,
        cluster: ClusterDef,
        router: Arc<TaskRouter>,
        tasks: Arc<TaskManager>,
        apps: Arc<ApplicationManager>,
        known_apps: HashMap<String, ApplicationDef>,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        let (control_tx, control_rx) = mpsc::channel(4);
        Self {
            ctx,
            cluster,
            router,
            tasks,
            apps,
            known_apps,
            shutdown,
            control_tx,
            control_rx: Some(control_rx),
            handles: Vec::new(),
            message_addr: None,
            admin_addr: None,
            started: false,
        }
    }

    /// Bring the node up: transport, admin surface and file monitor
    pub async fn start(&mut self) -> Result<()> {
        if self.started {
            return Err(DafError::AlreadyStarted);
        }
        let node_def = self
            .cluster
            .node(self.ctx.node_name())
            .ok_or_else(|| DafError::UnknownNode(self.ctx.node_name().to_string()))?
            .clone();
        info!("starting node {}", node_def.name);

        // Cluster-level placements are known before any traffic flows.
        self.ctx.queues().register_queue_defs(&self.cluster.queues);
        for task in &self.cluster.tasks {
            self.router.register(task, &self.cluster.nodes);
        }

        let listener = start_listener(
            self.ctx.clone(),
            node_def.message_addr(),
            self.shutdown.subscribe(),
        )
        .await?;
        let message_addr = listener.local_addr();
        self.message_addr = Some(message_addr);
        self.handles.push(listener.join);

        let outbound_rx = self
            .ctx
            .queues()
            .take_outbound_receiver()
            .ok_or(DafError::AlreadyStarted)?;
        self.handles.push(spawn_sender(
            self.ctx.clone(),
            &self.cluster,
            self.router.clone(),
            outbound_rx,
            self.shutdown.subscribe(),
        ));

        let (admin_addr, admin_join) = start_admin(
            self.apps.clone(),
            node_def.admin_addr(),
            self.control_tx.clone(),
            self.shutdown.subscribe(),
        )
        .await?;
        self.admin_addr = Some(admin_addr);
        self.handles.push(admin_join);

        if let Some(path) = self.ctx.config().command_file.clone() {
            self.handles.push(start_monitor(
                path,
                self.apps.clone(),
                self.known_apps.clone(),
                self.control_tx.clone(),
                self.shutdown.subscribe(),
            ));
        }

        self.started = true;
        info!(
            "node {} up (messages on {}, admin on {})",
            node_def.name, message_addr, admin_addr
        );
        Ok(())
    }

    /// Serve until a stop-node command arrives, then shut down
    pub async fn run(&mut self) -> Result<()> {
        if !self.started {
            self.start().await?;
        }
        let mut control_rx = self
            .control_rx
            .take()
            .ok_or(DafError::AlreadyStarted)?;
        match control_rx.recv().await {
            Some(NodeControl::StopNode) => info!("stop requested"),
            None => warn!("control channel closed"),
        }
        self.shutdown().await
    }

    /// Stop applications, then tear the node's services down
    ///
    /// Safe to call on a node that never started.
    pub async fn shutdown(&mut self) -> Result<()> {
        if !self.started {
            return Ok(());
        }
        info!("node {} shutting down", self.ctx.node_name());

        self.apps.stop_all().await;
        self.tasks.stop_all().await;

        let _ = self.shutdown.send(true);
        let deadline = Instant::now() + SHUTDOWN_GRACE;
        for mut handle in self.handles.drain(..) {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if tokio::time::timeout(remaining, &mut handle).await.is_err() {
                handle.abort();
            }
        }

        self.started = false;
        info!("node {} stopped", self.ctx.node_name());
        Ok(())
    }

    pub fn node_name(&self) -> &str {
        self.ctx.node_name()
    }

    pub fn context(&self) -> &Arc<NodeContext> {
        &self.ctx
    }

    pub fn applications(&self) -> &Arc<ApplicationManager> {
        &self.apps
    }

    pub fn tasks(&self) -> &Arc<TaskManager> {
        &self.tasks
    }

    pub fn cluster(&self) -> &ClusterDef {
        &self.cluster
    }

    /// Actual message listener address, once started
    pub fn message_addr(&self) -> Option<SocketAddr> {
        self.message_addr
    }

    /// Actual admin listener address, once started
    pub fn admin_addr(&self) -> Option<SocketAddr> {
        self.admin_addr
    }

    pub fn is_started(&self) -> bool {
        self.started
    }
}
