//! Application Manager
//!
//! Starts and stops applications as units. A start validates the definition
//! against the cluster, publishes queue ownership, creates the local
//! queues, registers reply routing for every task, waits out the settle
//! delay so peer nodes catch up, then starts this node's tasks. Any task
//! failing to start aborts the rest and leaves the application unregistered.
//! Stops are the inverse and, like double starts, are no-ops when the
//! application is not in the expected state.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashMap;
use tracing::{error, info, warn};

use daf_core::{ApplicationDef, ClusterDef, NodeContext, Result};

use crate::managers::TaskManager;
use crate::transport::TaskRouter;

pub struct ApplicationManager {
    ctx: Arc<NodeContext>,
    cluster: ClusterDef,
    tasks: Arc<TaskManager>,
    router: Arc<TaskRouter>,
    running: DashMap<String, ApplicationDef>,
    cluster_started: AtomicBool,
}

impl ApplicationManager {
    pub(crate) fn new(
        ctx: Arc<NodeContext>,
        cluster: ClusterDef,
        tasks: Arc<TaskManager>,
        router: Arc<TaskRouter>,
    ) -> Self {
        Self {
            ctx,
            cluster,
            tasks,
            router,
            running: DashMap::new(),
            cluster_started: AtomicBool::new(false),
        }
    }

    /// Start an application on this node
    ///
    /// Starting a running application is a logged no-op.
    pub async fn start_application(&self, def: &ApplicationDef) -> Result<()> {
        if self.running.contains_key(&def.name) {
            warn!("application {} is already running", def.name);
            return Ok(());
        }
        def.validate(&self.cluster)?;
        info!("starting application {}", def.name);

        self.ctx.queues().register_queue_defs(&def.queues);
        for queue in &def.queues {
            if queue.node == self.ctx.node_name() {
                self.ctx.queues().create_queue(queue);
            }
        }
        for task in &def.tasks {
            self.router.register(task, &self.cluster.nodes);
        }

        // Give the other nodes time to create their queues before tasks
        // start sending into them.
        tokio::time::sleep(self.ctx.config().application_start_delay()).await;

        for task in &def.tasks {
            if let Err(e) = self.tasks.start_task(task).await {
                error!(
                    "application {} start aborted: task {} failed: {}",
                    def.name, task.name, e
                );
                return Err(e);
            }
        }

        self.running.insert(def.name.clone(), def.clone());
        info!("application {} started", def.name);
        Ok(())
    }

    /// Stop an application and remove its local queues
    ///
    /// Stopping an application that is not running is a logged no-op.
    pub async fn stop_application(&self, name: &str) -> Result<()> {
        let Some((_, def)) = self.running.remove(name) else {
            warn!("application {} is not running", name);
            return Ok(());
        };
        info!("stopping application {}", name);

        for task in &def.tasks {
            if task.runs_on(self.ctx.node_name()) {
                self.tasks
                    .stop_task(&task.instance_name(self.ctx.node_name()))
                    .await;
            }
            self.router.unregister(task, &self.cluster.nodes);
        }
        for queue in &def.queues {
            if queue.node == self.ctx.node_name() {
                self.ctx.queues().remove_queue(&queue.name);
            }
            self.ctx.queues().unregister_queue_def(&queue.name);
        }

        info!("application {} stopped", name);
        Ok(())
    }

    /// Bring up the queues and tasks declared in the cluster topology
    /// itself; repeated calls are logged no-ops
    pub async fn start_cluster(&self) -> Result<()> {
        if self.cluster_started.swap(true, Ordering::SeqCst) {
            warn!("cluster services already started on this node");
            return Ok(());
        }
        info!("starting cluster services");

        for queue in &self.cluster.queues {
            if queue.node == self.ctx.node_name() {
                self.ctx.queues().create_queue(queue);
            }
        }
        for task in &self.cluster.tasks {
            if let Err(e) = self.tasks.start_task(task).await {
                error!("cluster task {} failed to start: {}", task.name, e);
                return Err(e);
            }
        }
        Ok(())
    }

    pub fn is_running(&self, name: &str) -> bool {
        self.running.contains_key(name)
    }

    /// Names of the running applications, sorted for stable listings
    pub fn running_applications(&self) -> Vec<String> {
        let mut names: Vec<String> = self.running.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub async fn stop_all(&self) {
        for name in self.running_applications() {
            let _ = self.stop_application(&name).await;
        }
    }
}
