//! Task Manager
//!
//! Starts and stops task instances on this node. Placement is taken from
//! the `TaskDef`: a definition pinned to another node is skipped, a
//! wildcard definition starts one instance here under its per-node name.
//! Stopping is cooperative with a deadline; an instance still running one
//! receive wait after the deadline is aborted.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tracing::{debug, info, warn};

use daf_core::{DafError, NodeContext, Result, TaskDef};

use crate::registry::TaskRegistry;
use crate::tasks::{spawn_task, TaskContext, TaskHandle};

pub struct TaskManager {
    ctx: Arc<NodeContext>,
    registry: Arc<TaskRegistry>,
    running: DashMap<String, TaskHandle>,
}

impl TaskManager {
    pub fn new(ctx: Arc<NodeContext>, registry: Arc<TaskRegistry>) -> Self {
        Self {
            ctx,
            registry,
            running: DashMap::new(),
        }
    }

    /// Start this node's instance of `def`, if it has one
    ///
    /// Errors (unknown kind, duplicate instance, failed `init`) leave no
    /// instance behind; callers use that to fail an application start.
    pub async fn start_task(&self, def: &TaskDef) -> Result<()> {
        if !def.runs_on(self.ctx.node_name()) {
            debug!("task {} is not placed on this node", def.name);
            return Ok(());
        }
        let name = def.instance_name(self.ctx.node_name());
        if self.running.contains_key(&name) {
            return Err(DafError::TaskAlreadyRunning(name));
        }

        let mut task = self.registry.create(&def.kind)?;
        let ctx = TaskContext::new(&name, self.ctx.clone(), def.queue.clone());
        task.init(&ctx).await?;
        let join = spawn_task(task, ctx.clone());
        self.running.insert(name.clone(), TaskHandle::new(name, ctx, join));
        Ok(())
    }

    /// Ask an instance to stop without waiting for it
    pub fn request_stop(&self, name: &str) -> bool {
        match self.running.get(name) {
            Some(handle) => {
                handle.request_stop();
                true
            }
            None => false,
        }
    }

    /// Stop an instance and wait for it to exit
    pub async fn stop_task(&self, name: &str) -> bool {
        match self.running.remove(name) {
            Some((_, handle)) => {
                handle.stop_and_join(self.stop_grace()).await;
                true
            }
            None => {
                warn!("task {} is not running", name);
                false
            }
        }
    }

    /// Instances that have started and not yet exited
    pub fn is_running(&self, name: &str) -> bool {
        self.running
            .get(name)
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    pub fn running_tasks(&self) -> Vec<String> {
        self.running.iter().map(|e| e.key().clone()).collect()
    }

    /// Stop every running instance, waiting for them together
    pub async fn stop_all(&self) {
        let names: Vec<String> = self.running_tasks();
        if names.is_empty() {
            return;
        }
        info!("stopping {} task(s)", names.len());
        futures::future::join_all(names.iter().map(|name| self.stop_task(name))).await;
    }

    /// A blocked work loop notices its stop flag within one receive wait;
    /// allow that plus a little slack before aborting
    fn stop_grace(&self) -> Duration {
        self.ctx.receive_wait() + Duration::from_secs(1)
    }
}
