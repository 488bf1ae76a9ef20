//! Node Builder
//!
//! Builder-style assembly of a `NodeRuntime`: name the node, hand over the
//! cluster topology, register task constructors, declare the applications
//! the node should know about, then `build()`. Validation happens once at
//! build time so a misconfigured node fails before it binds a socket.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::warn;

use daf_core::{
    ApplicationDef, ClusterDef, ConfigError, DafError, NodeContext, Result, RuntimeConfig,
};

use crate::builtin::register_builtin_tasks;
use crate::managers::{ApplicationManager, TaskManager};
use crate::registry::TaskRegistry;
use crate::runtime::NodeRuntime;
use crate::tasks::Task;
use crate::transport::TaskRouter;

// ----------------------------------------------------------------------------
// Node Builder
// ----------------------------------------------------------------------------

pub struct NodeBuilder {
    node_name: String,
    cluster: Option<ClusterDef>,
    config: RuntimeConfig,
    registry: TaskRegistry,
    applications: Vec<ApplicationDef>,
}

impl NodeBuilder {
    /// Start building the runtime for the named cluster node
    pub fn new(node_name: impl Into<String>) -> Self {
        Self {
            node_name: node_name.into(),
            cluster: None,
            config: RuntimeConfig::default(),
            registry: TaskRegistry::new(),
            applications: Vec::new(),
        }
    }

    /// Set the cluster topology this node participates in
    pub fn with_cluster(mut self, cluster: ClusterDef) -> Self {
        self.cluster = Some(cluster);
        self
    }

    /// Override the default runtime tunables
    pub fn with_config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    /// Register a constructor for a task kind
    pub fn with_task_kind<F>(mut self, kind: impl Into<String>, ctor: F) -> Self
    where
        F: Fn() -> Box<dyn Task> + Send + Sync + 'static,
    {
        self.registry.register(kind, ctor);
        self
    }

    /// Register the task kinds shipped with the runtime
    pub fn with_builtin_tasks(mut self) -> Self {
        register_builtin_tasks(&mut self.registry);
        self
    }

    /// Make an application definition known to the node
    ///
    /// Known applications can be started by name through the command-file
    /// monitor; they are not started automatically.
    pub fn with_application(mut self, def: ApplicationDef) -> Self {
        self.applications.push(def);
        self
    }

    /// Validate the configuration and assemble the runtime
    pub fn build(self) -> Result<NodeRuntime> {
        let cluster = self.cluster.ok_or_else(|| {
            DafError::Config(ConfigError::Validation(
                "no cluster topology given".to_string(),
            ))
        })?;
        self.config.validate()?;
        cluster.validate()?;
        if cluster.node(&self.node_name).is_none() {
            return Err(DafError::UnknownNode(self.node_name));
        }

        let mut known_apps = HashMap::new();
        for def in self.applications {
            def.validate(&cluster)?;
            let name = def.name.clone();
            if known_apps.insert(name.clone(), def).is_some() {
                warn!("application {} defined twice, keeping the later definition", name);
            }
        }

        let ctx = Arc::new(NodeContext::new(&self.node_name, self.config));
        let router = Arc::new(TaskRouter::new());
        let tasks = Arc::new(TaskManager::new(ctx.clone(), Arc::new(self.registry)));
        let apps = Arc::new(ApplicationManager::new(
            ctx.clone(),
            cluster.clone(),
            tasks.clone(),
            router.clone(),
        ));

        Ok(NodeRuntime::assemble(
            ctx, cluster, router, tasks, apps, known_apps,
        ))
    }
}
