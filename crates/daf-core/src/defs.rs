//! Cluster and Application Definitions
//!
//! Plain serde data types describing a cluster (nodes and their listen
//! addresses) and the applications deployed onto it (tasks, queues,
//! resources). These travel as TOML on disk and bincode over the admin
//! protocol, so field names are part of the external surface.

use serde::{Deserialize, Serialize};

use crate::config::ConfigError;

/// Task placement wildcard: run one instance on every node
pub const ALL_NODES: &str = "*";

// ----------------------------------------------------------------------------
// Cluster
// ----------------------------------------------------------------------------

/// One node of the cluster and where to reach it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeDef {
    pub name: String,
    pub address: String,
    pub message_port: u16,
    #[serde(default = "default_admin_port")]
    pub admin_port: u16,
}

fn default_admin_port() -> u16 {
    7000
}

impl NodeDef {
    /// Address of the message listener, suitable for connect/bind
    pub fn message_addr(&self) -> String {
        format!("{}:{}", self.address, self.message_port)
    }

    /// Address of the admin listener
    pub fn admin_addr(&self) -> String {
        format!("{}:{}", self.address, self.admin_port)
    }
}

/// Static description of the whole cluster plus any queues and tasks that
/// exist outside of applications
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ClusterDef {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub nodes: Vec<NodeDef>,
    #[serde(default)]
    pub queues: Vec<QueueDef>,
    #[serde(default)]
    pub tasks: Vec<TaskDef>,
}

impl ClusterDef {
    pub fn node(&self, name: &str) -> Option<&NodeDef> {
        self.nodes.iter().find(|n| n.name == name)
    }

    /// Every node other than `local`, in definition order
    pub fn remote_nodes(&self, local: &str) -> Vec<NodeDef> {
        self.nodes
            .iter()
            .filter(|n| n.name != local)
            .cloned()
            .collect()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.nodes.is_empty() {
            return Err(ConfigError::Validation(
                "cluster defines no nodes".to_string(),
            ));
        }
        for node in &self.nodes {
            if node.name == ALL_NODES {
                return Err(ConfigError::Validation(format!(
                    "node name {:?} is reserved",
                    ALL_NODES
                )));
            }
            if self.nodes.iter().filter(|n| n.name == node.name).count() > 1 {
                return Err(ConfigError::Validation(format!(
                    "duplicate node name {}",
                    node.name
                )));
            }
            if node.message_port == 0 || node.admin_port == 0 {
                return Err(ConfigError::Validation(format!(
                    "node {} has a zero port",
                    node.name
                )));
            }
        }
        check_placements(&self.queues, &self.tasks, self)?;
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Applications
// ----------------------------------------------------------------------------

/// A named queue and the node that hosts it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueDef {
    pub name: String,
    pub node: String,
    #[serde(default)]
    pub capacity: Option<usize>,
}

impl QueueDef {
    pub fn new(name: impl Into<String>, node: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            node: node.into(),
            capacity: None,
        }
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = Some(capacity);
        self
    }
}

/// A task instance: which registered kind to run, where, and its input
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDef {
    pub name: String,
    pub kind: String,
    pub node: String,
    #[serde(default)]
    pub queue: Option<String>,
}

impl TaskDef {
    pub fn new(
        name: impl Into<String>,
        kind: impl Into<String>,
        node: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            node: node.into(),
            queue: None,
        }
    }

    pub fn with_queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = Some(queue.into());
        self
    }

    /// Whether this definition places an instance on the given node
    pub fn runs_on(&self, node: &str) -> bool {
        self.node == ALL_NODES || self.node == node
    }

    /// Instance name as it appears in message sender/recipient fields;
    /// wildcard placements get a per-node suffix
    pub fn instance_name(&self, node: &str) -> String {
        if self.node == ALL_NODES {
            format!("{}@{}", self.name, node)
        } else {
            self.name.clone()
        }
    }
}

/// A deployable unit of queues and tasks, started and stopped as a whole
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationDef {
    pub name: String,
    #[serde(default)]
    pub queues: Vec<QueueDef>,
    #[serde(default)]
    pub tasks: Vec<TaskDef>,
    #[serde(default)]
    pub resources: Vec<String>,
}

impl ApplicationDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            queues: Vec::new(),
            tasks: Vec::new(),
            resources: Vec::new(),
        }
    }

    pub fn with_queue(mut self, queue: QueueDef) -> Self {
        self.queues.push(queue);
        self
    }

    pub fn with_task(mut self, task: TaskDef) -> Self {
        self.tasks.push(task);
        self
    }

    /// Check every placement in this application against the cluster
    pub fn validate(&self, cluster: &ClusterDef) -> Result<(), ConfigError> {
        if self.name.is_empty() {
            return Err(ConfigError::Validation(
                "application has no name".to_string(),
            ));
        }
        check_placements(&self.queues, &self.tasks, cluster)
    }
}

fn check_placements(
    queues: &[QueueDef],
    tasks: &[TaskDef],
    cluster: &ClusterDef,
) -> Result<(), ConfigError> {
    for queue in queues {
        if cluster.node(&queue.node).is_none() {
            return Err(ConfigError::Validation(format!(
                "queue {} placed on unknown node {}",
                queue.name, queue.node
            )));
        }
    }
    for task in tasks {
        if task.node != ALL_NODES && cluster.node(&task.node).is_none() {
            return Err(ConfigError::Validation(format!(
                "task {} placed on unknown node {}",
                task.name, task.node
            )));
        }
    }
    Ok(())
}
