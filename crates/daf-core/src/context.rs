//! Node Context
//!
//! Bundles the per-node services (queue manager, port manager, message
//! factory, tunables) behind one handle. Every task and manager on a node
//! works through a shared `Arc<NodeContext>`; two nodes in one process get
//! two fully independent contexts.

use std::sync::Arc;
use std::time::Duration;

use crate::config::RuntimeConfig;
use crate::message::MessageFactory;
use crate::port::PortManager;
use crate::queue_manager::QueueManager;

pub struct NodeContext {
    node_name: String,
    config: RuntimeConfig,
    queues: Arc<QueueManager>,
    ports: Arc<PortManager>,
    factory: MessageFactory,
}

impl NodeContext {
    pub fn new(node_name: impl Into<String>, config: RuntimeConfig) -> Self {
        let node_name = node_name.into();
        let queues = Arc::new(QueueManager::new(
            &node_name,
            config.outbound_capacity(),
            config.default_queue_size,
        ));
        let ports = Arc::new(PortManager::new(&node_name, queues.clone()));
        let factory = MessageFactory::new(config.default_message_kind);
        Self {
            node_name,
            config,
            queues,
            ports,
            factory,
        }
    }

    pub fn node_name(&self) -> &str {
        &self.node_name
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn queues(&self) -> &Arc<QueueManager> {
        &self.queues
    }

    pub fn ports(&self) -> &Arc<PortManager> {
        &self.ports
    }

    pub fn factory(&self) -> &MessageFactory {
        &self.factory
    }

    /// Default wait used by task loops polling their input queue
    pub fn receive_wait(&self) -> Duration {
        self.config.receive_wait()
    }
}
