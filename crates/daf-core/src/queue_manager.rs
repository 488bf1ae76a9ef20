//! Queue Manager
//!
//! Owns the queues hosted on this node plus the cluster-wide ownership map
//! that says which node hosts which queue. Also owns the single outbound
//! send queue that every remote-bound message funnels through; the
//! transport layer takes the receiving end exactly once at startup.

use std::sync::{Arc, Mutex, PoisonError};

use dashmap::DashMap;
use tracing::{debug, warn};

use crate::defs::QueueDef;
use crate::outbound::{create_outbound_queue, OutboundReceiver, OutboundSender, TransportStats};
use crate::queue::MessageQueue;

pub struct QueueManager {
    node: String,
    default_queue_size: usize,
    queues: DashMap<String, Arc<MessageQueue>>,
    ownership: DashMap<String, String>,
    outbound: OutboundSender,
    outbound_rx: Mutex<Option<OutboundReceiver>>,
    stats: Arc<TransportStats>,
}

impl QueueManager {
    pub fn new(node: impl Into<String>, outbound_capacity: usize, default_queue_size: usize) -> Self {
        let stats = Arc::new(TransportStats::new());
        let (outbound, outbound_rx) = create_outbound_queue(outbound_capacity, stats.clone());
        Self {
            node: node.into(),
            default_queue_size,
            queues: DashMap::new(),
            ownership: DashMap::new(),
            outbound,
            outbound_rx: Mutex::new(Some(outbound_rx)),
            stats,
        }
    }

    pub fn node(&self) -> &str {
        &self.node
    }

    /// Record which node hosts each queue; later definitions win
    pub fn register_queue_defs(&self, defs: &[QueueDef]) {
        for def in defs {
            self.ownership.insert(def.name.clone(), def.node.clone());
        }
    }

    pub fn unregister_queue_def(&self, name: &str) {
        self.ownership.remove(name);
    }

    /// Create a queue hosted here; creating an existing queue returns the
    /// live instance untouched
    pub fn create_queue(&self, def: &QueueDef) -> Arc<MessageQueue> {
        if let Some(existing) = self.queues.get(&def.name) {
            warn!("queue {} already exists, keeping it", def.name);
            return existing.clone();
        }
        let capacity = def.capacity.unwrap_or(self.default_queue_size);
        let queue = Arc::new(MessageQueue::new(&def.name, capacity));
        self.queues.insert(def.name.clone(), queue.clone());
        self.ownership.insert(def.name.clone(), def.node.clone());
        debug!("created queue {} (capacity {})", def.name, capacity);
        queue
    }

    /// Drop a hosted queue; it dies, abandoning any parked waiters, once
    /// the last port holding it lets go
    pub fn remove_queue(&self, name: &str) -> bool {
        let removed = self.queues.remove(name).is_some();
        if removed {
            debug!("removed queue {}", name);
        }
        removed
    }

    pub fn get_queue(&self, name: &str) -> Option<Arc<MessageQueue>> {
        self.queues.get(name).map(|q| q.clone())
    }

    pub fn owner_node(&self, name: &str) -> Option<String> {
        self.ownership.get(name).map(|n| n.clone())
    }

    pub fn is_local(&self, name: &str) -> bool {
        self.owner_node(name).as_deref() == Some(self.node.as_str())
    }

    pub fn queue_names(&self) -> Vec<String> {
        self.queues.iter().map(|e| e.key().clone()).collect()
    }

    pub fn outbound(&self) -> OutboundSender {
        self.outbound.clone()
    }

    /// Hand out the consuming end of the outbound queue; yields `Some` only
    /// on the first call
    pub fn take_outbound_receiver(&self) -> Option<OutboundReceiver> {
        self.outbound_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    pub fn stats(&self) -> Arc<TransportStats> {
        self.stats.clone()
    }
}
