//! Ports
//!
//! A port binds a sending task to a destination queue and hides where that
//! queue lives. The factory on `PortManager` picks the implementation from
//! the queue-ownership registry: a `LocalPort` works directly on the queue,
//! a `RemotePort` proxies over the outbound send queue using the
//! remove/return protocol. Ports are cached per (task, queue) pair so the
//! transport can find the port awaiting a given reply.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::oneshot;
use tracing::debug;

use crate::errors::{DafError, Result};
use crate::message::Message;
use crate::outbound::OutboundSender;
use crate::queue::{DequeueOutcome, MessageQueue};
use crate::queue_manager::QueueManager;
use crate::waiter::Waiter;

// ----------------------------------------------------------------------------
// Port Trait
// ----------------------------------------------------------------------------

/// Uniform send/receive handle between one task and one queue
#[async_trait]
pub trait Port: Send + Sync {
    fn from_task(&self) -> &str;

    fn to_queue(&self) -> &str;

    /// Stamp sender/recipient and deliver toward the destination queue
    async fn send(&self, msg: Message) -> Result<()>;

    /// Block until a message is available
    async fn receive(&self) -> Result<Message>;

    /// Block until a message is available or the wait elapses
    async fn receive_timeout(&self, wait: Duration) -> Result<Option<Message>>;

    /// Hand the port a message delivered out-of-band by the transport
    fn add_message(&self, msg: Message) -> Result<()>;

    fn sent_count(&self) -> u64;

    fn received_count(&self) -> u64;
}

// ----------------------------------------------------------------------------
// Local Port
// ----------------------------------------------------------------------------

/// Port onto a queue hosted on this node
#[derive(Debug)]
pub struct LocalPort {
    from_task: String,
    to_queue: String,
    queue: Arc<MessageQueue>,
    sent: AtomicU64,
    received: AtomicU64,
}

impl LocalPort {
    pub fn new(
        from_task: impl Into<String>,
        to_queue: impl Into<String>,
        queue: Arc<MessageQueue>,
    ) -> Self {
        Self {
            from_task: from_task.into(),
            to_queue: to_queue.into(),
            queue,
            sent: AtomicU64::new(0),
            received: AtomicU64::new(0),
        }
    }
}

#[async_trait]
impl Port for LocalPort {
    fn from_task(&self) -> &str {
        &self.from_task
    }

    fn to_queue(&self) -> &str {
        &self.to_queue
    }

    async fn send(&self, mut msg: Message) -> Result<()> {
        msg.set_sender(&self.from_task);
        msg.set_recipient(&self.to_queue);
        self.queue.enqueue(msg);
        self.sent.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn receive(&self) -> Result<Message> {
        let (waiter, handle) = Waiter::local();
        let msg = match self.queue.dequeue_or_park(waiter) {
            DequeueOutcome::Ready(msg, _unused) => msg,
            DequeueOutcome::Parked => handle.wait_on_message().await?,
        };
        self.received.fetch_add(1, Ordering::Relaxed);
        Ok(msg)
    }

    async fn receive_timeout(&self, wait: Duration) -> Result<Option<Message>> {
        let (waiter, handle) = Waiter::local();
        let msg = match self.queue.dequeue_or_park(waiter) {
            DequeueOutcome::Ready(msg, _unused) => Some(msg),
            DequeueOutcome::Parked => handle.wait_timeout(wait).await?,
        };
        if msg.is_some() {
            self.received.fetch_add(1, Ordering::Relaxed);
        }
        Ok(msg)
    }

    fn add_message(&self, msg: Message) -> Result<()> {
        self.queue.enqueue(msg);
        Ok(())
    }

    fn sent_count(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    fn received_count(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }
}

// ----------------------------------------------------------------------------
// Remote Port
// ----------------------------------------------------------------------------

/// Port onto a queue hosted on another node
///
/// `send` is fire-and-forget through the outbound queue. `receive` issues a
/// `REMOVE_MSG` and parks on a one-slot reply box that the transport fills
/// via `add_message` when the matching `RETURN_MSG` arrives.
#[derive(Debug)]
pub struct RemotePort {
    from_task: String,
    to_queue: String,
    outbound: OutboundSender,
    reply: Mutex<Option<oneshot::Sender<Message>>>,
    sent: AtomicU64,
    received: AtomicU64,
}

impl RemotePort {
    pub fn new(
        from_task: impl Into<String>,
        to_queue: impl Into<String>,
        outbound: OutboundSender,
    ) -> Self {
        Self {
            from_task: from_task.into(),
            to_queue: to_queue.into(),
            outbound,
            reply: Mutex::new(None),
            sent: AtomicU64::new(0),
            received: AtomicU64::new(0),
        }
    }

    fn key(&self) -> String {
        format!("{}_{}", self.from_task, self.to_queue)
    }

    /// Install the reply slot for one receive; a live slot means a receive
    /// is already in flight on this port
    fn arm_reply(&self) -> Result<oneshot::Receiver<Message>> {
        let mut slot = self.reply.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(pending) = slot.as_ref() {
            if !pending.is_closed() {
                return Err(DafError::ReceivePending(self.key()));
            }
        }
        let (tx, rx) = oneshot::channel();
        *slot = Some(tx);
        Ok(rx)
    }

    fn disarm_reply(&self) {
        self.reply
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}

#[async_trait]
impl Port for RemotePort {
    fn from_task(&self) -> &str {
        &self.from_task
    }

    fn to_queue(&self) -> &str {
        &self.to_queue
    }

    async fn send(&self, mut msg: Message) -> Result<()> {
        msg.set_sender(&self.from_task);
        msg.set_recipient(&self.to_queue);
        self.outbound.send_or_drop(msg);
        self.sent.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn receive(&self) -> Result<Message> {
        let rx = self.arm_reply()?;
        self.outbound
            .send_or_drop(Message::remove_request(&self.from_task, &self.to_queue));
        let msg = rx.await.map_err(|_| DafError::WaiterAbandoned)?;
        self.received.fetch_add(1, Ordering::Relaxed);
        Ok(msg)
    }

    async fn receive_timeout(&self, wait: Duration) -> Result<Option<Message>> {
        let rx = self.arm_reply()?;
        self.outbound
            .send_or_drop(Message::remove_request(&self.from_task, &self.to_queue));
        match tokio::time::timeout(wait, rx).await {
            Ok(Ok(msg)) => {
                self.received.fetch_add(1, Ordering::Relaxed);
                Ok(Some(msg))
            }
            Ok(Err(_)) => Err(DafError::WaiterAbandoned),
            Err(_) => {
                // Expired: a reply landing from now on is dangling.
                self.disarm_reply();
                Ok(None)
            }
        }
    }

    fn add_message(&self, msg: Message) -> Result<()> {
        let armed = self
            .reply
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match armed {
            Some(tx) => tx
                .send(msg)
                .map_err(|_| DafError::DanglingReply(self.key())),
            None => Err(DafError::DanglingReply(self.key())),
        }
    }

    fn sent_count(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    fn received_count(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }
}

// ----------------------------------------------------------------------------
// Port Manager
// ----------------------------------------------------------------------------

/// Factory and registry for the live ports on one node
pub struct PortManager {
    node: String,
    queues: Arc<QueueManager>,
    ports: DashMap<(String, String), Arc<dyn Port>>,
}

impl PortManager {
    pub fn new(node: impl Into<String>, queues: Arc<QueueManager>) -> Self {
        Self {
            node: node.into(),
            queues,
            ports: DashMap::new(),
        }
    }

    /// Get or create the port for `(from_task, to_queue)`
    ///
    /// Repeated calls for the same pair return the same instance.
    pub fn create_port(&self, from_task: &str, to_queue: &str) -> Result<Arc<dyn Port>> {
        let key = (from_task.to_string(), to_queue.to_string());
        if let Some(port) = self.ports.get(&key) {
            return Ok(port.clone());
        }

        let owner = self
            .queues
            .owner_node(to_queue)
            .ok_or_else(|| DafError::QueueOwnerUnknown(to_queue.to_string()))?;
        let port: Arc<dyn Port> = if owner == self.node {
            let queue = self
                .queues
                .get_queue(to_queue)
                .ok_or_else(|| DafError::QueueNotFound(to_queue.to_string()))?;
            Arc::new(LocalPort::new(from_task, to_queue, queue))
        } else {
            Arc::new(RemotePort::new(from_task, to_queue, self.queues.outbound()))
        };

        let port = match self.ports.entry(key) {
            dashmap::mapref::entry::Entry::Occupied(existing) => existing.get().clone(),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(port.clone());
                port
            }
        };
        Ok(port)
    }

    /// Resolve the port awaiting a reply, if any
    pub fn find_port(&self, from_task: &str, to_queue: &str) -> Option<Arc<dyn Port>> {
        self.ports
            .get(&(from_task.to_string(), to_queue.to_string()))
            .map(|p| p.clone())
    }

    pub fn remove_port(&self, from_task: &str, to_queue: &str) -> bool {
        self.ports
            .remove(&(from_task.to_string(), to_queue.to_string()))
            .is_some()
    }

    /// Drop every port a task created; called when the task exits
    pub fn remove_ports_for_task(&self, task: &str) {
        let before = self.ports.len();
        self.ports.retain(|(from, _), _| from != task);
        let removed = before - self.ports.len();
        if removed > 0 {
            debug!("released {} port(s) for task {}", removed, task);
        }
    }

    pub fn port_count(&self) -> usize {
        self.ports.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::defs::QueueDef;
    use crate::message::{MessageKind, MessageValue, REMOVE_MSG};

    fn queue_manager(node: &str) -> Arc<QueueManager> {
        Arc::new(QueueManager::new(node, 16, 16))
    }

    fn local_setup() -> (Arc<QueueManager>, PortManager) {
        let queues = queue_manager("alpha");
        queues.register_queue_defs(&[
            QueueDef::new("work", "alpha"),
            QueueDef::new("far", "beta"),
        ]);
        queues.create_queue(&QueueDef::new("work", "alpha"));
        let ports = PortManager::new("alpha", queues.clone());
        (queues, ports)
    }

    fn payload(id: &str) -> Message {
        let mut msg = Message::new(id, MessageKind::Uncompressed);
        msg.set_value("n", 42i64);
        msg
    }

    #[tokio::test]
    async fn local_send_then_receive_round_trips() {
        let (_queues, ports) = local_setup();
        let port = ports.create_port("producer", "work").unwrap();

        port.send(payload("m1")).await.unwrap();
        let got = port.receive().await.unwrap();

        assert_eq!(got.id(), "m1");
        assert_eq!(got.sender(), "producer");
        assert_eq!(got.recipient(), "work");
        assert_eq!(got.value("n").and_then(MessageValue::as_int), Some(42));
        assert_eq!(port.sent_count(), 1);
        assert_eq!(port.received_count(), 1);
    }

    #[tokio::test]
    async fn create_port_returns_the_cached_instance() {
        let (_queues, ports) = local_setup();
        let a = ports.create_port("producer", "work").unwrap();
        let b = ports.create_port("producer", "work").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(ports.port_count(), 1);
    }

    #[tokio::test]
    async fn ownership_selects_local_or_remote() {
        let (queues, ports) = local_setup();
        let local = ports.create_port("t", "work").unwrap();
        let remote = ports.create_port("t", "far").unwrap();

        // A local port delivers straight into the queue; a remote port has
        // nothing local to deliver to, so its sends go outbound.
        local.send(payload("a")).await.unwrap();
        assert_eq!(queues.get_queue("work").unwrap().size(), 1);
        remote.send(payload("b")).await.unwrap();
        assert_eq!(queues.get_queue("work").unwrap().size(), 1);
        assert_eq!(queues.stats().queued(), 1);
    }

    #[tokio::test]
    async fn unknown_queue_owner_is_an_error() {
        let (_queues, ports) = local_setup();
        let err = ports.create_port("t", "nowhere");
        assert!(matches!(err, Err(DafError::QueueOwnerUnknown(_))));
    }

    #[tokio::test]
    async fn local_queue_missing_is_an_error() {
        let queues = queue_manager("alpha");
        queues.register_queue_defs(&[QueueDef::new("work", "alpha")]);
        let ports = PortManager::new("alpha", queues);
        let err = ports.create_port("t", "work");
        assert!(matches!(err, Err(DafError::QueueNotFound(_))));
    }

    #[tokio::test]
    async fn remote_receive_emits_remove_and_completes_on_reply() {
        let (queues, ports) = local_setup();
        let port = ports.create_port("collector", "far").unwrap();
        let mut outbound_rx = queues.take_outbound_receiver().unwrap();

        let mut receiving = {
            let port = port.clone();
            tokio_test::task::spawn(async move { port.receive().await })
        };
        assert!(receiving.poll().is_pending());

        let request = outbound_rx.recv().await.unwrap();
        assert_eq!(request.id(), REMOVE_MSG);
        assert_eq!(request.sender(), "collector");
        assert_eq!(request.recipient(), "far");

        port.add_message(payload("answer")).unwrap();
        let got = match receiving.poll() {
            std::task::Poll::Ready(res) => res.unwrap(),
            std::task::Poll::Pending => panic!("receive should have completed"),
        };
        assert_eq!(got.id(), "answer");
        assert_eq!(port.received_count(), 1);
    }

    #[tokio::test]
    async fn second_receive_while_pending_is_rejected() {
        let (_queues, ports) = local_setup();
        let port = ports.create_port("collector", "far").unwrap();

        let mut first = {
            let port = port.clone();
            tokio_test::task::spawn(async move { port.receive().await })
        };
        assert!(first.poll().is_pending());

        let err = port.receive_timeout(Duration::from_millis(5)).await;
        assert!(matches!(err, Err(DafError::ReceivePending(_))));
    }

    #[tokio::test]
    async fn expired_receive_makes_the_reply_dangling() {
        let (_queues, ports) = local_setup();
        let port = ports.create_port("collector", "far").unwrap();

        let got = port
            .receive_timeout(Duration::from_millis(10))
            .await
            .unwrap();
        assert!(got.is_none());

        let err = port.add_message(payload("late"));
        assert!(matches!(err, Err(DafError::DanglingReply(_))));
        assert_eq!(port.received_count(), 0);
    }

    #[tokio::test]
    async fn find_port_resolves_only_registered_pairs() {
        let (_queues, ports) = local_setup();
        ports.create_port("collector", "far").unwrap();
        assert!(ports.find_port("collector", "far").is_some());
        assert!(ports.find_port("collector", "work").is_none());
        assert!(ports.find_port("other", "far").is_none());
    }

    #[tokio::test]
    async fn task_exit_releases_its_ports() {
        let (_queues, ports) = local_setup();
        ports.create_port("a", "work").unwrap();
        ports.create_port("a", "far").unwrap();
        ports.create_port("b", "work").unwrap();

        ports.remove_ports_for_task("a");
        assert_eq!(ports.port_count(), 1);
        assert!(ports.find_port("b", "work").is_some());
    }
}
