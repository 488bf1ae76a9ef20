//! Outbound send queue
//!
//! Every message leaving a node funnels through one bounded queue: remote
//! port sends, remote dequeue requests, and the replies generated while
//! serving other nodes' requests. Producers never block; when the queue is
//! full the message is dropped, logged and counted. The single consumer is
//! the transport's sender task.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::error;

use crate::message::Message;

/// Receiver half of the outbound queue, taken once by the sender task
pub type OutboundReceiver = mpsc::Receiver<Message>;

// ----------------------------------------------------------------------------
// Transport Statistics
// ----------------------------------------------------------------------------

/// Counters shared by the outbound queue and the transport
///
/// Atomics, so readers and producers can update them without a lock.
#[derive(Debug, Default)]
pub struct TransportStats {
    queued: AtomicU64,
    sent: AtomicU64,
    dropped: AtomicU64,
    reconnects: AtomicU64,
}

impl TransportStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_queued(&self) {
        self.queued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sent(&self) {
        self.sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reconnect(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
    }

    /// Messages accepted onto the outbound queue
    pub fn queued(&self) -> u64 {
        self.queued.load(Ordering::Relaxed)
    }

    /// Messages written to a peer connection
    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    /// Messages lost to a full or closed outbound queue, or to a routing
    /// failure in the sender
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Times the sender re-established a peer connection
    pub fn reconnects(&self) -> u64 {
        self.reconnects.load(Ordering::Relaxed)
    }
}

// ----------------------------------------------------------------------------
// Outbound Sender
// ----------------------------------------------------------------------------

/// Producer handle onto the outbound queue
///
/// Cheap to clone; every remote port and every connection reader holds one.
#[derive(Debug, Clone)]
pub struct OutboundSender {
    tx: mpsc::Sender<Message>,
    stats: Arc<TransportStats>,
}

impl OutboundSender {
    /// Enqueue for delivery, dropping the message if the queue is full
    ///
    /// The loss is logged with the message identity and counted, never
    /// propagated to the producer.
    pub fn send_or_drop(&self, msg: Message) {
        match self.tx.try_send(msg) {
            Ok(()) => self.stats.record_queued(),
            Err(mpsc::error::TrySendError::Full(msg)) => {
                error!("outbound queue full, dropping message {}", msg.id());
                self.stats.record_dropped();
            }
            Err(mpsc::error::TrySendError::Closed(msg)) => {
                error!("outbound queue closed, dropping message {}", msg.id());
                self.stats.record_dropped();
            }
        }
    }

    pub fn stats(&self) -> &Arc<TransportStats> {
        &self.stats
    }
}

/// Create the bounded outbound queue for one node
pub fn create_outbound_queue(
    capacity: usize,
    stats: Arc<TransportStats>,
) -> (OutboundSender, OutboundReceiver) {
    let (tx, rx) = mpsc::channel(capacity);
    (OutboundSender { tx, stats }, rx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageKind;

    fn msg(id: &str) -> Message {
        Message::new(id, MessageKind::Uncompressed)
    }

    #[tokio::test]
    async fn full_queue_drops_and_counts() {
        let stats = Arc::new(TransportStats::new());
        let (tx, mut rx) = create_outbound_queue(2, stats.clone());

        tx.send_or_drop(msg("a"));
        tx.send_or_drop(msg("b"));
        tx.send_or_drop(msg("c"));

        assert_eq!(stats.queued(), 2);
        assert_eq!(stats.dropped(), 1);
        assert_eq!(rx.recv().await.unwrap().id(), "a");
        assert_eq!(rx.recv().await.unwrap().id(), "b");
    }

    #[tokio::test]
    async fn closed_queue_drops_and_counts() {
        let stats = Arc::new(TransportStats::new());
        let (tx, rx) = create_outbound_queue(2, stats.clone());
        drop(rx);

        tx.send_or_drop(msg("a"));
        assert_eq!(stats.queued(), 0);
        assert_eq!(stats.dropped(), 1);
    }
}
