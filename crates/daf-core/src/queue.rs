//! Message queues
//!
//! A `MessageQueue` holds two FIFOs under one lock: buffered messages and
//! parked waiters. At most one of the two is ever non-empty. A parked waiter
//! outranks the buffer: an arriving message goes straight to the oldest
//! waiter instead of queueing behind it.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::message::Message;
use crate::waiter::{NotifyOutcome, Waiter};

/// Outcome of a dequeue attempt that is prepared to park
#[derive(Debug)]
pub enum DequeueOutcome {
    /// A buffered message was available; the waiter is handed back unused
    Ready(Message, Waiter),
    /// The buffer was empty; the waiter is parked in line
    Parked,
}

// ----------------------------------------------------------------------------
// Message Queue
// ----------------------------------------------------------------------------

/// Named FIFO mailbox with parked-receiver priority
///
/// Capacity is advisory: `enqueue` never rejects, `size()` is informational.
/// All three operations run under the queue's single mutex and never await,
/// so the message/waiter exclusion holds at every observable instant.
#[derive(Debug)]
pub struct MessageQueue {
    name: String,
    capacity: usize,
    inner: Mutex<QueueInner>,
}

#[derive(Debug, Default)]
struct QueueInner {
    messages: VecDeque<Message>,
    waiters: VecDeque<Waiter>,
}

impl MessageQueue {
    pub fn new(name: impl Into<String>, capacity: usize) -> Self {
        Self {
            name: name.into(),
            capacity,
            inner: Mutex::new(QueueInner::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Deliver a message: to the oldest live waiter if one is parked,
    /// otherwise into the buffer
    pub fn enqueue(&self, msg: Message) {
        let mut inner = self.lock();
        let mut msg = msg;
        while let Some(waiter) = inner.waiters.pop_front() {
            match waiter.notify_with_message(msg) {
                NotifyOutcome::Delivered => return,
                // Receiver gave up (timed out or dropped); try the next one.
                NotifyOutcome::Abandoned(returned) => msg = returned,
            }
        }
        inner.messages.push_back(msg);
    }

    /// Pop a buffered message, or park the given waiter if there is none
    pub fn dequeue_or_park(&self, waiter: Waiter) -> DequeueOutcome {
        let mut inner = self.lock();
        match inner.messages.pop_front() {
            Some(msg) => DequeueOutcome::Ready(msg, waiter),
            None => {
                inner.waiters.push_back(waiter);
                DequeueOutcome::Parked
            }
        }
    }

    /// Pop a buffered message if one is present
    pub fn dequeue_non_blocking(&self) -> Option<Message> {
        self.lock().messages.pop_front()
    }

    /// Buffered message count
    pub fn size(&self) -> usize {
        self.lock().messages.len()
    }

    /// Parked waiter count
    pub fn waiter_count(&self) -> usize {
        self.lock().waiters.len()
    }

    /// Message and waiter counts read under one lock acquisition
    pub fn lengths(&self) -> (usize, usize) {
        let inner = self.lock();
        (inner.messages.len(), inner.waiters.len())
    }

    fn lock(&self) -> MutexGuard<'_, QueueInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{MessageKind, MessageValue, RETURN_MSG};
    use crate::outbound::{create_outbound_queue, TransportStats};
    use proptest::prelude::*;
    use std::sync::Arc;

    fn msg(id: &str) -> Message {
        Message::new(id, MessageKind::Uncompressed)
    }

    #[test]
    fn fifo_order() {
        let queue = MessageQueue::new("q", 16);
        for i in 0..10 {
            queue.enqueue(msg(&format!("m{i}")));
        }
        for i in 0..10 {
            assert_eq!(queue.dequeue_non_blocking().unwrap().id(), format!("m{i}"));
        }
        assert!(queue.dequeue_non_blocking().is_none());
    }

    #[tokio::test]
    async fn parked_waiter_outranks_the_buffer() {
        let queue = MessageQueue::new("q", 16);
        let (waiter, handle) = Waiter::local();
        assert!(matches!(queue.dequeue_or_park(waiter), DequeueOutcome::Parked));

        queue.enqueue(msg("direct"));

        let got = handle.wait_on_message().await.unwrap();
        assert_eq!(got.id(), "direct");
        // Delivered past the buffer, which stays empty.
        assert_eq!(queue.size(), 0);
        assert_eq!(queue.waiter_count(), 0);
    }

    #[tokio::test]
    async fn waiters_are_served_in_parking_order() {
        let queue = MessageQueue::new("q", 16);
        let (w1, h1) = Waiter::local();
        let (w2, h2) = Waiter::local();
        queue.dequeue_or_park(w1);
        queue.dequeue_or_park(w2);

        queue.enqueue(msg("a"));
        queue.enqueue(msg("b"));

        assert_eq!(h1.wait_on_message().await.unwrap().id(), "a");
        assert_eq!(h2.wait_on_message().await.unwrap().id(), "b");
    }

    #[tokio::test]
    async fn dead_waiters_are_skipped() {
        let queue = MessageQueue::new("q", 16);
        let (w1, h1) = Waiter::local();
        let (w2, h2) = Waiter::local();
        queue.dequeue_or_park(w1);
        queue.dequeue_or_park(w2);
        drop(h1);

        queue.enqueue(msg("survivor"));

        assert_eq!(h2.wait_on_message().await.unwrap().id(), "survivor");
        assert_eq!(queue.lengths(), (0, 0));
    }

    #[test]
    fn ready_hands_the_waiter_back() {
        let queue = MessageQueue::new("q", 16);
        queue.enqueue(msg("buffered"));
        let (waiter, _handle) = Waiter::local();
        match queue.dequeue_or_park(waiter) {
            DequeueOutcome::Ready(m, w) => {
                assert_eq!(m.id(), "buffered");
                assert!(!w.is_remote());
            }
            DequeueOutcome::Parked => panic!("expected a buffered message"),
        }
        assert_eq!(queue.waiter_count(), 0);
    }

    #[tokio::test]
    async fn remote_waiter_is_answered_through_the_outbound_queue() {
        let stats = Arc::new(TransportStats::new());
        let (outbound, mut rx) = create_outbound_queue(4, stats);
        let queue = MessageQueue::new("work", 16);

        let request = Message::remove_request("collector", "work");
        let parked = queue.dequeue_or_park(Waiter::remote(request, outbound));
        assert!(matches!(parked, DequeueOutcome::Parked));

        queue.enqueue(msg("job"));

        let reply = rx.recv().await.unwrap();
        assert_eq!(reply.id(), RETURN_MSG);
        let inner = reply
            .value(crate::message::RETURN_VALUE_KEY)
            .and_then(MessageValue::as_message)
            .unwrap();
        assert_eq!(inner.id(), "job");
        assert_eq!(queue.lengths(), (0, 0));
    }

    #[test]
    fn buffers_and_waiters_never_coexist() {
        let queue = MessageQueue::new("q", 16);

        queue.enqueue(msg("a"));
        assert_eq!(queue.lengths(), (1, 0));

        let (waiter, _h) = Waiter::local();
        // Buffer non-empty, so the waiter never parks.
        assert!(matches!(
            queue.dequeue_or_park(waiter),
            DequeueOutcome::Ready(..)
        ));
        assert_eq!(queue.lengths(), (0, 0));

        let (waiter, _h2) = Waiter::local();
        queue.dequeue_or_park(waiter);
        assert_eq!(queue.lengths(), (0, 1));

        // Delivery to the parked waiter bypasses the buffer entirely.
        queue.enqueue(msg("b"));
        assert_eq!(queue.lengths(), (0, 0));
    }

    #[test]
    fn capacity_is_advisory() {
        let queue = MessageQueue::new("q", 2);
        for i in 0..5 {
            queue.enqueue(msg(&format!("m{i}")));
        }
        assert_eq!(queue.size(), 5);
        assert_eq!(queue.capacity(), 2);
    }

    #[test]
    fn concurrent_producers_and_consumers_conserve_messages() {
        let queue = Arc::new(MessageQueue::new("q", 64));
        let mut handles = Vec::new();
        for t in 0..4 {
            let queue = queue.clone();
            handles.push(std::thread::spawn(move || {
                for i in 0..250 {
                    queue.enqueue(Message::new(
                        format!("t{t}-{i}"),
                        MessageKind::Uncompressed,
                    ));
                    let (messages, waiters) = queue.lengths();
                    assert!(messages == 0 || waiters == 0);
                }
            }));
        }
        let mut drained = 0;
        while drained < 1000 {
            if queue.dequeue_non_blocking().is_some() {
                drained += 1;
            } else {
                std::thread::yield_now();
            }
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(queue.lengths(), (0, 0));
    }

    proptest! {
        // Any interleaving of enqueues and non-blocking dequeues behaves
        // like a plain FIFO.
        #[test]
        fn dequeue_order_matches_a_model_fifo(ops in proptest::collection::vec(any::<bool>(), 1..200)) {
            let queue = MessageQueue::new("q", 32);
            let mut model: std::collections::VecDeque<String> = Default::default();
            let mut next = 0usize;
            for op in ops {
                if op {
                    let id = format!("m{next}");
                    next += 1;
                    queue.enqueue(Message::new(id.clone(), MessageKind::Uncompressed));
                    model.push_back(id);
                } else {
                    let got = queue.dequeue_non_blocking().map(|m| m.id().to_string());
                    prop_assert_eq!(got, model.pop_front());
                }
            }
            prop_assert_eq!(queue.size(), model.len());
        }
    }
}
