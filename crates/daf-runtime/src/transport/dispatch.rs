//! Inbound Message Dispatch
//!
//! Routes each decoded frame from a peer connection. Three cases:
//! - a remove request: serve it from the target queue, either replying
//!   immediately from the buffer or parking a remote waiter
//! - a return reply: unwrap the carried message and hand it to the port
//!   whose receive is pending
//! - anything else: deliver into the named local queue
//!
//! All routing failures are logged and the offending message dropped; a bad
//! frame never takes the connection down.

use std::sync::Arc;

use tracing::{debug, error};

use daf_core::{
    DequeueOutcome, Message, MessageValue, NodeContext, Waiter, RETURN_VALUE_KEY,
};

pub struct MessageDispatcher {
    ctx: Arc<NodeContext>,
}

impl MessageDispatcher {
    pub fn new(ctx: Arc<NodeContext>) -> Self {
        Self { ctx }
    }

    /// Route one inbound message
    pub fn process_message(&self, msg: Message) {
        if msg.is_remove() {
            self.process_remove(msg);
        } else if msg.is_return() {
            self.process_return(msg);
        } else {
            self.deliver(msg);
        }
    }

    /// A remote task asked to dequeue from one of our queues
    fn process_remove(&self, request: Message) {
        let queue = match self.ctx.queues().get_queue(request.recipient()) {
            Some(queue) => queue,
            None => {
                error!(
                    "remove request from {} names unknown queue {}",
                    request.sender(),
                    request.recipient()
                );
                return;
            }
        };
        let waiter = Waiter::remote(request, self.ctx.queues().outbound());
        match queue.dequeue_or_park(waiter) {
            // A buffered message was available; answer with it right away.
            DequeueOutcome::Ready(found, waiter) => {
                let _ = waiter.notify_with_message(found);
            }
            DequeueOutcome::Parked => {}
        }
    }

    /// A remote queue answered one of our tasks' dequeue requests
    fn process_return(&self, mut reply: Message) {
        let task = reply.recipient().to_string();
        let queue = reply.sender().to_string();
        let inner = match reply
            .take_value(RETURN_VALUE_KEY)
            .and_then(MessageValue::into_message)
        {
            Some(inner) => inner,
            None => {
                error!("return reply from queue {} carries no message", queue);
                return;
            }
        };
        match self.ctx.ports().find_port(&task, &queue) {
            Some(port) => {
                if let Err(e) = port.add_message(inner) {
                    error!("reply to task {} from queue {} dropped: {}", task, queue, e);
                }
            }
            None => {
                error!(
                    "no port is waiting on queue {} for task {}, dropping reply",
                    queue, task
                );
            }
        }
    }

    fn deliver(&self, msg: Message) {
        match self.ctx.queues().get_queue(msg.recipient()) {
            Some(queue) => {
                debug!("delivering message {} into queue {}", msg.id(), queue.name());
                queue.enqueue(msg);
            }
            None => {
                error!(
                    "message {} addressed to unknown queue {}, dropping it",
                    msg.id(),
                    msg.recipient()
                );
            }
        }
    }
}
