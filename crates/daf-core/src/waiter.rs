//! Rendezvous primitive behind blocking receive
//!
//! A `Waiter` is a one-slot handoff parked in a queue's waiter line. Local
//! waiters complete a receiver parked on this node; remote waiters stand in
//! for a requester on another node and answer it with a `RETURN_MSG` instead
//! of waking anything here. Notification consumes the waiter, so a second
//! notify of the same slot is unrepresentable; the reply-slot equivalent on
//! the port side fails fast with `DafError::DanglingReply`.

use std::time::Duration;

use tokio::sync::oneshot;

use crate::errors::{DafError, Result};
use crate::message::Message;
use crate::outbound::OutboundSender;

// ----------------------------------------------------------------------------
// Waiter
// ----------------------------------------------------------------------------

/// One-shot rendezvous slot, local or remote
#[derive(Debug)]
pub enum Waiter {
    /// Completes a receiver parked on this node
    Local(oneshot::Sender<Message>),
    /// Stands in for a remote dequeue request; notify answers the requester
    Remote {
        request: Message,
        outbound: OutboundSender,
    },
}

/// What happened to the message handed to a waiter
#[derive(Debug)]
pub enum NotifyOutcome {
    /// The message reached its receiver (or was queued toward it)
    Delivered,
    /// The local receiver is gone; the message is handed back so the caller
    /// can try the next waiter or buffer it
    Abandoned(Message),
}

impl Waiter {
    /// Create a local waiter and the handle its receiver blocks on
    pub fn local() -> (Self, WaitHandle) {
        let (tx, rx) = oneshot::channel();
        (Waiter::Local(tx), WaitHandle { rx })
    }

    /// Create a remote waiter wrapping the original dequeue request
    pub fn remote(request: Message, outbound: OutboundSender) -> Self {
        Waiter::Remote { request, outbound }
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, Waiter::Remote { .. })
    }

    /// Hand a message to this waiter, consuming it
    ///
    /// For a remote waiter the message is wrapped in a `RETURN_MSG` addressed
    /// back to the requester and pushed onto the outbound queue; loss on a
    /// full queue follows the outbound drop policy.
    pub fn notify_with_message(self, msg: Message) -> NotifyOutcome {
        match self {
            Waiter::Local(tx) => match tx.send(msg) {
                Ok(()) => NotifyOutcome::Delivered,
                Err(msg) => NotifyOutcome::Abandoned(msg),
            },
            Waiter::Remote { request, outbound } => {
                let reply = Message::return_reply(&request, msg);
                outbound.send_or_drop(reply);
                NotifyOutcome::Delivered
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Wait Handle
// ----------------------------------------------------------------------------

/// Receiver half of a local rendezvous
#[derive(Debug)]
pub struct WaitHandle {
    rx: oneshot::Receiver<Message>,
}

impl WaitHandle {
    /// Suspend until a message is handed over
    ///
    /// Unbounded: a waiter parked on a queue that never receives traffic
    /// stays parked. Errs only if the queue holding the waiter is destroyed.
    pub async fn wait_on_message(self) -> Result<Message> {
        self.rx.await.map_err(|_| DafError::WaiterAbandoned)
    }

    /// Suspend until a message is handed over or the deadline passes
    ///
    /// Returns `Ok(None)` on expiry. The waiter left parked in the queue
    /// becomes dead; the queue skips it on the next enqueue.
    pub async fn wait_timeout(self, wait: Duration) -> Result<Option<Message>> {
        match tokio::time::timeout(wait, self.rx).await {
            Ok(Ok(msg)) => Ok(Some(msg)),
            Ok(Err(_)) => Err(DafError::WaiterAbandoned),
            Err(_) => Ok(None),
        }
    }
}
