//! DAF Core
//!
//! Core primitives for the DAF distributed task-messaging runtime:
//! - `Message` and the two wire codecs (plain and gzip-compressed)
//! - `MessageQueue`: a named FIFO mailbox with parked-receiver priority
//! - `Waiter`: the one-shot rendezvous behind blocking receive, local and
//!   remote (remove/return proxying)
//! - `Port` / `PortManager`: uniform send/receive handles over local and
//!   remote queues
//! - `QueueManager` and `NodeContext`: per-node registries replacing any
//!   global state, so several nodes can share one process
//!
//! Networking, task execution and lifecycle management live in
//! `daf-runtime`; this crate is the stable vocabulary they build on.

pub mod config;
pub mod context;
pub mod defs;
pub mod errors;
pub mod message;
pub mod outbound;
pub mod port;
pub mod queue;
pub mod queue_manager;
pub mod waiter;
pub mod wire;

pub use config::{ConfigError, RuntimeConfig};
pub use context::NodeContext;
pub use defs::{ApplicationDef, ClusterDef, NodeDef, QueueDef, TaskDef, ALL_NODES};
pub use errors::{CodecError, DafError, Result};
pub use message::{
    Message, MessageFactory, MessageKind, MessageValue, REMOVE_MSG, RETURN_MSG, RETURN_VALUE_KEY,
};
pub use outbound::{create_outbound_queue, OutboundReceiver, OutboundSender, TransportStats};
pub use port::{LocalPort, Port, PortManager, RemotePort};
pub use queue::{DequeueOutcome, MessageQueue};
pub use queue_manager::QueueManager;
pub use waiter::{NotifyOutcome, WaitHandle, Waiter};
pub use wire::MessageCodec;
