//! DAF Node Runtime
//!
//! This crate contains the runtime engine for one DAF cluster node, including:
//! - `NodeRuntime`: the orchestrator owning transport, managers and lifecycle
//! - The TCP transport: message listener, per-connection readers, and the
//!   single sender draining the outbound queue with reconnect
//! - Task execution: the `Task` SPI, the message-processing adapter, and the
//!   kind registry
//! - `ApplicationManager` / `TaskManager`: start and stop declaratively
//!   configured units of work
//! - The admin listener and command-file monitor control surfaces
//!
//! This is the "engine" of DAF - `daf-core` provides the message, queue and
//! port primitives it runs on.

pub mod admin;
pub mod builder;
pub mod builtin;
pub mod managers;
pub mod registry;
mod runtime;
pub mod tasks;

mod filemon;
mod transport;

pub use admin::{decode_application_def, encode_application_def};
pub use builder::NodeBuilder;
pub use builtin::{register_builtin_tasks, LogSink, LOG_SINK_KIND};
pub use managers::{ApplicationManager, TaskManager};
pub use registry::TaskRegistry;
pub use runtime::NodeRuntime;
pub use tasks::{
    MessageProcessingTask, MessageProcessor, Task, TaskContext, TaskHandle,
};

// Re-export core types for convenience
pub use daf_core::{
    ApplicationDef, ClusterDef, DafError, Message, MessageKind, MessageValue,
    NodeContext, NodeDef, Port, QueueDef, Result, RuntimeConfig, TaskDef,
    ALL_NODES,
};
