//! DAF CLI library
//!
//! Components of the `daf` command-line tool: argument parsing, topology
//! and application file loading, and the command handlers that either run
//! a cluster node or address running nodes over the admin protocol.

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;

pub use cli::{AdminCommands, Cli, Commands};
pub use commands::CommandDispatcher;
pub use config::{load_application, ClusterFile};
pub use error::{CliError, Result};
