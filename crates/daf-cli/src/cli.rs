//! Command-line interface definitions and parsing

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run one cluster node until it is told to stop
    Run {
        /// Cluster topology file (TOML)
        #[arg(short, long)]
        cluster: PathBuf,

        /// Name of the node to run, as it appears in the topology
        #[arg(short, long)]
        node: String,
    },
    /// Send an admin command to the cluster's nodes
    Admin {
        /// Cluster topology file (TOML)
        #[arg(short, long)]
        cluster: PathBuf,

        /// Address only this node instead of every node
        #[arg(short, long)]
        node: Option<String>,

        #[command(subcommand)]
        command: AdminCommands,
    },
}

#[derive(Subcommand)]
pub enum AdminCommands {
    /// Start the cluster-level queues and tasks
    Startcluster,
    /// Start an application on the addressed nodes
    Startapplication {
        /// Application definition file (TOML)
        #[arg(short, long)]
        app: PathBuf,
    },
    /// Stop an application on the addressed nodes
    Stopapplication {
        /// Application definition file (TOML)
        #[arg(short, long)]
        app: PathBuf,
    },
    /// List the applications running on the addressed nodes
    Listapplications,
    /// Shut the addressed nodes down
    Stopnode,
}
