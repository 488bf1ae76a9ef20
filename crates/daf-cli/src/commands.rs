//! Command handlers for the DAF CLI

use std::io;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{timeout, Duration};
use tracing::info;

use daf_core::{ClusterDef, NodeDef};
use daf_runtime::{encode_application_def, NodeBuilder};

use crate::cli::{AdminCommands, Cli, Commands};
use crate::config::{load_application, ClusterFile};
use crate::error::{CliError, Result};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Command dispatcher for handling CLI commands
pub struct CommandDispatcher;

impl CommandDispatcher {
    /// Execute a CLI command
    pub async fn execute(cli: Cli) -> Result<()> {
        match cli.command {
            Commands::Run { cluster, node } => Self::handle_run_command(&cluster, &node).await,
            Commands::Admin {
                cluster,
                node,
                command,
            } => Self::handle_admin_command(&cluster, node.as_deref(), &command).await,
        }
    }

    /// Run one node until it is told to stop
    async fn handle_run_command(cluster_path: &std::path::Path, node: &str) -> Result<()> {
        let file = ClusterFile::load(cluster_path)?;
        let applications = file.load_applications()?;

        let mut builder = NodeBuilder::new(node)
            .with_cluster(file.cluster)
            .with_config(file.runtime)
            .with_builtin_tasks();
        for app in applications {
            info!("application {} available on this node", app.name);
            builder = builder.with_application(app);
        }

        let mut runtime = builder.build()?;
        let interrupted = tokio::select! {
            result = runtime.run() => {
                result?;
                false
            }
            _ = tokio::signal::ctrl_c() => true,
        };
        if interrupted {
            info!("interrupt received, shutting down");
            runtime.shutdown().await?;
        }
        Ok(())
    }

    /// Send one admin command to the selected nodes and print the replies
    async fn handle_admin_command(
        cluster_path: &std::path::Path,
        node: Option<&str>,
        command: &AdminCommands,
    ) -> Result<()> {
        let file = ClusterFile::load(cluster_path)?;
        let payload = admin_payload(command)?;
        let targets = select_targets(&file.cluster, node)?;

        for target in targets {
            match send_command(&target.admin_addr(), &payload).await {
                Ok(reply) => {
                    println!("{}:", target.name);
                    for line in reply.lines() {
                        println!("  {}", line);
                    }
                }
                Err(e) => println!("{}: unreachable ({})", target.name, e),
            }
        }
        Ok(())
    }
}

/// The admin-protocol lines for one command
fn admin_payload(command: &AdminCommands) -> Result<String> {
    Ok(match command {
        AdminCommands::Startcluster => "startcluster\n".to_string(),
        AdminCommands::Startapplication { app } => {
            let def = load_application(app)?;
            format!("startapplication\n{}\n", encode_application_def(&def)?)
        }
        AdminCommands::Stopapplication { app } => {
            let def = load_application(app)?;
            format!("stopapplication\n{}\n", encode_application_def(&def)?)
        }
        AdminCommands::Listapplications => "listapplications\n".to_string(),
        AdminCommands::Stopnode => "stopnode\n".to_string(),
    })
}

/// The nodes a command addresses: one by name, or the whole cluster
fn select_targets<'a>(cluster: &'a ClusterDef, node: Option<&str>) -> Result<Vec<&'a NodeDef>> {
    match node {
        Some(name) => match cluster.node(name) {
            Some(def) => Ok(vec![def]),
            None => Err(CliError::Config(format!(
                "node {} is not in the topology",
                name
            ))),
        },
        None => Ok(cluster.nodes.iter().collect()),
    }
}

/// One admin exchange: connect, send the lines, read the reply to EOF
async fn send_command(addr: &str, payload: &str) -> io::Result<String> {
    let mut stream = timeout(CONNECT_TIMEOUT, TcpStream::connect(addr))
        .await
        .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "connect timed out"))??;
    stream.write_all(payload.as_bytes()).await?;
    let mut reply = String::new();
    stream.read_to_string(&mut reply).await?;
    Ok(reply)
}
