//! DAF CLI - entry point for the `daf` binary

use clap::Parser;
use tracing::error;

use daf_cli::{Cli, CommandDispatcher};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    if let Err(e) = CommandDispatcher::execute(cli).await {
        error!("{}", e);
        std::process::exit(1);
    }
}

/// Setup logging based on verbosity level
fn setup_logging(verbose: bool) {
    let log_level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .init();
}
