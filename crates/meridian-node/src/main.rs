//! Meridian connector node, entry point.
//!
//! Starts the settlement node with configuration from a TOML file or defaults.

// Node internals expose more than the binary calls; tests use the rest.
#![allow(dead_code)]

mod api;
mod config;
mod node;
mod state;
mod storage;
mod transport;

use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use config::MeridianConfig;
use node::MeridianNode;

/// Meridian settlement node
#[derive(Parser, Debug)]
#[command(name = "meridian-node", version, about = "Meridian settlement node")]
struct Args {
    /// Path to the configuration file (TOML).
    #[arg(short, long, default_value = "meridian.toml")]
    config: PathBuf,

    /// Override the node id.
    #[arg(long)]
    node_id: Option<String>,

    /// Override the API port.
    #[arg(long)]
    api_port: Option<u16>,

    /// Override the data directory.
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Override the log level (trace, debug, info, warn, error).
    #[arg(long)]
    log_level: Option<String>,

    /// Emit JSON logs.
    #[arg(long)]
    json_logs: bool,

    /// Generate a default config file and exit.
    #[arg(long)]
    init: bool,
}

fn init_tracing(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Handle --init flag
    if args.init {
        init_tracing(args.log_level.as_deref().unwrap_or("info"), args.json_logs);
        let config = MeridianConfig::default();
        config.save(&args.config)?;
        tracing::info!(path = %args.config.display(), "wrote default config");
        return Ok(());
    }

    // Load configuration, then apply CLI overrides
    let mut config = MeridianConfig::load(&args.config)?;
    if let Some(node_id) = args.node_id {
        config.node.node_id = node_id;
    }
    if let Some(api_port) = args.api_port {
        config.api.port = api_port;
    }
    if let Some(ref data_dir) = args.data_dir {
        config.storage.data_dir = data_dir.clone();
    }
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }
    if args.json_logs {
        config.logging.format = "json".into();
    }

    init_tracing(&config.logging.level, config.logging.format == "json");
    tracing::info!("Meridian node v{}", env!("CARGO_PKG_VERSION"));

    // Create and start the node
    let mut node = MeridianNode::new(config)?;
    node.start().await?;

    // Set up graceful shutdown on SIGINT
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
        tracing::info!("received shutdown signal");
    };

    tokio::select! {
        result = node.run() => {
            if let Err(e) = result {
                tracing::error!(error = %e, "node exited");
            }
        }
        _ = shutdown => {
            tracing::info!("initiating graceful shutdown");
        }
    }

    node.shutdown().await?;
    tracing::info!("Meridian node exited cleanly");
    Ok(())
}
