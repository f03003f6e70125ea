//! FullTrust host entry point
//!
//! Listens on the configured pipe until Ctrl+C, then releases every handle
//! the session still holds.

use anyhow::{Context, Result};
use clap::Parser;
use fulltrust_common::init_logging;
use fulltrust_host::{Dispatcher, HostConfig, PipeServer, PlatformBackend, SessionManager};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "fulltrust-host")]
#[command(about = "FullTrust host - launch, inject and resume processes on behalf of a sandboxed client")]
#[command(version)]
struct Args {
    /// Path to a TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Pipe name to listen on (overrides config)
    #[arg(long)]
    pipe_name: Option<String>,

    /// Timeout for the remote LoadLibraryW thread in milliseconds (overrides config)
    #[arg(long)]
    inject_timeout_ms: Option<u64>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn load_config(args: &Args) -> Result<HostConfig> {
    let mut config = match &args.config {
        Some(path) => HostConfig::from_file(path)
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => HostConfig::default(),
    };

    if let Some(name) = &args.pipe_name {
        config.pipe_name = name.clone();
    }
    if let Some(timeout) = args.inject_timeout_ms {
        config.inject_timeout_ms = timeout;
    }
    if args.verbose {
        config.logging.level = "debug".to_string();
    }

    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(&args)?;
    init_logging(&config.logging);

    info!(
        target: "fulltrust_host",
        version = fulltrust_host::VERSION,
        pipe = %config.pipe_name,
        inject_timeout_ms = config.inject_timeout_ms,
        "Starting FullTrust host"
    );

    let session = Arc::new(SessionManager::new(
        PlatformBackend::default(),
        config.inject_timeout(),
    ));
    let server = PipeServer::new(&config, Dispatcher::new(Arc::clone(&session)));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!(target: "fulltrust_host", "Shutdown requested");
                let _ = shutdown_tx.send(true);
            }
            // Dropping the sender leaves the server running.
            Err(e) => error!(target: "fulltrust_host", error = %e, "Failed to listen for Ctrl+C"),
        }
    });

    let outcome = server.run(shutdown_rx).await;
    session.cleanup();

    if let Err(e) = &outcome {
        error!(target: "fulltrust_host", error = %e, "Server failed");
    }
    outcome.context("FullTrust host failed")
}
