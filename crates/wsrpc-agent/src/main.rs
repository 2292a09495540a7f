//! # wsrpc-agent
//!
//! Demo server binary: loads settings, starts telemetry and serves the
//! demo modules over WebSocket until ctrl-c.

#![deny(unsafe_code)]

mod modules;

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::Parser;
use wsrpc_server::loader;
use wsrpc_server::metrics::install_recorder;
use wsrpc_server::telemetry::init_telemetry;
use wsrpc_server::{RpcServer, Settings};

/// WebSocket RPC demo server.
#[derive(Parser, Debug)]
#[command(name = "wsrpc-agent", about = "WebSocket RPC demo server")]
struct Cli {
    /// Settings file (defaults to `~/.wsrpc/settings.json`).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,
}

/// Resolve settings: file, then environment, then command-line flags.
fn load_settings(cli: &Cli) -> Result<Settings> {
    let path = match &cli.config {
        Some(path) => {
            if !path.exists() {
                bail!("settings file not found: {}", path.display());
            }
            path.clone()
        }
        None => loader::settings_path(),
    };

    let mut settings = loader::load_settings_from_path(&path)
        .with_context(|| format!("Failed to load settings from {}", path.display()))?;

    if let Some(host) = &cli.host {
        settings.server.host.clone_from(host);
    }
    if let Some(port) = cli.port {
        settings.server.port = port;
    }
    settings.validate().context("Invalid settings")?;
    Ok(settings)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = load_settings(&cli)?;

    init_telemetry(&settings.logging).context("Failed to initialize logging")?;
    let metrics = install_recorder().context("Failed to install metrics recorder")?;

    let server = RpcServer::new(settings.server, modules::expose_demo).with_metrics(metrics);
    let (addr, handle) = server.listen().await.context("Failed to bind server")?;

    tracing::info!("wsrpc agent listening on ws://{addr}/ws");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutting down...");
    let drained = server
        .shutdown()
        .graceful_shutdown(handle, server.tracker(), None)
        .await;
    if !drained {
        tracing::warn!("forced shutdown with connections still open");
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
