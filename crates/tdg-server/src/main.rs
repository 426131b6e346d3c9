//! tdg-server: Trading Data Gateway server.
//!
//! Accepts WebSocket clients, serves historical market data commands
//! against the upstream REST API, and optionally gives every client a
//! dedicated upstream streaming session whose events are relayed back
//! as `["bfx", ...]` frames.

mod bt;
mod cmds;
mod config;
mod dispatch;
mod proxy;
mod registry;
mod server;
mod transport;
mod upstream;

use clap::Parser;
use config::ServerConfig;
use server::DataServer;
use std::path::PathBuf;
use tracing::{error, info};

/// tdg-server — Trading Data Gateway server
#[derive(Parser, Debug)]
#[command(name = "tdg-server", version, about = "Trading Data Gateway server")]
struct Cli {
    /// Listen port
    #[arg(short, long)]
    port: Option<u16>,

    /// Config file path
    #[arg(long, default_value = "~/.tdg/config.toml")]
    config: String,

    /// Upstream WebSocket endpoint
    #[arg(long)]
    ws_url: Option<String>,

    /// Upstream REST endpoint
    #[arg(long)]
    rest_url: Option<String>,

    /// Normalize upstream payloads before delivery
    #[arg(long)]
    transform: bool,

    /// Give every client a dedicated upstream streaming session
    #[arg(long)]
    proxy: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing
    use tracing_subscriber::EnvFilter;
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "starting tdg-server"
    );

    // Load server config (file + environment + CLI overrides)
    let config_path = PathBuf::from(&cli.config);
    let server_config = match ServerConfig::load(
        Some(&config_path),
        cli.port,
        cli.ws_url.as_deref(),
        cli.rest_url.as_deref(),
        cli.transform,
        cli.proxy,
    ) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(error = %e, "failed to load config");
            std::process::exit(1);
        }
    };

    // Bind, then run until a shutdown signal fires the close handle.
    let data_server = match DataServer::bind(server_config).await {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "failed to bind server");
            std::process::exit(1);
        }
    };

    let close = data_server.close_handle();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("received shutdown signal");
        close.close();
    });

    if let Err(e) = data_server.run().await {
        error!(error = %e, "server error");
        std::process::exit(1);
    }

    info!("tdg-server stopped");
}

/// Wait for SIGTERM or SIGINT (Ctrl+C).
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}
