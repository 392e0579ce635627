//! Loopcast Server - headless capture-to-renderer streaming server.
//!
//! Captures the configured audio devices and serves them over HTTP to DLNA
//! renderers and Shoutcast-capable players.

mod config;

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use loopcast_core::{bootstrap_services, start_server, AppState};
use tokio::signal;

use crate::config::ServerConfig;

/// How long in-flight streams get to wind down after shutdown starts.
const SERVER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Loopcast Server - live audio capture for network renderers.
#[derive(Parser, Debug)]
#[command(name = "loopcast-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (YAML).
    #[arg(short, long, value_name = "FILE", env = "LOOPCAST_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(short, long, default_value = "info", env = "LOOPCAST_LOG_LEVEL")]
    log_level: log::LevelFilter,

    /// Bind port (overrides config file).
    #[arg(short = 'p', long)]
    port: Option<u16>,

    /// Bind address (overrides config file).
    #[arg(short = 'b', long)]
    bind: Option<IpAddr>,

    /// Default streaming format, `lpcm` or `wav` (overrides config file).
    #[arg(short = 'f', long)]
    format: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    env_logger::Builder::new()
        .filter_level(args.log_level)
        .format_timestamp_millis()
        .init();

    log::info!("Loopcast Server v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let mut config =
        ServerConfig::load(args.config.as_deref()).context("Failed to load configuration")?;

    // Apply CLI overrides
    if let Some(port) = args.port {
        config.bind_port = port;
    }
    if let Some(addr) = args.bind {
        config.bind_address = addr;
    }
    if let Some(format) = args.format {
        config.streaming.default_format = format;
    }

    let devices = config.capture_devices();
    log::info!(
        "Configuration: bind={}:{}, format={}, devices=[{}]",
        config.bind_address,
        config.bind_port,
        config.streaming.default_format,
        devices
            .iter()
            .map(|d| d.id.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    );

    let core_config = config.to_core_config();
    let services =
        bootstrap_services(&core_config, devices).context("Failed to bootstrap services")?;

    log::info!("Services bootstrapped successfully");

    let app_state = AppState::new(&services);
    let addr = SocketAddr::new(config.bind_address, config.bind_port);
    let shutdown = services.cancel_token.clone();

    let mut server_handle = tokio::spawn(async move {
        if let Err(e) = start_server(app_state, addr, shutdown).await {
            log::error!("Server error: {}", e);
        }
    });

    // Wait for shutdown signal, or for the server to stop on its own
    tokio::select! {
        _ = shutdown_signal() => {
            log::info!("Shutdown signal received, cleaning up...");
        }
        _ = &mut server_handle => {
            log::warn!("Server stopped unexpectedly");
        }
    }

    // Stops capture, which ends every session and lets open responses finish
    services.shutdown().await;

    if !server_handle.is_finished()
        && tokio::time::timeout(SERVER_DRAIN_TIMEOUT, &mut server_handle)
            .await
            .is_err()
    {
        log::warn!("Server did not drain in time, aborting");
        server_handle.abort();
    }

    log::info!("Shutdown complete");
    Ok(())
}

/// Waits for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            log::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                log::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
