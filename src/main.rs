//! API gateway request-admission service.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client Request
//!     ──────▶ http::server ──▶ identity ──▶ admission ──┬──▶ upstream ──▶ Router/Backend
//!                                              │        │
//!                                              ▼        └──▶ 429 short-circuit
//!                                        counter store
//!                                        (Redis / memory)
//!
//!     every completed request ──▶ telemetry emitter ──▶ queue ──▶ publisher ──▶ event bus
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use api_gateway::admin::{serve_admin, AdminState};
use api_gateway::config::{load_config, watcher::ConfigWatcher, GatewayConfig};
use api_gateway::http::HttpServer;
use api_gateway::lifecycle::{bootstrap, Shutdown};
use api_gateway::net::load_tls_config;
use api_gateway::observability::{logging, metrics};

/// Deadline for flushing queued telemetry after the listeners stop.
const TELEMETRY_DRAIN_SECS: u64 = 5;

#[derive(Parser)]
#[command(name = "api-gateway")]
#[command(about = "Request-admission gateway: identity, rate limiting and telemetry", long_about = None)]
struct Args {
    /// Path to the TOML configuration file. Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Reload rate limit settings when the config file changes.
    #[arg(short, long)]
    watch: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => GatewayConfig::default(),
    };

    logging::init_logging(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "api-gateway starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        upstream = %config.upstream.url,
        window_ms = config.rate_limit.window_ms,
        request_timeout_secs = config.timeouts.request_secs,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse::<SocketAddr>() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    let gateway = bootstrap(&config)?;
    let publisher = tokio::spawn(gateway.publisher.run());

    let shutdown = Shutdown::new();
    shutdown.trigger_on_signal();

    // Keep the watcher alive for the life of the server.
    let (_watcher, config_updates) = match (&args.config, args.watch) {
        (Some(path), true) => {
            let (watcher, updates) = ConfigWatcher::new(path, config.clone());
            (Some(watcher.run()?), updates)
        }
        _ => {
            let (_tx, updates) = mpsc::unbounded_channel();
            (None, updates)
        }
    };

    let admin = if config.admin.enabled {
        let listener = TcpListener::bind(&config.admin.bind_address).await?;
        let state = AdminState::new(
            gateway.admission.clone(),
            gateway.telemetry_stats.clone(),
            &config.admin.api_key,
        );
        Some(tokio::spawn(serve_admin(listener, state, shutdown.subscribe())))
    } else {
        None
    };

    let server = HttpServer::new(config.clone(), gateway.pipeline);
    match &config.listener.tls {
        Some(tls) => {
            let addr: SocketAddr = config.listener.bind_address.parse()?;
            let rustls = load_tls_config(tls).await?;
            server.run_tls(addr, rustls, config_updates, shutdown.subscribe()).await?;
        }
        None => {
            let listener = TcpListener::bind(&config.listener.bind_address).await?;
            server.run(listener, config_updates, shutdown.subscribe()).await?;
        }
    }

    if let Some(admin) = admin {
        if let Ok(Err(e)) = admin.await {
            tracing::error!(error = %e, "Admin API failed");
        }
    }

    match tokio::time::timeout(Duration::from_secs(TELEMETRY_DRAIN_SECS), publisher).await {
        Ok(_) => tracing::info!("Telemetry flushed"),
        Err(_) => tracing::warn!(
            stats = ?gateway.telemetry_stats.snapshot(),
            "Telemetry drain deadline exceeded, dropping queued events"
        ),
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
