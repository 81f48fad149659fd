//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum Router feeding every request into the pipeline
//! - Wire up middleware (body limit, tracing)
//! - Serve plain TCP or TLS with graceful shutdown
//! - Apply hot-reloaded rate limit settings

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::Request,
    response::Response,
    routing::any,
    Router,
};
use axum_server::tls_rustls::RustlsConfig;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tower_http::{limit::RequestBodyLimitLayer, trace::TraceLayer};

use crate::config::GatewayConfig;
use crate::http::pipeline::GatewayPipeline;

/// Grace period for in-flight TLS connections after shutdown is triggered.
const TLS_DRAIN_SECS: u64 = 10;

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<GatewayPipeline>,
}

/// HTTP front end of the gateway.
pub struct HttpServer {
    router: Router,
    config: GatewayConfig,
    pipeline: Arc<GatewayPipeline>,
}

impl HttpServer {
    pub fn new(config: GatewayConfig, pipeline: Arc<GatewayPipeline>) -> Self {
        let state = AppState {
            pipeline: pipeline.clone(),
        };
        let router = Self::build_router(&config, state);
        Self {
            router,
            config,
            pipeline,
        }
    }

    /// Build the Axum router with all middleware layers. The request
    /// deadline is enforced by the pipeline so telemetry sees the 408.
    fn build_router(config: &GatewayConfig, state: AppState) -> Router {
        Router::new()
            .route("/{*path}", any(gateway_handler))
            .route("/", any(gateway_handler))
            .with_state(state)
            .layer(RequestBodyLimitLayer::new(config.security.max_body_size))
            .layer(TraceLayer::new_for_http())
    }

    /// Serve plain HTTP on `listener` until `shutdown` fires.
    pub async fn run(
        self,
        listener: TcpListener,
        config_updates: mpsc::UnboundedReceiver<GatewayConfig>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let updates = self.spawn_config_updates(config_updates);
        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("HTTP server draining");
            })
            .await?;

        updates.abort();
        tracing::info!("HTTP server stopped");
        Ok(())
    }

    /// Serve HTTPS on `addr` until `shutdown` fires.
    pub async fn run_tls(
        self,
        addr: SocketAddr,
        tls: RustlsConfig,
        config_updates: mpsc::UnboundedReceiver<GatewayConfig>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        tracing::info!(address = %addr, "HTTPS server starting");

        let updates = self.spawn_config_updates(config_updates);
        let handle = axum_server::Handle::new();
        let drain = handle.clone();
        tokio::spawn(async move {
            let _ = shutdown.recv().await;
            tracing::info!("HTTPS server draining");
            drain.graceful_shutdown(Some(Duration::from_secs(TLS_DRAIN_SECS)));
        });

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        axum_server::bind_rustls(addr, tls).handle(handle).serve(app).await?;

        updates.abort();
        tracing::info!("HTTPS server stopped");
        Ok(())
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    fn spawn_config_updates(
        &self,
        mut config_updates: mpsc::UnboundedReceiver<GatewayConfig>,
    ) -> tokio::task::JoinHandle<()> {
        let pipeline = self.pipeline.clone();
        let mut current = self.config.clone();
        tokio::spawn(async move {
            while let Some(new_config) = config_updates.recv().await {
                let stale = restart_required(&current, &new_config);
                if !stale.is_empty() {
                    tracing::warn!(sections = ?stale, "Config sections changed that only apply after restart");
                }
                if new_config.rate_limit != current.rate_limit {
                    tracing::info!(
                        enabled = new_config.rate_limit.enabled,
                        window_ms = new_config.rate_limit.window_ms,
                        "Applying new rate limit settings"
                    );
                    pipeline.admission().update_settings(new_config.rate_limit.clone());
                }
                current = new_config;
            }
        })
    }
}

/// Sections that differ between `old` and `new` but are only read at startup.
fn restart_required(old: &GatewayConfig, new: &GatewayConfig) -> Vec<&'static str> {
    let mut sections = Vec::new();
    if old.listener.bind_address != new.listener.bind_address {
        sections.push("listener");
    }
    if old.upstream.url != new.upstream.url || old.upstream.timeout_ms != new.upstream.timeout_ms {
        sections.push("upstream");
    }
    if old.auth.tokens != new.auth.tokens {
        sections.push("auth");
    }
    if old.counter_store.backend != new.counter_store.backend
        || old.counter_store.redis_url != new.counter_store.redis_url
    {
        sections.push("counter_store");
    }
    if old.event_bus.url != new.event_bus.url || old.event_bus.backend != new.event_bus.backend {
        sections.push("event_bus");
    }
    sections
}

async fn gateway_handler(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request<Body>,
) -> Response {
    state.pipeline.handle(addr.ip(), request).await
}
