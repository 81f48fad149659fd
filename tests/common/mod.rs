//! Shared utilities for integration testing.

#![allow(dead_code)]

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use api_gateway::config::{GatewayConfig, RateLimitConfig};
use api_gateway::http::{GatewayPipeline, HttpServer, HttpUpstream};
use api_gateway::lifecycle::Shutdown;
use api_gateway::security::{AdmissionController, IdentityResolver, StaticTokenValidator};
use api_gateway::store::CounterStore;
use api_gateway::telemetry::{MemoryEventBus, TelemetryEmitter};

/// Start a mock backend answering every request with `status` and `body`.
pub async fn start_mock_backend(status: u16, body: &'static str) -> SocketAddr {
    start_programmable_backend(move || async move { (status, body.to_string()) }).await
}

/// Start a programmable mock backend on an ephemeral port.
pub async fn start_programmable_backend<F, Fut>(f: F) -> SocketAddr
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = (u16, String)> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let f = Arc::new(f);

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let f = f.clone();
            tokio::spawn(async move {
                read_request_head(&mut socket).await;
                let (status, body) = f().await;
                let response = format!(
                    "HTTP/1.1 {} {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    reason(status),
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    addr
}

async fn read_request_head(socket: &mut tokio::net::TcpStream) {
    let mut buf = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];
    loop {
        match socket.read(&mut chunk).await {
            Ok(0) | Err(_) => return,
            Ok(n) => {
                buf.extend_from_slice(&chunk[..n]);
                if buf.windows(4).any(|w| w == b"\r\n\r\n") {
                    return;
                }
            }
        }
    }
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        404 => "Not Found",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "Unknown",
    }
}

/// A gateway running on an ephemeral port with an in-process event bus.
pub struct TestGateway {
    pub addr: SocketAddr,
    pub bus: Arc<MemoryEventBus>,
    pub admission: Arc<AdmissionController>,
    pub shutdown: Shutdown,
    pub config_updates: mpsc::UnboundedSender<GatewayConfig>,
}

impl TestGateway {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

/// Start a gateway in front of `backend`, counting against `store`.
pub async fn start_gateway(
    backend: SocketAddr,
    store: Arc<dyn CounterStore>,
    rate_limit: RateLimitConfig,
) -> TestGateway {
    let mut config = GatewayConfig::default();
    config.upstream.url = format!("http://{backend}");
    config.rate_limit = rate_limit;

    let bus = MemoryEventBus::new();
    let admission = Arc::new(AdmissionController::new(store, config.rate_limit.clone()));
    let identity = IdentityResolver::new(Arc::new(StaticTokenValidator::new(config.auth.tokens.clone())));
    let upstream = Arc::new(HttpUpstream::new(&config.upstream).unwrap());
    let (telemetry, publisher) =
        TelemetryEmitter::new(bus.clone(), config.event_bus.topics.clone(), config.event_bus.queue_capacity);
    tokio::spawn(publisher.run());

    let pipeline = Arc::new(
        GatewayPipeline::new(identity, admission.clone(), upstream, telemetry)
            .with_request_timeout(Duration::from_secs(config.timeouts.request_secs)),
    );
    let server = HttpServer::new(config, pipeline);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = Shutdown::new();
    let server_shutdown = shutdown.subscribe();
    let (config_tx, config_rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        let _ = server.run(listener, config_rx, server_shutdown).await;
    });

    TestGateway {
        addr,
        bus,
        admission,
        shutdown,
        config_updates: config_tx,
    }
}

pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .no_proxy()
        .timeout(Duration::from_secs(5))
        .build()
        .unwrap()
}
