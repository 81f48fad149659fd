//! Startup orchestration.
//!
//! # Responsibilities
//! - Build the counter store and event bus named by the config
//! - Wire identity, admission, upstream and telemetry into one pipeline
//! - Hand back the telemetry publisher for the caller to spawn
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Subsystems initialize in order, not concurrently
//! - Remote stores connect lazily, so startup never blocks on the network

use std::sync::Arc;
use std::time::Duration;

use crate::config::{CounterStoreBackend, EventBusBackend, GatewayConfig};
use crate::http::pipeline::GatewayPipeline;
use crate::http::upstream::{HttpUpstream, UpstreamError};
use crate::security::identity::{IdentityResolver, StaticTokenValidator};
use crate::security::rate_limit::AdmissionController;
use crate::store::{CounterStore, CounterStoreError, InMemoryCounterStore, RedisCounterStore};
use crate::telemetry::{
    EventBus, EventPublisher, KafkaRestEventBus, MemoryEventBus, PublishError, TelemetryEmitter,
    TelemetryStats,
};

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("counter store: {0}")]
    CounterStore(#[from] CounterStoreError),
    #[error("event bus: {0}")]
    EventBus(#[from] PublishError),
    #[error("upstream: {0}")]
    Upstream(#[from] UpstreamError),
}

/// Everything the binary needs to serve traffic.
pub struct Gateway {
    pub pipeline: Arc<GatewayPipeline>,
    pub admission: Arc<AdmissionController>,
    pub telemetry_stats: Arc<TelemetryStats>,
    /// Must be spawned; drains once the pipeline is dropped.
    pub publisher: EventPublisher,
}

/// Build the gateway's subsystems from configuration.
pub fn bootstrap(config: &GatewayConfig) -> Result<Gateway, StartupError> {
    let store: Arc<dyn CounterStore> = match config.counter_store.backend {
        CounterStoreBackend::Memory => {
            tracing::warn!("Using in-memory counter store; limits are per instance");
            Arc::new(InMemoryCounterStore::new())
        }
        CounterStoreBackend::Redis => Arc::new(RedisCounterStore::new(&config.counter_store.redis_url)?),
    };

    let bus: Arc<dyn EventBus> = match config.event_bus.backend {
        EventBusBackend::Memory => {
            tracing::warn!(
                capacity_per_topic = crate::telemetry::bus::DEFAULT_MEMORY_BUS_CAPACITY,
                "Using in-memory event bus; telemetry stays in process"
            );
            MemoryEventBus::new()
        }
        EventBusBackend::KafkaRest => Arc::new(KafkaRestEventBus::new(
            &config.event_bus.url,
            Duration::from_millis(config.event_bus.timeout_ms),
        )?),
    };

    let admission = Arc::new(AdmissionController::new(store, config.rate_limit.clone()));
    let identity = IdentityResolver::new(Arc::new(StaticTokenValidator::new(config.auth.tokens.clone())));
    let upstream = Arc::new(HttpUpstream::new(&config.upstream)?);

    let (telemetry, publisher) = TelemetryEmitter::new(
        bus,
        config.event_bus.topics.clone(),
        config.event_bus.queue_capacity,
    );
    let telemetry_stats = telemetry.stats();

    let pipeline = Arc::new(
        GatewayPipeline::new(identity, admission.clone(), upstream, telemetry)
            .with_request_timeout(Duration::from_secs(config.timeouts.request_secs)),
    );

    tracing::info!(
        counter_store = ?config.counter_store.backend,
        event_bus = ?config.event_bus.backend,
        upstream = %config.upstream.url,
        rate_limit_enabled = config.rate_limit.enabled,
        "Gateway pipeline assembled"
    );

    Ok(Gateway {
        pipeline,
        admission,
        telemetry_stats,
        publisher,
    })
}
