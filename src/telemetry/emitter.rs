//! Telemetry emission.
//!
//! The request path never awaits the event bus. `TelemetryEmitter::emit`
//! builds the event and pushes it onto a bounded queue; `EventPublisher`
//! drains the queue in a background task and talks to the bus.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;

use crate::config::TopicConfig;
use crate::http::context::RequestContext;
use crate::observability::metrics;
use crate::telemetry::bus::{EventBus, PublishError};
use crate::telemetry::event::RequestEvent;

struct Envelope {
    topic: String,
    event: RequestEvent,
}

/// Running totals, exposed on the admin API.
#[derive(Debug, Default)]
pub struct TelemetryStats {
    emitted: AtomicU64,
    dropped: AtomicU64,
    published: AtomicU64,
    publish_failures: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TelemetrySnapshot {
    /// Events handed to the queue.
    pub emitted: u64,
    /// Events that never reached the queue.
    pub dropped: u64,
    pub published: u64,
    pub publish_failures: u64,
}

impl TelemetryStats {
    pub fn snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            emitted: self.emitted.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            published: self.published.load(Ordering::Relaxed),
            publish_failures: self.publish_failures.load(Ordering::Relaxed),
        }
    }
}

/// Final pipeline stage: turns a completed context into a queued event.
#[derive(Clone)]
pub struct TelemetryEmitter {
    tx: mpsc::Sender<Envelope>,
    topics: Arc<TopicConfig>,
    stats: Arc<TelemetryStats>,
}

impl TelemetryEmitter {
    /// Create an emitter and the publisher that drains it.
    pub fn new(bus: Arc<dyn EventBus>, topics: TopicConfig, queue_capacity: usize) -> (Self, EventPublisher) {
        let (tx, rx) = mpsc::channel(queue_capacity.max(1));
        let stats = Arc::new(TelemetryStats::default());
        let emitter = Self {
            tx,
            topics: Arc::new(topics),
            stats: stats.clone(),
        };
        let publisher = EventPublisher { rx, bus, stats };
        (emitter, publisher)
    }

    pub fn stats(&self) -> Arc<TelemetryStats> {
        self.stats.clone()
    }

    /// Queue the event for a completed request. Never blocks.
    pub fn emit(&self, ctx: &RequestContext) {
        let Some(event) = RequestEvent::from_context(ctx) else {
            tracing::warn!(request_id = %ctx.request_id(), "Telemetry requested before final status was set");
            return;
        };

        metrics::record_request(&event.method, event.status, event.event_type.as_str(), ctx.elapsed());

        let topic = event.event_type.topic(&self.topics).to_string();
        let request_id = event.request_id;

        match self.tx.try_send(Envelope { topic, event }) {
            Ok(()) => {
                self.stats.emitted.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                let (reason, envelope) = match e {
                    mpsc::error::TrySendError::Full(env) => (PublishError::QueueFull, env),
                    mpsc::error::TrySendError::Closed(env) => (PublishError::Closed, env),
                };
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                metrics::record_event_publish_failure(&envelope.topic, reason.reason());
                tracing::warn!(request_id = %request_id, topic = %envelope.topic, error = %reason, "Dropping telemetry event");
            }
        }
    }
}

impl std::fmt::Debug for TelemetryEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelemetryEmitter")
            .field("topics", &self.topics)
            .field("stats", &self.stats.snapshot())
            .finish()
    }
}

/// Background task that moves queued events onto the bus.
pub struct EventPublisher {
    rx: mpsc::Receiver<Envelope>,
    bus: Arc<dyn EventBus>,
    stats: Arc<TelemetryStats>,
}

impl EventPublisher {
    /// Publish until every emitter is dropped and the queue is drained.
    pub async fn run(mut self) {
        tracing::info!("Telemetry publisher started");

        while let Some(Envelope { topic, event }) = self.rx.recv().await {
            let partition_key = event.request_id.to_string();
            match self.bus.publish(&topic, &partition_key, event).await {
                Ok(()) => {
                    self.stats.published.fetch_add(1, Ordering::Relaxed);
                    metrics::record_event_published(&topic);
                }
                Err(e) => {
                    self.stats.publish_failures.fetch_add(1, Ordering::Relaxed);
                    metrics::record_event_publish_failure(&topic, e.reason());
                    tracing::error!(topic = %topic, request_id = %partition_key, error = %e, "Failed to publish telemetry event");
                }
            }
        }

        tracing::info!(stats = ?self.stats.snapshot(), "Telemetry publisher drained");
    }
}
