//! Event bus producers.
//!
//! # Responsibilities
//! - Define the publish contract used by the telemetry publisher
//! - Produce to Kafka through its REST proxy
//! - Keep events in memory for local runs and tests
//!
//! # Design Decisions
//! - Events are handed over by value; nothing is shared afterwards
//! - The partition key is the request id
//! - No retries here: failures are counted by the caller and dropped

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::telemetry::event::RequestEvent;

/// Errors producing an event.
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    /// The bus could not be reached.
    #[error("event bus transport error: {0}")]
    Transport(String),

    /// The bus answered with a non-success status.
    #[error("event bus rejected publish with status {0}")]
    Rejected(u16),

    /// The hand-off queue was full.
    #[error("telemetry queue full")]
    QueueFull,

    /// The publisher task is gone.
    #[error("telemetry publisher closed")]
    Closed,
}

impl PublishError {
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Transport(_) => "transport",
            Self::Rejected(_) => "rejected",
            Self::QueueFull => "queue_full",
            Self::Closed => "closed",
        }
    }
}

/// Append-only, partitioned event stream.
#[async_trait]
pub trait EventBus: Send + Sync {
    async fn publish(
        &self,
        topic: &str,
        partition_key: &str,
        event: RequestEvent,
    ) -> Result<(), PublishError>;
}

/// Kafka REST proxy (v2 JSON embedded format) producer.
#[derive(Debug, Clone)]
pub struct KafkaRestEventBus {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Serialize)]
struct ProduceRequest<'a> {
    records: [ProduceRecord<'a>; 1],
}

#[derive(Serialize)]
struct ProduceRecord<'a> {
    key: &'a str,
    value: RequestEvent,
}

const KAFKA_JSON_V2: &str = "application/vnd.kafka.json.v2+json";

impl KafkaRestEventBus {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, PublishError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PublishError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl EventBus for KafkaRestEventBus {
    async fn publish(
        &self,
        topic: &str,
        partition_key: &str,
        event: RequestEvent,
    ) -> Result<(), PublishError> {
        let body = serde_json::to_vec(&ProduceRequest {
            records: [ProduceRecord {
                key: partition_key,
                value: event,
            }],
        })
        .map_err(|e| PublishError::Transport(e.to_string()))?;

        let response = self
            .client
            .post(format!("{}/topics/{}", self.base_url, topic))
            .header(reqwest::header::CONTENT_TYPE, KAFKA_JSON_V2)
            .body(body)
            .send()
            .await
            .map_err(|e| PublishError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(PublishError::Rejected(status.as_u16()))
        }
    }
}

/// An event as recorded by `MemoryEventBus`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedEvent {
    pub topic: String,
    pub partition_key: String,
    pub event: RequestEvent,
}

/// Events retained per topic by `MemoryEventBus::new`.
pub const DEFAULT_MEMORY_BUS_CAPACITY: usize = 10_000;

/// Keeps the most recent published events, grouped by topic. Once a topic
/// holds `capacity` events the oldest is dropped for each new one.
#[derive(Debug)]
pub struct MemoryEventBus {
    topics: DashMap<String, VecDeque<PublishedEvent>>,
    capacity: usize,
    published: AtomicUsize,
    notify: Notify,
}

impl MemoryEventBus {
    pub fn new() -> Arc<Self> {
        Self::with_capacity(DEFAULT_MEMORY_BUS_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            topics: DashMap::new(),
            capacity: capacity.max(1),
            published: AtomicUsize::new(0),
            notify: Notify::new(),
        })
    }

    /// Retained events for `topic`, oldest first.
    pub fn events(&self, topic: &str) -> Vec<PublishedEvent> {
        self.topics
            .get(topic)
            .map(|events| events.value().iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of events ever published, evicted ones included.
    pub fn total(&self) -> usize {
        self.published.load(Ordering::Acquire)
    }

    /// Wait until at least `count` events have been published.
    pub async fn wait_for(&self, count: usize, within: Duration) -> bool {
        let deadline = Instant::now() + within;
        loop {
            let notified = self.notify.notified();
            if self.total() >= count {
                return true;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.total() >= count;
            }
        }
    }
}

#[async_trait]
impl EventBus for MemoryEventBus {
    async fn publish(
        &self,
        topic: &str,
        partition_key: &str,
        event: RequestEvent,
    ) -> Result<(), PublishError> {
        {
            let mut events = self.topics.entry(topic.to_string()).or_default();
            if events.len() == self.capacity {
                events.pop_front();
            }
            events.push_back(PublishedEvent {
                topic: topic.to_string(),
                partition_key: partition_key.to_string(),
                event,
            });
        }
        self.published.fetch_add(1, Ordering::AcqRel);
        self.notify.notify_waiters();
        Ok(())
    }
}
