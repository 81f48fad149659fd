//! Telemetry event model.
//!
//! `RequestEvent` is the schema shared with every downstream consumer (audit
//! sink, metrics aggregator, security analytics). Field names are part of
//! that contract and must stay stable.

use std::net::IpAddr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::TopicConfig;
use crate::http::context::{RequestContext, RATE_LIMITED};

/// Event category, also used to pick the topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    Allowed,
    Blocked,
    /// Produced by the security-analytics consumer, never by the gateway.
    SecurityAlert,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Allowed => "ALLOWED",
            Self::Blocked => "BLOCKED",
            Self::SecurityAlert => "SECURITY_ALERT",
        }
    }

    /// Classify a final response status.
    pub fn for_status(status: u16) -> Self {
        if status == RATE_LIMITED.as_u16() {
            Self::Blocked
        } else {
            Self::Allowed
        }
    }

    pub fn topic<'a>(&self, topics: &'a TopicConfig) -> &'a str {
        match self {
            Self::Allowed => &topics.requests,
            Self::Blocked => &topics.blocked,
            Self::SecurityAlert => &topics.alerts,
        }
    }
}

/// One completed request, as seen by downstream consumers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestEvent {
    pub timestamp: DateTime<Utc>,
    pub request_id: Uuid,
    #[serde(rename = "ip")]
    pub client_ip: IpAddr,
    pub user_id: Option<String>,
    pub api_key: Option<String>,
    pub endpoint: String,
    pub method: String,
    pub status: u16,
    pub latency_ms: u64,
    #[serde(rename = "type")]
    pub event_type: EventType,
}

impl RequestEvent {
    /// Build the event for a completed context.
    ///
    /// Returns `None` while the final status is still unknown.
    pub fn from_context(ctx: &RequestContext) -> Option<Self> {
        let status = ctx.final_status()?;
        Some(Self {
            timestamp: Utc::now(),
            request_id: ctx.request_id(),
            client_ip: ctx.client_ip(),
            user_id: ctx.user_id().map(str::to_string),
            api_key: ctx.api_key().map(str::to_string),
            endpoint: ctx.path().to_string(),
            method: ctx.method().to_string(),
            status,
            latency_ms: ctx.latency_ms(),
            event_type: EventType::for_status(status),
        })
    }
}
