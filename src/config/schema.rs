//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Root configuration for the gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener configuration (bind address, TLS).
    pub listener: ListenerConfig,

    /// The backend every admitted request is forwarded to.
    pub upstream: UpstreamConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Credential validation settings.
    pub auth: AuthConfig,

    /// Admission control (rate limiting) configuration.
    pub rate_limit: RateLimitConfig,

    /// Shared counter store backing the rate limiter.
    pub counter_store: CounterStoreConfig,

    /// Telemetry event bus settings.
    pub event_bus: EventBusConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    pub admin: AdminConfig,

    pub security: SecurityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Optional TLS configuration.
    pub tls: Option<TlsConfig>,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            tls: None,
        }
    }
}

/// TLS configuration for the listener.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TlsConfig {
    /// Path to certificate file (PEM).
    pub cert_path: String,

    /// Path to private key file (PEM).
    pub key_path: String,
}

/// Upstream (router) configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Base URL of the backend, e.g. "http://127.0.0.1:8081".
    pub url: String,

    /// Per-request upstream timeout in milliseconds.
    pub timeout_ms: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:8081".to_string(),
            timeout_ms: 10_000,
        }
    }
}

/// Timeout configuration for the inbound side.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Request timeout (total time for request/response) in seconds.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self { request_secs: 30 }
    }
}

/// Credential validation configuration.
///
/// The auth backend is modelled as a static table mapping bearer tokens to
/// subject identifiers. Empty by default: every bearer token is rejected
/// and callers are limited as anonymous until tokens are configured.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Bearer token -> subject id.
    pub tokens: HashMap<String, String>,
}

/// Rate limiting configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Enable rate limiting. When disabled every request is admitted without
    /// touching the counter store.
    pub enabled: bool,

    /// Fixed window length in milliseconds.
    pub window_ms: u64,

    /// Upper bound for one counter store round trip in milliseconds.
    pub store_timeout_ms: u64,

    /// Per-dimension limits.
    pub limits: DimensionLimits,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            window_ms: 60_000,
            store_timeout_ms: 50,
            limits: DimensionLimits::default(),
        }
    }
}

/// Maximum requests per window for each dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct DimensionLimits {
    pub ip: u64,
    pub user: u64,
    pub api_key: u64,
    pub path: u64,
    pub method: u64,
}

impl Default for DimensionLimits {
    fn default() -> Self {
        Self {
            ip: 100,
            user: 500,
            api_key: 1000,
            path: 1000,
            method: 2000,
        }
    }
}

/// Which counter store implementation to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CounterStoreBackend {
    /// Process-local counters. Only correct for a single gateway instance.
    Memory,
    /// Shared Redis counters.
    Redis,
}

/// Counter store configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CounterStoreConfig {
    pub backend: CounterStoreBackend,

    /// Redis connection URL, used when `backend = "redis"`.
    pub redis_url: String,
}

impl Default for CounterStoreConfig {
    fn default() -> Self {
        Self {
            backend: CounterStoreBackend::Redis,
            redis_url: "redis://127.0.0.1:6379".to_string(),
        }
    }
}

/// Which event bus implementation to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventBusBackend {
    /// Keep events in memory (local runs, tests).
    Memory,
    /// Produce through a Kafka REST proxy.
    KafkaRest,
}

/// Event bus configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EventBusConfig {
    pub backend: EventBusBackend,

    /// Base URL of the Kafka REST proxy.
    pub url: String,

    /// Timeout for one publish call in milliseconds.
    pub timeout_ms: u64,

    /// Capacity of the hand-off queue between request path and publisher.
    pub queue_capacity: usize,

    pub topics: TopicConfig,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            backend: EventBusBackend::KafkaRest,
            url: "http://127.0.0.1:8082".to_string(),
            timeout_ms: 2_000,
            queue_capacity: 10_000,
            topics: TopicConfig::default(),
        }
    }
}

/// Topic names per event type.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct TopicConfig {
    pub requests: String,
    pub blocked: String,
    pub alerts: String,
}

impl Default for TopicConfig {
    fn default() -> Self {
        Self {
            requests: "api-requests".to_string(),
            blocked: "api-blocked".to_string(),
            alerts: "security-alerts".to_string(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable admin API.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,

    /// Admin API bind address.
    pub bind_address: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            // WARNING: This is a placeholder! Change this in production.
            api_key: "CHANGE_ME_IN_PRODUCTION".to_string(),
            bind_address: "127.0.0.1:8091".to_string(),
        }
    }
}

/// Security hardening configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Maximum body size in bytes.
    pub max_body_size: usize,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            max_body_size: 2 * 1024 * 1024, // 2MB
        }
    }
}
