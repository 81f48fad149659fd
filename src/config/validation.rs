//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (limits > 0, window > 0)
//! - Validate addresses and URLs parse
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GatewayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use crate::config::schema::{CounterStoreBackend, EventBusBackend, GatewayConfig};

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

/// Check a parsed configuration for semantic errors.
pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    check_socket_addr(&mut errors, "listener.bind_address", &config.listener.bind_address);
    check_url(&mut errors, "upstream.url", &config.upstream.url, &["http"]);

    if config.upstream.timeout_ms == 0 {
        errors.push(ValidationError::new("upstream.timeout_ms", "must be greater than 0"));
    }
    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::new("timeouts.request_secs", "must be greater than 0"));
    }

    let rate_limit = &config.rate_limit;
    if rate_limit.window_ms == 0 {
        errors.push(ValidationError::new("rate_limit.window_ms", "must be greater than 0"));
    }
    if rate_limit.store_timeout_ms == 0 {
        errors.push(ValidationError::new("rate_limit.store_timeout_ms", "must be greater than 0"));
    }
    let limits = [
        ("rate_limit.limits.ip", rate_limit.limits.ip),
        ("rate_limit.limits.user", rate_limit.limits.user),
        ("rate_limit.limits.api_key", rate_limit.limits.api_key),
        ("rate_limit.limits.path", rate_limit.limits.path),
        ("rate_limit.limits.method", rate_limit.limits.method),
    ];
    for (field, limit) in limits {
        if limit == 0 {
            errors.push(ValidationError::new(field, "limit must be greater than 0"));
        }
    }

    if config.counter_store.backend == CounterStoreBackend::Redis {
        check_url(
            &mut errors,
            "counter_store.redis_url",
            &config.counter_store.redis_url,
            &["redis", "rediss"],
        );
    }

    let bus = &config.event_bus;
    if bus.backend == EventBusBackend::KafkaRest {
        check_url(&mut errors, "event_bus.url", &bus.url, &["http", "https"]);
    }
    if bus.queue_capacity == 0 {
        errors.push(ValidationError::new("event_bus.queue_capacity", "must be greater than 0"));
    }
    for (field, topic) in [
        ("event_bus.topics.requests", &bus.topics.requests),
        ("event_bus.topics.blocked", &bus.topics.blocked),
        ("event_bus.topics.alerts", &bus.topics.alerts),
    ] {
        if topic.trim().is_empty() {
            errors.push(ValidationError::new(field, "topic name must not be empty"));
        }
    }

    if config.observability.metrics_enabled {
        check_socket_addr(
            &mut errors,
            "observability.metrics_address",
            &config.observability.metrics_address,
        );
    }

    if config.admin.enabled {
        check_socket_addr(&mut errors, "admin.bind_address", &config.admin.bind_address);
        if config.admin.api_key.trim().is_empty() {
            errors.push(ValidationError::new("admin.api_key", "must not be empty when admin is enabled"));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_socket_addr(errors: &mut Vec<ValidationError>, field: &str, value: &str) {
    if let Err(e) = value.parse::<SocketAddr>() {
        errors.push(ValidationError::new(field, format!("invalid socket address '{}': {}", value, e)));
    }
}

fn check_url(errors: &mut Vec<ValidationError>, field: &str, value: &str, schemes: &[&str]) {
    match url::Url::parse(value) {
        Ok(parsed) if schemes.contains(&parsed.scheme()) => {}
        Ok(parsed) => errors.push(ValidationError::new(
            field,
            format!("unsupported scheme '{}', expected one of {:?}", parsed.scheme(), schemes),
        )),
        Err(e) => errors.push(ValidationError::new(field, format!("invalid URL '{}': {}", value, e))),
    }
}
