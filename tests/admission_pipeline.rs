//! End-to-end admission scenarios run through the pipeline in process.

use std::net::IpAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::{IntoResponse, Response};
use futures_util::future::join_all;

use api_gateway::config::{RateLimitConfig, TopicConfig};
use api_gateway::http::{GatewayPipeline, Upstream};
use api_gateway::security::{AdmissionController, IdentityResolver, StaticTokenValidator};
use api_gateway::store::{CounterStore, CounterStoreError, InMemoryCounterStore};
use api_gateway::telemetry::{EventType, MemoryEventBus, TelemetryEmitter};

const NOW_MS: u64 = 1_700_000_000_000;

/// Router stand-in that counts calls and answers with a fixed status.
struct CountingRouter {
    status: StatusCode,
    calls: AtomicUsize,
}

impl CountingRouter {
    fn new(status: StatusCode) -> Arc<Self> {
        Arc::new(Self {
            status,
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl Upstream for CountingRouter {
    async fn forward(&self, _request: Request<Body>) -> Response {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.status.into_response()
    }
}

struct UnreachableStore;

#[async_trait]
impl CounterStore for UnreachableStore {
    async fn check_and_increment(
        &self,
        _keys: &[String],
        _limits: &[u64],
        _window_ms: u64,
        _now_ms: u64,
    ) -> Result<bool, CounterStoreError> {
        Err(CounterStoreError::Connection("connection refused".into()))
    }
}

struct Harness {
    pipeline: Arc<GatewayPipeline>,
    bus: Arc<MemoryEventBus>,
    router: Arc<CountingRouter>,
}

fn harness(store: Arc<dyn CounterStore>, settings: RateLimitConfig, router: Arc<CountingRouter>) -> Harness {
    let admission = Arc::new(AdmissionController::new(store, settings).with_clock(|| NOW_MS));
    let bus = MemoryEventBus::new();
    let (telemetry, publisher) = TelemetryEmitter::new(bus.clone(), TopicConfig::default(), 1024);
    tokio::spawn(publisher.run());

    let mut tokens = std::collections::HashMap::new();
    tokens.insert("valid-token".to_string(), "user-123".to_string());
    let identity = IdentityResolver::new(Arc::new(StaticTokenValidator::new(tokens)));

    let pipeline = Arc::new(GatewayPipeline::new(identity, admission, router.clone(), telemetry));
    Harness { pipeline, bus, router }
}

fn request(method: &str, path: &str) -> axum::http::request::Builder {
    Request::builder().method(method).uri(path)
}

fn ip(s: &str) -> IpAddr {
    s.parse().unwrap()
}

#[tokio::test]
async fn test_hundred_and_first_request_is_blocked() {
    let store = Arc::new(InMemoryCounterStore::new());
    let h = harness(store.clone(), RateLimitConfig::default(), CountingRouter::new(StatusCode::OK));

    for _ in 0..100 {
        let response = h
            .pipeline
            .handle(ip("10.0.0.1"), request("GET", "/api/v1/resource").body(Body::empty()).unwrap())
            .await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    let response = h
        .pipeline
        .handle(ip("10.0.0.1"), request("GET", "/api/v1/resource").body(Body::empty()).unwrap())
        .await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(h.router.calls.load(Ordering::SeqCst), 100);

    assert!(h.bus.wait_for(101, Duration::from_secs(2)).await);
    let allowed = h.bus.events("api-requests");
    let blocked = h.bus.events("api-blocked");
    assert_eq!(allowed.len(), 100);
    assert_eq!(blocked.len(), 1);
    assert!(allowed.iter().all(|e| e.event.event_type == EventType::Allowed && e.event.status == 200));
    assert_eq!(blocked[0].event.event_type, EventType::Blocked);
    assert_eq!(blocked[0].event.status, 429);
    assert_eq!(blocked[0].event.latency_ms, 0);
    assert_eq!(blocked[0].event.client_ip, ip("10.0.0.1"));
    assert_eq!(blocked[0].event.endpoint, "/api/v1/resource");
    assert_eq!(blocked[0].event.method, "GET");
    assert_eq!(blocked[0].partition_key, blocked[0].event.request_id.to_string());

    // The denied request incremented nothing.
    assert_eq!(store.count("ratelimit:ip:10.0.0.1", 60_000, NOW_MS), 100);
    assert_eq!(store.count("ratelimit:path:/api/v1/resource", 60_000, NOW_MS), 100);
}

#[tokio::test]
async fn test_authenticated_request_touches_all_five_dimensions() {
    let store = Arc::new(InMemoryCounterStore::new());
    let h = harness(store.clone(), RateLimitConfig::default(), CountingRouter::new(StatusCode::CREATED));

    let response = h
        .pipeline
        .handle(
            ip("10.0.0.7"),
            request("POST", "/api/v1/orders")
                .header("authorization", "Bearer valid-token")
                .header("x-api-key", "key-abc")
                .body(Body::from("{}"))
                .unwrap(),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);

    for key in [
        "ratelimit:ip:10.0.0.7",
        "ratelimit:user:user-123",
        "ratelimit:apikey:key-abc",
        "ratelimit:path:/api/v1/orders",
        "ratelimit:method:POST",
    ] {
        assert_eq!(store.count(key, 60_000, NOW_MS), 1, "{key}");
    }

    assert!(h.bus.wait_for(1, Duration::from_secs(1)).await);
    let event = &h.bus.events("api-requests")[0].event;
    assert_eq!(event.user_id.as_deref(), Some("user-123"));
    assert_eq!(event.api_key.as_deref(), Some("key-abc"));
    assert_eq!(event.status, 201);
    assert_eq!(event.method, "POST");
    assert_eq!(event.endpoint, "/api/v1/orders");
}

#[tokio::test]
async fn test_anonymous_request_skips_identity_dimensions() {
    let store = Arc::new(InMemoryCounterStore::new());
    let h = harness(store.clone(), RateLimitConfig::default(), CountingRouter::new(StatusCode::OK));

    h.pipeline
        .handle(
            ip("10.0.0.8"),
            request("GET", "/public")
                .header("authorization", "Bearer forged")
                .body(Body::empty())
                .unwrap(),
        )
        .await;

    assert_eq!(store.len(), 3);
    assert!(store.contains("ratelimit:ip:10.0.0.8"));
    assert!(store.contains("ratelimit:path:/public"));
    assert!(store.contains("ratelimit:method:GET"));

    assert!(h.bus.wait_for(1, Duration::from_secs(1)).await);
    let event = &h.bus.events("api-requests")[0].event;
    assert!(event.user_id.is_none());
    assert!(event.api_key.is_none());
}

#[tokio::test]
async fn test_user_limit_blocks_across_ips() {
    let mut settings = RateLimitConfig::default();
    settings.limits.user = 2;
    let h = harness(
        Arc::new(InMemoryCounterStore::new()),
        settings,
        CountingRouter::new(StatusCode::OK),
    );

    let mut statuses = Vec::new();
    for last in 1..=3 {
        let response = h
            .pipeline
            .handle(
                ip(&format!("10.1.0.{last}")),
                request("GET", "/me")
                    .header("authorization", "Bearer valid-token")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await;
        statuses.push(response.status());
    }
    assert_eq!(statuses, vec![StatusCode::OK, StatusCode::OK, StatusCode::TOO_MANY_REQUESTS]);
}

#[tokio::test]
async fn test_unreachable_store_admits_everything() {
    let h = harness(
        Arc::new(UnreachableStore),
        RateLimitConfig::default(),
        CountingRouter::new(StatusCode::OK),
    );

    for _ in 0..150 {
        let response = h
            .pipeline
            .handle(ip("10.0.0.1"), request("GET", "/api/v1/resource").body(Body::empty()).unwrap())
            .await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    assert!(h.bus.wait_for(150, Duration::from_secs(2)).await);
    assert_eq!(h.bus.events("api-requests").len(), 150);
    assert!(h.bus.events("api-blocked").is_empty());
    assert_eq!(h.pipeline.admission().stats().snapshot().store_failures, 150);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_burst_admits_exactly_the_limit() {
    let h = harness(
        Arc::new(InMemoryCounterStore::new()),
        RateLimitConfig::default(),
        CountingRouter::new(StatusCode::OK),
    );

    let tasks = (0..250).map(|_| {
        let pipeline = h.pipeline.clone();
        tokio::spawn(async move {
            pipeline
                .handle(ip("10.9.9.9"), request("GET", "/burst").body(Body::empty()).unwrap())
                .await
                .status()
        })
    });
    let statuses: Vec<StatusCode> = join_all(tasks).await.into_iter().map(|r| r.unwrap()).collect();

    let ok = statuses.iter().filter(|s| **s == StatusCode::OK).count();
    let limited = statuses.iter().filter(|s| **s == StatusCode::TOO_MANY_REQUESTS).count();
    assert_eq!(ok, 100);
    assert_eq!(limited, 150);
    assert_eq!(h.router.calls.load(Ordering::SeqCst), 100);

    assert!(h.bus.wait_for(250, Duration::from_secs(2)).await);
    assert_eq!(h.bus.events("api-blocked").len(), 150);
}

#[tokio::test]
async fn test_router_error_status_is_reported_as_allowed() {
    let h = harness(
        Arc::new(InMemoryCounterStore::new()),
        RateLimitConfig::default(),
        CountingRouter::new(StatusCode::SERVICE_UNAVAILABLE),
    );

    let response = h
        .pipeline
        .handle(ip("10.0.0.3"), request("DELETE", "/api/v1/thing").body(Body::empty()).unwrap())
        .await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    assert!(h.bus.wait_for(1, Duration::from_secs(1)).await);
    let event = &h.bus.events("api-requests")[0].event;
    assert_eq!(event.status, 503);
    assert_eq!(event.event_type, EventType::Allowed);
}
