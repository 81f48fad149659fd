//! Multi-dimensional admission control.
//!
//! Every request is counted along several independent dimensions (client IP,
//! user, API key, path, method). The request is admitted only when all of
//! them are within their limits, decided in a single atomic round trip to
//! the counter store.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use arc_swap::ArcSwap;
use serde::Serialize;

use crate::config::{DimensionLimits, RateLimitConfig};
use crate::http::context::RequestContext;
use crate::observability::metrics;
use crate::store::{CounterStore, CounterStoreError};

/// A named axis of admission control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RateLimitDimension {
    Ip,
    User,
    ApiKey,
    Path,
    Method,
}

impl RateLimitDimension {
    /// Label used in counter keys.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Ip => "ip",
            Self::User => "user",
            Self::ApiKey => "apikey",
            Self::Path => "path",
            Self::Method => "method",
        }
    }

    /// Counter key for a dimension value, e.g. `ratelimit:ip:10.0.0.1`.
    pub fn counter_key(&self, value: &str) -> String {
        format!("ratelimit:{}:{}", self.label(), value)
    }

    pub fn limit(&self, limits: &DimensionLimits) -> u64 {
        match self {
            Self::Ip => limits.ip,
            Self::User => limits.user,
            Self::ApiKey => limits.api_key,
            Self::Path => limits.path,
            Self::Method => limits.method,
        }
    }
}

/// One dimension participating in a check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DimensionCheck {
    pub dimension: RateLimitDimension,
    pub key: String,
    pub limit: u64,
}

/// Build the active dimension set for a request.
///
/// `ip`, `path` and `method` are always active; `user` and `apikey` only when
/// the identity carries them.
pub fn dimension_checks(ctx: &RequestContext, limits: &DimensionLimits) -> Vec<DimensionCheck> {
    let ip = ctx.client_ip().to_string();
    let mut active: Vec<(RateLimitDimension, &str)> = vec![(RateLimitDimension::Ip, ip.as_str())];
    if let Some(user_id) = ctx.user_id() {
        active.push((RateLimitDimension::User, user_id));
    }
    if let Some(api_key) = ctx.api_key() {
        active.push((RateLimitDimension::ApiKey, api_key));
    }
    active.push((RateLimitDimension::Path, ctx.path()));
    active.push((RateLimitDimension::Method, ctx.method()));

    active
        .into_iter()
        .map(|(dimension, value)| DimensionCheck {
            dimension,
            key: dimension.counter_key(value),
            limit: dimension.limit(limits),
        })
        .collect()
}

/// Decision returned by the admission controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Allowed,
    Denied,
}

/// Running totals, exposed on the admin API.
#[derive(Debug, Default)]
pub struct AdmissionStats {
    allowed: AtomicU64,
    denied: AtomicU64,
    store_failures: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AdmissionSnapshot {
    pub allowed: u64,
    pub denied: u64,
    pub store_failures: u64,
}

impl AdmissionStats {
    pub fn snapshot(&self) -> AdmissionSnapshot {
        AdmissionSnapshot {
            allowed: self.allowed.load(Ordering::Relaxed),
            denied: self.denied.load(Ordering::Relaxed),
            store_failures: self.store_failures.load(Ordering::Relaxed),
        }
    }
}

type Clock = Arc<dyn Fn() -> u64 + Send + Sync>;

fn system_clock_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or_default()
}

/// Second pipeline stage: decides allow/deny against the counter store.
///
/// Fails open: when the store errors or misses its deadline the request is
/// admitted and the failure is logged and counted.
pub struct AdmissionController {
    store: Arc<dyn CounterStore>,
    settings: ArcSwap<RateLimitConfig>,
    stats: Arc<AdmissionStats>,
    clock: Clock,
}

impl AdmissionController {
    pub fn new(store: Arc<dyn CounterStore>, settings: RateLimitConfig) -> Self {
        Self {
            store,
            settings: ArcSwap::from_pointee(settings),
            stats: Arc::new(AdmissionStats::default()),
            clock: Arc::new(system_clock_ms),
        }
    }

    /// Replace the wall clock (milliseconds since the epoch).
    pub fn with_clock(mut self, clock: impl Fn() -> u64 + Send + Sync + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Swap in new limits; in-flight checks finish with the old ones.
    pub fn update_settings(&self, settings: RateLimitConfig) {
        tracing::info!(
            enabled = settings.enabled,
            window_ms = settings.window_ms,
            limits = ?settings.limits,
            "Rate limit settings updated"
        );
        self.settings.store(Arc::new(settings));
    }

    pub fn settings(&self) -> Arc<RateLimitConfig> {
        self.settings.load_full()
    }

    pub fn stats(&self) -> Arc<AdmissionStats> {
        self.stats.clone()
    }

    /// Decide admission and record it on the context.
    pub async fn check_admission(&self, ctx: &mut RequestContext) -> Admission {
        let settings = self.settings.load_full();

        let allowed = if settings.enabled {
            self.consult_store(ctx, &settings).await
        } else {
            true
        };

        ctx.set_admission(allowed);
        if allowed {
            self.stats.allowed.fetch_add(1, Ordering::Relaxed);
            metrics::record_admission("allowed");
            Admission::Allowed
        } else {
            self.stats.denied.fetch_add(1, Ordering::Relaxed);
            metrics::record_admission("denied");
            tracing::warn!(
                request_id = %ctx.request_id(),
                client_ip = %ctx.client_ip(),
                user_id = ?ctx.user_id(),
                path = %ctx.path(),
                method = %ctx.method(),
                "Rate limit exceeded"
            );
            Admission::Denied
        }
    }

    async fn consult_store(&self, ctx: &RequestContext, settings: &RateLimitConfig) -> bool {
        let checks = dimension_checks(ctx, &settings.limits);
        let (keys, limits): (Vec<String>, Vec<u64>) =
            checks.into_iter().map(|c| (c.key, c.limit)).unzip();
        let now_ms = (self.clock)();

        let deadline = Duration::from_millis(settings.store_timeout_ms);
        let result = tokio::time::timeout(
            deadline,
            self.store.check_and_increment(&keys, &limits, settings.window_ms, now_ms),
        )
        .await
        .unwrap_or(Err(CounterStoreError::Timeout(settings.store_timeout_ms)));

        match result {
            Ok(allowed) => allowed,
            Err(e) => {
                self.stats.store_failures.fetch_add(1, Ordering::Relaxed);
                metrics::record_counter_store_failure(e.reason());
                tracing::error!(
                    request_id = %ctx.request_id(),
                    error = %e,
                    "Counter store unavailable, admitting request"
                );
                true
            }
        }
    }
}

impl std::fmt::Debug for AdmissionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmissionController")
            .field("settings", &*self.settings.load_full())
            .field("stats", &self.stats.snapshot())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::context::Identity;
    use crate::store::InMemoryCounterStore;
    use async_trait::async_trait;

    struct FailingStore;

    #[async_trait]
    impl CounterStore for FailingStore {
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

    struct StalledStore;

    #[async_trait]
    impl CounterStore for StalledStore {
        async fn check_and_increment(
            &self,
            _keys: &[String],
            _limits: &[u64],
            _window_ms: u64,
            _now_ms: u64,
        ) -> Result<bool, CounterStoreError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(false)
        }
    }

    fn context(identity: Identity) -> RequestContext {
        let mut ctx = RequestContext::new("10.0.0.1".parse().unwrap(), "GET", "/api/v1/resource");
        ctx.set_identity(identity);
        ctx
    }

    #[test]
    fn test_anonymous_dimensions() {
        let ctx = context(Identity::anonymous());
        let checks = dimension_checks(&ctx, &DimensionLimits::default());
        let keys: Vec<&str> = checks.iter().map(|c| c.key.as_str()).collect();

        assert_eq!(
            keys,
            vec![
                "ratelimit:ip:10.0.0.1",
                "ratelimit:path:/api/v1/resource",
                "ratelimit:method:GET",
            ]
        );
        assert_eq!(checks[0].limit, 100);
        assert_eq!(checks[1].limit, 1000);
        assert_eq!(checks[2].limit, 2000);
    }

    #[test]
    fn test_authenticated_dimensions() {
        let ctx = context(Identity {
            user_id: Some("user-123".into()),
            api_key: Some("abc".into()),
        });
        let checks = dimension_checks(&ctx, &DimensionLimits::default());
        let dims: Vec<RateLimitDimension> = checks.iter().map(|c| c.dimension).collect();

        assert_eq!(
            dims,
            vec![
                RateLimitDimension::Ip,
                RateLimitDimension::User,
                RateLimitDimension::ApiKey,
                RateLimitDimension::Path,
                RateLimitDimension::Method,
            ]
        );
        assert_eq!(checks[1].key, "ratelimit:user:user-123");
        assert_eq!(checks[1].limit, 500);
        assert_eq!(checks[2].key, "ratelimit:apikey:abc");
        assert_eq!(checks[2].limit, 1000);
    }

    #[tokio::test]
    async fn test_denial_sets_rate_limit_status() {
        let mut settings = RateLimitConfig::default();
        settings.limits.ip = 1;
        let controller =
            AdmissionController::new(Arc::new(InMemoryCounterStore::new()), settings).with_clock(|| 1_000);

        let mut first = context(Identity::anonymous());
        assert_eq!(controller.check_admission(&mut first).await, Admission::Allowed);
        assert_eq!(first.final_status(), None);

        let mut second = context(Identity::anonymous());
        assert_eq!(controller.check_admission(&mut second).await, Admission::Denied);
        assert_eq!(second.final_status(), Some(429));

        let stats = controller.stats().snapshot();
        assert_eq!((stats.allowed, stats.denied, stats.store_failures), (1, 1, 0));
    }

    #[tokio::test]
    async fn test_store_error_fails_open() {
        let controller = AdmissionController::new(Arc::new(FailingStore), RateLimitConfig::default());
        let mut ctx = context(Identity::anonymous());

        assert_eq!(controller.check_admission(&mut ctx).await, Admission::Allowed);
        assert_eq!(controller.stats().snapshot().store_failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_store_timeout_fails_open() {
        let controller = AdmissionController::new(Arc::new(StalledStore), RateLimitConfig::default());
        let mut ctx = context(Identity::anonymous());

        assert_eq!(controller.check_admission(&mut ctx).await, Admission::Allowed);
        assert_eq!(controller.stats().snapshot().store_failures, 1);
    }

    #[tokio::test]
    async fn test_disabled_skips_store() {
        let store = Arc::new(InMemoryCounterStore::new());
        let settings = RateLimitConfig {
            enabled: false,
            ..RateLimitConfig::default()
        };
        let controller = AdmissionController::new(store.clone(), settings);
        let mut ctx = context(Identity::anonymous());

        assert_eq!(controller.check_admission(&mut ctx).await, Admission::Allowed);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_update_settings_applies_new_limits() {
        let store = Arc::new(InMemoryCounterStore::new());
        let controller =
            AdmissionController::new(store, RateLimitConfig::default()).with_clock(|| 5_000);

        let mut tight = RateLimitConfig::default();
        tight.limits.method = 1;
        controller.update_settings(tight);

        let mut first = context(Identity::anonymous());
        let mut second = context(Identity::anonymous());
        assert_eq!(controller.check_admission(&mut first).await, Admission::Allowed);
        assert_eq!(controller.check_admission(&mut second).await, Admission::Denied);
        assert_eq!(controller.settings().limits.method, 1);
    }
}
