//! Admin API.
//!
//! Served on its own listener and guarded by a bearer key. Exposes the
//! live rate limit settings and counters of the admission controller and
//! the telemetry emitter.

pub mod auth;
pub mod handlers;

use std::sync::Arc;
use std::time::Instant;

use axum::{middleware, routing::get, Router};
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use crate::security::rate_limit::AdmissionController;
use crate::telemetry::TelemetryStats;

use self::auth::admin_auth_middleware;
use self::handlers::{get_admission, get_status, get_telemetry};

/// State shared by admin handlers.
#[derive(Clone)]
pub struct AdminState {
    pub admission: Arc<AdmissionController>,
    pub telemetry: Arc<TelemetryStats>,
    pub api_key: Arc<str>,
    pub started_at: Instant,
}

impl AdminState {
    pub fn new(admission: Arc<AdmissionController>, telemetry: Arc<TelemetryStats>, api_key: &str) -> Self {
        Self {
            admission,
            telemetry,
            api_key: Arc::from(api_key),
            started_at: Instant::now(),
        }
    }
}

pub fn setup_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/admission", get(get_admission))
        .route("/admin/telemetry", get(get_telemetry))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware))
        .with_state(state)
}

/// Serve the admin API until `shutdown` fires.
pub async fn serve_admin(
    listener: TcpListener,
    state: AdminState,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<(), std::io::Error> {
    tracing::info!(address = %listener.local_addr()?, "Admin API listening");
    axum::serve(listener, setup_admin_router(state))
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RateLimitConfig;
    use crate::store::InMemoryCounterStore;
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use tower::ServiceExt;

    fn state() -> AdminState {
        let admission = Arc::new(AdmissionController::new(
            Arc::new(InMemoryCounterStore::new()),
            RateLimitConfig::default(),
        ));
        AdminState::new(admission, Arc::new(TelemetryStats::default()), "admin-key")
    }

    fn get(path: &str, key: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().uri(path);
        if let Some(key) = key {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {key}"));
        }
        builder.body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_missing_key_rejected() {
        let response = setup_admin_router(state())
            .oneshot(get("/admin/status", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_wrong_key_rejected() {
        let response = setup_admin_router(state())
            .oneshot(get("/admin/telemetry", Some("guess")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_admission_reports_limits() {
        let response = setup_admin_router(state())
            .oneshot(get("/admin/admission", Some("admin-key")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["settings"]["limits"]["ip"], 100);
        assert_eq!(json["counts"]["denied"], 0);
    }
}
