//! The request-admission pipeline.
//!
//! Stages run in a fixed order chosen at construction:
//!
//! ```text
//! IdentityResolution → AdmissionControl → Delegate | ShortCircuit → TelemetryFinalization
//! ```
//!
//! Exactly one telemetry event is emitted per request. When the request
//! deadline elapses the pipeline answers 408 itself and records 408. If the
//! request future is dropped before completion (client disconnect) the
//! in-flight guard emits a best-effort event with status 499.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    http::{HeaderMap, HeaderValue, Request, StatusCode},
    response::{IntoResponse, Response},
};
use uuid::Uuid;

use crate::http::context::{RequestContext, CLIENT_CLOSED_REQUEST, RATE_LIMITED, X_REQUEST_ID};
use crate::http::upstream::Upstream;
use crate::security::identity::IdentityResolver;
use crate::security::rate_limit::{Admission, AdmissionController};
use crate::telemetry::TelemetryEmitter;

/// Owns a request's context until telemetry has been emitted.
struct InFlight {
    ctx: RequestContext,
    telemetry: TelemetryEmitter,
    emitted: bool,
}

impl InFlight {
    fn new(ctx: RequestContext, telemetry: TelemetryEmitter) -> Self {
        Self {
            ctx,
            telemetry,
            emitted: false,
        }
    }

    /// Reach `Completed` and emit the request's single event.
    fn finish(mut self, status: u16) {
        self.ctx.complete(status);
        self.telemetry.emit(&self.ctx);
        self.emitted = true;
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        if self.emitted {
            return;
        }
        tracing::debug!(
            request_id = %self.ctx.request_id(),
            state = ?self.ctx.state(),
            "Request dropped before completion"
        );
        self.ctx.complete(CLIENT_CLOSED_REQUEST);
        self.telemetry.emit(&self.ctx);
    }
}

/// Identity → admission → delegation → telemetry, for every request.
pub struct GatewayPipeline {
    identity: IdentityResolver,
    admission: Arc<AdmissionController>,
    upstream: Arc<dyn Upstream>,
    telemetry: TelemetryEmitter,
    request_timeout: Option<Duration>,
}

impl GatewayPipeline {
    pub fn new(
        identity: IdentityResolver,
        admission: Arc<AdmissionController>,
        upstream: Arc<dyn Upstream>,
        telemetry: TelemetryEmitter,
    ) -> Self {
        Self {
            identity,
            admission,
            upstream,
            telemetry,
            request_timeout: None,
        }
    }

    /// Bound every request, answering 408 once `timeout` elapses.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    pub fn admission(&self) -> &Arc<AdmissionController> {
        &self.admission
    }

    pub fn telemetry(&self) -> &TelemetryEmitter {
        &self.telemetry
    }

    /// Run one request through every stage.
    pub async fn handle(&self, client_ip: IpAddr, request: Request<Body>) -> Response {
        let ctx = RequestContext::new(client_ip, request.method().as_str(), request.uri().path());
        let mut flight = InFlight::new(ctx, self.telemetry.clone());
        let request_id = flight.ctx.request_id();

        let stages = self.run_stages(&mut flight.ctx, request);
        let mut response = match self.request_timeout {
            Some(timeout) => match tokio::time::timeout(timeout, stages).await {
                Ok(response) => response,
                Err(_) => {
                    tracing::warn!(request_id = %request_id, timeout = ?timeout, "Request deadline exceeded");
                    StatusCode::REQUEST_TIMEOUT.into_response()
                }
            },
            None => stages.await,
        };

        flight.finish(response.status().as_u16());
        set_request_id(response.headers_mut(), request_id);
        response
    }

    async fn run_stages(&self, ctx: &mut RequestContext, mut request: Request<Body>) -> Response {
        let identity = self.identity.resolve(request.headers());
        ctx.set_identity(identity);

        match self.admission.check_admission(ctx).await {
            Admission::Denied => {
                ctx.mark_short_circuited();
                (RATE_LIMITED, "Rate limit exceeded").into_response()
            }
            Admission::Allowed => {
                ctx.mark_delegated();
                set_request_id(request.headers_mut(), ctx.request_id());
                tracing::debug!(
                    request_id = %ctx.request_id(),
                    method = %request.method(),
                    path = %request.uri().path(),
                    "Delegating request"
                );
                self.upstream.forward(request).await
            }
        }
    }
}

impl std::fmt::Debug for GatewayPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayPipeline")
            .field("admission", &self.admission)
            .field("telemetry", &self.telemetry)
            .field("request_timeout", &self.request_timeout)
            .finish_non_exhaustive()
    }
}

fn set_request_id(headers: &mut HeaderMap, request_id: Uuid) {
    if let Ok(value) = HeaderValue::from_str(&request_id.to_string()) {
        headers.insert(X_REQUEST_ID, value);
    }
}
