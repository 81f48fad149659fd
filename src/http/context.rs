//! Per-request pipeline context.
//!
//! A `RequestContext` is created when a request enters the pipeline, is
//! mutated by each stage in order and is consumed by telemetry once the
//! request completes.

use std::net::IpAddr;
use std::time::{Duration, Instant};

use axum::http::StatusCode;
use uuid::Uuid;

/// Status synthesized by the gateway when admission is denied.
pub const RATE_LIMITED: StatusCode = StatusCode::TOO_MANY_REQUESTS;

/// Correlation header set on delegated requests and on every response.
pub const X_REQUEST_ID: &str = "x-request-id";

/// Status recorded when the client goes away before the response is known.
pub const CLIENT_CLOSED_REQUEST: u16 = 499;

/// Caller identity established by the identity resolver.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Identity {
    /// Verified subject from the auth backend.
    pub user_id: Option<String>,
    /// Pre-shared key, recorded verbatim.
    pub api_key: Option<String>,
}

impl Identity {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn is_anonymous(&self) -> bool {
        self.user_id.is_none() && self.api_key.is_none()
    }
}

/// Outcome of admission control.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionResult {
    Undecided,
    Allowed,
    Denied,
}

/// Where a request is in the pipeline.
///
/// ```text
/// Created → IdentityResolved → AdmissionChecked → Delegated      → Completed
///                                               ↘ ShortCircuited ↗
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Created,
    IdentityResolved,
    AdmissionChecked,
    Delegated,
    ShortCircuited,
    Completed,
}

/// State carried through the pipeline for one request.
#[derive(Debug)]
pub struct RequestContext {
    request_id: Uuid,
    client_ip: IpAddr,
    path: String,
    method: String,
    identity: Option<Identity>,
    start_time: Instant,
    admission: AdmissionResult,
    final_status: Option<u16>,
    state: PipelineState,
}

impl RequestContext {
    /// Create a context at pipeline entry.
    pub fn new(client_ip: IpAddr, method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            client_ip,
            path: path.into(),
            method: method.into(),
            identity: None,
            start_time: Instant::now(),
            admission: AdmissionResult::Undecided,
            final_status: None,
            state: PipelineState::Created,
        }
    }

    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    pub fn client_ip(&self) -> IpAddr {
        self.client_ip
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    /// Identity if resolved; `None` before the identity stage ran.
    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    pub fn user_id(&self) -> Option<&str> {
        self.identity.as_ref().and_then(|i| i.user_id.as_deref())
    }

    pub fn api_key(&self) -> Option<&str> {
        self.identity.as_ref().and_then(|i| i.api_key.as_deref())
    }

    pub fn admission(&self) -> AdmissionResult {
        self.admission
    }

    pub fn final_status(&self) -> Option<u16> {
        self.final_status
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Latency reported in telemetry. Short-circuited requests report zero.
    pub fn latency_ms(&self) -> u64 {
        if self.admission == AdmissionResult::Denied {
            0
        } else {
            u64::try_from(self.elapsed().as_millis()).unwrap_or(u64::MAX)
        }
    }

    pub fn is_completed(&self) -> bool {
        self.state == PipelineState::Completed
    }

    /// Record the resolved identity. Written at most once.
    pub(crate) fn set_identity(&mut self, identity: Identity) {
        if self.state != PipelineState::Created {
            tracing::warn!(request_id = %self.request_id, state = ?self.state, "Identity already resolved");
            return;
        }
        self.identity = Some(identity);
        self.state = PipelineState::IdentityResolved;
    }

    /// Record the admission decision. Denial also fixes the final status.
    pub(crate) fn set_admission(&mut self, allowed: bool) {
        if self.admission != AdmissionResult::Undecided {
            tracing::warn!(request_id = %self.request_id, "Admission already decided");
            return;
        }
        if allowed {
            self.admission = AdmissionResult::Allowed;
        } else {
            self.admission = AdmissionResult::Denied;
            self.final_status = Some(RATE_LIMITED.as_u16());
        }
        self.state = PipelineState::AdmissionChecked;
    }

    /// Mark the hand-off to the router.
    pub(crate) fn mark_delegated(&mut self) {
        debug_assert_eq!(self.admission, AdmissionResult::Allowed);
        self.state = PipelineState::Delegated;
    }

    /// Mark the short-circuit path taken on denial.
    pub(crate) fn mark_short_circuited(&mut self) {
        debug_assert_eq!(self.admission, AdmissionResult::Denied);
        self.state = PipelineState::ShortCircuited;
    }

    /// Reach the terminal state, recording the final status unless the
    /// short-circuit already fixed it.
    pub(crate) fn complete(&mut self, status: u16) {
        if self.final_status.is_none() {
            self.final_status = Some(status);
        }
        self.state = PipelineState::Completed;
    }
}
