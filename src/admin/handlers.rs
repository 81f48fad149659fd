use axum::{extract::State, Json};
use serde::Serialize;

use crate::admin::AdminState;
use crate::config::RateLimitConfig;
use crate::security::rate_limit::AdmissionSnapshot;
use crate::telemetry::TelemetrySnapshot;

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub uptime_secs: u64,
}

#[derive(Serialize)]
pub struct AdmissionStatus {
    pub settings: RateLimitConfig,
    pub counts: AdmissionSnapshot,
}

pub async fn get_status(State(state): State<AdminState>) -> Json<SystemStatus> {
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: "operational",
        uptime_secs: state.started_at.elapsed().as_secs(),
    })
}

pub async fn get_admission(State(state): State<AdminState>) -> Json<AdmissionStatus> {
    Json(AdmissionStatus {
        settings: (*state.admission.settings()).clone(),
        counts: state.admission.stats().snapshot(),
    })
}

pub async fn get_telemetry(State(state): State<AdminState>) -> Json<TelemetrySnapshot> {
    Json(state.telemetry.snapshot())
}
