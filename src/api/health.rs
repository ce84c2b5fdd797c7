//! Health and diagnostics endpoints

use std::sync::Arc;

use axum::{Json, Router, extract::State, routing::get};
use serde::Serialize;

use super::ApiState;
use crate::dispatch::KeyStatus;

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

/// In-flight diagnostics response
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InFlightResponse {
    /// Whether a periodic dispatcher is attached
    pub dispatcher: bool,
    pub in_flight: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oldest_ms: Option<u64>,
    pub calls: Vec<KeyStatus>,
}

/// Liveness probe - is the service running?
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Calls the dispatcher has issued and their request/response counts
async fn in_flight(State(state): State<Arc<ApiState>>) -> Json<InFlightResponse> {
    let Some(set) = &state.in_flight else {
        return Json(InFlightResponse {
            dispatcher: false,
            in_flight: 0,
            oldest_ms: None,
            calls: Vec::new(),
        });
    };

    tracing::debug!(counts = %set.summarize_counts(), "in-flight diagnostics requested");

    Json(InFlightResponse {
        dispatcher: true,
        in_flight: set.len(),
        oldest_ms: set
            .oldest()
            .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX)),
        calls: set.snapshot(),
    })
}

/// Build health router (liveness only, no state needed)
pub fn router() -> Router {
    Router::new().route("/health", get(health))
}

/// Build diagnostics router
pub fn diagnostics_router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/api/inflight", get(in_flight))
        .with_state(state)
}
