//! On-demand collection endpoint

use std::sync::Arc;

use axum::{Json, Router, extract::State, routing::post};

use super::ApiState;
use crate::descriptor::RawDescriptor;
use crate::report::Entry;

/// Collect a batch of descriptors against one agent and return every entry
async fn collect(
    State(state): State<Arc<ApiState>>,
    Json(descriptors): Json<Vec<RawDescriptor>>,
) -> Json<Vec<Entry>> {
    tracing::info!(descriptors = descriptors.len(), "collect requested");

    let entries = state.collector.collect(descriptors).await;

    let errors = entries.iter().filter(|e| e.is_error()).count();
    tracing::debug!(entries = entries.len(), errors, "collect finished");

    Json(entries)
}

/// Build collect router
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/collect", post(collect))
        .with_state(state)
}
