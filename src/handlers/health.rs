//! Health summary and Prometheus exposition.

use std::sync::Arc;

use axum::{Json, extract::State, response::IntoResponse};
use serde::Serialize;
use time::OffsetDateTime;

use crate::error::AppResult;
use crate::state::AppState;

/// Queue depth past which the service reports a warning.
const QUEUE_WARNING_THRESHOLD: u64 = 1000;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub queue_size: u64,
    pub tracked_states: usize,
    pub timestamp: i64,
}

/// GET /api/v0/health
pub async fn health_check(State(state): State<Arc<AppState>>) -> AppResult<Json<HealthResponse>> {
    let queue_size = state.queue.queue_size().await?;

    let status = if queue_size > QUEUE_WARNING_THRESHOLD {
        "warning"
    } else {
        "healthy"
    };

    Ok(Json(HealthResponse {
        status,
        queue_size,
        tracked_states: state.states.len(),
        timestamp: OffsetDateTime::now_utc().unix_timestamp(),
    }))
}

/// GET /api/v0/metrics
pub async fn metrics_text(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    state.metrics_handle.render()
}
