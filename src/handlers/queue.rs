//! Queue observability endpoints: overall size and per-user status.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
};
use serde::Serialize;

use crate::error::AppResult;
use crate::models::UserState;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct QueueStatusResponse {
    pub queue_size: u64,
}

/// GET /api/v0/queue/status
pub async fn queue_status(
    State(state): State<Arc<AppState>>,
) -> AppResult<Json<QueueStatusResponse>> {
    let queue_size = state.queue.queue_size().await?;
    Ok(Json(QueueStatusResponse { queue_size }))
}

#[derive(Debug, Serialize)]
pub struct UserQueueStatusResponse {
    pub user_id: i64,
    pub searching: bool,
    pub state: Option<UserState>,
}

/// GET /api/v0/queue/{user_id}/status
pub async fn user_queue_status(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<i64>,
) -> AppResult<Json<UserQueueStatusResponse>> {
    let searching = state.queue.is_searching(user_id).await?;
    let user_state = state.states.get_state(user_id);

    Ok(Json(UserQueueStatusResponse {
        user_id,
        searching,
        state: user_state,
    }))
}
