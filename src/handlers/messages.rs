//! Chat history endpoints, keyed by match room.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
};
use serde::Deserialize;
use time::OffsetDateTime;
use tracing::instrument;
use validator::Validate;

use crate::error::{AppError, AppResult};
use crate::models::ChatMessage;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct MessageHistoryParams {
    pub room_id: String,
}

/// GET /api/v0/messages?room_id=
pub async fn list_messages(
    State(state): State<Arc<AppState>>,
    Query(params): Query<MessageHistoryParams>,
) -> AppResult<Json<Vec<ChatMessage>>> {
    let messages = state.matches.list_messages(&params.room_id).await?;
    Ok(Json(messages))
}

#[derive(Debug, Deserialize, Validate)]
pub struct PostMessageRequest {
    #[validate(length(min = 1, max = 256))]
    pub room_id: String,
    #[validate(range(min = 1))]
    pub sender_id: i64,
    #[validate(length(min = 1, max = 4096))]
    pub content: String,
}

/// POST /api/v0/messages
#[instrument(skip_all, fields(sender_id = payload.sender_id))]
pub async fn post_message(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<PostMessageRequest>,
) -> AppResult<(StatusCode, Json<ChatMessage>)> {
    if payload.validate().is_err() {
        return Err(AppError::BadRequest("invalid message payload"));
    }

    let message = ChatMessage {
        room_id: payload.room_id,
        sender_id: payload.sender_id,
        content: payload.content,
        created_at: OffsetDateTime::now_utc(),
    };

    let mut uow = state.uow_factory.begin().await?;
    uow.add_message(&message).await?;
    uow.commit().await?;

    Ok((StatusCode::CREATED, Json(message)))
}
