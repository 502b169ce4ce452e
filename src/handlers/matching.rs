//! # Matchmaking Endpoints
//!
//! The search lifecycle as seen by the front-end: submit or cancel a
//! search, poll for the committed match id, and end an active match.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json,
    extract::{Query, State},
};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::{info, instrument, warn};
use validator::Validate;

use crate::error::{AppError, AppResult, MatchingError};
use crate::models::{MatchCriteria, MatchRequest, MatchStatus, SearchStatus, User, UserState, UserStatus};
use crate::services::metrics;
use crate::state::AppState;

#[derive(Debug, Deserialize, Validate)]
pub struct ToggleRequest {
    #[validate(range(min = 1))]
    pub user_id: i64,
    #[validate(length(min = 1, max = 100))]
    pub username: String,
    #[validate(length(min = 1, max = 20))]
    pub gender: String,
    pub criteria: MatchCriteria,
    #[validate(length(min = 1, max = 10))]
    pub lang_code: String,
}

#[derive(Debug, Serialize)]
pub struct ToggleResponse {
    pub status: &'static str,
    pub message: String,
}

/// Submits a search request, or cancels the ongoing one.
///
/// POST /api/v0/match/toggle
///
/// A user who is not currently searching is enqueued and a
/// `search_started` message is published; a user who is searching gets the
/// search canceled instead. A duplicate concurrent submit is `rejected`.
#[instrument(skip_all, fields(user_id = payload.user_id))]
pub async fn toggle_match(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ToggleRequest>,
) -> AppResult<Json<ToggleResponse>> {
    if payload.validate().is_err() {
        return Err(AppError::BadRequest("invalid request payload"));
    }
    payload.criteria.validate()?;

    let now = OffsetDateTime::now_utc();

    if state.queue.is_searching(payload.user_id).await? {
        state.queue.remove_from_queue(payload.user_id).await?;
        state
            .states
            .update_state(payload.user_id, UserStatus::Canceled);

        // The worker sees the cancel too, so any in-flight redelivery is
        // cleaned up and acked.
        let request = MatchRequest::new(
            payload.user_id,
            payload.username,
            payload.criteria,
            payload.gender,
            payload.lang_code,
            SearchStatus::SearchCanceled,
            now,
        );
        state
            .publisher
            .publish_match_request(&request, Duration::ZERO)
            .await?;

        metrics::record_status_change(Some(UserStatus::Waiting), UserStatus::Canceled);
        info!("Search canceled");

        return Ok(Json(ToggleResponse {
            status: "accepted",
            message: format!("Search canceled for user {}", payload.user_id),
        }));
    }

    let user = User {
        user_id: payload.user_id,
        username: payload.username.clone(),
        criteria: payload.criteria.clone(),
        gender: payload.gender.clone(),
        lang_code: payload.lang_code.clone(),
        created_at: now,
        status: UserStatus::Waiting,
    };

    match state.queue.add_to_queue(&user).await {
        Ok(()) => {}
        Err(MatchingError::UserAlreadyInSearch(user_id)) => {
            warn!("Duplicate search submission");
            return Ok(Json(ToggleResponse {
                status: "rejected",
                message: format!("User {user_id} already in search"),
            }));
        }
        Err(e) => return Err(e.into()),
    }

    state
        .states
        .save_state(UserState::new(payload.user_id, UserStatus::Waiting));

    let request = MatchRequest::new(
        payload.user_id,
        payload.username,
        payload.criteria,
        payload.gender,
        payload.lang_code,
        SearchStatus::SearchStarted,
        now,
    );
    state
        .publisher
        .publish_match_request(&request, Duration::ZERO)
        .await?;

    metrics::record_status_change(None, UserStatus::Waiting);
    info!("Search submitted");

    Ok(Json(ToggleResponse {
        status: "accepted",
        message: "Match request submitted successfully".to_string(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct CheckMatchParams {
    pub user_id: i64,
}

#[derive(Debug, Serialize)]
pub struct CheckMatchResponse {
    pub match_id: Option<String>,
    pub room_id: Option<String>,
}

/// Polls for a committed match.
///
/// GET /api/v0/check_match?user_id=
///
/// Returns `{match_id, room_id}` once a match has been committed and
/// announced, `{null, null}` otherwise.
pub async fn check_match(
    State(state): State<Arc<AppState>>,
    Query(params): Query<CheckMatchParams>,
) -> AppResult<Json<CheckMatchResponse>> {
    let Some(match_id) = state.queue.get_match_id(params.user_id).await? else {
        return Ok(Json(CheckMatchResponse {
            match_id: None,
            room_id: None,
        }));
    };

    let room_id = state
        .matches
        .get(&match_id)
        .await?
        .map(|matched| matched.room_id);

    Ok(Json(CheckMatchResponse {
        match_id: Some(match_id),
        room_id,
    }))
}

#[derive(Debug, Deserialize)]
pub struct CancelMatchParams {
    pub user_id: i64,
    #[serde(default)]
    pub is_aborted: bool,
}

#[derive(Debug, Serialize)]
pub struct CancelMatchResponse {
    pub status: &'static str,
    pub match_id: String,
}

/// Ends the user's active match.
///
/// GET /api/v0/cancel_match?user_id=&is_aborted=
///
/// The session status becomes `aborted` when `is_aborted` is set, `exited`
/// otherwise.
#[instrument(skip_all, fields(user_id = params.user_id))]
pub async fn cancel_match(
    State(state): State<Arc<AppState>>,
    Query(params): Query<CancelMatchParams>,
) -> AppResult<Json<CancelMatchResponse>> {
    let Some(active) = state.matches.find_active_by_user(params.user_id).await? else {
        return Err(AppError::NotFound("no active match for user"));
    };

    let new_status = if params.is_aborted {
        MatchStatus::Aborted
    } else {
        MatchStatus::Exited
    };

    let mut uow = state.uow_factory.begin().await?;
    let rows = uow.update_match_status(&active.match_id, new_status).await?;
    uow.commit().await?;

    if rows == 0 {
        // Someone else ended the session between read and write.
        return Err(AppError::NotFound("no active match for user"));
    }

    for user_id in [active.user1.user_id, active.user2.user_id] {
        state.states.delete_state(user_id);
    }

    info!(match_id = %active.match_id, status = new_status.as_str(), "Match ended");

    Ok(Json(CancelMatchResponse {
        status: "ok",
        match_id: active.match_id,
    }))
}
