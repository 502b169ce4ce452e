//! # Centralized Error Handling
//!
//! One error enum covers the whole worker. Domain failures (unknown user,
//! incompatible pair, bad criteria, duplicate search) are recoverable at
//! the use-case level and never dead-letter a request; infrastructure
//! failures (queue store, durable store, broker) propagate to the message
//! handler, which decides ack/nack through the circuit breaker.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

#[derive(Error, Debug)]
pub enum MatchingError {
    // Domain errors
    #[error("user {0} not found")]
    UserNotFound(i64),

    #[error("users {0} and {1} are not compatible")]
    IncompatibleUsers(i64, i64),

    #[error("invalid criteria: {0}")]
    InvalidCriteria(&'static str),

    #[error("user {0} is already in search")]
    UserAlreadyInSearch(i64),

    // Infrastructure errors
    #[error("queue store error")]
    Queue(#[from] redis::RedisError),

    #[error("database error")]
    Db(#[from] sqlx::Error),

    #[error("serialization error")]
    Serde(#[from] serde_json::Error),

    #[error("broker publish failed: {0}")]
    Broker(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("circuit breaker is open")]
    CircuitOpen,
}

impl MatchingError {
    /// Domain errors are handled locally; everything else counts as an
    /// infrastructure failure for the circuit breaker.
    pub fn is_domain(&self) -> bool {
        matches!(
            self,
            MatchingError::UserNotFound(_)
                | MatchingError::IncompatibleUsers(_, _)
                | MatchingError::InvalidCriteria(_)
                | MatchingError::UserAlreadyInSearch(_)
        )
    }

    /// Label used by the error counter metric.
    pub fn metric_label(&self) -> &'static str {
        match self {
            MatchingError::UserNotFound(_) => "user_not_found",
            MatchingError::IncompatibleUsers(_, _) => "incompatible_users",
            MatchingError::InvalidCriteria(_) => "invalid_criteria",
            MatchingError::UserAlreadyInSearch(_) => "already_in_search",
            MatchingError::Queue(_) => "queue_store",
            MatchingError::Db(_) => "database",
            MatchingError::Serde(_) => "serialization",
            MatchingError::Broker(_) => "broker",
            MatchingError::Internal(_) => "internal",
            MatchingError::CircuitOpen => "circuit_open",
        }
    }
}

/// HTTP-facing error wrapper for the thin API surface.
#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Matching(#[from] MatchingError),

    #[error("not found: {0}")]
    NotFound(&'static str),

    #[error("bad request: {0}")]
    BadRequest(&'static str),
}

impl From<sqlx::Error> for AppError {
    fn from(e: sqlx::Error) -> Self {
        AppError::Matching(MatchingError::Db(e))
    }
}

impl From<redis::RedisError> for AppError {
    fn from(e: redis::RedisError) -> Self {
        AppError::Matching(MatchingError::Queue(e))
    }
}

#[derive(Serialize)]
struct ErrorBody {
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::Matching(e) if e.is_domain() => {
                (StatusCode::BAD_REQUEST, e.to_string())
            }
            AppError::Matching(e) => {
                // Log detailed infrastructure errors for internal tracking
                error!(?e, "Infrastructure error in HTTP handler");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, (*msg).to_string()),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, (*msg).to_string()),
        };

        let body = Json(ErrorBody { message });
        (status, body).into_response()
    }
}

/// Convenience Result type alias that uses AppError as the error type.
pub type AppResult<T> = Result<T, AppError>;
