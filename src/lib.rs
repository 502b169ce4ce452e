//! # Tandem - Conversation Partner Matchmaking Worker
//!
//! ## Modules
//!
//! - [`handlers`] - HTTP request handlers for the thin API surface
//! - [`models`] - domain entities, criteria, scoring and broker messages
//! - [`stores`] - queue store (Redis), durable match store (Postgres),
//!   in-process state store and the unit of work
//! - [`services`] - matchmaking use cases, broker transport, resilience
//!   primitives and metrics
//! - [`worker`] - broker consumer loop and the message handler

pub mod config;
pub mod error;
pub mod handlers;
pub mod models;
pub mod services;
pub mod state;
pub mod stores;
pub mod worker;

use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};

use crate::handlers::{
    cancel_match, check_match, health_check, list_messages, metrics_text, post_message,
    queue_status, toggle_match, user_queue_status,
};
use crate::state::AppState;

/// Creates the Axum router with all application routes and state.
///
/// The composition root in `main.rs` builds the [`AppState`]; this
/// function only wires routes. Background tasks (state-store sweep, broker
/// consumer) are spawned by the caller so tests can drive handlers without
/// them.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/v0/match/toggle", post(toggle_match))
        .route("/api/v0/check_match", get(check_match))
        .route("/api/v0/cancel_match", get(cancel_match))
        .route("/api/v0/queue/status", get(queue_status))
        .route("/api/v0/queue/{user_id}/status", get(user_queue_status))
        .route("/api/v0/messages", get(list_messages).post(post_message))
        .route("/api/v0/health", get(health_check))
        .route("/api/v0/metrics", get(metrics_text))
        .with_state(state)
}
