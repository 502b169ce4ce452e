//! # Broker Consumer
//!
//! The message handler that fronts the process-request use case
//! (payload validation, per-user rate limiting, the circuit breaker, and
//! the ack/nack decision), plus the loop that pulls deliveries off the
//! Redis-backed request queue.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};

use crate::error::MatchingError;
use crate::models::MatchRequest;
use crate::services::metrics;
use crate::services::process_request::{ProcessOutcome, ProcessRequestService};
use crate::services::publisher::RedisBroker;
use crate::services::resilience::{CircuitBreaker, RateLimiter};

/// How long one `BRPOP` blocks before the loop re-checks shutdown.
const POLL_TIMEOUT: Duration = Duration::from_secs(1);

/// Redelivery delay applied when a delivery is negatively acknowledged.
const NACK_REDELIVERY_DELAY: Duration = Duration::from_secs(1);

/// Backoff ceiling when the broker itself is failing.
const MAX_BACKOFF_SECS: u64 = 30;

/// How often the consumer prunes stale rate-limiter windows.
const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(60);

/// Final word on a delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Consume the message.
    Ack,
    /// Redeliver the message after a short delay.
    Nack,
}

pub struct MatchRequestHandler {
    process: Arc<ProcessRequestService>,
    rate_limiter: RateLimiter,
    breaker: CircuitBreaker,
}

impl MatchRequestHandler {
    pub fn new(
        process: Arc<ProcessRequestService>,
        rate_limiter: RateLimiter,
        breaker: CircuitBreaker,
    ) -> Self {
        Self {
            process,
            rate_limiter,
            breaker,
        }
    }

    /// Drop rate-limiter windows that have fully aged out. Called
    /// periodically by the consumer loop so idle users do not accumulate.
    pub fn maintain(&self) {
        self.rate_limiter.cleanup();
    }

    /// Decide the fate of one raw delivery.
    ///
    /// Poison input, meaning anything that fails schema validation, is acked and
    /// dropped so it cannot wedge the queue. Rate-limited and
    /// circuit-open deliveries are nacked for redelivery.
    #[instrument(skip_all)]
    pub async fn handle_message(&self, raw: &str) -> Verdict {
        let value: Value = match serde_json::from_str(raw) {
            Ok(value) => value,
            Err(e) => {
                warn!(error = %e, "Dropping unparseable message");
                metrics::record_error("invalid_message");
                return Verdict::Ack;
            }
        };

        if !validate_payload(&value) {
            warn!("Dropping message with invalid schema");
            metrics::record_error("invalid_message");
            return Verdict::Ack;
        }

        let user_id = value
            .get("user_id")
            .and_then(Value::as_i64)
            .unwrap_or_default();
        info!(user_id, "Match request received");

        if !self.rate_limiter.is_allowed(user_id) {
            debug!(user_id, "Rate limited, redelivering");
            return Verdict::Nack;
        }

        let request: MatchRequest = match serde_json::from_value(value) {
            Ok(request) => request,
            Err(e) => {
                warn!(error = %e, user_id, "Dropping undecodable match request");
                metrics::record_error("invalid_message");
                return Verdict::Ack;
            }
        };

        if let Err(e) = request.criteria.validate() {
            warn!(error = %e, user_id, "Dropping request with invalid criteria");
            metrics::record_error("invalid_criteria");
            return Verdict::Ack;
        }

        if self.breaker.try_acquire().is_err() {
            warn!(user_id, "Circuit breaker open, rejecting without processing");
            metrics::record_error("circuit_open");
            return Verdict::Nack;
        }

        match self.process.execute(&request).await {
            Ok(ProcessOutcome::Handled) => {
                self.breaker.on_success();
                Verdict::Ack
            }
            Ok(ProcessOutcome::Failed) => {
                warn!(user_id, "Request processing failed, redelivering");
                self.breaker.on_failure();
                Verdict::Nack
            }
            Err(e) => {
                error!(error = %e, user_id, "Infrastructure error while processing");
                self.breaker.on_failure();
                Verdict::Nack
            }
        }
    }
}

/// Structural validation of an incoming payload, ahead of strict
/// deserialization: required fields present, criteria shaped correctly,
/// numeric fields numeric.
fn validate_payload(message: &Value) -> bool {
    let Some(obj) = message.as_object() else {
        return false;
    };

    const REQUIRED: [&str; 6] = [
        "user_id",
        "username",
        "gender",
        "criteria",
        "lang_code",
        "created_at",
    ];
    if REQUIRED.iter().any(|field| !obj.contains_key(*field)) {
        return false;
    }

    let Some(criteria) = obj.get("criteria").and_then(Value::as_object) else {
        return false;
    };

    const CRITERIA_FIELDS: [&str; 4] = ["language", "fluency", "topics", "dating"];
    if CRITERIA_FIELDS
        .iter()
        .any(|field| !criteria.contains_key(*field))
    {
        return false;
    }

    if obj.get("user_id").and_then(Value::as_i64).is_none() {
        return false;
    }
    if criteria.get("fluency").and_then(Value::as_u64).is_none() {
        return false;
    }
    if !criteria.get("dating").is_some_and(Value::is_boolean) {
        return false;
    }
    if !criteria.get("topics").is_some_and(Value::is_array) {
        return false;
    }

    true
}

/// Pull deliveries until shutdown. Nack is implemented as a short-delay
/// republish of the original payload; duplicates are harmless because the
/// state machine's liveness check skips users who are no longer searching.
pub async fn run_consumer(
    broker: RedisBroker,
    handler: Arc<MatchRequestHandler>,
    mut shutdown: watch::Receiver<bool>,
) {
    info!("Match request consumer started");
    let mut consecutive_errors: u32 = 0;
    let mut last_maintenance = std::time::Instant::now();

    loop {
        if *shutdown.borrow() {
            break;
        }

        if last_maintenance.elapsed() >= MAINTENANCE_INTERVAL {
            handler.maintain();
            last_maintenance = std::time::Instant::now();
        }

        let next = tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
                continue;
            }
            next = broker.next_message(POLL_TIMEOUT) => next,
        };

        match next {
            Ok(Some(payload)) => {
                consecutive_errors = 0;

                if handler.handle_message(&payload).await == Verdict::Nack
                    && let Err(e) = broker.requeue_raw(payload, NACK_REDELIVERY_DELAY).await
                {
                    error!(error = %e, "Failed to requeue nacked message");
                    metrics::record_error("requeue_failed");
                }
            }
            Ok(None) => {
                consecutive_errors = 0;
            }
            Err(MatchingError::Queue(e)) => {
                consecutive_errors += 1;
                let backoff = 2u64
                    .saturating_pow(consecutive_errors.min(5))
                    .min(MAX_BACKOFF_SECS);
                warn!(error = %e, consecutive_errors, backoff, "Broker error, backing off");
                tokio::time::sleep(Duration::from_secs(backoff)).await;
            }
            Err(e) => {
                error!(error = %e, "Unexpected consumer error");
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }

    info!("Match request consumer stopped");
}
