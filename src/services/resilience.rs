//! # In-Process Resilience
//!
//! A sliding-window per-user rate limiter and a three-state circuit
//! breaker. Both are process-local: when several worker processes run,
//! each carries its own, which is intentional.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::{debug, warn};

use crate::config::ResilienceConfig;
use crate::error::MatchingError;

/// Sliding-window rate limiter keyed by user id.
pub struct RateLimiter {
    max_requests: u32,
    window: Duration,
    requests: DashMap<i64, Vec<Instant>>,
}

impl RateLimiter {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            requests: DashMap::new(),
        }
    }

    pub fn from_config(config: &ResilienceConfig) -> Self {
        Self::new(config.rate_max_requests, config.rate_window)
    }

    /// Record an arrival and report whether it fits the budget.
    pub fn is_allowed(&self, user_id: i64) -> bool {
        let now = Instant::now();
        let mut window = self.requests.entry(user_id).or_default();

        window.retain(|t| now.duration_since(*t) < self.window);

        if window.len() < self.max_requests as usize {
            window.push(now);
            true
        } else {
            debug!(user_id, "Rate limit exceeded");
            false
        }
    }

    /// Drop windows that have fully aged out.
    pub fn cleanup(&self) {
        let window = self.window;
        self.requests
            .retain(|_, times| times.iter().any(|t| t.elapsed() < window));
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

struct BreakerInner {
    state: BreakerState,
    failure_count: u32,
    last_failure: Option<Instant>,
}

/// Circuit breaker guarding the use-case call. Closed until
/// `failure_threshold` consecutive failures, then open for
/// `recovery_timeout`, then half-open where the next call decides.
pub struct CircuitBreaker {
    failure_threshold: u32,
    recovery_timeout: Duration,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, recovery_timeout: Duration) -> Self {
        Self {
            failure_threshold,
            recovery_timeout,
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                failure_count: 0,
                last_failure: None,
            }),
        }
    }

    pub fn from_config(config: &ResilienceConfig) -> Self {
        Self::new(config.failure_threshold, config.recovery_timeout)
    }

    /// Gate a call. Errors with `CircuitOpen` while the breaker is open
    /// and the recovery timeout has not elapsed.
    pub fn try_acquire(&self) -> Result<(), MatchingError> {
        let mut inner = self.inner.lock().unwrap();

        if inner.state == BreakerState::Open {
            let recovered = inner
                .last_failure
                .is_some_and(|at| at.elapsed() > self.recovery_timeout);

            if recovered {
                inner.state = BreakerState::HalfOpen;
                debug!("Circuit breaker half-open, probing");
            } else {
                return Err(MatchingError::CircuitOpen);
            }
        }

        Ok(())
    }

    pub fn on_success(&self) {
        let mut inner = self.inner.lock().unwrap();

        if inner.state == BreakerState::HalfOpen {
            debug!("Circuit breaker closed after successful probe");
        }
        inner.state = BreakerState::Closed;
        inner.failure_count = 0;
    }

    pub fn on_failure(&self) {
        let mut inner = self.inner.lock().unwrap();

        inner.failure_count += 1;
        if inner.failure_count >= self.failure_threshold {
            if inner.state != BreakerState::Open {
                warn!(
                    failures = inner.failure_count,
                    "Circuit breaker opened"
                );
            }
            inner.state = BreakerState::Open;
            inner.last_failure = Some(Instant::now());
        }
    }

    pub fn is_open(&self) -> bool {
        self.inner.lock().unwrap().state == BreakerState::Open
    }
}
