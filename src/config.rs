//! # Worker Configuration
//!
//! All tunables are read from the environment with code defaults, so a
//! bare `tandem` process comes up with sane matchmaking behavior and only
//! the connection strings are mandatory.

use std::env;
use std::time::Duration;

use crate::models::ScoringWeights;

#[derive(Clone, Debug)]
pub struct MatchingConfig {
    /// Upper bound on total search time for one request.
    pub max_wait_time: Duration,
    /// Requests younger than this are delayed before the first attempt,
    /// giving the queue a moment to fill.
    pub initial_delay: Duration,
    /// Redeliveries allowed before the request times out.
    pub max_retries: u32,
    /// Minimum weighted score for a pair to be committed.
    pub compatibility_threshold: f64,
    pub scoring_weights: ScoringWeights,
    /// TTL on per-user records in the queue store.
    pub cache_ttl: Duration,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            max_wait_time: Duration::from_secs(150),
            initial_delay: Duration::from_secs(1),
            max_retries: 20,
            compatibility_threshold: 0.7,
            scoring_weights: ScoringWeights::default(),
            cache_ttl: Duration::from_secs(300),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ResilienceConfig {
    /// Per-user request budget within `rate_window`.
    pub rate_max_requests: u32,
    pub rate_window: Duration,
    /// Consecutive failures that trip the circuit breaker.
    pub failure_threshold: u32,
    /// How long the breaker stays open before probing again.
    pub recovery_timeout: Duration,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            rate_max_requests: 3,
            rate_window: Duration::from_secs(1),
            failure_threshold: 3,
            recovery_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Clone, Debug)]
pub struct StateStoreConfig {
    pub max_size: usize,
    pub ttl: Duration,
    pub sweep_interval: Duration,
}

impl Default for StateStoreConfig {
    fn default() -> Self {
        Self {
            max_size: 10_000,
            ttl: Duration::from_secs(300),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

#[derive(Clone, Debug)]
pub struct WorkerConfig {
    pub database_url: String,
    pub redis_url: String,
    /// HTTP bind address.
    pub address: String,
    pub matching: MatchingConfig,
    pub resilience: ResilienceConfig,
    pub state_store: StateStoreConfig,
}

impl WorkerConfig {
    /// Build from the environment. `DATABASE_URL`, `REDIS_URL` and
    /// `ADDRESS` are required; everything else falls back to defaults.
    pub fn from_env() -> Self {
        let matching = MatchingConfig {
            max_wait_time: secs_var("MAX_WAIT_TIME", 150),
            initial_delay: secs_var("INITIAL_DELAY", 1),
            max_retries: parse_var("MAX_RETRIES", 20),
            compatibility_threshold: parse_var("COMPATIBILITY_THRESHOLD", 0.7),
            scoring_weights: ScoringWeights::default(),
            cache_ttl: secs_var("CACHE_TTL", 300),
        };

        let resilience = ResilienceConfig {
            rate_max_requests: parse_var("RATE_MAX_REQUESTS", 3),
            rate_window: secs_var("RATE_TIME_WINDOW", 1),
            failure_threshold: parse_var("CB_FAILURE_THRESHOLD", 3),
            recovery_timeout: secs_var("CB_RECOVERY_TIMEOUT", 5),
        };

        let state_store = StateStoreConfig {
            max_size: parse_var("STATE_MAX_SIZE", 10_000),
            ..StateStoreConfig::default()
        };

        Self {
            database_url: env::var("DATABASE_URL")
                .expect("Env variable `DATABASE_URL` should be set"),
            redis_url: env::var("REDIS_URL").expect("Env variable `REDIS_URL` should be set"),
            address: env::var("ADDRESS").expect("Env variable `ADDRESS` should be set"),
            matching,
            resilience,
            state_store,
        }
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn secs_var(name: &str, default: u64) -> Duration {
    Duration::from_secs(parse_var(name, default))
}
