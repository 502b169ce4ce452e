//! # Business Logic Services
//!
//! The matchmaking use cases and their supporting infrastructure seams.
//!
//! ## Available Services
//!
//! - **Find match** (`find_match`) - one atomic reservation attempt
//! - **Process request** (`process_request`) - the delivery state machine
//! - **Publisher** (`publisher`) - broker transport behind an interface
//! - **Notify** (`notify`) - post-commit match-id announcement
//! - **Resilience** (`resilience`) - rate limiter and circuit breaker
//! - **Metrics** (`metrics`) - Prometheus recorder and emit helpers

pub mod find_match;
pub mod metrics;
pub mod notify;
pub mod process_request;
pub mod publisher;
pub mod resilience;

pub use find_match::{FindMatchService, FindOutcome};
pub use metrics::MetricsRecorder;
pub use notify::{MatchNotifier, PollingMatchNotifier};
pub use process_request::{ProcessOutcome, ProcessRequestService};
pub use publisher::{MessagePublisher, RedisBroker};
pub use resilience::{CircuitBreaker, RateLimiter};
