//! # Matchmaking Metrics
//!
//! Thin helpers over the `metrics` facade. The Prometheus recorder is
//! installed once at startup and its handle rendered by the
//! `/api/v0/metrics` endpoint.

use std::time::Duration;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::models::UserStatus;

pub struct MetricsRecorder {
    handle: PrometheusHandle,
}

impl MetricsRecorder {
    /// Install the global Prometheus recorder and describe every metric
    /// the worker emits.
    pub fn install() -> Self {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .expect("failed to install Prometheus recorder");

        metrics::describe_gauge!(
            "matching_queue_size",
            "Current size of the matching queue"
        );
        metrics::describe_histogram!(
            "matching_queue_wait_time_seconds",
            "Time users spend waiting in the matching queue"
        );
        metrics::describe_counter!(
            "matching_attempts_total",
            "Total number of matching attempts by result"
        );
        metrics::describe_counter!(
            "matches_found_total",
            "Total number of successful matches by compatibility range"
        );
        metrics::describe_histogram!(
            "matching_compatibility_score",
            "Distribution of compatibility scores for found matches"
        );
        metrics::describe_histogram!(
            "matching_processing_time_seconds",
            "Time spent processing matching requests"
        );
        metrics::describe_counter!(
            "matching_errors_total",
            "Total number of errors by type"
        );
        metrics::describe_counter!(
            "matching_retry_attempts_total",
            "Total number of retry attempts"
        );
        metrics::describe_histogram!(
            "matching_retry_delay_seconds",
            "Delay between retry attempts"
        );
        metrics::describe_gauge!(
            "matching_active_users",
            "Number of users currently tracked per status"
        );

        Self { handle }
    }

    pub fn handle(&self) -> PrometheusHandle {
        self.handle.clone()
    }
}

pub fn record_queue_size(size: u64) {
    gauge!("matching_queue_size").set(size as f64);
}

pub fn record_queue_wait_time(wait: Duration) {
    histogram!("matching_queue_wait_time_seconds").record(wait.as_secs_f64());
}

pub fn record_match_attempt(found: bool, processing: Duration, score: Option<f64>) {
    histogram!("matching_processing_time_seconds").record(processing.as_secs_f64());

    let result = if found { "success" } else { "failure" };
    counter!("matching_attempts_total", "result" => result).increment(1);

    if let Some(score) = score {
        histogram!("matching_compatibility_score").record(score);

        let range = if score >= 0.8 {
            "high"
        } else if score >= 0.6 {
            "medium"
        } else {
            "low"
        };
        counter!("matches_found_total", "compatibility_range" => range).increment(1);
    }
}

pub fn record_error(error_type: &'static str) {
    counter!("matching_errors_total", "error_type" => error_type).increment(1);
}

pub fn record_retry_attempt(retry_count: u32, delay: Duration) {
    let retry_range = match retry_count {
        0..=1 => "1",
        2..=3 => "2-3",
        _ => "4+",
    };
    let delay_range = if delay.as_secs() <= 5 {
        "short"
    } else if delay.as_secs() <= 30 {
        "medium"
    } else {
        "long"
    };

    counter!(
        "matching_retry_attempts_total",
        "retry_count" => retry_range,
        "delay_range" => delay_range
    )
    .increment(1);
    histogram!("matching_retry_delay_seconds").record(delay.as_secs_f64());
}

pub fn record_status_change(old: Option<UserStatus>, new: UserStatus) {
    if let Some(old) = old {
        gauge!("matching_active_users", "status" => old.as_str()).decrement(1.0);
    }
    gauge!("matching_active_users", "status" => new.as_str()).increment(1.0);
}
