use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use super::criteria::MatchCriteria;

pub const DEFAULT_SOURCE: &str = "worker_service";

/// Search lifecycle markers carried on a [`MatchRequest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchStatus {
    SearchStarted,
    SearchCanceled,
    SearchCompleted,
    WaitingTimeExpired,
}

impl SearchStatus {
    /// Statuses that end processing immediately: the user is no longer
    /// waiting and only cleanup remains.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SearchStatus::SearchCanceled | SearchStatus::SearchCompleted
        )
    }
}

/// The message that travels through the broker for every search attempt.
///
/// Round-trips through JSON exactly; `current_time` defaults to
/// `created_at` and `retry_count` to zero when absent from the payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchRequest {
    pub user_id: i64,
    pub username: String,
    pub criteria: MatchCriteria,
    pub gender: String,
    pub lang_code: String,
    pub status: SearchStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(
        with = "time::serde::rfc3339::option",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    current_time: Option<OffsetDateTime>,
    #[serde(default = "default_source")]
    pub source: String,
    #[serde(default)]
    pub retry_count: u32,
}

fn default_source() -> String {
    DEFAULT_SOURCE.to_string()
}

impl MatchRequest {
    pub fn new(
        user_id: i64,
        username: impl Into<String>,
        criteria: MatchCriteria,
        gender: impl Into<String>,
        lang_code: impl Into<String>,
        status: SearchStatus,
        created_at: OffsetDateTime,
    ) -> Self {
        Self {
            user_id,
            username: username.into(),
            criteria,
            gender: gender.into(),
            lang_code: lang_code.into(),
            status,
            created_at,
            current_time: Some(created_at),
            source: default_source(),
            retry_count: 0,
        }
    }

    pub fn current_time(&self) -> OffsetDateTime {
        self.current_time.unwrap_or(self.created_at)
    }

    /// Copy of this request stamped with a fresh `current_time`, used for
    /// every redelivery.
    pub fn restamped(&self, now: OffsetDateTime) -> MatchRequest {
        let mut next = self.clone();
        next.current_time = Some(now);
        next
    }

    /// Copy carrying relaxed criteria and an incremented retry counter.
    pub fn with_relaxed_criteria(
        &self,
        criteria: MatchCriteria,
        now: OffsetDateTime,
    ) -> MatchRequest {
        let mut next = self.restamped(now);
        next.criteria = criteria;
        next.retry_count = self.retry_count + 1;
        next
    }
}
