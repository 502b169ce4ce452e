use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use super::criteria::MatchCriteria;
use super::score::{CompatibilityScore, ScoringWeights};

/// Where a user currently stands in the matchmaking lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    Waiting,
    Matched,
    Canceled,
    Expired,
}

impl UserStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserStatus::Waiting => "waiting",
            UserStatus::Matched => "matched",
            UserStatus::Canceled => "canceled",
            UserStatus::Expired => "expired",
        }
    }
}

/// A user record as stored in the waiting queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub user_id: i64,
    pub username: String,
    pub criteria: MatchCriteria,
    pub gender: String,
    pub lang_code: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(default = "default_status")]
    pub status: UserStatus,
}

fn default_status() -> UserStatus {
    UserStatus::Waiting
}

impl User {
    /// Base compatibility check. A user is never compatible with itself.
    pub fn is_compatible_with(&self, other: &User) -> bool {
        if self.user_id == other.user_id {
            return false;
        }

        self.criteria.is_compatible_with(&other.criteria)
    }

    /// Detailed, weighted compatibility score against another user.
    pub fn compatibility_score(
        &self,
        other: &User,
        weights: &ScoringWeights,
    ) -> CompatibilityScore {
        CompatibilityScore::compute(&self.criteria, &other.criteria, weights)
    }
}
