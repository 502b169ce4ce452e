use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::MatchingError;

use super::user::User;

/// Lifecycle of a committed match session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchStatus {
    Active,
    Exited,
    Aborted,
}

impl MatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchStatus::Active => "active",
            MatchStatus::Exited => "exited",
            MatchStatus::Aborted => "aborted",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(MatchStatus::Active),
            "exited" => Some(MatchStatus::Exited),
            "aborted" => Some(MatchStatus::Aborted),
            _ => None,
        }
    }
}

/// A committed pairing of two users.
///
/// Created by the find-match service once a reservation succeeds, then
/// persisted inside the same unit of work that commits the pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Match {
    pub match_id: String,
    pub user1: User,
    pub user2: User,
    pub room_id: String,
    pub compatibility_score: f64,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub status: MatchStatus,
}

impl Match {
    /// Build a match between two compatible users with fresh identifiers.
    pub fn create(
        user1: User,
        user2: User,
        compatibility_score: f64,
    ) -> Result<Self, MatchingError> {
        if user1.user_id == user2.user_id {
            return Err(MatchingError::IncompatibleUsers(
                user1.user_id,
                user2.user_id,
            ));
        }

        if !user1.is_compatible_with(&user2) {
            return Err(MatchingError::IncompatibleUsers(
                user1.user_id,
                user2.user_id,
            ));
        }

        if !(0.0..=1.0).contains(&compatibility_score) {
            return Err(MatchingError::InvalidCriteria(
                "compatibility score must be between 0.0 and 1.0",
            ));
        }

        Ok(Self {
            match_id: Uuid::new_v4().to_string(),
            user1,
            user2,
            room_id: Uuid::new_v4().to_string(),
            compatibility_score,
            created_at: OffsetDateTime::now_utc(),
            status: MatchStatus::Active,
        })
    }

    pub fn contains_user(&self, user_id: i64) -> bool {
        self.user1.user_id == user_id || self.user2.user_id == user_id
    }

    pub fn partner_of(&self, user_id: i64) -> Option<&User> {
        if self.user1.user_id == user_id {
            Some(&self.user2)
        } else if self.user2.user_id == user_id {
            Some(&self.user1)
        } else {
            None
        }
    }
}

/// A chat message exchanged inside a match room.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub room_id: String,
    pub sender_id: i64,
    pub content: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}
