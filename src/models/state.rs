use std::time::Duration;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use super::user::UserStatus;

/// Per-user, in-process tracking entry kept by the state store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserState {
    pub user_id: i64,
    pub status: UserStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(with = "time::serde::rfc3339")]
    pub last_updated: OffsetDateTime,
}

impl UserState {
    pub fn new(user_id: i64, status: UserStatus) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            user_id,
            status,
            created_at: now,
            retry_count: 0,
            last_updated: now,
        }
    }

    pub fn is_expired(&self, ttl: Duration) -> bool {
        OffsetDateTime::now_utc() - self.created_at > ttl
    }

    pub fn increment_retry(&self) -> UserState {
        UserState {
            retry_count: self.retry_count + 1,
            last_updated: OffsetDateTime::now_utc(),
            ..self.clone()
        }
    }

    pub fn with_status(&self, status: UserStatus) -> UserState {
        UserState {
            status,
            last_updated: OffsetDateTime::now_utc(),
            ..self.clone()
        }
    }
}
