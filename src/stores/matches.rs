//! # Durable Match Store
//!
//! Postgres persistence for committed match sessions and room messages.
//! Writes go through the unit of work's transaction; reads are served
//! straight from the pool. Queries use the runtime API with explicit row
//! mapping, so the crate builds without a live database.

use sqlx::postgres::PgRow;
use sqlx::{PgConnection, PgPool, Row};
use time::OffsetDateTime;
use tracing::warn;

use crate::error::MatchingError;
use crate::models::{ChatMessage, Match, MatchCriteria, MatchStatus, User, UserStatus};

/// Session rows reference users through a merge key, so the same user id
/// can appear across many historical matches.
fn merge_key(user_id: i64, match_id: &str) -> String {
    format!("{user_id}:{match_id}")
}

const MATCH_SELECT: &str = r#"
SELECT
  ms.match_id, ms.room_id, ms.compatibility_score, ms.created_at, ms.status,
  u1.user_id AS u1_id, u1.username AS u1_username, u1.gender AS u1_gender,
  u1.lang_code AS u1_lang_code, u1.created_at AS u1_created_at, u1.status AS u1_status,
  c1.language AS c1_language, c1.fluency AS c1_fluency, c1.topics AS c1_topics, c1.dating AS c1_dating,
  u2.user_id AS u2_id, u2.username AS u2_username, u2.gender AS u2_gender,
  u2.lang_code AS u2_lang_code, u2.created_at AS u2_created_at, u2.status AS u2_status,
  c2.language AS c2_language, c2.fluency AS c2_fluency, c2.topics AS c2_topics, c2.dating AS c2_dating
FROM match_sessions ms
JOIN user_infos u1 ON ms.user1_key = u1.merge_key
JOIN criteria_matches c1 ON u1.criteria_id = c1.id
JOIN user_infos u2 ON ms.user2_key = u2.merge_key
JOIN criteria_matches c2 ON u2.criteria_id = c2.id
"#;

/// Stage a match for commit on the given transaction connection. Criteria
/// and user rows are written first; the session row carries the unique
/// `match_id` that makes replays fail loudly.
pub(crate) async fn insert_match(conn: &mut PgConnection, m: &Match) -> Result<(), MatchingError> {
    let key1 = upsert_user(conn, &m.user1, &m.match_id).await?;
    let key2 = upsert_user(conn, &m.user2, &m.match_id).await?;

    sqlx::query(
        r#"
INSERT INTO match_sessions (match_id, user1_key, user2_key, room_id, compatibility_score, created_at, status)
VALUES ($1, $2, $3, $4, $5, $6, $7)
"#,
    )
    .bind(&m.match_id)
    .bind(&key1)
    .bind(&key2)
    .bind(&m.room_id)
    .bind(m.compatibility_score)
    .bind(m.created_at)
    .bind(m.status.as_str())
    .execute(&mut *conn)
    .await?;

    Ok(())
}

async fn upsert_user(
    conn: &mut PgConnection,
    user: &User,
    match_id: &str,
) -> Result<String, MatchingError> {
    let criteria_id: i64 = sqlx::query(
        r#"
INSERT INTO criteria_matches (language, fluency, topics, dating)
VALUES ($1, $2, $3, $4)
RETURNING id
"#,
    )
    .bind(&user.criteria.language)
    .bind(user.criteria.fluency as i16)
    .bind(&user.criteria.topics)
    .bind(user.criteria.dating)
    .fetch_one(&mut *conn)
    .await?
    .get(0);

    let key = merge_key(user.user_id, match_id);

    sqlx::query(
        r#"
INSERT INTO user_infos (merge_key, user_id, username, criteria_id, gender, lang_code, created_at, status)
VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
ON CONFLICT (merge_key) DO UPDATE SET
  username = EXCLUDED.username,
  criteria_id = EXCLUDED.criteria_id,
  status = EXCLUDED.status
"#,
    )
    .bind(&key)
    .bind(user.user_id)
    .bind(&user.username)
    .bind(criteria_id)
    .bind(&user.gender)
    .bind(&user.lang_code)
    .bind(user.created_at)
    .bind(user.status.as_str())
    .execute(&mut *conn)
    .await?;

    Ok(key)
}

pub(crate) async fn update_match_status(
    conn: &mut PgConnection,
    match_id: &str,
    status: MatchStatus,
) -> Result<u64, MatchingError> {
    let result = sqlx::query("UPDATE match_sessions SET status = $1 WHERE match_id = $2")
        .bind(status.as_str())
        .bind(match_id)
        .execute(conn)
        .await?;

    Ok(result.rows_affected())
}

pub(crate) async fn insert_message(
    conn: &mut PgConnection,
    message: &ChatMessage,
) -> Result<(), MatchingError> {
    sqlx::query(
        r#"
INSERT INTO messages (room_id, sender_id, content, created_at)
VALUES ($1, $2, $3, $4)
"#,
    )
    .bind(&message.room_id)
    .bind(message.sender_id)
    .bind(&message.content)
    .bind(message.created_at)
    .execute(conn)
    .await?;

    Ok(())
}

/// Read side of the durable store, shared by the HTTP handlers.
#[derive(Clone)]
pub struct MatchStore {
    pool: PgPool,
}

impl MatchStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn get(&self, match_id: &str) -> Result<Option<Match>, MatchingError> {
        let sql = format!("{MATCH_SELECT} WHERE ms.match_id = $1");
        let row = sqlx::query(&sql)
            .bind(match_id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(r) => Ok(Some(row_to_match(&r)?)),
            None => Ok(None),
        }
    }

    /// The active session a user is part of, if any. Serves the HTTP
    /// cancel path, which only knows the user id.
    pub async fn find_active_by_user(
        &self,
        user_id: i64,
    ) -> Result<Option<Match>, MatchingError> {
        let sql = format!(
            "{MATCH_SELECT} WHERE ms.status = 'active' AND (u1.user_id = $1 OR u2.user_id = $1) \
             ORDER BY ms.created_at DESC LIMIT 1"
        );
        let row = sqlx::query(&sql)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(r) => Ok(Some(row_to_match(&r)?)),
            None => Ok(None),
        }
    }

    /// All known match ids, newest first. Diagnostics only.
    pub async fn list(&self) -> Result<Vec<String>, MatchingError> {
        let rows = sqlx::query("SELECT match_id FROM match_sessions ORDER BY created_at DESC")
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.iter().map(|r| r.get("match_id")).collect())
    }

    pub async fn list_messages(&self, room_id: &str) -> Result<Vec<ChatMessage>, MatchingError> {
        let rows = sqlx::query(
            r#"
SELECT room_id, sender_id, content, created_at
FROM messages
WHERE room_id = $1
ORDER BY created_at ASC
"#,
        )
        .bind(room_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|r| ChatMessage {
                room_id: r.get("room_id"),
                sender_id: r.get("sender_id"),
                content: r.get("content"),
                created_at: r.get("created_at"),
            })
            .collect())
    }
}

fn row_to_match(row: &PgRow) -> Result<Match, MatchingError> {
    let status_raw: String = row.get("status");
    let status = MatchStatus::parse(&status_raw).unwrap_or_else(|| {
        warn!(%status_raw, "Unknown match status in database, treating as exited");
        MatchStatus::Exited
    });

    Ok(Match {
        match_id: row.get("match_id"),
        user1: row_to_user(row, "u1", "c1")?,
        user2: row_to_user(row, "u2", "c2")?,
        room_id: row.get("room_id"),
        compatibility_score: row.get("compatibility_score"),
        created_at: row.get::<OffsetDateTime, _>("created_at"),
        status,
    })
}

fn row_to_user(row: &PgRow, user_prefix: &str, criteria_prefix: &str) -> Result<User, MatchingError> {
    let fluency: i16 = row.get(format!("{criteria_prefix}_fluency").as_str());
    let criteria = MatchCriteria {
        language: row.get(format!("{criteria_prefix}_language").as_str()),
        fluency: fluency.clamp(0, 10) as u8,
        topics: row.get(format!("{criteria_prefix}_topics").as_str()),
        dating: row.get(format!("{criteria_prefix}_dating").as_str()),
    };

    let status_raw: String = row.get(format!("{user_prefix}_status").as_str());
    let status = match status_raw.as_str() {
        "waiting" => UserStatus::Waiting,
        "matched" => UserStatus::Matched,
        "canceled" => UserStatus::Canceled,
        _ => UserStatus::Expired,
    };

    Ok(User {
        user_id: row.get(format!("{user_prefix}_id").as_str()),
        username: row.get(format!("{user_prefix}_username").as_str()),
        criteria,
        gender: row.get(format!("{user_prefix}_gender").as_str()),
        lang_code: row.get(format!("{user_prefix}_lang_code").as_str()),
        created_at: row.get::<OffsetDateTime, _>(format!("{user_prefix}_created_at").as_str()),
        status,
    })
}
