//! # Broker Transport
//!
//! The core only knows the [`MessagePublisher`] interface: publish a match
//! request with an optional delay, or drop a request into the dead-letter
//! destination. The concrete transport is Redis: a main list consumed
//! with `BRPOP`, a sorted set holding delayed deliveries keyed by due
//! time, and a dead-letter list.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};
use serde_json::Value;
use time::OffsetDateTime;
use tracing::{debug, instrument};

use crate::error::MatchingError;
use crate::models::MatchRequest;

const REQUESTS_KEY: &str = "matchmaking:requests";
const DELAYED_KEY: &str = "matchmaking:requests:delayed";
const DEAD_LETTER_KEY: &str = "matchmaking:dead_letter";

/// Moves every due delayed message onto the main list.
const PROMOTE_DUE_SCRIPT: &str = r#"
local due = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1], 'LIMIT', 0, 100)
for _, payload in ipairs(due) do
    redis.call('ZREM', KEYS[1], payload)
    redis.call('LPUSH', KEYS[2], payload)
end
return #due
"#;

#[async_trait]
pub trait MessagePublisher: Send + Sync {
    /// Publish a request for (re)delivery. A non-zero delay means the
    /// message becomes visible to consumers only after it elapses.
    async fn publish_match_request(
        &self,
        request: &MatchRequest,
        delay: Duration,
    ) -> Result<(), MatchingError>;

    /// Terminal destination for requests that hit an unexpected error.
    /// The payload keeps the request schema plus an `error_message` field.
    async fn publish_to_dead_letter(
        &self,
        request: &MatchRequest,
        error_message: &str,
    ) -> Result<(), MatchingError>;
}

/// Redis-backed broker: publisher and consumer sides of the request queue.
#[derive(Clone)]
pub struct RedisBroker {
    conn: ConnectionManager,
}

impl RedisBroker {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    fn now_millis() -> i64 {
        (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
    }

    async fn push_raw(&self, payload: String, delay: Duration) -> Result<(), MatchingError> {
        let mut conn = self.conn.clone();

        if delay.is_zero() {
            let _: () = conn.lpush(REQUESTS_KEY, payload).await?;
        } else {
            let due = Self::now_millis() + delay.as_millis() as i64;
            let _: () = conn.zadd(DELAYED_KEY, payload, due).await?;
        }

        Ok(())
    }

    /// Republish a raw payload, used by the consumer to implement nack as
    /// a short-delay redelivery.
    pub async fn requeue_raw(&self, payload: String, delay: Duration) -> Result<(), MatchingError> {
        self.push_raw(payload, delay).await
    }

    /// Block up to `timeout` for the next deliverable message, promoting
    /// due delayed messages first.
    pub async fn next_message(&self, timeout: Duration) -> Result<Option<String>, MatchingError> {
        let mut conn = self.conn.clone();

        let promoted: i64 = Script::new(PROMOTE_DUE_SCRIPT)
            .key(DELAYED_KEY)
            .key(REQUESTS_KEY)
            .arg(Self::now_millis())
            .invoke_async(&mut conn)
            .await?;
        if promoted > 0 {
            debug!(promoted, "Promoted delayed messages to the main queue");
        }

        let popped: Option<(String, String)> = conn
            .brpop(REQUESTS_KEY, timeout.as_secs_f64())
            .await?;

        Ok(popped.map(|(_, payload)| payload))
    }

    /// Number of dead-lettered requests. Diagnostics only.
    pub async fn dead_letter_size(&self) -> Result<u64, MatchingError> {
        let mut conn = self.conn.clone();
        let len: u64 = conn.llen(DEAD_LETTER_KEY).await?;
        Ok(len)
    }
}

#[async_trait]
impl MessagePublisher for RedisBroker {
    #[instrument(skip_all, fields(user_id = %request.user_id, delay_ms = %delay.as_millis()))]
    async fn publish_match_request(
        &self,
        request: &MatchRequest,
        delay: Duration,
    ) -> Result<(), MatchingError> {
        let payload = serde_json::to_string(request)?;
        self.push_raw(payload, delay).await
    }

    async fn publish_to_dead_letter(
        &self,
        request: &MatchRequest,
        error_message: &str,
    ) -> Result<(), MatchingError> {
        let mut body = serde_json::to_value(request)?;
        if let Value::Object(map) = &mut body {
            map.insert(
                "error_message".to_string(),
                Value::String(error_message.to_string()),
            );
        }

        let mut conn = self.conn.clone();
        let _: () = conn.lpush(DEAD_LETTER_KEY, body.to_string()).await?;

        debug!(user_id = request.user_id, "Request dead-lettered");
        Ok(())
    }
}
