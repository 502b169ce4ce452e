//! # Waiting-Queue Store
//!
//! The shared, authoritative record of who is currently searching. Backed
//! by Redis: a FIFO list of user ids plus per-user JSON records, criteria
//! records and `searching:{id}` sentinels, all with TTLs. The two-step
//! reservation (`find_and_reserve_match`) runs as Lua scripts so that no
//! two workers can ever claim overlapping pairs.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};
use tracing::{debug, instrument};

use crate::error::MatchingError;
use crate::models::{MatchCriteria, User, UserStatus};

const NAMESPACE: &str = "matchmaking";

/// Scans the waiting list in insertion order and returns the first
/// candidate that passes the prefilter (same language, fluency within two
/// levels), or nothing when the seeker itself is no longer listed.
const FIND_CANDIDATE_SCRIPT: &str = r#"
local ids = redis.call('LRANGE', KEYS[1], 0, -1)
local present = false
for _, id in ipairs(ids) do
    if id == ARGV[1] then
        present = true
        break
    end
end
if not present then
    return false
end
for _, id in ipairs(ids) do
    if id ~= ARGV[1] then
        local raw = redis.call('GET', ARGV[4] .. id)
        if raw then
            local ok, c = pcall(cjson.decode, raw)
            if ok and c.language == ARGV[2] then
                local diff = tonumber(c.fluency) - tonumber(ARGV[3])
                if diff < 0 then diff = -diff end
                if diff <= 2 then
                    return id
                end
            end
        end
    end
end
return false
"#;

/// Verifies that both users are still waiting, then removes both list
/// entries and both searching sentinels in one indivisible step.
const CLAIM_PAIR_SCRIPT: &str = r#"
local ids = redis.call('LRANGE', KEYS[1], 0, -1)
local seeker, candidate = false, false
for _, id in ipairs(ids) do
    if id == ARGV[1] then seeker = true end
    if id == ARGV[2] then candidate = true end
end
if not (seeker and candidate) then
    return 0
end
redis.call('LREM', KEYS[1], 0, ARGV[1])
redis.call('LREM', KEYS[1], 0, ARGV[2])
redis.call('DEL', ARGV[3] .. ARGV[1])
redis.call('DEL', ARGV[3] .. ARGV[2])
return 1
"#;

/// Authoritative waiting-set operations shared by the worker and the HTTP
/// surface. Object-safe so tests can substitute an in-memory double.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Persist the user record and criteria with the cache TTL.
    async fn save(&self, user: &User) -> Result<(), MatchingError>;

    async fn find_by_id(&self, user_id: i64) -> Result<Option<User>, MatchingError>;

    /// Enqueue a user for matching. Fails with `UserAlreadyInSearch` when
    /// the user is already actively waiting.
    async fn add_to_queue(&self, user: &User) -> Result<(), MatchingError>;

    /// Remove every trace of the user from the queue: list entries,
    /// sentinel, user and criteria records.
    async fn remove_from_queue(&self, user_id: i64) -> Result<(), MatchingError>;

    /// Single source of truth for "is this user in the queue".
    async fn is_searching(&self, user_id: i64) -> Result<bool, MatchingError>;

    async fn queue_size(&self) -> Result<u64, MatchingError>;

    /// Overwrite the stored criteria and refresh its TTL.
    async fn update_user_criteria(
        &self,
        user_id: i64,
        criteria: &MatchCriteria,
    ) -> Result<(), MatchingError>;

    /// Short-lived mapping the front-end polls after a commit.
    async fn reserve_match_id(&self, user_id: i64, match_id: &str) -> Result<(), MatchingError>;

    async fn get_match_id(&self, user_id: i64) -> Result<Option<String>, MatchingError>;

    /// Atomically pick the first prefilter-compatible candidate and claim
    /// the pair. On success both users are out of the queue and their
    /// sentinels are gone; the caller re-checks full compatibility and is
    /// responsible for the retry path if that re-check fails.
    async fn find_and_reserve_match(&self, seeker: &User)
    -> Result<Option<User>, MatchingError>;
}

pub struct RedisQueueStore {
    conn: ConnectionManager,
    cache_ttl: Duration,
    max_wait_time: Duration,
    find_candidate: Script,
    claim_pair: Script,
}

impl RedisQueueStore {
    pub fn new(conn: ConnectionManager, cache_ttl: Duration, max_wait_time: Duration) -> Self {
        Self {
            conn,
            cache_ttl,
            max_wait_time,
            find_candidate: Script::new(FIND_CANDIDATE_SCRIPT),
            claim_pair: Script::new(CLAIM_PAIR_SCRIPT),
        }
    }

    fn queue_key() -> String {
        format!("{NAMESPACE}:queue")
    }

    fn user_key(user_id: i64) -> String {
        format!("{NAMESPACE}:user:{user_id}")
    }

    fn criteria_key(user_id: i64) -> String {
        format!("{NAMESPACE}:criteria:{user_id}")
    }

    fn criteria_prefix() -> String {
        format!("{NAMESPACE}:criteria:")
    }

    fn searching_key(user_id: i64) -> String {
        format!("{NAMESPACE}:searching:{user_id}")
    }

    fn searching_prefix() -> String {
        format!("{NAMESPACE}:searching:")
    }

    fn match_id_key(user_id: i64) -> String {
        format!("{NAMESPACE}:match_id:{user_id}")
    }
}

#[async_trait]
impl QueueStore for RedisQueueStore {
    async fn save(&self, user: &User) -> Result<(), MatchingError> {
        let mut conn = self.conn.clone();
        let ttl = self.cache_ttl.as_secs();

        let user_json = serde_json::to_string(user)?;
        let criteria_json = serde_json::to_string(&user.criteria)?;

        let _: () = redis::pipe()
            .set_ex(Self::user_key(user.user_id), user_json, ttl)
            .set_ex(Self::criteria_key(user.user_id), criteria_json, ttl)
            .query_async(&mut conn)
            .await?;

        Ok(())
    }

    async fn find_by_id(&self, user_id: i64) -> Result<Option<User>, MatchingError> {
        let mut conn = self.conn.clone();

        let raw: Option<String> = conn.get(Self::user_key(user_id)).await?;
        let Some(json) = raw else {
            return Ok(None);
        };
        let mut user: User = serde_json::from_str(&json)?;

        // The criteria record is authoritative: relaxation rewrites it
        // without touching the user record.
        let criteria_raw: Option<String> = conn.get(Self::criteria_key(user_id)).await?;
        if let Some(criteria_json) = criteria_raw {
            user.criteria = serde_json::from_str(&criteria_json)?;
        }

        Ok(Some(user))
    }

    #[instrument(skip_all, fields(user_id = %user.user_id))]
    async fn add_to_queue(&self, user: &User) -> Result<(), MatchingError> {
        if self.is_searching(user.user_id).await? && user.status == UserStatus::Waiting {
            return Err(MatchingError::UserAlreadyInSearch(user.user_id));
        }

        self.save(user).await?;

        let mut conn = self.conn.clone();
        let _: () = redis::pipe()
            .rpush(Self::queue_key(), user.user_id.to_string())
            .set_ex(
                Self::searching_key(user.user_id),
                "1",
                self.max_wait_time.as_secs(),
            )
            .query_async(&mut conn)
            .await?;

        debug!("User added to waiting queue");
        Ok(())
    }

    async fn remove_from_queue(&self, user_id: i64) -> Result<(), MatchingError> {
        let mut conn = self.conn.clone();

        let _: () = redis::pipe()
            .lrem(Self::queue_key(), 0, user_id.to_string())
            .del(Self::searching_key(user_id))
            .del(Self::user_key(user_id))
            .del(Self::criteria_key(user_id))
            .query_async(&mut conn)
            .await?;

        Ok(())
    }

    async fn is_searching(&self, user_id: i64) -> Result<bool, MatchingError> {
        let mut conn = self.conn.clone();
        let exists: bool = conn.exists(Self::searching_key(user_id)).await?;
        Ok(exists)
    }

    async fn queue_size(&self) -> Result<u64, MatchingError> {
        let mut conn = self.conn.clone();
        let len: u64 = conn.llen(Self::queue_key()).await?;
        Ok(len)
    }

    async fn update_user_criteria(
        &self,
        user_id: i64,
        criteria: &MatchCriteria,
    ) -> Result<(), MatchingError> {
        let mut conn = self.conn.clone();
        let json = serde_json::to_string(criteria)?;

        let _: () = conn
            .set_ex(Self::criteria_key(user_id), json, self.cache_ttl.as_secs())
            .await?;

        Ok(())
    }

    async fn reserve_match_id(&self, user_id: i64, match_id: &str) -> Result<(), MatchingError> {
        let mut conn = self.conn.clone();

        let _: () = conn
            .set_ex(
                Self::match_id_key(user_id),
                match_id,
                self.cache_ttl.as_secs(),
            )
            .await?;

        Ok(())
    }

    async fn get_match_id(&self, user_id: i64) -> Result<Option<String>, MatchingError> {
        let mut conn = self.conn.clone();
        let match_id: Option<String> = conn.get(Self::match_id_key(user_id)).await?;
        Ok(match_id)
    }

    #[instrument(skip_all, fields(seeker_id = %seeker.user_id))]
    async fn find_and_reserve_match(
        &self,
        seeker: &User,
    ) -> Result<Option<User>, MatchingError> {
        let mut conn = self.conn.clone();

        // Step 1: FIFO scan with the cheap prefilter. The fluency band is
        // two levels wide so relaxed criteria still pass.
        let candidate_id: Option<String> = self
            .find_candidate
            .key(Self::queue_key())
            .arg(seeker.user_id.to_string())
            .arg(&seeker.criteria.language)
            .arg(seeker.criteria.fluency)
            .arg(Self::criteria_prefix())
            .invoke_async(&mut conn)
            .await?;

        let Some(candidate_id) = candidate_id else {
            return Ok(None);
        };

        // Step 2: claim the pair, verifying both are still waiting. A
        // losing worker observes a missing id here and backs off.
        let claimed: i64 = self
            .claim_pair
            .key(Self::queue_key())
            .arg(seeker.user_id.to_string())
            .arg(&candidate_id)
            .arg(Self::searching_prefix())
            .invoke_async(&mut conn)
            .await?;

        if claimed == 0 {
            debug!(%candidate_id, "Pair claim lost to a concurrent worker");
            return Ok(None);
        }

        let candidate_id: i64 = candidate_id.parse().map_err(|_| {
            MatchingError::Internal(format!("non-numeric id in waiting queue: {candidate_id}"))
        })?;

        // The pair is reserved even if the record has expired; the caller's
        // retry path re-enqueues when the full record cannot be loaded.
        self.find_by_id(candidate_id).await
    }
}
