#![allow(dead_code)]

//! Shared test doubles: an in-memory queue store reproducing the two-step
//! reservation semantics, a recording publisher, and a unit-of-work
//! factory with controllable commit failures.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use time::OffsetDateTime;

use tandem::config::{MatchingConfig, StateStoreConfig};
use tandem::error::MatchingError;
use tandem::models::{
    ChatMessage, Match, MatchCriteria, MatchRequest, MatchStatus, SearchStatus, User, UserStatus,
};
use tandem::services::{
    FindMatchService, PollingMatchNotifier, ProcessRequestService, publisher::MessagePublisher,
};
use tandem::stores::{InMemoryStateStore, QueueStore, UnitOfWork, UnitOfWorkFactory};

// ---------------------------------------------------------------------------
// Queue store double

#[derive(Default)]
struct QueueInner {
    waiting: Vec<i64>,
    users: HashMap<i64, User>,
    criteria: HashMap<i64, MatchCriteria>,
    searching: HashSet<i64>,
    match_ids: HashMap<i64, String>,
}

/// In-memory stand-in for the Redis queue store. The reservation mirrors
/// the production Lua scripts: a FIFO prefilter scan followed by a
/// verify-both-then-remove claim, all under one lock.
#[derive(Default)]
pub struct MockQueueStore {
    inner: Mutex<QueueInner>,
}

impl MockQueueStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn waiting_ids(&self) -> Vec<i64> {
        self.inner.lock().unwrap().waiting.clone()
    }

    pub fn has_sentinel(&self, user_id: i64) -> bool {
        self.inner.lock().unwrap().searching.contains(&user_id)
    }

    pub fn reserved_match_id(&self, user_id: i64) -> Option<String> {
        self.inner.lock().unwrap().match_ids.get(&user_id).cloned()
    }

    pub fn criteria_of(&self, user_id: i64) -> Option<MatchCriteria> {
        self.inner.lock().unwrap().criteria.get(&user_id).cloned()
    }

    fn load_user(inner: &QueueInner, user_id: i64) -> Option<User> {
        let mut user = inner.users.get(&user_id).cloned()?;
        if let Some(criteria) = inner.criteria.get(&user_id) {
            user.criteria = criteria.clone();
        }
        Some(user)
    }
}

#[async_trait]
impl QueueStore for MockQueueStore {
    async fn save(&self, user: &User) -> Result<(), MatchingError> {
        let mut inner = self.inner.lock().unwrap();
        inner.users.insert(user.user_id, user.clone());
        inner.criteria.insert(user.user_id, user.criteria.clone());
        Ok(())
    }

    async fn find_by_id(&self, user_id: i64) -> Result<Option<User>, MatchingError> {
        let inner = self.inner.lock().unwrap();
        Ok(Self::load_user(&inner, user_id))
    }

    async fn add_to_queue(&self, user: &User) -> Result<(), MatchingError> {
        {
            let inner = self.inner.lock().unwrap();
            if inner.searching.contains(&user.user_id) && user.status == UserStatus::Waiting {
                return Err(MatchingError::UserAlreadyInSearch(user.user_id));
            }
        }

        self.save(user).await?;

        let mut inner = self.inner.lock().unwrap();
        inner.waiting.push(user.user_id);
        inner.searching.insert(user.user_id);
        Ok(())
    }

    async fn remove_from_queue(&self, user_id: i64) -> Result<(), MatchingError> {
        let mut inner = self.inner.lock().unwrap();
        inner.waiting.retain(|id| *id != user_id);
        inner.searching.remove(&user_id);
        inner.users.remove(&user_id);
        inner.criteria.remove(&user_id);
        Ok(())
    }

    async fn is_searching(&self, user_id: i64) -> Result<bool, MatchingError> {
        Ok(self.inner.lock().unwrap().searching.contains(&user_id))
    }

    async fn queue_size(&self) -> Result<u64, MatchingError> {
        Ok(self.inner.lock().unwrap().waiting.len() as u64)
    }

    async fn update_user_criteria(
        &self,
        user_id: i64,
        criteria: &MatchCriteria,
    ) -> Result<(), MatchingError> {
        let mut inner = self.inner.lock().unwrap();
        inner.criteria.insert(user_id, criteria.clone());
        Ok(())
    }

    async fn reserve_match_id(&self, user_id: i64, match_id: &str) -> Result<(), MatchingError> {
        let mut inner = self.inner.lock().unwrap();
        inner.match_ids.insert(user_id, match_id.to_string());
        Ok(())
    }

    async fn get_match_id(&self, user_id: i64) -> Result<Option<String>, MatchingError> {
        Ok(self.inner.lock().unwrap().match_ids.get(&user_id).cloned())
    }

    async fn find_and_reserve_match(
        &self,
        seeker: &User,
    ) -> Result<Option<User>, MatchingError> {
        let mut inner = self.inner.lock().unwrap();

        // Step 1: FIFO scan with the language/fluency prefilter.
        if !inner.waiting.contains(&seeker.user_id) {
            return Ok(None);
        }

        let candidate_id = inner.waiting.iter().copied().find(|id| {
            *id != seeker.user_id
                && inner.criteria.get(id).is_some_and(|c| {
                    c.language == seeker.criteria.language
                        && c.fluency.abs_diff(seeker.criteria.fluency) <= 2
                })
        });
        let Some(candidate_id) = candidate_id else {
            return Ok(None);
        };

        // Step 2: verify both still present, then remove both.
        if !inner.waiting.contains(&seeker.user_id) || !inner.waiting.contains(&candidate_id) {
            return Ok(None);
        }
        inner
            .waiting
            .retain(|id| *id != seeker.user_id && *id != candidate_id);
        inner.searching.remove(&seeker.user_id);
        inner.searching.remove(&candidate_id);

        Ok(Self::load_user(&inner, candidate_id))
    }
}

// ---------------------------------------------------------------------------
// Publisher double

#[derive(Default)]
pub struct MockPublisher {
    published: Mutex<Vec<(MatchRequest, Duration)>>,
    dead_letters: Mutex<Vec<(MatchRequest, String)>>,
}

impl MockPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn published(&self) -> Vec<(MatchRequest, Duration)> {
        self.published.lock().unwrap().clone()
    }

    pub fn published_count(&self) -> usize {
        self.published.lock().unwrap().len()
    }

    pub fn last_published(&self) -> Option<(MatchRequest, Duration)> {
        self.published.lock().unwrap().last().cloned()
    }

    pub fn dead_letter_count(&self) -> usize {
        self.dead_letters.lock().unwrap().len()
    }
}

#[async_trait]
impl MessagePublisher for MockPublisher {
    async fn publish_match_request(
        &self,
        request: &MatchRequest,
        delay: Duration,
    ) -> Result<(), MatchingError> {
        self.published
            .lock()
            .unwrap()
            .push((request.clone(), delay));
        Ok(())
    }

    async fn publish_to_dead_letter(
        &self,
        request: &MatchRequest,
        error_message: &str,
    ) -> Result<(), MatchingError> {
        self.dead_letters
            .lock()
            .unwrap()
            .push((request.clone(), error_message.to_string()));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Unit-of-work double

#[derive(Default)]
pub struct MockUowFactory {
    committed: Arc<Mutex<Vec<Match>>>,
    status_updates: Arc<Mutex<Vec<(String, MatchStatus)>>>,
    messages: Arc<Mutex<Vec<ChatMessage>>>,
    /// Number of upcoming commits that should fail.
    failures_remaining: Arc<Mutex<u32>>,
}

impl MockUowFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next_commits(&self, n: u32) {
        *self.failures_remaining.lock().unwrap() = n;
    }

    pub fn committed(&self) -> Vec<Match> {
        self.committed.lock().unwrap().clone()
    }

    pub fn committed_count(&self) -> usize {
        self.committed.lock().unwrap().len()
    }

    pub fn status_updates(&self) -> Vec<(String, MatchStatus)> {
        self.status_updates.lock().unwrap().clone()
    }
}

struct MockUow {
    staged_matches: Vec<Match>,
    staged_messages: Vec<ChatMessage>,
    staged_updates: Vec<(String, MatchStatus)>,
    committed: Arc<Mutex<Vec<Match>>>,
    status_updates: Arc<Mutex<Vec<(String, MatchStatus)>>>,
    messages: Arc<Mutex<Vec<ChatMessage>>>,
    failures_remaining: Arc<Mutex<u32>>,
}

#[async_trait]
impl UnitOfWork for MockUow {
    async fn add_match(&mut self, m: &Match) -> Result<(), MatchingError> {
        self.staged_matches.push(m.clone());
        Ok(())
    }

    async fn update_match_status(
        &mut self,
        match_id: &str,
        status: MatchStatus,
    ) -> Result<u64, MatchingError> {
        self.staged_updates.push((match_id.to_string(), status));
        Ok(1)
    }

    async fn add_message(&mut self, message: &ChatMessage) -> Result<(), MatchingError> {
        self.staged_messages.push(message.clone());
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), MatchingError> {
        {
            let mut failures = self.failures_remaining.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                return Err(MatchingError::Internal("simulated commit failure".into()));
            }
        }

        self.committed.lock().unwrap().extend(self.staged_matches);
        self.status_updates
            .lock()
            .unwrap()
            .extend(self.staged_updates);
        self.messages.lock().unwrap().extend(self.staged_messages);
        Ok(())
    }
}

#[async_trait]
impl UnitOfWorkFactory for MockUowFactory {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, MatchingError> {
        Ok(Box::new(MockUow {
            staged_matches: Vec::new(),
            staged_messages: Vec::new(),
            staged_updates: Vec::new(),
            committed: Arc::clone(&self.committed),
            status_updates: Arc::clone(&self.status_updates),
            messages: Arc::clone(&self.messages),
            failures_remaining: Arc::clone(&self.failures_remaining),
        }))
    }
}

// ---------------------------------------------------------------------------
// Harness

/// Everything a state-machine test needs, wired like the composition root.
pub struct Harness {
    pub queue: Arc<MockQueueStore>,
    pub publisher: Arc<MockPublisher>,
    pub uow: Arc<MockUowFactory>,
    pub states: Arc<InMemoryStateStore>,
    pub service: Arc<ProcessRequestService>,
}

pub fn harness(config: MatchingConfig) -> Harness {
    let queue = Arc::new(MockQueueStore::new());
    let publisher = Arc::new(MockPublisher::new());
    let uow = Arc::new(MockUowFactory::new());
    let states = Arc::new(InMemoryStateStore::new(StateStoreConfig::default()));

    let queue_dyn: Arc<dyn QueueStore> = queue.clone();
    let find_match = FindMatchService::new(Arc::clone(&queue_dyn), config.clone());
    let service = Arc::new(ProcessRequestService::new(
        find_match,
        uow.clone(),
        Arc::clone(&queue_dyn),
        Arc::clone(&states),
        publisher.clone(),
        Arc::new(PollingMatchNotifier::new(queue_dyn)),
        config,
    ));

    Harness {
        queue,
        publisher,
        uow,
        states,
        service,
    }
}

// ---------------------------------------------------------------------------
// Fixtures

pub fn test_criteria(language: &str, fluency: u8, topics: &[&str], dating: bool) -> MatchCriteria {
    MatchCriteria::new(
        language,
        fluency,
        topics.iter().map(|t| t.to_string()).collect(),
        dating,
    )
    .expect("test criteria should be valid")
}

pub fn test_user(user_id: i64, criteria: MatchCriteria) -> User {
    User {
        user_id,
        username: format!("user{user_id}"),
        criteria,
        gender: "other".to_string(),
        lang_code: "en".to_string(),
        created_at: OffsetDateTime::now_utc(),
        status: UserStatus::Waiting,
    }
}

/// A search-started request for `user`, created `age_secs` in the past so
/// tests can steer the delay/timeout gates.
pub fn test_request(user: &User, age_secs: i64) -> MatchRequest {
    let created_at = OffsetDateTime::now_utc() - time::Duration::seconds(age_secs);
    MatchRequest::new(
        user.user_id,
        user.username.clone(),
        user.criteria.clone(),
        user.gender.clone(),
        user.lang_code.clone(),
        SearchStatus::SearchStarted,
        created_at,
    )
}

pub fn request_with_status(user: &User, status: SearchStatus, age_secs: i64) -> MatchRequest {
    let created_at = OffsetDateTime::now_utc() - time::Duration::seconds(age_secs);
    MatchRequest::new(
        user.user_id,
        user.username.clone(),
        user.criteria.clone(),
        user.gender.clone(),
        user.lang_code.clone(),
        status,
        created_at,
    )
}
