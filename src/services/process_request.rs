//! # Process-Request Use Case
//!
//! The state machine driving one broker delivery: admission gates, the
//! initial settling delay, the transactional match attempt, criterion
//! relaxation on miss, and the timeout/dead-letter exits. Decision order
//! matters and is fixed: terminal status, hard timeout, liveness, delay,
//! attempt, no-match, unexpected error.

use std::sync::Arc;
use std::time::Duration;

use time::OffsetDateTime;
use tracing::{debug, error, info, instrument, warn};

use crate::config::MatchingConfig;
use crate::error::MatchingError;
use crate::models::{Match, MatchRequest, User, UserStatus};
use crate::services::find_match::{FindMatchService, FindOutcome};
use crate::services::metrics;
use crate::services::notify::MatchNotifier;
use crate::services::publisher::MessagePublisher;
use crate::stores::{InMemoryStateStore, QueueStore, UnitOfWorkFactory};

/// Delay before retrying after a failed durable-store commit.
const COMMIT_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Ceiling on the linear relaxation backoff.
const MAX_RETRY_DELAY_SECS: u64 = 30;

/// What the handler should tell the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// The delivery is fully dealt with; acknowledge it.
    Handled,
    /// The attempt failed in a retryable way; negative-acknowledge.
    Failed,
}

pub struct ProcessRequestService {
    find_match: FindMatchService,
    uow_factory: Arc<dyn UnitOfWorkFactory>,
    queue: Arc<dyn QueueStore>,
    states: Arc<InMemoryStateStore>,
    publisher: Arc<dyn MessagePublisher>,
    notifier: Arc<dyn MatchNotifier>,
    config: MatchingConfig,
}

impl ProcessRequestService {
    pub fn new(
        find_match: FindMatchService,
        uow_factory: Arc<dyn UnitOfWorkFactory>,
        queue: Arc<dyn QueueStore>,
        states: Arc<InMemoryStateStore>,
        publisher: Arc<dyn MessagePublisher>,
        notifier: Arc<dyn MatchNotifier>,
        config: MatchingConfig,
    ) -> Self {
        Self {
            find_match,
            uow_factory,
            queue,
            states,
            publisher,
            notifier,
            config,
        }
    }

    /// Process one delivery. Infrastructure errors bubble up so the
    /// handler can count them against the circuit breaker; everything the
    /// state machine knows how to absorb is converted into an outcome.
    #[instrument(skip_all, fields(user_id = request.user_id, retry_count = request.retry_count))]
    pub async fn execute(&self, request: &MatchRequest) -> Result<ProcessOutcome, MatchingError> {
        match self.process(request).await {
            Ok(outcome) => Ok(outcome),
            Err(e) if e.is_domain() => {
                // Domain failures are handled locally, never dead-lettered.
                warn!(error = %e, "Domain error while processing request");
                metrics::record_error(e.metric_label());
                Ok(ProcessOutcome::Handled)
            }
            Err(e @ (MatchingError::Queue(_) | MatchingError::Db(_) | MatchingError::Broker(_))) => {
                // Transient infrastructure trouble: let the handler nack
                // and feed the circuit breaker.
                metrics::record_error(e.metric_label());
                Err(e)
            }
            Err(e) => {
                error!(error = %e, "Unexpected error, dead-lettering request");
                metrics::record_error(e.metric_label());
                if let Err(dl) = self
                    .publisher
                    .publish_to_dead_letter(request, &e.to_string())
                    .await
                {
                    error!(error = %dl, "Dead-letter publish failed");
                }
                Ok(ProcessOutcome::Failed)
            }
        }
    }

    async fn process(&self, request: &MatchRequest) -> Result<ProcessOutcome, MatchingError> {
        // 1. Terminal statuses only need cleanup; cancellation stays
        //    idempotent because cleanup is.
        if request.status.is_terminal() {
            debug!(status = ?request.status, "Terminal request status, cleaning up");
            self.cleanup_user(request.user_id).await;
            return Ok(ProcessOutcome::Handled);
        }

        let now = OffsetDateTime::now_utc();
        let elapsed = (now - request.created_at).max(time::Duration::ZERO);

        // 2. Hard timeout bounds total search time regardless of retries.
        if elapsed.as_seconds_f64() >= self.config.max_wait_time.as_secs_f64() {
            self.handle_timeout(request.user_id, elapsed).await;
            return Ok(ProcessOutcome::Handled);
        }

        // 3. Liveness: the queue store is the single source of truth. A
        //    user canceled or matched through another path is done.
        if !self.queue.is_searching(request.user_id).await? {
            info!("User no longer in the search queue, skipping");
            return Ok(ProcessOutcome::Handled);
        }

        // 4. Give fresh requests a moment so the queue can fill.
        if elapsed.as_seconds_f64() < self.config.initial_delay.as_secs_f64() {
            let remaining = self.config.initial_delay.as_secs_f64() - elapsed.as_seconds_f64();
            let delay = Duration::from_secs_f64(remaining.max(0.0));
            debug!(delay_ms = delay.as_millis() as u64, "Delaying initial attempt");
            self.publisher
                .publish_match_request(&request.restamped(now), delay)
                .await?;
            return Ok(ProcessOutcome::Handled);
        }

        // 5. The attempt proper, scoped by a unit of work.
        match self.find_match.execute(request.user_id).await {
            Ok(FindOutcome::Matched(matched)) => self.commit_match(request, matched).await,
            Ok(FindOutcome::NoCandidate) => self.handle_no_match(request, elapsed, now).await,
            Ok(FindOutcome::RejectedPair(seeker, candidate)) => {
                // The reservation already pulled both users out of the
                // queue; restore them before scheduling the retry.
                self.restore_users(&[&seeker, &candidate]).await;
                self.handle_no_match(request, elapsed, now).await
            }
            Err(e) if e.is_domain() => {
                // A vanished user record behaves like an empty round; the
                // relaxation/timeout path decides what happens next.
                debug!(error = %e, "Domain error during attempt, treating as no match");
                self.handle_no_match(request, elapsed, now).await
            }
            Err(e) => Err(e),
        }
    }

    /// Best-effort re-enqueue after a reservation that did not lead to a
    /// commit. Duplicate enqueues are fine; anything else is recorded.
    async fn restore_users(&self, users: &[&User]) {
        for user in users {
            match self.queue.add_to_queue(user).await {
                Ok(()) | Err(MatchingError::UserAlreadyInSearch(_)) => {}
                Err(e) => {
                    error!(error = %e, user_id = user.user_id, "Re-enqueue failed");
                    metrics::record_error("requeue_failed");
                }
            }
        }
    }

    /// Persist a reserved pair. On commit failure both users go back into
    /// the queue and the request is retried shortly.
    async fn commit_match(
        &self,
        request: &MatchRequest,
        matched: Match,
    ) -> Result<ProcessOutcome, MatchingError> {
        let staged: Result<(), MatchingError> = async {
            let mut uow = self.uow_factory.begin().await?;
            uow.add_match(&matched).await?;
            uow.commit().await
        }
        .await;

        if let Err(e) = staged {
            warn!(error = %e, match_id = %matched.match_id, "Commit failed, returning users to queue");
            metrics::record_error("commit_failed");

            self.restore_users(&[&matched.user1, &matched.user2]).await;

            self.publisher
                .publish_match_request(
                    &request.restamped(OffsetDateTime::now_utc()),
                    COMMIT_RETRY_DELAY,
                )
                .await?;

            return Ok(ProcessOutcome::Failed);
        }

        info!(
            match_id = %matched.match_id,
            user1 = matched.user1.user_id,
            user2 = matched.user2.user_id,
            "Match committed"
        );

        for user_id in [matched.user1.user_id, matched.user2.user_id] {
            self.states.update_state(user_id, UserStatus::Matched);
            metrics::record_status_change(Some(UserStatus::Waiting), UserStatus::Matched);
        }

        // The pair is durable at this point; a notification hiccup only
        // degrades polling and must not fail the delivery.
        if let Err(e) = self.notifier.announce(&matched).await {
            error!(error = %e, match_id = %matched.match_id, "Match notification failed");
            metrics::record_error("notify_failed");
        }

        Ok(ProcessOutcome::Handled)
    }

    /// No committable pair this round: either give up (limits reached) or
    /// relax the criteria and schedule a redelivery.
    async fn handle_no_match(
        &self,
        request: &MatchRequest,
        elapsed: time::Duration,
        now: OffsetDateTime,
    ) -> Result<ProcessOutcome, MatchingError> {
        if request.retry_count >= self.config.max_retries
            || elapsed.as_seconds_f64() >= self.config.max_wait_time.as_secs_f64()
        {
            self.handle_timeout(request.user_id, elapsed).await;
            return Ok(ProcessOutcome::Handled);
        }

        let relaxed = request.criteria.relax(request.retry_count);
        if relaxed != request.criteria {
            debug!(step = request.retry_count, "Criteria relaxed");
        }

        self.queue
            .update_user_criteria(request.user_id, &relaxed)
            .await?;

        let next = request.with_relaxed_criteria(relaxed, now);
        let delay = Duration::from_secs(
            (2 * (u64::from(request.retry_count) + 1)).min(MAX_RETRY_DELAY_SECS),
        );

        self.publisher.publish_match_request(&next, delay).await?;
        metrics::record_retry_attempt(next.retry_count, delay);

        Ok(ProcessOutcome::Handled)
    }

    async fn handle_timeout(&self, user_id: i64, waited: time::Duration) {
        info!(
            user_id,
            waited_secs = waited.whole_seconds(),
            "Search timed out, expiring user"
        );

        let waited = Duration::from_secs_f64(waited.as_seconds_f64().max(0.0));
        metrics::record_queue_wait_time(waited);
        metrics::record_match_attempt(false, waited, None);
        metrics::record_status_change(Some(UserStatus::Waiting), UserStatus::Expired);

        self.states.update_state(user_id, UserStatus::Expired);
        self.cleanup_user(user_id).await;
    }

    /// Remove every per-user trace: in-process state and queue records.
    /// Failures are recorded but never escalate; cleanup runs on paths
    /// that must stay idempotent.
    async fn cleanup_user(&self, user_id: i64) {
        self.states.delete_state(user_id);

        if let Err(e) = self.queue.remove_from_queue(user_id).await {
            error!(error = %e, user_id, "Queue cleanup failed");
            metrics::record_error("cleanup_error");
        }
    }
}
