//! # Find-Match Use Case
//!
//! One reservation attempt for one seeker: load the seeker, ask the queue
//! store for an atomically reserved candidate, re-check full compatibility
//! against fresh data, and build the match. There is no candidate loop:
//! each broker delivery is a single attempt, and redelivery drives the next.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, instrument};

use crate::config::MatchingConfig;
use crate::error::MatchingError;
use crate::models::{Match, User};
use crate::services::metrics;
use crate::stores::QueueStore;

/// Outcome of one reservation attempt.
#[derive(Debug)]
pub enum FindOutcome {
    /// A committable pair was reserved.
    Matched(Match),
    /// Nothing reservable in the queue this round.
    NoCandidate,
    /// A pair was reserved but failed the full compatibility re-check.
    /// Both users are already out of the queue; the caller restores them.
    RejectedPair(User, User),
}

pub struct FindMatchService {
    queue: Arc<dyn QueueStore>,
    config: MatchingConfig,
}

impl FindMatchService {
    pub fn new(queue: Arc<dyn QueueStore>, config: MatchingConfig) -> Self {
        Self { queue, config }
    }

    /// Attempt to find and reserve a partner for `seeker_id`.
    #[instrument(skip(self), fields(user_id = seeker_id))]
    pub async fn execute(&self, seeker_id: i64) -> Result<FindOutcome, MatchingError> {
        let started = Instant::now();

        let seeker = self
            .queue
            .find_by_id(seeker_id)
            .await?
            .ok_or(MatchingError::UserNotFound(seeker_id))?;

        let queue_size = self.queue.queue_size().await?;
        metrics::record_queue_size(queue_size);
        debug!(queue_size, "Searching for a reservable candidate");

        let Some(candidate) = self.queue.find_and_reserve_match(&seeker).await? else {
            metrics::record_match_attempt(false, started.elapsed(), None);
            return Ok(FindOutcome::NoCandidate);
        };

        // The prefilter ran against possibly stale criteria; re-check the
        // full compatibility contract before committing to the pair.
        if !seeker.is_compatible_with(&candidate) {
            debug!(
                candidate_id = candidate.user_id,
                "Reserved candidate failed the compatibility re-check"
            );
            metrics::record_match_attempt(false, started.elapsed(), None);
            return Ok(FindOutcome::RejectedPair(seeker, candidate));
        }

        let score = seeker.compatibility_score(&candidate, &self.config.scoring_weights);
        if score.total < self.config.compatibility_threshold {
            debug!(
                candidate_id = candidate.user_id,
                total = score.total,
                "Reserved candidate scored below the threshold"
            );
            metrics::record_match_attempt(false, started.elapsed(), None);
            return Ok(FindOutcome::RejectedPair(seeker, candidate));
        }

        let matched = Match::create(seeker, candidate, score.total)?;
        info!(
            match_id = %matched.match_id,
            user1 = matched.user1.user_id,
            user2 = matched.user2.user_id,
            score = matched.compatibility_score,
            "Candidate pair reserved"
        );

        metrics::record_match_attempt(true, started.elapsed(), Some(matched.compatibility_score));
        Ok(FindOutcome::Matched(matched))
    }
}
