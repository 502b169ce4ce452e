//! After a commit, the match id has to surface where the front-end can
//! retrieve it. This is a single capability behind one interface; the
//! default implementation writes the short-lived `match_id:{user}` mapping
//! that `/api/v0/check_match` polls.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::error::MatchingError;
use crate::models::Match;
use crate::stores::QueueStore;

#[async_trait]
pub trait MatchNotifier: Send + Sync {
    async fn announce(&self, m: &Match) -> Result<(), MatchingError>;
}

pub struct PollingMatchNotifier {
    queue: Arc<dyn QueueStore>,
}

impl PollingMatchNotifier {
    pub fn new(queue: Arc<dyn QueueStore>) -> Self {
        Self { queue }
    }
}

#[async_trait]
impl MatchNotifier for PollingMatchNotifier {
    async fn announce(&self, m: &Match) -> Result<(), MatchingError> {
        self.queue
            .reserve_match_id(m.user1.user_id, &m.match_id)
            .await?;
        self.queue
            .reserve_match_id(m.user2.user_id, &m.match_id)
            .await?;

        info!(
            match_id = %m.match_id,
            user1 = m.user1.user_id,
            user2 = m.user2.user_id,
            "Match id published for front-end polling"
        );
        Ok(())
    }
}
