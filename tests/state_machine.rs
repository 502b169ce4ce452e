//! End-to-end scenarios for the process-request state machine, driven
//! through mock stores that reproduce the queue store's atomic
//! reservation semantics.

mod common;

use std::time::Duration;

use common::{harness, request_with_status, test_criteria, test_request, test_user};
use tandem::config::MatchingConfig;
use tandem::models::SearchStatus;
use tandem::services::ProcessOutcome;
use tandem::stores::QueueStore;

#[test_log::test(tokio::test)]
async fn happy_pair_commits_and_announces() {
    let h = harness(MatchingConfig::default());
    let criteria = test_criteria("en", 5, &["music", "art"], true);
    let a = test_user(1, criteria.clone());
    let b = test_user(2, criteria);

    h.queue.add_to_queue(&a).await.unwrap();
    h.queue.add_to_queue(&b).await.unwrap();

    let outcome = h.service.execute(&test_request(&a, 5)).await.unwrap();
    assert_eq!(outcome, ProcessOutcome::Handled);

    let committed = h.uow.committed();
    assert_eq!(committed.len(), 1);
    let matched = &committed[0];
    assert!(matched.contains_user(1) && matched.contains_user(2));
    assert!(matched.compatibility_score >= 0.7);

    // Queue consistency: no list entries, no sentinels left behind.
    assert!(h.queue.waiting_ids().is_empty());
    assert!(!h.queue.has_sentinel(1));
    assert!(!h.queue.has_sentinel(2));

    // Both users can poll the same match id.
    let id1 = h.queue.reserved_match_id(1).expect("user 1 announced");
    let id2 = h.queue.reserved_match_id(2).expect("user 2 announced");
    assert_eq!(id1, id2);
    assert_eq!(id1, matched.match_id);

    assert_eq!(h.publisher.published_count(), 0);
}

#[test_log::test(tokio::test)]
async fn fresh_requests_are_delayed_before_first_attempt() {
    let h = harness(MatchingConfig::default());
    let a = test_user(1, test_criteria("en", 5, &["music"], false));
    h.queue.add_to_queue(&a).await.unwrap();

    let outcome = h.service.execute(&test_request(&a, 0)).await.unwrap();
    assert_eq!(outcome, ProcessOutcome::Handled);

    let (redelivery, delay) = h.publisher.last_published().expect("redelivery scheduled");
    assert!(delay > Duration::ZERO && delay <= Duration::from_secs(1));
    assert_eq!(redelivery.retry_count, 0, "initial delay is not a retry");

    assert_eq!(h.uow.committed_count(), 0);
    assert_eq!(h.queue.waiting_ids(), vec![1]);
}

#[test_log::test(tokio::test)]
async fn users_no_longer_searching_are_skipped() {
    let h = harness(MatchingConfig::default());
    let a = test_user(1, test_criteria("en", 5, &["music"], false));
    // Never enqueued: canceled or matched through another path.

    let outcome = h.service.execute(&test_request(&a, 5)).await.unwrap();
    assert_eq!(outcome, ProcessOutcome::Handled);
    assert_eq!(h.publisher.published_count(), 0);
    assert_eq!(h.uow.committed_count(), 0);
}

#[test_log::test(tokio::test)]
async fn cancellation_is_idempotent() {
    let h = harness(MatchingConfig::default());
    let a = test_user(1, test_criteria("en", 5, &["music"], false));
    h.queue.add_to_queue(&a).await.unwrap();
    h.states.save_state(tandem::models::UserState::new(
        1,
        tandem::models::UserStatus::Waiting,
    ));

    let cancel = request_with_status(&a, SearchStatus::SearchCanceled, 5);

    let first = h.service.execute(&cancel).await.unwrap();
    assert_eq!(first, ProcessOutcome::Handled);
    assert!(h.queue.waiting_ids().is_empty());
    assert!(!h.queue.has_sentinel(1));
    assert!(h.states.get_state(1).is_none());

    // A duplicate cancel leaves the system in the same state.
    let second = h.service.execute(&cancel).await.unwrap();
    assert_eq!(second, ProcessOutcome::Handled);
    assert!(h.queue.waiting_ids().is_empty());
    assert!(!h.queue.has_sentinel(1));
    assert!(h.states.get_state(1).is_none());
    assert_eq!(h.publisher.published_count(), 0);
}

#[test_log::test(tokio::test)]
async fn hard_timeout_expires_the_user() {
    let h = harness(MatchingConfig::default());
    let f = test_user(6, test_criteria("en", 5, &["rare"], false));
    h.queue.add_to_queue(&f).await.unwrap();

    // Older than max_wait_time (150 s).
    let outcome = h.service.execute(&test_request(&f, 200)).await.unwrap();
    assert_eq!(outcome, ProcessOutcome::Handled);

    assert!(h.queue.waiting_ids().is_empty());
    assert!(!h.queue.has_sentinel(6));
    assert!(h.states.get_state(6).is_none());
    assert_eq!(h.publisher.published_count(), 0, "expired requests are not redelivered");
}

#[test_log::test(tokio::test)]
async fn retry_budget_exhaustion_times_out() {
    let config = MatchingConfig::default();
    let h = harness(config.clone());
    let a = test_user(1, test_criteria("en", 5, &["music"], false));
    h.queue.add_to_queue(&a).await.unwrap();

    let mut request = test_request(&a, 5);
    request.retry_count = config.max_retries;

    let outcome = h.service.execute(&request).await.unwrap();
    assert_eq!(outcome, ProcessOutcome::Handled);
    assert!(h.queue.waiting_ids().is_empty(), "timed-out user leaves the queue");
    assert_eq!(h.publisher.published_count(), 0);
}

#[test_log::test(tokio::test)]
async fn no_match_relaxes_criteria_and_schedules_retry() {
    let h = harness(MatchingConfig::default());
    let d = test_user(4, test_criteria("en", 5, &["specialty"], false));
    h.queue.add_to_queue(&d).await.unwrap();

    let mut request = test_request(&d, 20);
    request.retry_count = 5;

    let outcome = h.service.execute(&request).await.unwrap();
    assert_eq!(outcome, ProcessOutcome::Handled);

    let (redelivery, delay) = h.publisher.last_published().expect("retry scheduled");
    assert_eq!(redelivery.retry_count, 6);
    assert_eq!(delay, Duration::from_secs(12)); // 2 * (5 + 1)
    assert!(redelivery.criteria.topics.iter().any(|t| t == "general"));

    // The relaxed criteria are also persisted for other seekers' prefilter.
    let stored = h.queue.criteria_of(4).expect("criteria stored");
    assert!(stored.topics.iter().any(|t| t == "general"));
    assert_eq!(h.queue.waiting_ids(), vec![4]);
}

#[test_log::test(tokio::test)]
async fn retry_delay_is_capped() {
    let h = harness(MatchingConfig::default());
    let a = test_user(1, test_criteria("en", 5, &["music"], false));
    h.queue.add_to_queue(&a).await.unwrap();

    let mut request = test_request(&a, 5);
    request.retry_count = 19;

    h.service.execute(&request).await.unwrap();
    let (_, delay) = h.publisher.last_published().unwrap();
    assert_eq!(delay, Duration::from_secs(30));
}

#[test_log::test(tokio::test)]
async fn commit_failure_restores_queue_and_retries() {
    let h = harness(MatchingConfig::default());
    let criteria = test_criteria("en", 5, &["music"], false);
    let a = test_user(1, criteria.clone());
    let b = test_user(2, criteria);
    h.queue.add_to_queue(&a).await.unwrap();
    h.queue.add_to_queue(&b).await.unwrap();

    h.uow.fail_next_commits(1);

    let request = test_request(&a, 5);
    let outcome = h.service.execute(&request).await.unwrap();
    assert_eq!(outcome, ProcessOutcome::Failed);
    assert_eq!(h.uow.committed_count(), 0);

    // Both users are back in the queue with fresh sentinels.
    let mut waiting = h.queue.waiting_ids();
    waiting.sort_unstable();
    assert_eq!(waiting, vec![1, 2]);
    assert!(h.queue.has_sentinel(1));
    assert!(h.queue.has_sentinel(2));

    let (_, delay) = h.publisher.last_published().expect("short retry scheduled");
    assert_eq!(delay, Duration::from_secs(2));

    // The redelivered attempt succeeds.
    let outcome = h.service.execute(&request).await.unwrap();
    assert_eq!(outcome, ProcessOutcome::Handled);
    assert_eq!(h.uow.committed_count(), 1);
    assert!(h.queue.waiting_ids().is_empty());
}

#[test_log::test(tokio::test)]
async fn losing_worker_backs_off_cleanly() {
    let h = harness(MatchingConfig::default());
    let criteria = test_criteria("en", 5, &["music"], false);
    for id in [1, 2, 3] {
        h.queue
            .add_to_queue(&test_user(id, criteria.clone()))
            .await
            .unwrap();
    }

    let a = test_user(1, criteria.clone());
    let c = test_user(3, criteria);
    let request_a = test_request(&a, 5);
    let request_c = test_request(&c, 5);

    // Two workers race on overlapping candidates.
    let (outcome_a, outcome_c) =
        tokio::join!(h.service.execute(&request_a), h.service.execute(&request_c));
    assert_eq!(outcome_a.unwrap(), ProcessOutcome::Handled);
    assert_eq!(outcome_c.unwrap(), ProcessOutcome::Handled);

    // Exactly one pair committed; the third user is still waiting.
    let committed = h.uow.committed();
    assert_eq!(committed.len(), 1);
    let matched = &committed[0];
    assert_ne!(matched.user1.user_id, matched.user2.user_id);

    let waiting = h.queue.waiting_ids();
    assert_eq!(waiting.len(), 1);
    let leftover = waiting[0];
    assert!(!matched.contains_user(leftover));

    // No user appears both in the match and in the queue.
    let mut all: Vec<i64> = vec![matched.user1.user_id, matched.user2.user_id, leftover];
    all.sort_unstable();
    assert_eq!(all, vec![1, 2, 3]);
}

#[test_log::test(tokio::test)]
async fn rejected_pair_is_restored_and_converges_after_relaxation() {
    let h = harness(MatchingConfig::default());
    let d = test_user(4, test_criteria("en", 5, &["specialty"], false));
    let e = test_user(5, test_criteria("en", 5, &["other"], false));
    h.queue.add_to_queue(&d).await.unwrap();
    h.queue.add_to_queue(&e).await.unwrap();

    // Same language and fluency, disjoint topics: the prefilter reserves
    // the pair, the full check rejects it, and both users are restored.
    let mut request = test_request(&d, 20);
    request.retry_count = 5;

    let outcome = h.service.execute(&request).await.unwrap();
    assert_eq!(outcome, ProcessOutcome::Handled);

    let mut waiting = h.queue.waiting_ids();
    waiting.sort_unstable();
    assert_eq!(waiting, vec![4, 5], "rejected pair returns to the queue");
    assert_eq!(h.uow.committed_count(), 0);

    // E reaches relaxation step 5 as well.
    h.queue
        .update_user_criteria(5, &e.criteria.relax(5))
        .await
        .unwrap();

    // D's redelivered request now finds a committable pair via "general".
    let (redelivered, _) = h.publisher.last_published().unwrap();
    let outcome = h.service.execute(&redelivered).await.unwrap();
    assert_eq!(outcome, ProcessOutcome::Handled);
    assert_eq!(h.uow.committed_count(), 1);
    assert!(h.queue.waiting_ids().is_empty());
}
