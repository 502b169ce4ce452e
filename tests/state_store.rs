//! LRU and TTL behavior of the in-process state store.

use std::time::Duration;

use tandem::config::StateStoreConfig;
use tandem::models::{UserState, UserStatus};
use tandem::stores::InMemoryStateStore;
use time::OffsetDateTime;

fn store_with(max_size: usize, ttl: Duration) -> InMemoryStateStore {
    InMemoryStateStore::new(StateStoreConfig {
        max_size,
        ttl,
        sweep_interval: Duration::from_secs(60),
    })
}

fn aged_state(user_id: i64, age: Duration) -> UserState {
    let mut state = UserState::new(user_id, UserStatus::Waiting);
    state.created_at = OffsetDateTime::now_utc() - age;
    state
}

#[test]
fn save_get_update_delete() {
    let store = store_with(10, Duration::from_secs(300));

    store.save_state(UserState::new(1, UserStatus::Waiting));
    let state = store.get_state(1).expect("state present");
    assert_eq!(state.status, UserStatus::Waiting);
    assert_eq!(state.retry_count, 0);

    store.update_state(1, UserStatus::Matched);
    assert_eq!(store.get_state(1).unwrap().status, UserStatus::Matched);

    store.delete_state(1);
    assert!(store.get_state(1).is_none());
}

#[test]
fn update_on_missing_user_is_a_no_op() {
    let store = store_with(10, Duration::from_secs(300));
    store.update_state(99, UserStatus::Expired);
    assert!(store.get_state(99).is_none());
    assert!(store.is_empty());
}

#[test]
fn insert_overflow_evicts_least_recently_used() {
    let store = store_with(2, Duration::from_secs(300));

    store.save_state(UserState::new(1, UserStatus::Waiting));
    store.save_state(UserState::new(2, UserStatus::Waiting));

    // Touch user 1 so user 2 becomes the eviction victim.
    store.get_state(1);
    store.save_state(UserState::new(3, UserStatus::Waiting));

    assert!(store.get_state(1).is_some());
    assert!(store.get_state(2).is_none(), "LRU entry evicted");
    assert!(store.get_state(3).is_some());
    assert_eq!(store.len(), 2);
}

#[test]
fn expired_entries_are_evicted_on_read() {
    let store = store_with(10, Duration::from_millis(50));

    store.save_state(aged_state(1, Duration::from_millis(100)));
    assert!(store.get_state(1).is_none(), "expired state reads as absent");
    assert!(store.is_empty(), "read evicts the expired entry");
}

#[test]
fn sweep_removes_only_expired_entries() {
    let store = store_with(10, Duration::from_secs(1));

    store.save_state(aged_state(1, Duration::from_secs(5)));
    store.save_state(aged_state(2, Duration::from_secs(5)));
    store.save_state(UserState::new(3, UserStatus::Waiting));

    let evicted = store.sweep_expired();
    assert_eq!(evicted, 2);
    assert_eq!(store.len(), 1);
    assert!(store.get_state(3).is_some());
}

#[test]
fn state_expiry_uses_creation_time() {
    let fresh = UserState::new(1, UserStatus::Waiting);
    assert!(!fresh.is_expired(Duration::from_secs(300)));

    let old = aged_state(1, Duration::from_secs(301));
    assert!(old.is_expired(Duration::from_secs(300)));

    // Updates move last_updated but never created_at.
    let updated = old.with_status(UserStatus::Matched);
    assert!(updated.is_expired(Duration::from_secs(300)));
    assert_eq!(updated.retry_count, old.retry_count);

    let retried = fresh.increment_retry();
    assert_eq!(retried.retry_count, 1);
}
