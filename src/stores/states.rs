//! # In-Process State Store
//!
//! Per-user matchmaking state kept in memory, bounded by an LRU cap and a
//! TTL sweep. This store is advisory; the queue store stays the source of
//! truth for "is this user searching".

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use tracing::{debug, info};

use crate::config::StateStoreConfig;
use crate::models::{UserState, UserStatus};

pub struct InMemoryStateStore {
    inner: Mutex<StateMap>,
    config: StateStoreConfig,
}

struct StateMap {
    states: HashMap<i64, UserState>,
    /// Access order, oldest at the front. Drives LRU eviction on insert
    /// overflow.
    order: VecDeque<i64>,
}

impl InMemoryStateStore {
    pub fn new(config: StateStoreConfig) -> Self {
        Self {
            inner: Mutex::new(StateMap {
                states: HashMap::new(),
                order: VecDeque::new(),
            }),
            config,
        }
    }

    pub fn save_state(&self, state: UserState) {
        let mut map = self.inner.lock().unwrap();

        if map.states.contains_key(&state.user_id) {
            map.order.retain(|id| *id != state.user_id);
        }
        map.order.push_back(state.user_id);
        map.states.insert(state.user_id, state);

        if map.states.len() > self.config.max_size
            && let Some(oldest) = map.order.pop_front()
        {
            map.states.remove(&oldest);
            debug!(user_id = oldest, "Evicted least recently used state");
        }
    }

    /// Returns the live state for a user, refreshing its LRU position.
    /// Expired entries are evicted on read and reported as absent.
    pub fn get_state(&self, user_id: i64) -> Option<UserState> {
        let mut map = self.inner.lock().unwrap();

        let expired = match map.states.get(&user_id) {
            Some(state) => state.is_expired(self.config.ttl),
            None => return None,
        };

        if expired {
            map.states.remove(&user_id);
            map.order.retain(|id| *id != user_id);
            return None;
        }

        map.order.retain(|id| *id != user_id);
        map.order.push_back(user_id);
        map.states.get(&user_id).cloned()
    }

    pub fn update_state(&self, user_id: i64, status: UserStatus) {
        let mut map = self.inner.lock().unwrap();

        if let Some(state) = map.states.get(&user_id) {
            let updated = state.with_status(status);
            map.states.insert(user_id, updated);
        }
    }

    pub fn delete_state(&self, user_id: i64) {
        let mut map = self.inner.lock().unwrap();
        map.states.remove(&user_id);
        map.order.retain(|id| *id != user_id);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every entry older than the TTL. Returns how many were evicted.
    pub fn sweep_expired(&self) -> usize {
        let mut map = self.inner.lock().unwrap();
        let ttl = self.config.ttl;

        let expired: Vec<i64> = map
            .states
            .iter()
            .filter(|(_, state)| state.is_expired(ttl))
            .map(|(id, _)| *id)
            .collect();

        for id in &expired {
            map.states.remove(id);
        }
        map.order.retain(|id| !expired.contains(id));

        expired.len()
    }

    /// Spawn the periodic TTL sweep task.
    pub fn spawn_sweeper(self: &Arc<Self>) {
        let store = Arc::clone(self);
        let interval = store.config.sweep_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // first tick completes immediately

            loop {
                ticker.tick().await;
                let evicted = store.sweep_expired();
                if evicted > 0 {
                    info!(evicted, "Swept expired user states");
                }
            }
        });
    }
}
