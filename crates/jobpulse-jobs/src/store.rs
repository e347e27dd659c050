use async_trait::async_trait;
use jobpulse_core::{JobState, UserKey};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Keyed storage for the latest run state of each user. Implementations
/// must be safe to share across tasks; a deployment with several
/// instances substitutes a shared backend here.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn get(&self, user_key: &UserKey) -> Option<JobState>;

    /// Unconditionally replaces the user's state.
    async fn put(&self, state: JobState);

    /// Replaces the user's state only while it still belongs to the same
    /// run. Returns whether the write happened.
    async fn put_if_current(&self, state: JobState) -> bool;
}

#[derive(Debug, Default)]
pub struct MemoryJobStore {
    states: RwLock<HashMap<UserKey, JobState>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn get(&self, user_key: &UserKey) -> Option<JobState> {
        self.states.read().await.get(user_key).cloned()
    }

    async fn put(&self, state: JobState) {
        self.states
            .write()
            .await
            .insert(state.user_key.clone(), state);
    }

    async fn put_if_current(&self, state: JobState) -> bool {
        let mut states = self.states.write().await;
        let is_current = states
            .get(&state.user_key)
            .is_some_and(|existing| existing.run_id == state.run_id);
        if is_current {
            states.insert(state.user_key.clone(), state);
        }
        is_current
    }
}
