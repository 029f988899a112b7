//! In-memory task store.
//!
//! Mirrors the Redis layout with plain maps. Used by the test suites and for
//! running a worker without a Redis server. Can be told to fail schedule
//! queries to exercise the broker's skip-the-tick path.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use super::TaskStore;
use crate::error::StoreError;

#[derive(Default)]
struct MemoryState {
    sorted_sets: HashMap<String, HashMap<String, i64>>,
    hashes: HashMap<String, HashMap<String, String>>,
    failing_due_queries: usize,
}

/// Task store kept in process memory. Clones share the same data.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `count` calls to `get_due_ids` fail.
    pub fn fail_next_due_queries(&self, count: usize) {
        self.lock().failing_due_queries = count;
    }

    /// Ids currently in a schedule set, ordered by score.
    pub fn scheduled(&self, schedule_key: &str) -> Vec<String> {
        let state = self.lock();
        let mut entries: Vec<(i64, String)> = state
            .sorted_sets
            .get(schedule_key)
            .map(|set| set.iter().map(|(id, score)| (*score, id.clone())).collect())
            .unwrap_or_default();
        entries.sort();
        entries.into_iter().map(|(_, id)| id).collect()
    }

    /// Reads a hash field without going through the trait.
    pub fn hash_value(&self, key: &str, field: &str) -> Option<String> {
        self.lock()
            .hashes
            .get(key)
            .and_then(|hash| hash.get(field))
            .cloned()
    }

    /// Number of fields in a hash.
    pub fn hash_len(&self, key: &str) -> usize {
        self.lock().hashes.get(key).map_or(0, HashMap::len)
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl TaskStore for MemoryStore {
    async fn get_due_ids(&self, schedule_key: &str, now: i64) -> Result<Vec<String>, StoreError> {
        {
            let mut state = self.lock();
            if state.failing_due_queries > 0 {
                state.failing_due_queries -= 1;
                return Err(StoreError::Unavailable("injected failure".to_string()));
            }
        }

        let state = self.lock();
        let mut due: Vec<(i64, String)> = state
            .sorted_sets
            .get(schedule_key)
            .map(|set| {
                set.iter()
                    .filter(|(_, score)| **score <= now)
                    .map(|(id, score)| (*score, id.clone()))
                    .collect()
            })
            .unwrap_or_default();
        due.sort();
        Ok(due.into_iter().map(|(_, id)| id).collect())
    }

    async fn remove_from_schedule(
        &self,
        schedule_key: &str,
        ids: &[String],
    ) -> Result<(), StoreError> {
        let mut state = self.lock();
        if let Some(set) = state.sorted_sets.get_mut(schedule_key) {
            for id in ids {
                set.remove(id);
            }
        }
        Ok(())
    }

    async fn get_message(&self, message_key: &str, task_id: &str) -> Result<String, StoreError> {
        self.hash_value(message_key, task_id)
            .ok_or_else(|| StoreError::MissingMessage(task_id.to_string()))
    }

    async fn delete_message(&self, message_key: &str, task_id: &str) -> Result<(), StoreError> {
        let mut state = self.lock();
        if let Some(hash) = state.hashes.get_mut(message_key) {
            hash.remove(task_id);
        }
        Ok(())
    }

    async fn put_result(
        &self,
        result_key: &str,
        task_id: &str,
        envelope: &str,
    ) -> Result<(), StoreError> {
        self.lock()
            .hashes
            .entry(result_key.to_string())
            .or_default()
            .insert(task_id.to_string(), envelope.to_string());
        Ok(())
    }

    async fn put_message(
        &self,
        message_key: &str,
        task_id: &str,
        message: &str,
    ) -> Result<(), StoreError> {
        self.lock()
            .hashes
            .entry(message_key.to_string())
            .or_default()
            .insert(task_id.to_string(), message.to_string());
        Ok(())
    }

    async fn add_to_schedule(
        &self,
        schedule_key: &str,
        task_id: &str,
        execute_at: i64,
    ) -> Result<(), StoreError> {
        self.lock()
            .sorted_sets
            .entry(schedule_key.to_string())
            .or_default()
            .insert(task_id.to_string(), execute_at);
        Ok(())
    }

    async fn get_result(
        &self,
        result_key: &str,
        task_id: &str,
    ) -> Result<Option<String>, StoreError> {
        Ok(self.hash_value(result_key, task_id))
    }
}
