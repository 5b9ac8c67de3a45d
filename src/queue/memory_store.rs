//! In-process `MessageStore`.
//!
//! Same semantics as the Redis store, held in `DashMap`s. Each key's entry
//! lock makes pop and take-by-score atomic per key. Contents are lost when
//! the process exits.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::Notify;

use super::store::{MessageStore, StoreError};

#[derive(Default)]
pub struct MemoryStore {
    lists: DashMap<String, VecDeque<String>>,
    /// Sorted sets as (score, member), kept ordered by score then member
    zsets: DashMap<String, Vec<(f64, String)>>,
    pushed: Notify,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn try_pop(&self, key: &str) -> Option<String> {
        let mut list = self.lists.get_mut(key)?;
        let value = list.pop_front();
        if list.is_empty() {
            drop(list);
            self.lists.remove_if(key, |_, list| list.is_empty());
        }
        value
    }
}

fn in_range(score: f64, min: f64, max: f64) -> bool {
    score >= min && score <= max
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn push(&self, key: &str, payload: &str) -> Result<(), StoreError> {
        self.lists
            .entry(key.to_string())
            .or_default()
            .push_back(payload.to_string());
        self.pushed.notify_waiters();
        Ok(())
    }

    async fn pop(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.try_pop(key))
    }

    async fn blocking_pop(&self, key: &str, timeout: Duration) -> Result<Option<String>, StoreError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            // Register before checking so a push in between is not missed
            let notified = self.pushed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(value) = self.try_pop(key) {
                return Ok(Some(value));
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn list_len(&self, key: &str) -> Result<usize, StoreError> {
        Ok(self.lists.get(key).map(|l| l.len()).unwrap_or(0))
    }

    async fn zset_add(&self, key: &str, score: f64, member: &str) -> Result<(), StoreError> {
        let mut set = self.zsets.entry(key.to_string()).or_default();

        // Re-adding a member updates its score, as ZADD does
        set.retain(|(_, m)| m != member);
        let at = set.partition_point(|(s, m)| (*s, m.as_str()) < (score, member));
        set.insert(at, (score, member.to_string()));
        Ok(())
    }

    async fn zset_range_by_score(
        &self,
        key: &str,
        min: f64,
        max: f64,
    ) -> Result<Vec<String>, StoreError> {
        Ok(self
            .zsets
            .get(key)
            .map(|set| {
                set.iter()
                    .filter(|(s, _)| in_range(*s, min, max))
                    .map(|(_, m)| m.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn zset_take_by_score(
        &self,
        key: &str,
        min: f64,
        max: f64,
    ) -> Result<Vec<String>, StoreError> {
        let Some(mut set) = self.zsets.get_mut(key) else {
            return Ok(Vec::new());
        };

        let mut taken = Vec::new();
        set.retain(|(s, m)| {
            if in_range(*s, min, max) {
                taken.push(m.clone());
                false
            } else {
                true
            }
        });

        if set.is_empty() {
            drop(set);
            self.zsets.remove_if(key, |_, set| set.is_empty());
        }
        Ok(taken)
    }

    async fn zset_len(&self, key: &str) -> Result<usize, StoreError> {
        Ok(self.zsets.get(key).map(|s| s.len()).unwrap_or(0))
    }
}
