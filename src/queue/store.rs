//! Store capability the queue is built on.
//!
//! The queue needs a list (immediate delivery) and a sorted set (delayed
//! delivery) per topic. Any key-value store offering the operations below
//! can carry it; `RedisPool` is the production implementation and
//! `MemoryStore` the in-process one.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::redis::PoolError;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Store temporarily unreachable (e.g. circuit breaker open)
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

impl From<PoolError> for StoreError {
    fn from(err: PoolError) -> Self {
        match err {
            PoolError::Redis(e) => StoreError::Redis(e),
            PoolError::CircuitOpen => StoreError::Unavailable("Circuit breaker is open".to_string()),
            PoolError::ConnectionUnavailable(msg) => StoreError::Unavailable(msg),
        }
    }
}

/// Backing store for topics.
///
/// Implementations must be `Send + Sync`: one store is shared by producers
/// and every consumer loop without extra locking. An empty list or missing
/// key is `Ok(None)` / `Ok(vec![])`, never an error.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Append `payload` to the tail of the list at `key`.
    async fn push(&self, key: &str, payload: &str) -> Result<(), StoreError>;

    /// Remove and return the head of the list at `key`.
    async fn pop(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Like `pop`, but wait up to `timeout` for an element to arrive.
    async fn blocking_pop(&self, key: &str, timeout: Duration) -> Result<Option<String>, StoreError>;

    /// Number of elements in the list at `key`.
    async fn list_len(&self, key: &str) -> Result<usize, StoreError>;

    /// Add `member` to the sorted set at `key` with `score`.
    async fn zset_add(&self, key: &str, score: f64, member: &str) -> Result<(), StoreError>;

    /// Members of the sorted set with `min <= score <= max`, lowest score first.
    async fn zset_range_by_score(
        &self,
        key: &str,
        min: f64,
        max: f64,
    ) -> Result<Vec<String>, StoreError>;

    /// Read and remove every member with `min <= score <= max` as one
    /// atomic unit: the members returned are exactly the members removed.
    async fn zset_take_by_score(
        &self,
        key: &str,
        min: f64,
        max: f64,
    ) -> Result<Vec<String>, StoreError>;

    /// Number of members in the sorted set at `key`.
    async fn zset_len(&self, key: &str) -> Result<usize, StoreError>;
}
