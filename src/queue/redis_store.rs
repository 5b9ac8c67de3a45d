//! `MessageStore` on Redis lists and sorted sets.

use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;

use crate::redis::RedisPool;

use super::store::{MessageStore, StoreError};

/// `BLPOP` timeout in whole seconds, rounded up. Fractional timeouts need
/// Redis 6; zero would block forever.
fn blpop_timeout_secs(timeout: Duration) -> u64 {
    let secs = timeout.as_secs() + u64::from(timeout.subsec_nanos() > 0);
    secs.max(1)
}

#[async_trait]
impl MessageStore for RedisPool {
    async fn push(&self, key: &str, payload: &str) -> Result<(), StoreError> {
        self.execute(|mut conn| async move { conn.rpush::<_, _, ()>(key, payload).await })
            .await?;
        Ok(())
    }

    async fn pop(&self, key: &str) -> Result<Option<String>, StoreError> {
        let value = self
            .execute(|mut conn| async move {
                let value: Option<String> = redis::cmd("LPOP").arg(key).query_async(&mut conn).await?;
                Ok(value)
            })
            .await?;
        Ok(value)
    }

    async fn blocking_pop(&self, key: &str, timeout: Duration) -> Result<Option<String>, StoreError> {
        let popped = self
            .execute_blocking(key, |mut conn| async move {
                // Nil reply on timeout
                let popped: Option<(String, String)> = redis::cmd("BLPOP")
                    .arg(key)
                    .arg(blpop_timeout_secs(timeout))
                    .query_async(&mut conn)
                    .await?;
                Ok(popped)
            })
            .await?;
        Ok(popped.map(|(_, value)| value))
    }

    async fn list_len(&self, key: &str) -> Result<usize, StoreError> {
        let len = self
            .execute(|mut conn| async move { conn.llen::<_, usize>(key).await })
            .await?;
        Ok(len)
    }

    async fn zset_add(&self, key: &str, score: f64, member: &str) -> Result<(), StoreError> {
        self.execute(|mut conn| async move { conn.zadd::<_, _, _, ()>(key, member, score).await })
            .await?;
        Ok(())
    }

    async fn zset_range_by_score(
        &self,
        key: &str,
        min: f64,
        max: f64,
    ) -> Result<Vec<String>, StoreError> {
        let members = self
            .execute(|mut conn| async move {
                conn.zrangebyscore::<_, _, _, Vec<String>>(key, min, max).await
            })
            .await?;
        Ok(members)
    }

    async fn zset_take_by_score(
        &self,
        key: &str,
        min: f64,
        max: f64,
    ) -> Result<Vec<String>, StoreError> {
        // MULTI/EXEC: both commands see the same set, nothing can slip in between
        let (members,): (Vec<String>,) = self
            .execute(|mut conn| async move {
                let mut pipe = redis::pipe();
                pipe.atomic()
                    .cmd("ZRANGEBYSCORE")
                    .arg(key)
                    .arg(min)
                    .arg(max)
                    .cmd("ZREMRANGEBYSCORE")
                    .arg(key)
                    .arg(min)
                    .arg(max)
                    .ignore();
                pipe.query_async(&mut conn).await
            })
            .await?;
        Ok(members)
    }

    async fn zset_len(&self, key: &str) -> Result<usize, StoreError> {
        let len = self
            .execute(|mut conn| async move { conn.zcard::<_, usize>(key).await })
            .await?;
        Ok(len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blpop_timeout_is_whole_seconds() {
        assert_eq!(blpop_timeout_secs(Duration::from_secs(1)), 1);
        assert_eq!(blpop_timeout_secs(Duration::from_millis(1500)), 2);
        assert_eq!(blpop_timeout_secs(Duration::from_millis(10)), 1);
        assert_eq!(blpop_timeout_secs(Duration::ZERO), 1);
    }
}
