//! Publishing side of the queue.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use crate::config::TopicConfig;
use crate::error::{MqError, Result};
use crate::metrics::ProducerMetrics;

use super::message::Message;
use super::store::MessageStore;
use super::topic::Topic;

/// Sorted-set score for `at`: seconds since epoch, millisecond precision,
/// rounded up so the score is never earlier than `at`.
pub(crate) fn due_score(at: DateTime<Utc>) -> f64 {
    let mut millis = at.timestamp_millis();
    if at.timestamp_subsec_nanos() % 1_000_000 != 0 {
        millis += 1;
    }
    millis as f64 / 1000.0
}

/// Writes messages to topics. Holds no state besides the store handle, so
/// one producer can be shared freely.
#[derive(Clone)]
pub struct Producer {
    store: Arc<dyn MessageStore>,
    topics: TopicConfig,
}

impl Producer {
    pub fn new(store: Arc<dyn MessageStore>) -> Self {
        Self::with_topic_config(store, TopicConfig::default())
    }

    /// Producer whose topics use the given key suffixes.
    pub fn with_topic_config(store: Arc<dyn MessageStore>, topics: TopicConfig) -> Self {
        Self { store, topics }
    }

    pub fn topic(&self, name: &str) -> Topic {
        Topic::from_config(name, &self.topics)
    }

    /// Append `body` to the topic's immediate list.
    ///
    /// Store errors are returned as-is; nothing is retried.
    pub async fn publish(&self, topic: &str, body: impl Into<Vec<u8>>) -> Result<()> {
        let topic = self.topic(topic);
        let message = Message::new("", body);
        let payload = message.encode()?;

        self.store.push(topic.list_key(), &payload).await?;
        ProducerMetrics::record_immediate();

        tracing::debug!(
            topic = %topic,
            message_id = %message.id(),
            "Message published"
        );
        Ok(())
    }

    /// Schedule `body` for delivery once `delay` has passed.
    ///
    /// A zero or negative `delay`, or one too large to represent as a
    /// timestamp, fails with `MqError::InvalidArgument` before the store is
    /// touched.
    pub async fn publish_delay_msg(
        &self,
        topic: &str,
        body: impl Into<Vec<u8>>,
        delay: Duration,
    ) -> Result<()> {
        if delay <= Duration::zero() {
            return Err(MqError::InvalidArgument(
                "delay must be greater than zero".to_string(),
            ));
        }

        let deliver_at = Utc::now()
            .checked_add_signed(delay)
            .ok_or_else(|| MqError::InvalidArgument("delay out of range".to_string()))?;
        let topic = self.topic(topic);
        let mut message = Message::new("", body);
        message.set_delay_time(deliver_at.timestamp());
        let payload = message.encode()?;

        self.store
            .zset_add(topic.zset_key(), due_score(deliver_at), &payload)
            .await?;
        ProducerMetrics::record_delayed();

        tracing::debug!(
            topic = %topic,
            message_id = %message.id(),
            deliver_at = %deliver_at,
            "Delayed message published"
        );
        Ok(())
    }
}
