//! Message envelope written to and read from the store.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A queued message.
///
/// Serialized as JSON with the body base64-encoded:
///
/// ```json
/// {"id":"…","body":"eyJuYW1lIjoiYSJ9","timestamp":1700000000,"delayTime":1700000001}
/// ```
///
/// `timestamp` and `delayTime` are whole seconds since the Unix epoch. For
/// immediate messages `delayTime == timestamp`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    id: String,
    #[serde(with = "body_base64")]
    body: Vec<u8>,
    timestamp: i64,
    #[serde(rename = "delayTime")]
    delay_time: i64,
}

impl Message {
    /// Create a message stamped with the current time.
    ///
    /// An empty `id` is replaced by a fresh UUID v4.
    pub fn new(id: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        let mut id = id.into();
        if id.is_empty() {
            id = Uuid::new_v4().to_string();
        }
        let now = Utc::now().timestamp();
        Self {
            id,
            body: body.into(),
            timestamp: now,
            delay_time: now,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn into_body(self) -> Vec<u8> {
        self.body
    }

    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn delay_time(&self) -> i64 {
        self.delay_time
    }

    pub(crate) fn set_delay_time(&mut self, delay_time: i64) {
        self.delay_time = delay_time;
    }

    pub(crate) fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub(crate) fn decode(payload: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(payload)
    }
}

mod body_base64 {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(body: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(body))
    }

    // `null` decodes as an empty body
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        match Option::<String>::deserialize(deserializer)? {
            Some(encoded) => STANDARD.decode(encoded).map_err(serde::de::Error::custom),
            None => Ok(Vec::new()),
        }
    }
}
