// Infrastructure
pub mod config;
pub mod error;
pub mod metrics;
pub mod redis;
pub mod telemetry;

// Queue
pub mod queue;

pub use error::{MqError, Result};
pub use queue::{Consumer, ConsumerOptions, Handler, Message, MessageStore, Producer, Topic};
