//! Message queue on a key-value store.
//!
//! Producers write to a topic's immediate list or delayed sorted set;
//! consumers poll both and dispatch to a `Handler`.
//!
//! # Architecture
//!
//! - `MessageStore`: capability trait over lists and sorted sets
//!   - `RedisPool`: Redis lists / sorted sets, `MULTI`/`EXEC` for sweeps
//!   - `MemoryStore`: in-process, for tests and Redis-less runs
//! - `Producer`: `publish` (list) and `publish_delay_msg` (sorted set)
//! - `Consumer`: two `PollLoop`s, one per `FetchDue` strategy
//!
//! # Example
//!
//! ```rust,ignore
//! let store: Arc<dyn MessageStore> = Arc::new(RedisPool::new(settings.redis)?);
//! let token = CancellationToken::new();
//!
//! let consumer = Consumer::new(token.clone(), store.clone(), "orders", ConsumerOptions::default());
//! consumer.set_handler(Arc::new(|m: Message| println!("{}", m.id())));
//!
//! let producer = Producer::new(store);
//! producer.publish("orders", b"now".to_vec()).await?;
//! producer.publish_delay_msg("orders", b"later".to_vec(), chrono::Duration::seconds(5)).await?;
//! ```

pub mod consumer;
pub mod memory_store;
mod message;
pub mod poller;
pub mod producer;
mod redis_store;
pub mod store;
mod topic;

pub use consumer::{Consumer, ConsumerOptions, Handler, DEFAULT_RATE_LIMIT_PERIOD};
pub use memory_store::MemoryStore;
pub use message::Message;
pub use poller::{DelayedFetcher, FetchDue, ListFetcher, BLOCKING_POP_TIMEOUT};
pub use producer::Producer;
pub use store::{MessageStore, StoreError};
pub use topic::{Topic, DEFAULT_LIST_SUFFIX, DEFAULT_ZSET_SUFFIX};
