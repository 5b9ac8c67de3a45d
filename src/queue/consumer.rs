//! Consuming side of the queue.
//!
//! A `Consumer` runs two independent `PollLoop`s for one topic: one pops the
//! immediate list, the other sweeps due members out of the delayed sorted
//! set. Both start on the first `set_handler` call and stop when the
//! consumer's cancellation token fires.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::ConsumerConfig;

use super::message::Message;
use super::poller::{DelayedFetcher, HandlerSlot, ListFetcher, PollLoop};
use super::store::MessageStore;
use super::topic::Topic;

pub const DEFAULT_RATE_LIMIT_PERIOD: Duration = Duration::from_micros(200);

/// Application callback for delivered messages.
///
/// Called on the polling task; the loop waits for it to return before the
/// next tick. Errors are the handler's own business; a panic is caught,
/// logged and costs only the message being handled.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle_message(&self, message: Message);
}

#[async_trait]
impl<F> Handler for F
where
    F: Fn(Message) + Send + Sync,
{
    async fn handle_message(&self, message: Message) {
        (self)(message)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerOptions {
    /// Poll interval of both loops. Zero means the default.
    pub rate_limit_period: Duration,
    /// Use a blocking pop (1s ceiling) on the immediate list
    pub use_blpop: bool,
}

impl Default for ConsumerOptions {
    fn default() -> Self {
        Self {
            rate_limit_period: DEFAULT_RATE_LIMIT_PERIOD,
            use_blpop: false,
        }
    }
}

impl ConsumerOptions {
    pub fn rate_limit_period(mut self, period: Duration) -> Self {
        self.rate_limit_period = period;
        self
    }

    pub fn use_blpop(mut self, use_blpop: bool) -> Self {
        self.use_blpop = use_blpop;
        self
    }

    fn effective_period(&self) -> Duration {
        if self.rate_limit_period.is_zero() {
            DEFAULT_RATE_LIMIT_PERIOD
        } else {
            self.rate_limit_period
        }
    }
}

impl From<&ConsumerConfig> for ConsumerOptions {
    fn from(config: &ConsumerConfig) -> Self {
        Self {
            rate_limit_period: Duration::from_micros(config.rate_limit_period_us),
            use_blpop: config.use_blpop,
        }
    }
}

pub struct Consumer {
    store: Arc<dyn MessageStore>,
    topic: Topic,
    options: ConsumerOptions,
    token: CancellationToken,
    handler: watch::Sender<HandlerSlot>,
    started: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Consumer {
    /// Create a consumer. Nothing runs until the first `set_handler`.
    ///
    /// Cancelling `token` stops both loops; there is no other stop API.
    pub fn new(
        token: CancellationToken,
        store: Arc<dyn MessageStore>,
        topic: impl Into<Topic>,
        options: ConsumerOptions,
    ) -> Self {
        let (handler, _) = watch::channel(None);
        Self {
            store,
            topic: topic.into(),
            options,
            token,
            handler,
            started: AtomicBool::new(false),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Install the dispatch target.
    ///
    /// The first call spawns both polling loops (must be called inside a
    /// Tokio runtime); later calls only swap the handler, which the loops
    /// pick up on their next tick.
    pub fn set_handler(&self, handler: Arc<dyn Handler>) {
        self.handler.send_replace(Some(handler));

        if self
            .started
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.start_loops();
        }
    }

    fn start_loops(&self) {
        let period = self.options.effective_period();

        let list_loop = PollLoop::new(
            Box::new(ListFetcher::new(
                self.store.clone(),
                self.topic.list_key(),
                self.options.use_blpop,
            )),
            self.handler.subscribe(),
            period,
            self.token.clone(),
            self.topic.name().to_string(),
        );
        let delayed_loop = PollLoop::new(
            Box::new(DelayedFetcher::new(self.store.clone(), self.topic.zset_key())),
            self.handler.subscribe(),
            period,
            self.token.clone(),
            self.topic.name().to_string(),
        );

        let handles = vec![tokio::spawn(list_loop.run()), tokio::spawn(delayed_loop.run())];
        self.tasks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .extend(handles);

        tracing::info!(
            topic = %self.topic,
            use_blpop = self.options.use_blpop,
            "Consumer started"
        );
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    pub fn options(&self) -> &ConsumerOptions {
        &self.options
    }

    /// Wait for both loops to finish. Returns immediately if the loops were
    /// never started or were already awaited; otherwise waits until the
    /// token is cancelled and the loops have wound down.
    pub async fn wait_stopped(&self) {
        let handles: Vec<_> = self
            .tasks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .drain(..)
            .collect();

        for result in join_all(handles).await {
            if let Err(e) = result {
                tracing::error!(topic = %self.topic, error = %e, "Consumer loop panicked");
            }
        }
    }
}
