//! Poll-decode-dispatch loop shared by both consumer paths.
//!
//! A `PollLoop` ticks on its own interval, asks its `FetchDue` source for
//! whatever is ready, decodes each payload and hands it to the current
//! handler. It does not know whether it is draining a list or sweeping a
//! sorted set; that is the fetcher's business.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use futures::FutureExt;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::metrics::ConsumerMetrics;

use super::consumer::Handler;
use super::message::Message;
use super::store::{MessageStore, StoreError};

/// Wait ceiling of a blocking pop, independent of the poll interval.
pub const BLOCKING_POP_TIMEOUT: Duration = Duration::from_secs(1);

/// Minimum gap between two warnings for the same run of poll failures.
const POLL_ERROR_LOG_INTERVAL: Duration = Duration::from_secs(10);

pub(crate) type HandlerSlot = Option<Arc<dyn Handler>>;

/// Source of ready payloads for one loop.
///
/// Whatever `fetch_due` returns has already been removed from the store.
#[async_trait]
pub trait FetchDue: Send + Sync {
    /// Label used in logs and metrics.
    fn path(&self) -> &'static str;

    async fn fetch_due(&self) -> Result<Vec<String>, StoreError>;
}

/// Pops the head of a topic's immediate list.
pub struct ListFetcher {
    store: Arc<dyn MessageStore>,
    key: String,
    blocking: bool,
}

impl ListFetcher {
    pub fn new(store: Arc<dyn MessageStore>, key: impl Into<String>, blocking: bool) -> Self {
        Self {
            store,
            key: key.into(),
            blocking,
        }
    }
}

#[async_trait]
impl FetchDue for ListFetcher {
    fn path(&self) -> &'static str {
        "list"
    }

    async fn fetch_due(&self) -> Result<Vec<String>, StoreError> {
        let popped = if self.blocking {
            self.store.blocking_pop(&self.key, BLOCKING_POP_TIMEOUT).await?
        } else {
            self.store.pop(&self.key).await?
        };
        Ok(popped.into_iter().collect())
    }
}

/// Sweeps every due member out of a topic's delayed sorted set.
pub struct DelayedFetcher {
    store: Arc<dyn MessageStore>,
    key: String,
}

impl DelayedFetcher {
    pub fn new(store: Arc<dyn MessageStore>, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
        }
    }
}

/// Current time as a sorted-set score, rounded down to the millisecond.
fn now_score() -> f64 {
    Utc::now().timestamp_millis() as f64 / 1000.0
}

#[async_trait]
impl FetchDue for DelayedFetcher {
    fn path(&self) -> &'static str {
        "zset"
    }

    async fn fetch_due(&self) -> Result<Vec<String>, StoreError> {
        self.store.zset_take_by_score(&self.key, 0.0, now_score()).await
    }
}

/// Run of consecutive failed polls.
#[derive(Debug, Default)]
struct FailureStreak {
    consecutive: u64,
    last_warned: Option<Instant>,
}

impl FailureStreak {
    /// Count one failure. Returns true when it should be logged as a warning:
    /// the first failure of a run, then at most once per log interval.
    fn record_failure(&mut self, now: Instant) -> bool {
        self.consecutive += 1;
        match self.last_warned {
            Some(at) if now.duration_since(at) < POLL_ERROR_LOG_INTERVAL => false,
            _ => {
                self.last_warned = Some(now);
                true
            }
        }
    }

    /// End the run, returning how many failures it had.
    fn reset(&mut self) -> u64 {
        self.last_warned = None;
        std::mem::take(&mut self.consecutive)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg
    } else {
        "non-string panic payload"
    }
}

pub(crate) struct PollLoop {
    fetcher: Box<dyn FetchDue>,
    handler: watch::Receiver<HandlerSlot>,
    period: Duration,
    token: CancellationToken,
    topic: String,
    failures: Mutex<FailureStreak>,
}

impl PollLoop {
    pub(crate) fn new(
        fetcher: Box<dyn FetchDue>,
        handler: watch::Receiver<HandlerSlot>,
        period: Duration,
        token: CancellationToken,
        topic: String,
    ) -> Self {
        Self {
            fetcher,
            handler,
            period,
            token,
            topic,
            failures: Mutex::new(FailureStreak::default()),
        }
    }

    fn failures(&self) -> std::sync::MutexGuard<'_, FailureStreak> {
        self.failures
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Tick until the token is cancelled. Ticks never overlap: a slow fetch
    /// or handler delays the next tick instead of running beside it.
    pub(crate) async fn run(self) {
        let path = self.fetcher.path();
        let mut ticker = tokio::time::interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::info!(
            topic = %self.topic,
            path,
            period_us = self.period.as_micros() as u64,
            "Consumer loop started"
        );

        loop {
            tokio::select! {
                biased;
                _ = self.token.cancelled() => {
                    tracing::info!(topic = %self.topic, path, "Consumer loop cancelled");
                    break;
                }
                _ = ticker.tick() => {
                    self.poll_once().await;
                }
            }
        }

        tracing::info!(topic = %self.topic, path, "Consumer loop stopped");
    }

    /// One tick: fetch, decode, dispatch. Returns the number of messages
    /// a handler completed without panicking.
    pub(crate) async fn poll_once(&self) -> usize {
        let path = self.fetcher.path();

        let payloads = match self.fetcher.fetch_due().await {
            Ok(payloads) => {
                let recovered_after = self.failures().reset();
                if recovered_after > 0 {
                    tracing::info!(
                        topic = %self.topic,
                        path,
                        consecutive_failures = recovered_after,
                        "Poll recovered"
                    );
                }
                payloads
            }
            Err(e) => {
                ConsumerMetrics::record_poll_error(path);
                let (warn, consecutive) = {
                    let mut failures = self.failures();
                    (failures.record_failure(Instant::now()), failures.consecutive)
                };
                if warn {
                    tracing::warn!(
                        topic = %self.topic,
                        path,
                        error = %e,
                        consecutive_failures = consecutive,
                        "Poll failed, skipping tick"
                    );
                } else {
                    tracing::debug!(topic = %self.topic, path, error = %e, "Poll failed, skipping tick");
                }
                return 0;
            }
        };

        if payloads.is_empty() {
            return 0;
        }

        // Read once per tick; a concurrent set_handler applies from the next tick
        let handler = self.handler.borrow().clone();
        let mut dispatched = 0;

        for payload in payloads {
            if payload.is_empty() {
                continue;
            }

            let message = match Message::decode(&payload) {
                Ok(message) => message,
                Err(e) => {
                    ConsumerMetrics::record_decode_failure(path);
                    tracing::debug!(topic = %self.topic, path, error = %e, "Dropping undecodable payload");
                    continue;
                }
            };

            match handler {
                Some(ref handler) => {
                    let message_id = message.id().to_string();
                    // A panicking handler loses its message, not the loop
                    match AssertUnwindSafe(handler.handle_message(message))
                        .catch_unwind()
                        .await
                    {
                        Ok(()) => {
                            ConsumerMetrics::record_delivered(path);
                            dispatched += 1;
                        }
                        Err(panic) => {
                            ConsumerMetrics::record_handler_panic(path);
                            tracing::error!(
                                topic = %self.topic,
                                path,
                                message_id = %message_id,
                                panic = panic_message(&*panic),
                                "Handler panicked, message dropped"
                            );
                        }
                    }
                }
                None => {
                    ConsumerMetrics::record_unhandled(path);
                    tracing::debug!(
                        topic = %self.topic,
                        path,
                        message_id = %message.id(),
                        "No handler installed, message dropped"
                    );
                }
            }
        }

        dispatched
    }
}
