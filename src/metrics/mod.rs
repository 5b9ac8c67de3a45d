//! Prometheus metrics for the queue.
//!
//! - Publish counts by delivery kind (immediate, delayed)
//! - Delivery, poll error, decode failure, unhandled and handler panic counts
//!   by loop path

mod helpers;

pub use helpers::{encode_metrics, ConsumerMetrics, ProducerMetrics};

use lazy_static::lazy_static;
use prometheus::{register_int_counter_vec, IntCounterVec};

/// Prefix for all metrics
const METRIC_PREFIX: &str = "mq";

lazy_static! {
    /// Messages written to the store, by kind
    pub static ref PUBLISHED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_published_total", METRIC_PREFIX),
        "Total messages published",
        &["kind"]
    ).unwrap();

    /// Messages handed to a handler, by loop path
    pub static ref DELIVERED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_delivered_total", METRIC_PREFIX),
        "Total messages dispatched to a handler",
        &["path"]
    ).unwrap();

    /// Store errors seen while polling, by loop path
    pub static ref POLL_ERRORS_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_poll_errors_total", METRIC_PREFIX),
        "Total store errors while polling",
        &["path"]
    ).unwrap();

    /// Stored payloads that could not be decoded, by loop path
    pub static ref DECODE_FAILURES_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_decode_failures_total", METRIC_PREFIX),
        "Total dropped payloads that failed to decode",
        &["path"]
    ).unwrap();

    /// Messages fetched while no handler was installed
    pub static ref UNHANDLED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_unhandled_total", METRIC_PREFIX),
        "Total messages dropped for lack of a handler",
        &["path"]
    ).unwrap();

    /// Handler invocations that panicked, by loop path
    pub static ref HANDLER_PANICS_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_handler_panics_total", METRIC_PREFIX),
        "Total handler invocations that panicked",
        &["path"]
    ).unwrap();
}
