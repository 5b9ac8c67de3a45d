//! Metrics helper structs for convenient metric recording

use prometheus::{Encoder, TextEncoder};

use super::{
    DECODE_FAILURES_TOTAL, DELIVERED_TOTAL, HANDLER_PANICS_TOTAL, POLL_ERRORS_TOTAL, PUBLISHED_TOTAL,
    UNHANDLED_TOTAL,
};

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer).unwrap_or_default())
}

pub struct ProducerMetrics;

impl ProducerMetrics {
    pub fn record_immediate() {
        PUBLISHED_TOTAL.with_label_values(&["immediate"]).inc();
    }

    pub fn record_delayed() {
        PUBLISHED_TOTAL.with_label_values(&["delayed"]).inc();
    }
}

/// Per-loop counters; `path` is the loop's fetch path (`list` or `zset`).
pub struct ConsumerMetrics;

impl ConsumerMetrics {
    pub fn record_delivered(path: &str) {
        DELIVERED_TOTAL.with_label_values(&[path]).inc();
    }

    pub fn record_poll_error(path: &str) {
        POLL_ERRORS_TOTAL.with_label_values(&[path]).inc();
    }

    pub fn record_decode_failure(path: &str) {
        DECODE_FAILURES_TOTAL.with_label_values(&[path]).inc();
    }

    pub fn record_unhandled(path: &str) {
        UNHANDLED_TOTAL.with_label_values(&[path]).inc();
    }

    pub fn record_handler_panic(path: &str) {
        HANDLER_PANICS_TOTAL.with_label_values(&[path]).inc();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_includes_recorded_series() {
        ProducerMetrics::record_immediate();
        ConsumerMetrics::record_delivered("list");

        let text = encode_metrics().unwrap();
        assert!(text.contains("mq_published_total"));
        assert!(text.contains("mq_delivered_total"));
    }
}
