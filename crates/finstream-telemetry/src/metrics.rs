//! Prometheus metrics for finstream streams.
//!
//! # Panics
//!
//! Metric registration uses `unwrap()` intentionally. A registration failure
//! means duplicate metric names, a startup bug. These panics only occur during
//! static initialization.

use crate::error::TelemetryResult;
use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_gauge_vec, CounterVec, Encoder, GaugeVec, TextEncoder,
};

/// Every state a stream handle can be in.
const STREAM_STATES: [&str; 7] = [
    "idle",
    "connecting",
    "connected",
    "reconnecting",
    "closing",
    "failed",
    "closed",
];

/// Stream state machine current state.
/// Labels: kind (line/pie/bar/chat), state
pub static STREAM_STATE: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "finstream_stream_state",
        "Stream state machine current state (1=active, 0=inactive)",
        &["kind", "state"]
    )
    .unwrap()
});

/// Reconnection attempts.
/// Labels: kind, reason (auth/transport/manual/rotation)
pub static RECONNECT_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "finstream_reconnect_total",
        "Total stream reconnection attempts",
        &["kind", "reason"]
    )
    .unwrap()
});

/// Decoded data messages received.
pub static MESSAGES_RECEIVED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "finstream_messages_received_total",
        "Total data messages received",
        &["kind"]
    )
    .unwrap()
});

/// Frames that could not be decoded or were server-reported errors.
pub static PROTOCOL_ERRORS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "finstream_protocol_errors_total",
        "Total malformed or error frames",
        &["kind"]
    )
    .unwrap()
});

/// Streams that gave up.
/// Labels: kind, reason (auth/transport)
pub static FAILURES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "finstream_failures_total",
        "Total streams that reached the failed state",
        &["kind", "reason"]
    )
    .unwrap()
});

/// Metrics facade for easy access.
pub struct Metrics;

impl Metrics {
    /// Set the active state of a stream; all other states go to 0.
    pub fn stream_state_set(kind: &str, state: &str) {
        for s in STREAM_STATES {
            STREAM_STATE.with_label_values(&[kind, s]).set(0.0);
        }
        STREAM_STATE.with_label_values(&[kind, state]).set(1.0);
    }

    /// Record a reconnection attempt.
    pub fn reconnect(kind: &str, reason: &str) {
        RECONNECT_TOTAL.with_label_values(&[kind, reason]).inc();
    }

    pub fn message_received(kind: &str) {
        MESSAGES_RECEIVED_TOTAL.with_label_values(&[kind]).inc();
    }

    /// Record `count` malformed or error frames.
    pub fn protocol_errors(kind: &str, count: u64) {
        PROTOCOL_ERRORS_TOTAL
            .with_label_values(&[kind])
            .inc_by(count as f64);
    }

    /// Record a stream reaching the failed state.
    pub fn stream_failed(kind: &str, reason: &str) {
        FAILURES_TOTAL.with_label_values(&[kind, reason]).inc();
    }

    /// Render every registered metric in the text exposition format.
    pub fn gather() -> TelemetryResult<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&prometheus::gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}
