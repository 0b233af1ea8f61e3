//! Metrics helper structs for convenient metric recording

use prometheus::{Encoder, TextEncoder};

use crate::channel::ConnectionState;

use super::{
    API_REQUESTS_TOTAL, CONNECTIONS_OPENED_TOTAL, CONNECTION_STATE, CONNECT_ATTEMPTS_TOTAL,
    EVENTS_DELIVERED_TOTAL, EVENTS_DISCARDED_TOTAL, LISTENER_FAILURES_TOTAL,
    RECONNECTS_EXHAUSTED_TOTAL, RECONNECTS_SCHEDULED_TOTAL, TERMINAL_FAILURES_TOTAL,
};

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer).unwrap_or_default())
}

/// Helper struct for recording channel metrics
pub struct ChannelMetrics;

impl ChannelMetrics {
    pub fn record_connect_attempt() {
        CONNECT_ATTEMPTS_TOTAL.inc();
    }

    pub fn record_open() {
        CONNECTIONS_OPENED_TOTAL.inc();
    }

    pub fn set_connection_state(state: ConnectionState) {
        let value = match state {
            ConnectionState::Closed => 0,
            ConnectionState::Connecting => 1,
            ConnectionState::Open => 2,
        };
        CONNECTION_STATE.set(value);
    }

    pub fn record_reconnect_scheduled() {
        RECONNECTS_SCHEDULED_TOTAL.inc();
    }

    pub fn record_exhausted() {
        RECONNECTS_EXHAUSTED_TOTAL.inc();
    }

    pub fn record_terminal_failure() {
        TERMINAL_FAILURES_TOTAL.inc();
    }

    pub fn record_delivered() {
        EVENTS_DELIVERED_TOTAL.inc();
    }

    /// Record a dropped event ("malformed", "foreign_user")
    pub fn record_discarded(reason: &str) {
        EVENTS_DISCARDED_TOTAL.with_label_values(&[reason]).inc();
    }

    pub fn record_listener_failure() {
        LISTENER_FAILURES_TOTAL.inc();
    }
}

/// Helper struct for recording backend API metrics
pub struct ApiMetrics;

impl ApiMetrics {
    pub fn record_success(endpoint: &str) {
        API_REQUESTS_TOTAL.with_label_values(&[endpoint, "success"]).inc();
    }

    pub fn record_failure(endpoint: &str) {
        API_REQUESTS_TOTAL.with_label_values(&[endpoint, "failure"]).inc();
    }
}
