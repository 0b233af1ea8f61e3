//! Prometheus metrics for the live update client.
//!
//! - Connection metrics (connect attempts, opens, current state)
//! - Reconnect metrics (scheduled retries, exhausted retries, terminal failures)
//! - Delivery metrics (delivered, discarded by reason, listener failures)
//! - API metrics (requests by endpoint and outcome)

mod helpers;

pub use helpers::{encode_metrics, ApiMetrics, ChannelMetrics};

use lazy_static::lazy_static;
use prometheus::{
    register_int_counter, register_int_counter_vec, register_int_gauge, IntCounter,
    IntCounterVec, IntGauge,
};

/// Prefix for all metrics
const METRIC_PREFIX: &str = "verve_live";

lazy_static! {
    // ============================================================================
    // Connection Metrics
    // ============================================================================

    /// Transport connections started (initial and retries)
    pub static ref CONNECT_ATTEMPTS_TOTAL: IntCounter = register_int_counter!(
        format!("{}_connect_attempts_total", METRIC_PREFIX),
        "Total push connections started"
    ).unwrap();

    /// Connections that reached the open state
    pub static ref CONNECTIONS_OPENED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_connections_opened_total", METRIC_PREFIX),
        "Total push connections established"
    ).unwrap();

    /// Current connection state (0=closed, 1=connecting, 2=open)
    pub static ref CONNECTION_STATE: IntGauge = register_int_gauge!(
        format!("{}_connection_state", METRIC_PREFIX),
        "Current channel connection state (0=closed, 1=connecting, 2=open)"
    ).unwrap();

    // ============================================================================
    // Reconnect Metrics
    // ============================================================================

    pub static ref RECONNECTS_SCHEDULED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_reconnects_scheduled_total", METRIC_PREFIX),
        "Total reconnect attempts scheduled after a transport error"
    ).unwrap();

    pub static ref RECONNECTS_EXHAUSTED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_reconnects_exhausted_total", METRIC_PREFIX),
        "Times the channel gave up after using every reconnect attempt"
    ).unwrap();

    pub static ref TERMINAL_FAILURES_TOTAL: IntCounter = register_int_counter!(
        format!("{}_terminal_failures_total", METRIC_PREFIX),
        "Connections closed because the stream endpoint rejected the user"
    ).unwrap();

    // ============================================================================
    // Delivery Metrics
    // ============================================================================

    pub static ref EVENTS_DELIVERED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_events_delivered_total", METRIC_PREFIX),
        "Notifications handed to listeners"
    ).unwrap();

    pub static ref EVENTS_DISCARDED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_events_discarded_total", METRIC_PREFIX),
        "Notifications dropped before reaching listeners",
        &["reason"]
    ).unwrap();

    pub static ref LISTENER_FAILURES_TOTAL: IntCounter = register_int_counter!(
        format!("{}_listener_failures_total", METRIC_PREFIX),
        "Listener invocations that returned an error or panicked"
    ).unwrap();

    // ============================================================================
    // API Metrics
    // ============================================================================

    pub static ref API_REQUESTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_api_requests_total", METRIC_PREFIX),
        "Backend API requests by endpoint and outcome",
        &["endpoint", "outcome"]
    ).unwrap();
}
