//! Prometheus metrics for the tickflow relay.
//!
//! Covers the full pipeline:
//! - Venue connection state and reconnects
//! - Frame classification (accepted/dropped)
//! - Bus publish/receive volume and fallbacks
//! - Gateway client population and delivery failures
//!
//! # Panics
//!
//! Metric registration uses `unwrap()` intentionally. If registration fails,
//! it indicates a fatal configuration error (e.g., duplicate metric names)
//! that should cause an immediate crash at startup rather than silent failure.
//! These panics only occur during static initialization, never at runtime.

use crate::error::{TelemetryError, TelemetryResult};
use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_gauge, register_gauge_vec, register_int_counter,
    register_int_gauge, CounterVec, Encoder, Gauge, GaugeVec, IntCounter, IntGauge, TextEncoder,
};

/// Venue WebSocket connection state (1 = connected, 0 = disconnected).
pub static WS_CONNECTED: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!(
        "tickflow_ws_connected",
        "Venue WebSocket connection state (1=connected)"
    )
    .unwrap()
});

/// Venue connection state machine current state.
/// Labels: state (disconnected/connecting/connected/reconnecting)
pub static WS_STATE: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "tickflow_ws_state",
        "Venue connection state machine current state (1=active, 0=inactive)",
        &["state"]
    )
    .unwrap()
});

/// Total venue reconnection attempts.
pub static WS_RECONNECT_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "tickflow_ws_reconnect_total",
        "Total venue WebSocket reconnection attempts"
    )
    .unwrap()
});

/// Total venue frames accepted into the pipeline.
pub static FRAMES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "tickflow_frames_total",
        "Total venue frames accepted",
        &["topic", "kind"]
    )
    .unwrap()
});

/// Total venue frames dropped.
/// Labels: reason (malformed/ignored)
pub static FRAMES_DROPPED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "tickflow_frames_dropped_total",
        "Total venue frames dropped",
        &["reason"]
    )
    .unwrap()
});

/// Total messages published to the cluster bus.
pub static BUS_PUBLISHED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "tickflow_bus_published_total",
        "Total messages published to the cluster bus",
        &["channel"]
    )
    .unwrap()
});

/// Total publishes that fell back to local delivery.
pub static BUS_FALLBACK_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "tickflow_bus_fallback_total",
        "Total bus publishes delivered locally after a publish failure",
        &["channel"]
    )
    .unwrap()
});

/// Total messages received from the cluster bus.
pub static BUS_RECEIVED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "tickflow_bus_received_total",
        "Total messages received from the cluster bus",
        &["channel"]
    )
    .unwrap()
});

/// Currently connected gateway clients.
pub static GATEWAY_CLIENTS: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "tickflow_gateway_clients",
        "Currently connected gateway clients"
    )
    .unwrap()
});

/// Total client sends that failed and dropped the client.
pub static GATEWAY_SEND_FAILURES_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "tickflow_gateway_send_failures_total",
        "Total client sends that failed and dropped the client"
    )
    .unwrap()
});

/// Total frames sent to gateway clients by type.
pub static GATEWAY_FRAMES_SENT_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "tickflow_gateway_frames_sent_total",
        "Total frames sent to gateway clients",
        &["kind"]
    )
    .unwrap()
});

/// History ring size per key.
pub static HISTORY_POINTS: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "tickflow_history_points",
        "Points currently held in the history ring",
        &["key"]
    )
    .unwrap()
});

/// Render all registered metrics in Prometheus text exposition format.
pub fn export() -> TelemetryResult<String> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| TelemetryError::Metrics(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| TelemetryError::Metrics(e.to_string()))
}

/// Metrics facade for easy access.
pub struct Metrics;

impl Metrics {
    /// Record venue WebSocket connected.
    pub fn ws_connected() {
        WS_CONNECTED.set(1.0);
    }

    /// Record venue WebSocket disconnected.
    pub fn ws_disconnected() {
        WS_CONNECTED.set(0.0);
    }

    /// Set venue connection state machine state.
    /// Only the active state should be set to 1, all others to 0.
    pub fn ws_state_set(state: &str) {
        // Reset all states to 0
        for s in &["disconnected", "connecting", "connected", "reconnecting"] {
            WS_STATE.with_label_values(&[s]).set(0.0);
        }
        // Set active state to 1
        WS_STATE.with_label_values(&[state]).set(1.0);
    }

    /// Record venue reconnections observed since the last poll.
    pub fn ws_reconnects(delta: u64) {
        if delta > 0 {
            WS_RECONNECT_TOTAL.inc_by(delta);
        }
    }

    /// Record an accepted venue frame.
    pub fn frame_accepted(topic: &str, kind: &str) {
        FRAMES_TOTAL.with_label_values(&[topic, kind]).inc();
    }

    /// Record a dropped venue frame.
    pub fn frame_dropped(reason: &str) {
        FRAMES_DROPPED_TOTAL.with_label_values(&[reason]).inc();
    }

    /// Record a successful bus publish.
    pub fn bus_published(channel: &str) {
        BUS_PUBLISHED_TOTAL.with_label_values(&[channel]).inc();
    }

    /// Record a publish that fell back to local delivery.
    pub fn bus_fallback(channel: &str) {
        BUS_FALLBACK_TOTAL.with_label_values(&[channel]).inc();
    }

    /// Record a message received from the bus.
    pub fn bus_received(channel: &str) {
        BUS_RECEIVED_TOTAL.with_label_values(&[channel]).inc();
    }

    /// Record a gateway client connecting.
    pub fn client_connected() {
        GATEWAY_CLIENTS.inc();
    }

    /// Record a gateway client disconnecting.
    pub fn client_disconnected() {
        GATEWAY_CLIENTS.dec();
    }

    /// Record a client send failure.
    pub fn send_failure() {
        GATEWAY_SEND_FAILURES_TOTAL.inc();
    }

    /// Record a frame sent to a client.
    pub fn frame_sent(kind: &str) {
        GATEWAY_FRAMES_SENT_TOTAL.with_label_values(&[kind]).inc();
    }

    /// Record a frame fanned out to `count` clients at once.
    pub fn frames_sent(kind: &str, count: u64) {
        GATEWAY_FRAMES_SENT_TOTAL
            .with_label_values(&[kind])
            .inc_by(count as f64);
    }

    /// Update the history ring size for a key.
    pub fn history_points(key: &str, count: f64) {
        HISTORY_POINTS.with_label_values(&[key]).set(count);
    }
}
