//! Connection liveness tracking.
//!
//! Tracks when application-level data last arrived so the connection loop
//! can detect a zombie socket: transport still open, venue no longer
//! pushing. Protocol pings keep intermediaries from closing the socket;
//! only text frames count as proof of life.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::debug;

/// Liveness monitor for one venue connection.
pub struct LivenessMonitor {
    /// Silence window: no application message within this many ms means
    /// the connection is considered dead.
    silence_timeout_ms: u64,
    /// Last protocol ping sent.
    last_ping: Arc<RwLock<Option<DateTime<Utc>>>>,
    /// Last application-level message received.
    last_message: Arc<RwLock<DateTime<Utc>>>,
}

impl LivenessMonitor {
    pub fn new(silence_timeout_ms: u64) -> Self {
        Self {
            silence_timeout_ms,
            last_ping: Arc::new(RwLock::new(None)),
            last_message: Arc::new(RwLock::new(Utc::now())),
        }
    }

    /// Reset liveness state (called on connection establishment).
    pub fn reset(&self) {
        *self.last_ping.write() = None;
        *self.last_message.write() = Utc::now();
    }

    /// Record that a protocol ping was sent.
    pub fn record_ping(&self) {
        let now = Utc::now();
        *self.last_ping.write() = Some(now);
        debug!(time = %now, "Recorded ping");
    }

    /// Record that an application-level message arrived.
    pub fn record_message(&self) {
        *self.last_message.write() = Utc::now();
    }

    /// Time since the last application-level message.
    pub fn time_since_last_message_ms(&self) -> i64 {
        self.time_since_last_message_at(Utc::now())
    }

    /// Whether the silence window has been exceeded.
    pub fn is_silent(&self) -> bool {
        self.is_silent_at(Utc::now())
    }

    /// Silence check against an explicit clock value.
    pub fn is_silent_at(&self, now: DateTime<Utc>) -> bool {
        self.time_since_last_message_at(now) > self.silence_timeout_ms as i64
    }

    fn time_since_last_message_at(&self, now: DateTime<Utc>) -> i64 {
        (now - *self.last_message.read()).num_milliseconds()
    }

    /// Current liveness statistics.
    pub fn stats(&self) -> LivenessStats {
        LivenessStats {
            last_ping: *self.last_ping.read(),
            last_message: *self.last_message.read(),
            time_since_last_message_ms: self.time_since_last_message_ms(),
        }
    }
}

/// Liveness statistics.
#[derive(Debug, Clone)]
pub struct LivenessStats {
    pub last_ping: Option<DateTime<Utc>>,
    pub last_message: DateTime<Utc>,
    pub time_since_last_message_ms: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    #[test]
    fn test_fresh_monitor_is_not_silent() {
        let monitor = LivenessMonitor::new(120_000);
        assert!(!monitor.is_silent());
    }

    #[test]
    fn test_silence_detected_past_window() {
        let monitor = LivenessMonitor::new(120_000);

        // Just inside the window: still alive.
        let now = *monitor.last_message.read() + ChronoDuration::milliseconds(119_999);
        assert!(!monitor.is_silent_at(now));

        // Past the window: silent.
        let now = *monitor.last_message.read() + ChronoDuration::milliseconds(120_001);
        assert!(monitor.is_silent_at(now));
    }

    #[test]
    fn test_message_receipt_clears_silence() {
        let monitor = LivenessMonitor::new(120_000);
        let stale = *monitor.last_message.read() + ChronoDuration::milliseconds(200_000);
        assert!(monitor.is_silent_at(stale));

        monitor.record_message();
        assert!(!monitor.is_silent());
    }

    #[test]
    fn test_stats_track_ping() {
        let monitor = LivenessMonitor::new(120_000);
        assert!(monitor.stats().last_ping.is_none());

        monitor.record_ping();
        assert!(monitor.stats().last_ping.is_some());
        assert!(monitor.stats().time_since_last_message_ms >= 0);
    }
}
