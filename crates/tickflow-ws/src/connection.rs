//! WebSocket connection manager.
//!
//! Owns exactly one live venue socket, restores subscriptions after every
//! reconnect, and enforces the liveness policy: protocol pings while
//! connected plus a silence watchdog that force-closes a socket the venue
//! has stopped feeding.

use crate::error::{WsError, WsResult};
use crate::liveness::LivenessMonitor;
use crate::message::{StreamTarget, SubscribeRequest, VenueFrame};
use crate::subscription::{SubscriptionSet, UpstreamCommand};
use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex as TokioMutex};
use tokio_tungstenite::{connect_async_tls_with_config, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Connection configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// WebSocket URL.
    pub url: String,
    /// Maximum reconnection attempts (0 = infinite).
    pub max_reconnect_attempts: u32,
    /// Base delay for exponential backoff.
    pub reconnect_base_delay_ms: u64,
    /// Maximum delay for exponential backoff.
    pub reconnect_max_delay_ms: u64,
    /// Interval between protocol-level pings while connected.
    pub ping_interval_ms: u64,
    /// How often the silence watchdog runs.
    pub silence_check_interval_ms: u64,
    /// Silence window after which the connection is considered dead.
    pub silence_timeout_ms: u64,
    /// Streams to subscribe on connect.
    pub subscriptions: Vec<StreamTarget>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_reconnect_attempts: 0, // Infinite
            reconnect_base_delay_ms: 2000,
            reconnect_max_delay_ms: 30000,
            ping_interval_ms: 30000,
            silence_check_interval_ms: 15000,
            silence_timeout_ms: 120000,
            subscriptions: Vec::new(),
        }
    }
}

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
        }
    }
}

/// Lifecycle event driving the connection state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// A dial attempt is starting.
    DialStarted,
    /// The socket is open and subscriptions were sent.
    Established,
    /// The stream closed or errored.
    StreamEnded,
    /// The silence watchdog expired.
    SilenceExpired,
    /// Graceful shutdown was requested.
    ShutdownRequested,
}

/// Pure state transition function.
///
/// Unknown combinations leave the state unchanged, so callers can apply
/// events unconditionally.
pub fn next_state(state: ConnectionState, event: ConnectionEvent) -> ConnectionState {
    use ConnectionEvent::*;
    use ConnectionState::*;

    match (state, event) {
        (_, ShutdownRequested) => Disconnected,
        (Disconnected | Reconnecting, DialStarted) => Connecting,
        (Connecting, Established) => Connected,
        (Connecting | Connected, StreamEnded) => Reconnecting,
        (Connected, SilenceExpired) => Reconnecting,
        (state, _) => state,
    }
}

/// Exponential backoff delay: `base * 2^(attempt-1)`, capped at `max_ms`.
///
/// attempt=1 -> base, attempt=2 -> 2*base, attempt=3 -> 4*base, ...
pub fn backoff_delay(base_ms: u64, max_ms: u64, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(10);
    let delay = base_ms.saturating_mul(1u64 << exponent);
    Duration::from_millis(delay.min(max_ms))
}

/// WebSocket connection manager.
pub struct ConnectionManager {
    config: ConnectionConfig,
    state: Arc<RwLock<ConnectionState>>,
    subscriptions: Arc<SubscriptionSet>,
    liveness: Arc<LivenessMonitor>,
    frame_tx: mpsc::Sender<VenueFrame>,
    reconnect_count: Arc<RwLock<u32>>,
    /// Command sender handed out via `command_sender()`.
    command_tx: mpsc::Sender<UpstreamCommand>,
    /// Command receiver (consumed by the message loop).
    command_rx: Arc<TokioMutex<mpsc::Receiver<UpstreamCommand>>>,
    /// Cancellation token for graceful shutdown.
    shutdown_token: CancellationToken,
}

impl ConnectionManager {
    /// Create a new connection manager.
    pub fn new(config: ConnectionConfig, frame_tx: mpsc::Sender<VenueFrame>) -> Self {
        let (command_tx, command_rx) = mpsc::channel(64);
        let subscriptions = SubscriptionSet::new();
        for target in &config.subscriptions {
            subscriptions.add(target.clone());
        }

        Self {
            liveness: Arc::new(LivenessMonitor::new(config.silence_timeout_ms)),
            config,
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            subscriptions: Arc::new(subscriptions),
            frame_tx,
            reconnect_count: Arc::new(RwLock::new(0)),
            command_tx,
            command_rx: Arc::new(TokioMutex::new(command_rx)),
            shutdown_token: CancellationToken::new(),
        }
    }

    /// Sender for runtime subscribe/unsubscribe commands.
    ///
    /// Can be cloned and shared across tasks; commands are applied by the
    /// message loop while connected and folded into the subscription set
    /// so reconnects restore them.
    pub fn command_sender(&self) -> mpsc::Sender<UpstreamCommand> {
        self.command_tx.clone()
    }

    /// Get current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    /// Number of reconnect attempts since the last message was received.
    pub fn reconnect_count(&self) -> u32 {
        *self.reconnect_count.read()
    }

    /// Liveness statistics for the current connection.
    pub fn liveness(&self) -> &LivenessMonitor {
        &self.liveness
    }

    /// Signal graceful shutdown. Idempotent.
    pub fn shutdown(&self) {
        info!("Connection shutdown requested");
        self.shutdown_token.cancel();
    }

    /// Check if shutdown has been requested.
    pub fn is_shutdown(&self) -> bool {
        self.shutdown_token.is_cancelled()
    }

    fn apply_event(&self, event: ConnectionEvent) {
        let mut state = self.state.write();
        *state = next_state(*state, event);
    }

    /// Connect and run the message loop, reconnecting on failure.
    ///
    /// Returns when shutdown is requested or, with a bounded
    /// `max_reconnect_attempts`, when the attempts are exhausted.
    pub async fn connect(&self) -> WsResult<()> {
        let mut attempt = 0u32;

        loop {
            if self.is_shutdown() {
                info!("Shutdown requested, exiting connect loop");
                self.apply_event(ConnectionEvent::ShutdownRequested);
                return Ok(());
            }

            self.apply_event(ConnectionEvent::DialStarted);

            let mut received_message = false;
            match self.try_connect(&mut received_message).await {
                Ok(()) => {
                    info!("Venue WebSocket connection closed");
                }
                Err(e) => {
                    error!(?e, "Venue WebSocket connection error");
                }
            }

            if self.is_shutdown() {
                info!("Shutdown requested after disconnect, not reconnecting");
                self.apply_event(ConnectionEvent::ShutdownRequested);
                return Ok(());
            }

            // A connection that stayed open long enough to deliver data
            // starts the backoff sequence over.
            if received_message {
                attempt = 0;
            }

            attempt += 1;
            *self.reconnect_count.write() = attempt;

            if self.config.max_reconnect_attempts > 0
                && attempt >= self.config.max_reconnect_attempts
            {
                error!(attempt, "Max reconnection attempts reached");
                return Err(WsError::ConnectionFailed(
                    "Max reconnection attempts reached".to_string(),
                ));
            }

            self.apply_event(ConnectionEvent::StreamEnded);

            let delay = backoff_delay(
                self.config.reconnect_base_delay_ms,
                self.config.reconnect_max_delay_ms,
                attempt,
            );
            warn!(attempt, delay_ms = delay.as_millis(), "Reconnecting");

            // Wait for delay OR shutdown signal (cancellation-aware sleep)
            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                () = self.shutdown_token.cancelled() => {
                    info!("Shutdown requested during backoff, exiting");
                    self.apply_event(ConnectionEvent::ShutdownRequested);
                    return Ok(());
                }
            }
        }
    }

    async fn try_connect(&self, received_message: &mut bool) -> WsResult<()> {
        info!(url = %self.config.url, "Connecting to venue WebSocket");

        let (ws_stream, _response) =
            connect_async_tls_with_config(&self.config.url, None, true, None).await?;
        let (mut write, mut read) = ws_stream.split();

        info!("Venue WebSocket connected");
        self.liveness.reset();

        // Restore every active subscription in one batch request.
        let targets = self.subscriptions.snapshot();
        if !targets.is_empty() {
            let request = SubscribeRequest::batch(&targets);
            let msg = serde_json::to_string(&request)?;
            write.send(Message::Text(msg)).await?;
            info!(count = targets.len(), "Sent batch subscription request");
        }

        self.apply_event(ConnectionEvent::Established);

        let ping_period = Duration::from_millis(self.config.ping_interval_ms);
        let check_period = Duration::from_millis(self.config.silence_check_interval_ms);
        let mut ping_interval =
            tokio::time::interval_at(tokio::time::Instant::now() + ping_period, ping_period);
        let mut silence_interval =
            tokio::time::interval_at(tokio::time::Instant::now() + check_period, check_period);

        loop {
            // Lock command_rx for the select! block
            let command_recv = async { self.command_rx.lock().await.recv().await };

            tokio::select! {
                // Shutdown signal - highest priority
                () = self.shutdown_token.cancelled() => {
                    info!("Shutdown signal received in message loop");
                    if let Err(e) = write.send(Message::Close(None)).await {
                        warn!(?e, "Failed to send Close frame during shutdown");
                    }
                    self.apply_event(ConnectionEvent::ShutdownRequested);
                    return Ok(());
                }

                // Incoming message
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            self.handle_text(&text, received_message).await;
                        }
                        Some(Ok(Message::Ping(data))) => {
                            debug!("Received ping, sending pong");
                            write.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Pong(_))) => {
                            debug!("Received pong");
                        }
                        Some(Ok(Message::Close(frame))) => {
                            let (code, reason) = frame
                                .map(|f| (f.code.into(), f.reason.to_string()))
                                .unwrap_or((1000, "Normal close".to_string()));
                            warn!(code, %reason, "Venue closed the connection");
                            return Err(WsError::ConnectionClosed { code, reason });
                        }
                        Some(Err(e)) => {
                            error!(?e, "WebSocket read error");
                            return Err(e.into());
                        }
                        None => {
                            warn!("WebSocket stream ended");
                            return Ok(());
                        }
                        _ => {}
                    }
                }

                // Runtime subscribe/unsubscribe commands
                command = command_recv => {
                    if let Some(command) = command {
                        self.handle_command(command, &mut write).await?;
                    }
                }

                // Protocol-level heartbeat ping
                _ = ping_interval.tick() => {
                    write.send(Message::Ping(Vec::new())).await?;
                    self.liveness.record_ping();
                    debug!("Sent heartbeat ping");
                }

                // Silence watchdog
                _ = silence_interval.tick() => {
                    if self.liveness.is_silent() {
                        let silent_ms = self.liveness.time_since_last_message_ms();
                        warn!(silent_ms, "No venue data within silence window, forcing reconnect");
                        self.apply_event(ConnectionEvent::SilenceExpired);
                        return Err(WsError::SilenceTimeout);
                    }
                }
            }
        }
    }

    /// Handle an inbound text frame.
    ///
    /// Malformed frames are logged and dropped; they never terminate the
    /// connection. Any text frame counts as proof of life.
    async fn handle_text(&self, text: &str, received_message: &mut bool) {
        self.liveness.record_message();
        *received_message = true;

        match serde_json::from_str::<VenueFrame>(text) {
            Ok(frame) => {
                if self.frame_tx.send(frame).await.is_err() {
                    warn!("Frame receiver dropped");
                }
            }
            Err(e) => {
                warn!(%e, "Dropping malformed venue frame");
            }
        }
    }

    async fn handle_command<S>(&self, command: UpstreamCommand, write: &mut S) -> WsResult<()>
    where
        S: SinkExt<Message> + Unpin,
        S::Error: Into<WsError>,
    {
        match command {
            UpstreamCommand::Subscribe(target) => {
                if !self.subscriptions.add(target.clone()) {
                    debug!(key = %target.key, "Already subscribed upstream");
                    return Ok(());
                }
                let request = SubscribeRequest::single(&target);
                let msg = serde_json::to_string(&request)?;
                write.send(Message::Text(msg)).await.map_err(Into::into)?;
                info!(key = %target.key, topic = %target.topic, "Sent incremental subscribe");
            }
            UpstreamCommand::Unsubscribe(key) => {
                let Some(target) = self.subscriptions.remove(&key) else {
                    debug!(%key, "Not subscribed upstream, nothing to release");
                    return Ok(());
                };
                let request = SubscribeRequest::unsubscribe(&target);
                let msg = serde_json::to_string(&request)?;
                write.send(Message::Text(msg)).await.map_err(Into::into)?;
                info!(%key, "Sent upstream unsubscribe");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ConnectionConfig::default();
        assert_eq!(config.max_reconnect_attempts, 0); // Infinite
        assert_eq!(config.reconnect_base_delay_ms, 2000);
        assert_eq!(config.reconnect_max_delay_ms, 30000);
        assert_eq!(config.ping_interval_ms, 30000);
        assert_eq!(config.silence_check_interval_ms, 15000);
        assert_eq!(config.silence_timeout_ms, 120000);
    }

    // ========================================================================
    // backoff_delay tests
    // ========================================================================

    #[test]
    fn test_backoff_sequence_doubles_then_caps() {
        let delays: Vec<u64> = (1..=7)
            .map(|attempt| backoff_delay(2000, 30000, attempt).as_millis() as u64)
            .collect();
        assert_eq!(delays, vec![2000, 4000, 8000, 16000, 30000, 30000, 30000]);
    }

    #[test]
    fn test_backoff_restarts_at_base_after_reset() {
        // The retry loop resets the attempt counter to zero once a
        // connection has delivered data; the next failure is attempt 1.
        assert_eq!(backoff_delay(2000, 30000, 1), Duration::from_millis(2000));
    }

    #[test]
    fn test_backoff_never_exceeds_cap() {
        for attempt in 1..=64 {
            assert!(backoff_delay(2000, 30000, attempt) <= Duration::from_millis(30000));
        }
    }

    // ========================================================================
    // next_state tests
    // ========================================================================

    #[test]
    fn test_happy_path_transitions() {
        use ConnectionEvent::*;
        use ConnectionState::*;

        let mut state = Disconnected;
        state = next_state(state, DialStarted);
        assert_eq!(state, Connecting);
        state = next_state(state, Established);
        assert_eq!(state, Connected);
        state = next_state(state, StreamEnded);
        assert_eq!(state, Reconnecting);
        state = next_state(state, DialStarted);
        assert_eq!(state, Connecting);
    }

    #[test]
    fn test_silence_expiry_triggers_reconnecting() {
        use ConnectionEvent::*;
        use ConnectionState::*;

        assert_eq!(next_state(Connected, SilenceExpired), Reconnecting);
    }

    #[test]
    fn test_shutdown_is_terminal_from_every_state() {
        use ConnectionEvent::*;
        use ConnectionState::*;

        for state in [Disconnected, Connecting, Connected, Reconnecting] {
            assert_eq!(next_state(state, ShutdownRequested), Disconnected);
        }
    }

    #[test]
    fn test_unknown_combinations_leave_state_unchanged() {
        use ConnectionEvent::*;
        use ConnectionState::*;

        assert_eq!(next_state(Disconnected, Established), Disconnected);
        assert_eq!(next_state(Connected, DialStarted), Connected);
        assert_eq!(next_state(Reconnecting, SilenceExpired), Reconnecting);
    }

    // ========================================================================
    // Manager construction tests
    // ========================================================================

    #[tokio::test]
    async fn test_manager_seeds_subscriptions_from_config() {
        let config = ConnectionConfig {
            subscriptions: vec![
                StreamTarget::prices("btc/usd"),
                StreamTarget::order_book("0xabc"),
            ],
            ..Default::default()
        };
        let (frame_tx, _frame_rx) = mpsc::channel(8);
        let manager = ConnectionManager::new(config, frame_tx);

        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert_eq!(manager.subscriptions.len(), 2);
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent() {
        let (frame_tx, _frame_rx) = mpsc::channel(8);
        let manager = ConnectionManager::new(ConnectionConfig::default(), frame_tx);

        assert!(!manager.is_shutdown());
        manager.shutdown();
        manager.shutdown();
        assert!(manager.is_shutdown());
    }
}
