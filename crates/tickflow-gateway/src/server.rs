//! HTTP server implementation using axum.
//!
//! Serves `/ws` for browser clients plus `/health` and `/metrics` for
//! operators. Each accepted socket gets a bounded outbound buffer and a
//! writer task; the socket loop itself only parses client messages and
//! exits when the client is evicted or goes away.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use axum::Router;
use futures_util::stream::StreamExt;
use futures_util::SinkExt;
use serde_json::{json, Value};
use tickflow_core::{now_ms, FeedKey};
use tickflow_feed::{BookCache, HistoryStore};
use tickflow_telemetry::Metrics;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::{debug, info, warn};

use crate::clients::{ClientHandle, ClientRegistry};
use crate::config::GatewayConfig;
use crate::control::FeedControl;
use crate::error::GatewayResult;
use crate::protocol::{ClientMessage, ServerFrame};

/// Connection limiter to prevent too many concurrent WebSocket clients.
pub struct ConnectionLimiter {
    current: AtomicUsize,
    max: usize,
}

impl ConnectionLimiter {
    pub fn new(max: usize) -> Self {
        Self {
            current: AtomicUsize::new(0),
            max,
        }
    }

    pub fn try_acquire(&self) -> Option<ConnectionGuard<'_>> {
        loop {
            let current = self.current.load(Ordering::Acquire);
            if current >= self.max {
                return None;
            }
            if self
                .current
                .compare_exchange(current, current + 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return Some(ConnectionGuard { limiter: self });
            }
        }
    }

    pub fn current_count(&self) -> usize {
        self.current.load(Ordering::Relaxed)
    }
}

pub struct ConnectionGuard<'a> {
    limiter: &'a ConnectionLimiter,
}

impl Drop for ConnectionGuard<'_> {
    fn drop(&mut self) {
        self.limiter.current.fetch_sub(1, Ordering::Release);
    }
}

/// Shared application state for axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ClientRegistry>,
    pub history: Arc<HistoryStore>,
    pub books: Arc<BookCache>,
    pub control: Arc<FeedControl>,
    connection_limiter: Arc<ConnectionLimiter>,
    pub config: GatewayConfig,
}

impl AppState {
    pub fn new(
        registry: Arc<ClientRegistry>,
        history: Arc<HistoryStore>,
        books: Arc<BookCache>,
        control: Arc<FeedControl>,
        config: GatewayConfig,
    ) -> Self {
        Self {
            registry,
            history,
            books,
            control,
            connection_limiter: Arc::new(ConnectionLimiter::new(config.max_connections)),
            config,
        }
    }
}

/// Create the axum router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health_handler(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "clients": state.registry.client_count(),
        "keys": state.history.keys().len(),
    }))
}

async fn metrics_handler() -> Response {
    match tickflow_telemetry::export() {
        Ok(body) => (StatusCode::OK, body).into_response(),
        Err(e) => {
            warn!(error = %e, "Metrics export failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// WebSocket upgrade handler.
async fn ws_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    // Check connection limit
    let guard = match state.connection_limiter.try_acquire() {
        Some(guard) => guard,
        None => {
            warn!(
                current = state.connection_limiter.current_count(),
                max = state.config.max_connections,
                "WebSocket connection limit reached"
            );
            return (StatusCode::SERVICE_UNAVAILABLE, "Too many connections").into_response();
        }
    };

    info!(
        connections = state.connection_limiter.current_count(),
        "New WebSocket connection"
    );

    // The guard cannot ride into the upgrade future, so probe here and
    // re-acquire inside. A burst between the two checks can briefly
    // overshoot the limit by the in-flight upgrades.
    drop(guard);

    ws.on_upgrade(move |socket| handle_ws_connection(socket, state))
}

/// Handle a WebSocket connection.
async fn handle_ws_connection(socket: WebSocket, state: AppState) {
    // Try to acquire connection slot
    let _guard = match state.connection_limiter.try_acquire() {
        Some(guard) => guard,
        None => {
            warn!("Connection limit reached during upgrade");
            return;
        }
    };

    let (mut sender, mut receiver) = socket.split();

    let (tx, mut rx) = mpsc::channel::<Message>(state.config.client_buffer);
    let client = Arc::new(ClientHandle::new(tx));
    let client_id = state.registry.register(client.clone());
    Metrics::client_connected();
    debug!(client_id = %client_id, "WebSocket client connected");

    // Writer task: drains the outbound buffer into the socket.
    let mut send_task = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            if sender.send(message).await.is_err() {
                break;
            }
        }
    });

    loop {
        tokio::select! {
            () = client.kill.cancelled() => {
                debug!(client_id = %client_id, "Client evicted");
                break;
            }
            _ = &mut send_task => {
                debug!(client_id = %client_id, "Writer task ended");
                break;
            }
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        if !handle_client_message(&state, &client, text.as_ref()).await {
                            break;
                        }
                    }
                    Some(Ok(Message::Ping(_))) => {
                        // Pong is handled automatically by axum
                        debug!(client_id = %client_id, "Received ping from client");
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        debug!(client_id = %client_id, "Client closed connection");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!(client_id = %client_id, error = %e, "WebSocket receive error");
                        break;
                    }
                }
            }
        }
    }

    // Release the keys this client held; the last consumer of a key
    // cascades into an upstream unsubscribe.
    if let Some(released) = state.registry.unregister(&client_id) {
        for key in &released {
            state.control.release(key).await;
        }
    }
    Metrics::client_disconnected();
    send_task.abort();
    info!(
        client_id = %client_id,
        connections = state.connection_limiter.current_count().saturating_sub(1),
        "WebSocket connection closed"
    );
}

/// Apply one parsed client message. Returns false when the connection
/// should close.
async fn handle_client_message(
    state: &AppState,
    client: &Arc<ClientHandle>,
    text: &str,
) -> bool {
    // Malformed control messages are dropped, not answered; the outbound
    // protocol stays snapshot/update/heartbeat only.
    let message = match serde_json::from_str::<ClientMessage>(text) {
        Ok(message) => message,
        Err(e) => {
            debug!(client_id = %client.id, error = %e, "Ignoring malformed client message");
            return true;
        }
    };

    match message {
        ClientMessage::Subscribe { key } => {
            if key.is_empty() {
                debug!(client_id = %client.id, "Ignoring subscribe with empty key");
                return true;
            }
            let added = match state.registry.subscribe(&client.id, &key) {
                Ok(added) => added,
                Err(_) => return false,
            };
            if added {
                state.control.acquire(&key).await;
            }
            // Index before snapshot: an update racing the snapshot can
            // duplicate a point for this client but never leave a gap.
            let frame = snapshot_for(state, &key);
            if client.send_frame(&frame).is_err() {
                warn!(client_id = %client.id, key = %key, "Snapshot send failed, dropping client");
                return false;
            }
            Metrics::frame_sent("snapshot");
            debug!(client_id = %client.id, key = %key, "Client subscribed");
            true
        }
        ClientMessage::Unsubscribe { key } => {
            match state.registry.unsubscribe(&client.id, &key) {
                Ok(true) => {
                    state.control.release(&key).await;
                    debug!(client_id = %client.id, key = %key, "Client unsubscribed");
                }
                Ok(false) => {}
                Err(_) => return false,
            }
            true
        }
        ClientMessage::Ping => client.send_frame(&ServerFrame::heartbeat()).is_ok(),
    }
}

/// Build the initial state frame for a key: order-book keys get the cached
/// book, price keys the full history window (an empty array when nothing
/// has been recorded yet).
fn snapshot_for(state: &AppState, key: &FeedKey) -> ServerFrame {
    if let Some(book) = state.books.latest(key) {
        let timestamp = book.timestamp_ms;
        return ServerFrame::snapshot(key.clone(), json!(book), timestamp);
    }
    let points = state.history.read_all(key);
    let timestamp = points
        .last()
        .map(|point| point.timestamp_ms)
        .unwrap_or_else(now_ms);
    ServerFrame::snapshot(key.clone(), json!(points), timestamp)
}

/// Bind and serve until the shutdown token fires.
pub async fn run_server(state: AppState, shutdown: CancellationToken) -> GatewayResult<()> {
    let addr = state.config.bind_addr();
    let app = create_router(state);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "Client gateway listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::collections::HashSet;
    use tickflow_core::PricePoint;
    use tickflow_feed::SubscriptionRegistry;

    fn test_state() -> AppState {
        let interests = Arc::new(SubscriptionRegistry::new());
        AppState::new(
            Arc::new(ClientRegistry::new()),
            Arc::new(HistoryStore::new(16)),
            Arc::new(BookCache::new()),
            Arc::new(FeedControl::new(interests, None, HashSet::new())),
            GatewayConfig::default(),
        )
    }

    #[test]
    fn test_limiter_respects_max() {
        let limiter = ConnectionLimiter::new(2);
        let first = limiter.try_acquire();
        let second = limiter.try_acquire();
        assert!(first.is_some());
        assert!(second.is_some());
        assert!(limiter.try_acquire().is_none());

        drop(first);
        assert!(limiter.try_acquire().is_some());
    }

    #[test]
    fn test_guard_releases_on_drop() {
        let limiter = ConnectionLimiter::new(1);
        {
            let _guard = limiter.try_acquire().unwrap();
            assert_eq!(limiter.current_count(), 1);
        }
        assert_eq!(limiter.current_count(), 0);
    }

    #[test]
    fn test_snapshot_for_empty_key_is_empty_array() {
        let state = test_state();
        let frame = snapshot_for(&state, &FeedKey::from("btc/usd"));
        let ServerFrame::Snapshot { payload, .. } = frame else {
            panic!("expected a snapshot frame");
        };
        assert_eq!(payload, json!([]));
    }

    #[test]
    fn test_snapshot_for_price_key_carries_history() {
        let state = test_state();
        let key = FeedKey::from("btc/usd");
        state
            .history
            .append(PricePoint::new(key.clone(), dec!(100.5), 1));
        state
            .history
            .append(PricePoint::new(key.clone(), dec!(101.5), 2));

        let ServerFrame::Snapshot { payload, timestamp, .. } = snapshot_for(&state, &key) else {
            panic!("expected a snapshot frame");
        };
        let points = payload.as_array().unwrap();
        assert_eq!(points.len(), 2);
        assert_eq!(points[0]["timestamp_ms"], 1);
        assert_eq!(timestamp, 2);
    }

    #[test]
    fn test_router_builds() {
        let _router = create_router(test_state());
    }
}
