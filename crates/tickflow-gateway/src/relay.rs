//! Bus-to-client relay.
//!
//! One relay task per process drains the cluster bus and fans frames out to
//! local WebSocket subscribers. Processes that run without a venue adapter
//! also mirror ticks and books into their local stores so snapshots for new
//! subscribers stay warm.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tickflow_bus::{BusMessage, BusTopic, ClusterBus};
use tickflow_core::{FeedKey, OrderBookSnapshot, PricePoint};
use tickflow_telemetry::Metrics;
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::clients::ClientHandle;
use crate::protocol::ServerFrame;
use crate::server::AppState;

/// Drain tick and book channels until shutdown.
pub async fn run_relay(
    bus: Arc<ClusterBus>,
    state: AppState,
    mirror_stores: bool,
    shutdown: CancellationToken,
) {
    let mut ticks = bus.subscribe(BusTopic::Ticks);
    let mut books = bus.subscribe(BusTopic::Books);
    info!(mirror_stores, "Bus relay started");

    loop {
        tokio::select! {
            () = shutdown.cancelled() => {
                info!("Bus relay stopped");
                break;
            }
            received = ticks.recv() => match received {
                Ok(message) => {
                    Metrics::bus_received(message.topic.as_channel());
                    relay_tick(&state, mirror_stores, &message).await;
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Tick relay lagged behind the bus");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            received = books.recv() => match received {
                Ok(message) => {
                    Metrics::bus_received(message.topic.as_channel());
                    relay_book(&state, mirror_stores, &message).await;
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Book relay lagged behind the bus");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }
}

async fn relay_tick(state: &AppState, mirror_stores: bool, message: &BusMessage) {
    let point: PricePoint = match serde_json::from_str(message.payload.as_ref()) {
        Ok(point) => point,
        Err(e) => {
            warn!(error = %e, "Dropping malformed tick from bus");
            return;
        }
    };
    if mirror_stores {
        state.history.append(point.clone());
    }
    let frame = ServerFrame::update(point.key.clone(), json!(point), point.timestamp_ms);
    deliver(state, &point.key, &frame).await;
}

async fn relay_book(state: &AppState, mirror_stores: bool, message: &BusMessage) {
    let book: OrderBookSnapshot = match serde_json::from_str(message.payload.as_ref()) {
        Ok(book) => book,
        Err(e) => {
            warn!(error = %e, "Dropping malformed book from bus");
            return;
        }
    };
    if mirror_stores {
        state.books.update(book.clone());
    }
    let frame = ServerFrame::update(book.key.clone(), json!(book), book.timestamp_ms);
    deliver(state, &book.key, &frame).await;
}

/// Fan a frame out to the key's subscribers and evict the ones whose
/// buffer is full. Eviction never touches other clients.
async fn deliver(state: &AppState, key: &FeedKey, frame: &ServerFrame) {
    let (delivered, stalled) = state.registry.fan_out(key, frame);
    if delivered > 0 {
        Metrics::frames_sent(frame.kind(), delivered as u64);
        trace!(key = %key, delivered, "Update fanned out");
    }
    for client in stalled {
        evict(state, &client, "send buffer full").await;
    }
}

/// Remove a client that can no longer keep up and release its keys. The
/// socket task observes the cancelled kill token and finishes its own
/// cleanup; gauge bookkeeping stays there.
async fn evict(state: &AppState, client: &Arc<ClientHandle>, reason: &str) {
    let Some(released) = state.registry.unregister(&client.id) else {
        return;
    };
    warn!(client_id = %client.id, reason, "Evicting client");
    Metrics::send_failure();
    for key in &released {
        state.control.release(key).await;
    }
}

/// Push a heartbeat frame to every client on a fixed interval so browsers
/// can tell a quiet feed from a dead connection.
pub async fn run_heartbeat(state: AppState, shutdown: CancellationToken) {
    let period = Duration::from_millis(state.config.heartbeat_interval_ms.max(1_000));
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,
            _ = interval.tick() => {
                let frame = ServerFrame::heartbeat();
                let (delivered, stalled) = state.registry.broadcast(&frame);
                if delivered > 0 {
                    Metrics::frames_sent("heartbeat", delivered as u64);
                    debug!(delivered, "Heartbeat sent");
                }
                for client in stalled {
                    evict(&state, &client, "heartbeat buffer full").await;
                }
            }
        }
    }
}
