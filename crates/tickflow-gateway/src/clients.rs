//! Connected client registry.
//!
//! Every WebSocket connection registers one `ClientHandle`. Outbound frames
//! are queued on a bounded channel drained by the connection's writer task;
//! `try_send` keeps fan-out non-blocking, and a full buffer marks the client
//! for eviction instead of stalling delivery to everyone else.

use std::sync::Arc;

use axum::extract::ws::Message;
use dashmap::{DashMap, DashSet};
use tickflow_core::FeedKey;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{GatewayError, GatewayResult};
use crate::protocol::ServerFrame;

/// Unique id per WebSocket connection.
pub type ClientId = Uuid;

/// Per-connection state shared between the registry and the socket task.
pub struct ClientHandle {
    pub id: ClientId,
    /// Outbound buffer drained by the connection's writer task.
    tx: mpsc::Sender<Message>,
    /// Keys this client is subscribed to.
    pub subscriptions: DashSet<FeedKey>,
    /// Cancelled on eviction; the socket loop exits when it fires.
    pub kill: CancellationToken,
}

impl ClientHandle {
    pub fn new(tx: mpsc::Sender<Message>) -> Self {
        Self {
            id: Uuid::new_v4(),
            tx,
            subscriptions: DashSet::new(),
            kill: CancellationToken::new(),
        }
    }

    /// Queue a pre-serialized frame without blocking. Returns false when the
    /// buffer is full or the writer task is gone.
    pub fn try_send_text(&self, json: String) -> bool {
        self.tx.try_send(Message::Text(json.into())).is_ok()
    }

    /// Serialize and queue a single frame.
    pub fn send_frame(&self, frame: &ServerFrame) -> GatewayResult<()> {
        let json = serde_json::to_string(frame)?;
        if self.try_send_text(json) {
            Ok(())
        } else {
            Err(GatewayError::ClientUnreachable(self.id.to_string()))
        }
    }
}

/// All connected clients plus a key -> subscribers reverse index.
#[derive(Default)]
pub struct ClientRegistry {
    clients: DashMap<ClientId, Arc<ClientHandle>>,
    by_key: DashMap<FeedKey, DashSet<ClientId>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, client: Arc<ClientHandle>) -> ClientId {
        let id = client.id;
        self.clients.insert(id, client);
        debug!(client_id = %id, "Client registered");
        id
    }

    /// Remove a client and its index entries, returning the keys it held so
    /// the caller can release upstream interest. Idempotent: `None` means the
    /// client was already removed and its keys were handed to that caller.
    pub fn unregister(&self, id: &ClientId) -> Option<Vec<FeedKey>> {
        let (_, client) = self.clients.remove(id)?;
        let keys: Vec<FeedKey> = client.subscriptions.iter().map(|key| key.clone()).collect();
        for key in &keys {
            if let Some(subscribers) = self.by_key.get_mut(key) {
                subscribers.remove(id);
            }
            self.by_key.remove_if(key, |_, subscribers| subscribers.is_empty());
        }
        client.kill.cancel();
        debug!(client_id = %id, keys = keys.len(), "Client unregistered");
        Some(keys)
    }

    /// Add a subscription. Returns true when the key is new for this client.
    pub fn subscribe(&self, id: &ClientId, key: &FeedKey) -> GatewayResult<bool> {
        let client = self
            .clients
            .get(id)
            .ok_or_else(|| GatewayError::ClientNotFound(id.to_string()))?;
        let added = client.subscriptions.insert(key.clone());
        if added {
            self.by_key.entry(key.clone()).or_default().insert(*id);
        }
        Ok(added)
    }

    /// Drop a subscription. Returns true when the client actually held it.
    pub fn unsubscribe(&self, id: &ClientId, key: &FeedKey) -> GatewayResult<bool> {
        let client = self
            .clients
            .get(id)
            .ok_or_else(|| GatewayError::ClientNotFound(id.to_string()))?;
        let removed = client.subscriptions.remove(key).is_some();
        if removed {
            if let Some(subscribers) = self.by_key.get_mut(key) {
                subscribers.remove(id);
            }
            self.by_key.remove_if(key, |_, subscribers| subscribers.is_empty());
        }
        Ok(removed)
    }

    /// Clients currently subscribed to a key.
    pub fn subscribers_of(&self, key: &FeedKey) -> Vec<Arc<ClientHandle>> {
        let Some(ids) = self.by_key.get(key) else {
            return Vec::new();
        };
        ids.iter()
            .filter_map(|id| self.clients.get(id.key()).map(|client| client.clone()))
            .collect()
    }

    /// Serialize once and queue a frame to every subscriber of `key`.
    /// Returns the delivered count and the clients whose buffer was full.
    pub fn fan_out(&self, key: &FeedKey, frame: &ServerFrame) -> (usize, Vec<Arc<ClientHandle>>) {
        self.send_to(self.subscribers_of(key), frame)
    }

    /// Queue a frame to every connected client.
    pub fn broadcast(&self, frame: &ServerFrame) -> (usize, Vec<Arc<ClientHandle>>) {
        let clients: Vec<Arc<ClientHandle>> = self
            .clients
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        self.send_to(clients, frame)
    }

    fn send_to(
        &self,
        clients: Vec<Arc<ClientHandle>>,
        frame: &ServerFrame,
    ) -> (usize, Vec<Arc<ClientHandle>>) {
        if clients.is_empty() {
            return (0, Vec::new());
        }
        let json = match serde_json::to_string(frame) {
            Ok(json) => json,
            Err(e) => {
                warn!(error = %e, "Dropping unserializable frame");
                return (0, Vec::new());
            }
        };
        let mut delivered = 0;
        let mut stalled = Vec::new();
        for client in clients {
            if client.try_send_text(json.clone()) {
                delivered += 1;
            } else {
                stalled.push(client);
            }
        }
        (delivered, stalled)
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    pub fn subscriber_count(&self, key: &FeedKey) -> usize {
        self.by_key.get(key).map(|ids| ids.len()).unwrap_or(0)
    }
}
