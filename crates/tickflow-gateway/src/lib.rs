//! tickflow-gateway - Browser-facing WebSocket fan-out for tickflow.
//!
//! Each delivery process runs one gateway: browsers connect over WebSocket,
//! subscribe to keys, receive one snapshot per subscription, and then every
//! update relayed from the cluster bus for those keys.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                     delivery process                         │
//! │                                                              │
//! │   ClusterBus ──► run_relay ──► ClientRegistry ──► browsers   │
//! │        │             │              ▲                        │
//! │        │             ▼              │ subscribe/snapshot     │
//! │        │        HistoryStore   axum /ws handler              │
//! │        │        BookCache           │                        │
//! │        │                            ▼                        │
//! │        └──────────────── FeedControl ──► venue adapter       │
//! │                          (interest refcounts)                │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Backpressure is per client: every connection owns a bounded outbound
//! buffer, and a full buffer evicts that client without touching the rest.
//!
//! # Usage
//!
//! ```ignore
//! use tickflow_gateway::{run_relay, run_server, AppState, GatewayConfig};
//!
//! let state = AppState::new(registry, history, books, control, GatewayConfig::default());
//!
//! tokio::spawn(run_relay(bus.clone(), state.clone(), mirror_stores, shutdown.clone()));
//! tokio::spawn(async move {
//!     if let Err(e) = run_server(state, shutdown).await {
//!         tracing::error!(error = %e, "Gateway server failed");
//!     }
//! });
//! ```

mod clients;
mod config;
mod control;
mod error;
mod protocol;
mod relay;
mod server;

pub use clients::{ClientHandle, ClientId, ClientRegistry};
pub use config::GatewayConfig;
pub use control::FeedControl;
pub use error::{GatewayError, GatewayResult};
pub use protocol::{ClientMessage, ServerFrame};
pub use relay::{run_heartbeat, run_relay};
pub use server::{create_router, run_server, AppState, ConnectionLimiter};
