//! Main application orchestration.
//!
//! Wires the pipeline: venue adapter -> parser -> {history ring, book
//! cache, bus publish} -> relay -> gateway clients. Every long-lived task
//! watches one cancellation token; ctrl-c fires it and the process drains.

use std::sync::Arc;
use std::time::Duration;

use tickflow_bus::{BusTopic, ClusterBus, CHANNEL_BOOKS, CHANNEL_TICKS};
use tickflow_feed::{BookCache, FeedEvent, FrameParser, HistoryStore, SubscriptionRegistry};
use tickflow_gateway::{
    run_heartbeat, run_relay, run_server, AppState, ClientRegistry, FeedControl,
};
use tickflow_telemetry::Metrics;
use tickflow_ws::{ConnectionManager, ConnectionState, VenueFrame};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::AppConfig;
use crate::error::AppResult;

/// Periodic stats output interval.
const STATS_INTERVAL: Duration = Duration::from_secs(300);

/// Venue frame channel capacity.
const FRAME_CHANNEL_CAPACITY: usize = 1_000;

/// Main application.
pub struct Application {
    config: AppConfig,
    history: Arc<HistoryStore>,
    books: Arc<BookCache>,
    interests: Arc<SubscriptionRegistry>,
    bus: Arc<ClusterBus>,
    parser: Arc<FrameParser>,
    shutdown: CancellationToken,
}

impl Application {
    /// Create a new application from validated configuration.
    pub fn new(config: AppConfig) -> AppResult<Self> {
        config.validate()?;

        let history = Arc::new(HistoryStore::new(config.history.capacity));
        let books = Arc::new(BookCache::new());
        let interests = Arc::new(SubscriptionRegistry::new());
        let bus = Arc::new(ClusterBus::new(config.bus.to_bus_config())?);

        Ok(Self {
            config,
            history,
            books,
            interests,
            bus,
            parser: Arc::new(FrameParser::new()),
            shutdown: CancellationToken::new(),
        })
    }

    /// Token observed by every task; tests cancel it to stop `run()`.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Run until ctrl-c or external shutdown.
    pub async fn run(self) -> AppResult<()> {
        info!(
            venue_enabled = self.config.venue.enabled,
            clustered = self.bus.is_clustered(),
            history_capacity = self.history.capacity(),
            "Starting tickflow relay"
        );

        // Configured keys hold baseline interest so client churn can never
        // cancel a startup subscription.
        for key in self.config.venue.configured_keys() {
            self.interests.register(&key);
        }

        // Venue adapter, optional in bus-only delivery processes.
        let mut manager: Option<Arc<ConnectionManager>> = None;
        let mut frame_rx = None;
        let mut command_tx = None;
        if self.config.venue.enabled {
            let (tx, rx) = mpsc::channel::<VenueFrame>(FRAME_CHANNEL_CAPACITY);
            let connection =
                Arc::new(ConnectionManager::new(self.config.venue.connection_config(), tx));
            command_tx = Some(connection.command_sender());
            frame_rx = Some(rx);
            manager = Some(connection);
        }

        let control = Arc::new(FeedControl::new(
            self.interests.clone(),
            command_tx,
            self.config.venue.book_key_set(),
        ));
        let state = AppState::new(
            Arc::new(ClientRegistry::new()),
            self.history.clone(),
            self.books.clone(),
            control,
            self.config.gateway.clone(),
        );

        let mut tasks: Vec<JoinHandle<()>> = Vec::new();

        // Bus subscriber loop.
        {
            let bus = self.bus.clone();
            tasks.push(tokio::spawn(async move {
                if let Err(e) = bus.run().await {
                    error!(error = %e, "Bus subscriber loop failed");
                }
            }));
        }

        // Bus-to-client relay and heartbeats. Processes without a venue
        // adapter mirror bus traffic into their local stores.
        tasks.push(tokio::spawn(run_relay(
            self.bus.clone(),
            state.clone(),
            !self.config.venue.enabled,
            self.shutdown.clone(),
        )));
        tasks.push(tokio::spawn(run_heartbeat(
            state.clone(),
            self.shutdown.clone(),
        )));

        // Client gateway.
        {
            let state = state.clone();
            let shutdown = self.shutdown.clone();
            tasks.push(tokio::spawn(async move {
                if let Err(e) = run_server(state, shutdown).await {
                    error!(error = %e, "Gateway server failed");
                }
            }));
        }

        // Venue connection and frame ingestion.
        if let (Some(connection), Some(rx)) = (manager.clone(), frame_rx.take()) {
            tasks.push(tokio::spawn(async move {
                if let Err(e) = connection.connect().await {
                    error!(error = %e, "Venue connection ended");
                }
            }));
            tasks.push(tokio::spawn(ingest_loop(
                rx,
                self.parser.clone(),
                self.history.clone(),
                self.books.clone(),
                self.bus.clone(),
                self.shutdown.clone(),
            )));
        }

        // Main loop: periodic stats plus shutdown handling.
        let mut stats_interval = tokio::time::interval(STATS_INTERVAL);
        let mut last_reconnects = 0u32;
        loop {
            tokio::select! {
                _ = stats_interval.tick() => {
                    self.log_stats(&state, manager.as_deref(), &mut last_reconnects);
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("Shutdown signal received");
                    break;
                }
                () = self.shutdown.cancelled() => break,
            }
        }

        // Cleanup. Cancellation is cooperative; give tasks a short drain
        // window before dropping them.
        self.shutdown.cancel();
        if let Some(connection) = &manager {
            connection.shutdown();
        }
        self.bus.shutdown();
        tokio::time::sleep(Duration::from_millis(250)).await;
        for task in &tasks {
            task.abort();
        }

        info!("Relay stopped");
        Ok(())
    }

    fn log_stats(
        &self,
        state: &AppState,
        manager: Option<&ConnectionManager>,
        last_reconnects: &mut u32,
    ) {
        let parser_stats = self.parser.stats();
        let bus_stats = self.bus.stats();

        if let Some(manager) = manager {
            let connection_state = manager.state();
            Metrics::ws_state_set(connection_state.as_str());
            if connection_state == ConnectionState::Connected {
                Metrics::ws_connected();
            } else {
                Metrics::ws_disconnected();
            }
            let reconnects = manager.reconnect_count();
            Metrics::ws_reconnects(u64::from(reconnects.saturating_sub(*last_reconnects)));
            *last_reconnects = reconnects;

            info!(
                state = connection_state.as_str(),
                reconnects,
                accepted = parser_stats.accepted(),
                ignored = parser_stats.ignored(),
                malformed = parser_stats.malformed(),
                published = bus_stats.published(),
                fallbacks = bus_stats.fallbacks(),
                clients = state.registry.client_count(),
                "Pipeline stats"
            );
        } else {
            info!(
                received = bus_stats.received(),
                clients = state.registry.client_count(),
                "Pipeline stats"
            );
        }
    }
}

/// Drain venue frames into the pipeline until shutdown or channel close.
pub async fn ingest_loop(
    mut frames: mpsc::Receiver<VenueFrame>,
    parser: Arc<FrameParser>,
    history: Arc<HistoryStore>,
    books: Arc<BookCache>,
    bus: Arc<ClusterBus>,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,
            received = frames.recv() => {
                let Some(frame) = received else {
                    debug!("Venue frame channel closed");
                    break;
                };
                match parser.parse_frame(&frame) {
                    Ok(Some(event)) => {
                        Metrics::frame_accepted(&frame.topic, &frame.kind);
                        apply_event(&history, &books, &bus, event).await;
                    }
                    Ok(None) => Metrics::frame_dropped("ignored"),
                    Err(e) => {
                        warn!(error = %e, topic = %frame.topic, "Dropping malformed venue frame");
                        Metrics::frame_dropped("malformed");
                    }
                }
            }
        }
    }
}

/// Buffer first, publish second: a same-process reader hitting history
/// right after the publish always sees at least what went out.
async fn apply_event(
    history: &HistoryStore,
    books: &BookCache,
    bus: &ClusterBus,
    event: FeedEvent,
) {
    match event {
        FeedEvent::PriceHistory { key, points } => {
            let count = points.len();
            history.seed(&key, points);
            Metrics::history_points(key.as_str(), history.len(&key) as f64);
            debug!(key = %key, count, "Venue history snapshot seeded");
        }
        FeedEvent::PriceTick(point) => {
            history.append(point.clone());
            Metrics::history_points(point.key.as_str(), history.len(&point.key) as f64);
            match serde_json::to_string(&point) {
                Ok(payload) => {
                    bus.publish(BusTopic::Ticks, &payload).await;
                    Metrics::bus_published(CHANNEL_TICKS);
                }
                Err(e) => warn!(error = %e, "Failed to serialize tick"),
            }
        }
        FeedEvent::BookUpdate(book) => {
            books.update(book.clone());
            match serde_json::to_string(&book) {
                Ok(payload) => {
                    bus.publish(BusTopic::Books, &payload).await;
                    Metrics::bus_published(CHANNEL_BOOKS);
                }
                Err(e) => warn!(error = %e, "Failed to serialize book"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use tickflow_bus::BusConfig;
    use tickflow_core::{FeedKey, PricePoint};

    fn local_bus() -> Arc<ClusterBus> {
        Arc::new(ClusterBus::new(BusConfig::default()).unwrap())
    }

    #[tokio::test]
    async fn test_apply_tick_buffers_then_publishes() {
        let history = HistoryStore::new(8);
        let books = BookCache::new();
        let bus = local_bus();
        let mut rx = bus.subscribe(BusTopic::Ticks);

        let point = PricePoint::new("btc/usd", dec!(100.5), 10);
        apply_event(&history, &books, &bus, FeedEvent::PriceTick(point.clone())).await;

        // History was written before the bus delivery we are now seeing.
        let message = rx.recv().await.unwrap();
        let relayed: PricePoint = serde_json::from_str(message.payload.as_ref()).unwrap();
        assert_eq!(relayed, point);
        assert_eq!(
            history.latest(&FeedKey::from("btc/usd")).unwrap().timestamp_ms,
            10
        );
    }

    #[tokio::test]
    async fn test_apply_history_snapshot_is_not_republished() {
        let history = HistoryStore::new(8);
        let books = BookCache::new();
        let bus = local_bus();
        let mut rx = bus.subscribe(BusTopic::Ticks);

        let key = FeedKey::from("eth/usd");
        let points = vec![
            PricePoint::new(key.clone(), dec!(1), 1),
            PricePoint::new(key.clone(), dec!(2), 2),
        ];
        apply_event(&history, &books, &bus, FeedEvent::PriceHistory { key: key.clone(), points })
            .await;

        assert_eq!(history.read_all(&key).len(), 2);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_application_new_rejects_invalid_config() {
        // Venue enabled with no URL.
        let config = AppConfig::default();
        assert!(Application::new(config).is_err());
    }

    #[tokio::test]
    async fn test_run_stops_on_external_shutdown() {
        let mut config = AppConfig::default();
        config.venue.enabled = false;
        config.gateway.port = 0;

        let app = Application::new(config).unwrap();
        let shutdown = app.shutdown_token();

        let runner = tokio::spawn(app.run());
        tokio::time::sleep(Duration::from_millis(100)).await;
        shutdown.cancel();

        let result = tokio::time::timeout(Duration::from_secs(2), runner)
            .await
            .expect("run() should stop after shutdown")
            .unwrap();
        assert!(result.is_ok());
    }
}
