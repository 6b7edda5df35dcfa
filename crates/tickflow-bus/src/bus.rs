//! Cluster bus: Redis pub/sub fan-out with a local fallback path.
//!
//! One process publishes each ingested message to a fixed Redis channel;
//! every process (including the publisher) receives it through its own
//! subscription and fans it out to in-process consumers over broadcast
//! channels. When Redis is unreachable, or not configured at all, publish
//! delivers straight to the local fan-out so the process degrades to
//! single-node behavior instead of going silent.
//!
//! Delivery is best-effort: no replay, no queueing. A process that is
//! down when a message is published never sees it.

use crate::error::{BusError, BusResult};
use crate::topic::{BusMessage, BusTopic};
use futures_util::StreamExt;
use redis::AsyncCommands;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{broadcast, Mutex as TokioMutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Bus configuration.
#[derive(Debug, Clone)]
pub struct BusConfig {
    /// Redis URL; None runs the bus in local-only mode.
    pub url: Option<String>,
    /// Base delay for subscription reconnect backoff.
    pub reconnect_base_delay_ms: u64,
    /// Maximum delay for subscription reconnect backoff.
    pub reconnect_max_delay_ms: u64,
    /// Per-topic broadcast capacity for local subscribers.
    pub channel_capacity: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            url: None,
            reconnect_base_delay_ms: 2000,
            reconnect_max_delay_ms: 30000,
            channel_capacity: 1024,
        }
    }
}

/// Publish/delivery counters.
#[derive(Debug, Default)]
pub struct BusStats {
    /// Messages published to Redis.
    pub published_count: AtomicU64,
    /// Publishes that fell back to local delivery.
    pub fallback_count: AtomicU64,
    /// Messages received from Redis.
    pub received_count: AtomicU64,
}

impl BusStats {
    pub fn published(&self) -> u64 {
        self.published_count.load(Ordering::Relaxed)
    }

    pub fn fallbacks(&self) -> u64 {
        self.fallback_count.load(Ordering::Relaxed)
    }

    pub fn received(&self) -> u64 {
        self.received_count.load(Ordering::Relaxed)
    }
}

/// In-process fan-out: one broadcast channel per topic.
///
/// Dropping a receiver is the unsubscribe; the channel map itself is
/// fixed at construction.
pub struct LocalFanout {
    channels: HashMap<BusTopic, broadcast::Sender<BusMessage>>,
}

impl LocalFanout {
    fn new(capacity: usize) -> Self {
        let channels = BusTopic::ALL
            .into_iter()
            .map(|topic| (topic, broadcast::channel(capacity).0))
            .collect();
        Self { channels }
    }

    fn sender(&self, topic: BusTopic) -> &broadcast::Sender<BusMessage> {
        // All topics are inserted in new(), so the lookup cannot miss.
        &self.channels[&topic]
    }

    /// Subscribe to one topic. Drop the receiver to unsubscribe.
    pub fn subscribe(&self, topic: BusTopic) -> broadcast::Receiver<BusMessage> {
        self.sender(topic).subscribe()
    }

    /// Deliver to current subscribers; returns how many received it.
    pub fn deliver(&self, message: BusMessage) -> usize {
        self.sender(message.topic).send(message).unwrap_or(0)
    }

    /// Current subscriber count for a topic.
    pub fn receiver_count(&self, topic: BusTopic) -> usize {
        self.sender(topic).receiver_count()
    }
}

/// Cluster-wide pub/sub handle.
pub struct ClusterBus {
    config: BusConfig,
    /// None in local-only mode.
    client: Option<redis::Client>,
    /// Lazily created publisher connection; self-healing across Redis
    /// restarts.
    publisher: TokioMutex<Option<redis::aio::ConnectionManager>>,
    fanout: LocalFanout,
    stats: BusStats,
    shutdown_token: CancellationToken,
}

impl ClusterBus {
    /// Create a bus handle. Only the URL is validated here; connections
    /// are established lazily.
    pub fn new(config: BusConfig) -> BusResult<Self> {
        let client = match &config.url {
            Some(url) => Some(redis::Client::open(url.as_str())?),
            None => None,
        };

        if client.is_none() {
            info!("No bus URL configured, running in local-only mode");
        }

        Ok(Self {
            fanout: LocalFanout::new(config.channel_capacity),
            config,
            client,
            publisher: TokioMutex::new(None),
            stats: BusStats::default(),
            shutdown_token: CancellationToken::new(),
        })
    }

    /// Whether a Redis backend is configured.
    pub fn is_clustered(&self) -> bool {
        self.client.is_some()
    }

    /// Publish/delivery counters.
    pub fn stats(&self) -> &BusStats {
        &self.stats
    }

    /// Subscribe to a topic's local fan-out.
    ///
    /// Receivers see every message this process publishes or receives
    /// from the cluster. Drop the receiver to unsubscribe.
    pub fn subscribe(&self, topic: BusTopic) -> broadcast::Receiver<BusMessage> {
        self.fanout.subscribe(topic)
    }

    /// Current local subscriber count for a topic.
    pub fn subscriber_count(&self, topic: BusTopic) -> usize {
        self.fanout.receiver_count(topic)
    }

    /// Publish a pre-serialized payload. Never fails: if Redis cannot be
    /// reached the message is delivered to local subscribers only.
    pub async fn publish(&self, topic: BusTopic, payload: &str) {
        if self.client.is_some() {
            match self.publish_remote(topic, payload).await {
                Ok(()) => {
                    self.stats.published_count.fetch_add(1, Ordering::Relaxed);
                    return;
                }
                Err(e) => {
                    warn!(?e, channel = topic.as_channel(), "Bus publish failed, delivering locally");
                }
            }
            self.stats.fallback_count.fetch_add(1, Ordering::Relaxed);
        }

        let delivered = self.fanout.deliver(BusMessage::new(topic, payload));
        debug!(channel = topic.as_channel(), delivered, "Delivered locally");
    }

    async fn publish_remote(&self, topic: BusTopic, payload: &str) -> BusResult<()> {
        let mut publisher = self.publisher_handle().await?;
        publisher
            .publish::<_, _, ()>(topic.as_channel(), payload)
            .await?;
        Ok(())
    }

    async fn publisher_handle(&self) -> BusResult<redis::aio::ConnectionManager> {
        let mut guard = self.publisher.lock().await;
        if let Some(publisher) = guard.as_ref() {
            return Ok(publisher.clone());
        }

        let client = self.client.as_ref().ok_or(BusError::NotConfigured)?;
        let publisher = client.get_connection_manager().await?;
        info!("Bus publisher connection established");
        *guard = Some(publisher.clone());
        Ok(publisher)
    }

    /// Signal graceful shutdown. Idempotent.
    pub fn shutdown(&self) {
        info!("Bus shutdown requested");
        self.shutdown_token.cancel();
    }

    /// Check if shutdown has been requested.
    pub fn is_shutdown(&self) -> bool {
        self.shutdown_token.is_cancelled()
    }

    /// Run the cluster subscription loop, reconnecting on failure.
    ///
    /// Returns immediately in local-only mode; publishes are then fanned
    /// out directly and nothing arrives from other processes.
    pub async fn run(&self) -> BusResult<()> {
        let Some(client) = self.client.clone() else {
            return Ok(());
        };

        let mut attempt = 0u32;

        loop {
            if self.is_shutdown() {
                info!("Shutdown requested, exiting bus loop");
                return Ok(());
            }

            let mut received_message = false;
            match self.listen(&client, &mut received_message).await {
                Ok(()) => info!("Bus subscription closed"),
                Err(e) => error!(?e, "Bus subscription error"),
            }

            if self.is_shutdown() {
                return Ok(());
            }

            if received_message {
                attempt = 0;
            }
            attempt += 1;

            let delay = subscription_backoff(
                self.config.reconnect_base_delay_ms,
                self.config.reconnect_max_delay_ms,
                attempt,
            );
            warn!(attempt, delay_ms = delay.as_millis(), "Bus resubscribing");

            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                () = self.shutdown_token.cancelled() => {
                    info!("Shutdown requested during bus backoff, exiting");
                    return Ok(());
                }
            }
        }
    }

    async fn listen(&self, client: &redis::Client, received_message: &mut bool) -> BusResult<()> {
        let mut pubsub = client.get_async_pubsub().await?;
        for topic in BusTopic::ALL {
            pubsub.subscribe(topic.as_channel()).await?;
        }
        info!("Bus subscription established");

        let mut stream = pubsub.on_message();

        loop {
            tokio::select! {
                () = self.shutdown_token.cancelled() => {
                    info!("Shutdown signal received in bus loop");
                    return Ok(());
                }

                msg = stream.next() => {
                    let Some(msg) = msg else {
                        warn!("Bus message stream ended");
                        return Ok(());
                    };
                    *received_message = true;
                    self.stats.received_count.fetch_add(1, Ordering::Relaxed);

                    let channel = msg.get_channel_name();
                    let Some(topic) = BusTopic::from_channel(channel) else {
                        debug!(channel, "Message on unknown channel, ignoring");
                        continue;
                    };

                    match msg.get_payload::<String>() {
                        Ok(payload) => {
                            let delivered = self.fanout.deliver(BusMessage::new(topic, payload));
                            debug!(channel, delivered, "Bus message fanned out");
                        }
                        Err(e) => {
                            warn!(?e, channel, "Dropping bus message with invalid payload");
                        }
                    }
                }
            }
        }
    }
}

/// Exponential backoff for the subscription loop: doubles per attempt,
/// capped at `max_ms`.
fn subscription_backoff(base_ms: u64, max_ms: u64, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(10);
    let delay = base_ms.saturating_mul(1u64 << exponent);
    Duration::from_millis(delay.min(max_ms))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local_bus() -> ClusterBus {
        ClusterBus::new(BusConfig::default()).unwrap()
    }

    #[test]
    fn test_subscription_backoff_doubles_then_caps() {
        let delays: Vec<u64> = (1..=6)
            .map(|attempt| subscription_backoff(2000, 30000, attempt).as_millis() as u64)
            .collect();
        assert_eq!(delays, vec![2000, 4000, 8000, 16000, 30000, 30000]);
    }

    #[tokio::test]
    async fn test_local_publish_reaches_subscriber() {
        let bus = local_bus();
        let mut rx = bus.subscribe(BusTopic::Ticks);

        bus.publish(BusTopic::Ticks, "{\"key\":\"btc/usd\"}").await;

        let message = rx.recv().await.unwrap();
        assert_eq!(message.topic, BusTopic::Ticks);
        assert_eq!(&*message.payload, "{\"key\":\"btc/usd\"}");
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_silent() {
        let bus = local_bus();
        // No receivers anywhere; must not error or panic.
        bus.publish(BusTopic::Books, "{}").await;
        assert_eq!(bus.stats().published(), 0);
    }

    #[tokio::test]
    async fn test_topics_are_isolated() {
        let bus = local_bus();
        let mut ticks_rx = bus.subscribe(BusTopic::Ticks);
        let mut books_rx = bus.subscribe(BusTopic::Books);

        bus.publish(BusTopic::Books, "{\"book\":true}").await;

        let message = books_rx.recv().await.unwrap();
        assert_eq!(message.topic, BusTopic::Books);
        assert!(ticks_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_fanout_to_multiple_subscribers() {
        let bus = local_bus();
        let mut a = bus.subscribe(BusTopic::Ticks);
        let mut b = bus.subscribe(BusTopic::Ticks);

        bus.publish(BusTopic::Ticks, "tick").await;

        assert_eq!(&*a.recv().await.unwrap().payload, "tick");
        assert_eq!(&*b.recv().await.unwrap().payload, "tick");
    }

    #[tokio::test]
    async fn test_dropped_receiver_unsubscribes() {
        let bus = local_bus();
        let rx = bus.subscribe(BusTopic::Ticks);
        assert_eq!(bus.subscriber_count(BusTopic::Ticks), 1);

        drop(rx);
        assert_eq!(bus.subscriber_count(BusTopic::Ticks), 0);
    }

    #[tokio::test]
    async fn test_local_only_run_returns_immediately() {
        let bus = local_bus();
        assert!(!bus.is_clustered());
        bus.run().await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent() {
        let bus = local_bus();
        bus.shutdown();
        bus.shutdown();
        assert!(bus.is_shutdown());
    }
}
