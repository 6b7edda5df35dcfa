//! Upstream interest control.
//!
//! Bridges client subscriptions to the venue connection: the first consumer
//! of a key triggers exactly one upstream subscribe, the last release exactly
//! one unsubscribe. Keys configured as order-book keys ride the book topic,
//! everything else the price topic.

use std::collections::HashSet;
use std::sync::Arc;

use tickflow_core::FeedKey;
use tickflow_feed::SubscriptionRegistry;
use tickflow_ws::{StreamTarget, UpstreamCommand};
use tokio::sync::mpsc;
use tracing::{debug, warn};

pub struct FeedControl {
    interests: Arc<SubscriptionRegistry>,
    /// Channel into the venue connection loop. `None` when this process runs
    /// without a venue adapter and consumes the bus only.
    upstream_tx: Option<mpsc::Sender<UpstreamCommand>>,
    book_keys: HashSet<FeedKey>,
}

impl FeedControl {
    pub fn new(
        interests: Arc<SubscriptionRegistry>,
        upstream_tx: Option<mpsc::Sender<UpstreamCommand>>,
        book_keys: HashSet<FeedKey>,
    ) -> Self {
        Self {
            interests,
            upstream_tx,
            book_keys,
        }
    }

    /// Record interest in a key. Only the first consumer triggers an
    /// upstream subscribe; later consumers just bump the count.
    pub async fn acquire(&self, key: &FeedKey) {
        if !self.interests.register(key) {
            return;
        }
        self.send(UpstreamCommand::Subscribe(self.target_for(key)))
            .await;
    }

    /// Release interest. Only the last consumer triggers an unsubscribe.
    pub async fn release(&self, key: &FeedKey) {
        if !self.interests.release(key) {
            return;
        }
        self.send(UpstreamCommand::Unsubscribe(key.clone())).await;
    }

    pub fn interest_count(&self, key: &FeedKey) -> usize {
        self.interests.interest_count(key)
    }

    fn target_for(&self, key: &FeedKey) -> StreamTarget {
        if self.book_keys.contains(key) {
            StreamTarget::order_book(key.clone())
        } else {
            StreamTarget::prices(key.clone())
        }
    }

    async fn send(&self, command: UpstreamCommand) {
        let Some(tx) = &self.upstream_tx else {
            debug!(?command, "No venue adapter in this process, command skipped");
            return;
        };
        if let Err(e) = tx.send(command).await {
            warn!(error = %e, "Venue command channel closed");
        }
    }
}
