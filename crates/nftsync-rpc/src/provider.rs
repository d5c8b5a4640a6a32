//! Provider traits used by the backfill and live engines.

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use nftsync_core::log::to_hex_quantity;
use nftsync_core::{BlockRange, RawLog, SyncError};

/// Filter for a bounded `eth_getLogs` query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFilter {
    pub address: String,
    pub from_block: u64,
    pub to_block: u64,
    /// Topic-0 alternatives. Empty means any event from the address.
    pub topics: Vec<String>,
}

impl LogFilter {
    pub fn new(address: impl Into<String>, range: BlockRange) -> Self {
        Self {
            address: address.into(),
            from_block: range.from,
            to_block: range.to,
            topics: Vec::new(),
        }
    }

    pub fn range(&self) -> BlockRange {
        BlockRange::new(self.from_block, self.to_block)
    }

    /// The single `eth_getLogs` parameter object.
    pub fn to_param(&self) -> Value {
        let mut obj = json!({
            "address": self.address,
            "fromBlock": to_hex_quantity(self.from_block),
            "toBlock": to_hex_quantity(self.to_block),
        });
        if !self.topics.is_empty() {
            obj["topics"] = json!([self.topics]);
        }
        obj
    }
}

/// Filter for `eth_subscribe("logs", ...)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionFilter {
    pub address: String,
    /// Topic-0 allow-list; a log matches if its signature is any of these.
    pub topics: Vec<String>,
}

impl SubscriptionFilter {
    pub fn to_param(&self) -> Value {
        json!({
            "address": self.address,
            "topics": [self.topics],
        })
    }
}

/// A request/response provider for heights and historical logs.
#[async_trait]
pub trait LogProvider: Send + Sync {
    /// Latest block number known to the node.
    async fn current_height(&self) -> Result<u64, SyncError>;

    /// Logs in the filter's inclusive block range.
    async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<RawLog>, SyncError>;

    /// Endpoint URL, for logs.
    fn url(&self) -> &str;
}

/// Item delivered on a [`LogSubscription`].
#[derive(Debug, Clone, PartialEq)]
pub enum LogNotification {
    Log(RawLog),
    /// The transport gave up reconnecting. No further items follow.
    Lost { attempts: u32 },
}

/// A push provider for new logs.
#[async_trait]
pub trait LogSubscriber: Send + Sync {
    async fn subscribe_logs(&self, filter: &SubscriptionFilter) -> Result<LogSubscription, SyncError>;
}

type Release = Box<dyn FnOnce() + Send>;

/// An open log subscription. Dropping it unsubscribes.
pub struct LogSubscription {
    id: String,
    rx: mpsc::UnboundedReceiver<LogNotification>,
    release: Option<Release>,
}

impl LogSubscription {
    /// Wrap a receiver; `release` runs once when the subscription is dropped.
    pub fn new(
        id: impl Into<String>,
        rx: mpsc::UnboundedReceiver<LogNotification>,
        release: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            id: id.into(),
            rx,
            release: Some(Box::new(release)),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Next notification, or `None` once the transport side has closed.
    pub async fn next(&mut self) -> Option<LogNotification> {
        self.rx.recv().await
    }
}

impl std::fmt::Debug for LogSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogSubscription").field("id", &self.id).finish()
    }
}

impl Drop for LogSubscription {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}
