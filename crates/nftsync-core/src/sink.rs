//! Write and read sides of the event store.
//!
//! The backfill and live engines are the only writers and see just
//! [`EventSink`]. Everything downstream (the marketplace API, the CLI)
//! reads through [`EventQueries`].

use async_trait::async_trait;

use crate::error::SyncError;
use crate::event::{ContractEvent, EventType, StoredEvent};

/// Idempotent event writer.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Record an event keyed by `(transaction_hash, log_index)`.
    ///
    /// If the key already exists the stored row is returned unchanged and
    /// the new event is discarded.
    async fn record(&self, event: ContractEvent) -> Result<StoredEvent, SyncError>;
}

/// Read-side queries. Lists are ordered by block number descending, then
/// log index descending. Address arguments match case-insensitively.
#[async_trait]
pub trait EventQueries: Send + Sync {
    /// Events whose `user` or `to` equals `address`.
    async fn by_address(&self, address: &str) -> Result<Vec<StoredEvent>, SyncError>;

    async fn all(&self) -> Result<Vec<StoredEvent>, SyncError>;

    async fn by_type(&self, event_type: EventType) -> Result<Vec<StoredEvent>, SyncError>;

    /// Events in the inclusive block range `[from, to]`.
    async fn by_block_range(&self, from: u64, to: u64) -> Result<Vec<StoredEvent>, SyncError>;

    /// `NFTMinted` events whose recipient is `address`.
    async fn user_nfts(&self, address: &str) -> Result<Vec<StoredEvent>, SyncError>;

    async fn is_user_registered(&self, address: &str) -> Result<bool, SyncError>;

    /// `true` if the latest blacklist transition for `address` (by block
    /// number, then log index) is `UserBlacklisted`.
    async fn is_user_blacklisted(&self, address: &str) -> Result<bool, SyncError>;

    async fn latest_fees_update(&self) -> Result<Option<StoredEvent>, SyncError>;

    async fn event_count(&self) -> Result<u64, SyncError>;
}
