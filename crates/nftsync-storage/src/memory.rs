//! In-memory storage backend.
//!
//! Holds events and checkpoints in RAM behind one mutex. Used by tests and
//! by `DB_URI=memory:` for throwaway runs; nothing survives the process.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use tracing::debug;

use nftsync_core::event::normalize_address;
use nftsync_core::{
    Checkpoint, CheckpointStore, ContractEvent, EventKind, EventQueries, EventSink, EventType,
    StoredEvent, SyncError,
};

#[derive(Default)]
struct Inner {
    events: Vec<StoredEvent>,
    keys: HashMap<(String, u64), usize>,
    checkpoints: HashMap<String, Checkpoint>,
}

/// In-memory event store.
#[derive(Default)]
pub struct InMemoryStorage {
    inner: Mutex<Inner>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, SyncError> {
        self.inner
            .lock()
            .map_err(|_| SyncError::Storage("in-memory store lock poisoned".into()))
    }

    /// Events matching `pred`, newest first.
    fn select(&self, pred: impl Fn(&StoredEvent) -> bool) -> Result<Vec<StoredEvent>, SyncError> {
        let inner = self.lock()?;
        let mut out: Vec<StoredEvent> = inner.events.iter().filter(|e| pred(e)).cloned().collect();
        sort_newest_first(&mut out);
        Ok(out)
    }
}

/// Block number descending, then log index descending.
pub(crate) fn sort_newest_first(events: &mut [StoredEvent]) {
    events.sort_by(|a, b| {
        (b.event.block_number, b.event.log_index).cmp(&(a.event.block_number, a.event.log_index))
    });
}

fn matches(field: Option<&str>, address: &str) -> bool {
    field.is_some_and(|f| f.eq_ignore_ascii_case(address))
}

#[async_trait]
impl EventSink for InMemoryStorage {
    async fn record(&self, event: ContractEvent) -> Result<StoredEvent, SyncError> {
        let mut inner = self.lock()?;
        let key = (event.transaction_hash.clone(), event.log_index);
        if let Some(&idx) = inner.keys.get(&key) {
            debug!(tx = %key.0, log_index = key.1, "duplicate event ignored");
            return Ok(inner.events[idx].clone());
        }

        let stored = StoredEvent {
            id: inner.events.len() as i64 + 1,
            event,
            indexed_at: chrono::Utc::now().timestamp(),
        };
        let idx = inner.events.len();
        inner.events.push(stored.clone());
        inner.keys.insert(key, idx);
        Ok(stored)
    }
}

#[async_trait]
impl EventQueries for InMemoryStorage {
    async fn by_address(&self, address: &str) -> Result<Vec<StoredEvent>, SyncError> {
        let address = normalize_address(address);
        self.select(|e| matches(e.event.kind.user(), &address) || matches(e.event.kind.to(), &address))
    }

    async fn all(&self) -> Result<Vec<StoredEvent>, SyncError> {
        self.select(|_| true)
    }

    async fn by_type(&self, event_type: EventType) -> Result<Vec<StoredEvent>, SyncError> {
        self.select(|e| e.event.event_type() == event_type)
    }

    async fn by_block_range(&self, from: u64, to: u64) -> Result<Vec<StoredEvent>, SyncError> {
        self.select(|e| (from..=to).contains(&e.event.block_number))
    }

    async fn user_nfts(&self, address: &str) -> Result<Vec<StoredEvent>, SyncError> {
        let address = normalize_address(address);
        self.select(|e| matches!(&e.event.kind, EventKind::NftMinted { to, .. } if to.eq_ignore_ascii_case(&address)))
    }

    async fn is_user_registered(&self, address: &str) -> Result<bool, SyncError> {
        let address = normalize_address(address);
        let inner = self.lock()?;
        Ok(inner.events.iter().any(|e| {
            matches!(&e.event.kind, EventKind::UserRegistered { user } if user.eq_ignore_ascii_case(&address))
        }))
    }

    async fn is_user_blacklisted(&self, address: &str) -> Result<bool, SyncError> {
        let address = normalize_address(address);
        let inner = self.lock()?;
        let latest = inner
            .events
            .iter()
            .filter(|e| e.event.kind.action().is_some() && matches(e.event.kind.user(), &address))
            .max_by_key(|e| (e.event.block_number, e.event.log_index));
        Ok(latest.is_some_and(|e| e.event.event_type() == EventType::UserBlacklisted))
    }

    async fn latest_fees_update(&self) -> Result<Option<StoredEvent>, SyncError> {
        Ok(self.by_type(EventType::FeesUpdated).await?.into_iter().next())
    }

    async fn event_count(&self) -> Result<u64, SyncError> {
        Ok(self.lock()?.events.len() as u64)
    }
}

#[async_trait]
impl CheckpointStore for InMemoryStorage {
    async fn load(&self, sync_id: &str) -> Result<Option<Checkpoint>, SyncError> {
        Ok(self.lock()?.checkpoints.get(sync_id).cloned())
    }

    async fn save(&self, checkpoint: &Checkpoint) -> Result<(), SyncError> {
        self.lock()?
            .checkpoints
            .insert(checkpoint.sync_id.clone(), checkpoint.clone());
        Ok(())
    }

    async fn delete(&self, sync_id: &str) -> Result<(), SyncError> {
        self.lock()?.checkpoints.remove(sync_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    fn registered(tx: &str, block: u64, log_index: u64, timestamp: u64) -> ContractEvent {
        ContractEvent {
            transaction_hash: tx.into(),
            block_number: block,
            log_index,
            timestamp,
            kind: EventKind::UserRegistered { user: "0xabc".into() },
            raw_data: Map::new(),
        }
    }

    #[tokio::test]
    async fn second_record_returns_first_row() {
        let store = InMemoryStorage::new();
        let first = store.record(registered("0xaaa", 10, 0, 100)).await.unwrap();
        let second = store.record(registered("0xaaa", 10, 0, 200)).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(second.event.timestamp, 100);
        assert_eq!(store.event_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn same_tx_different_log_index_are_distinct() {
        let store = InMemoryStorage::new();
        let a = store.record(registered("0xaaa", 10, 0, 1)).await.unwrap();
        let b = store.record(registered("0xaaa", 10, 1, 1)).await.unwrap();
        assert_ne!(a.id, b.id);
        assert_eq!(store.event_count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn checkpoint_roundtrip() {
        let store = InMemoryStorage::new();
        store.save(&Checkpoint::new("nft-hub", 1_000)).await.unwrap();
        store.save(&Checkpoint::new("nft-hub", 1_400)).await.unwrap();
        assert_eq!(store.load("nft-hub").await.unwrap().unwrap().block_number, 1_400);

        store.delete("nft-hub").await.unwrap();
        assert!(store.load("nft-hub").await.unwrap().is_none());
    }
}
