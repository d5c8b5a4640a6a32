//! Backfill checkpoints: the persisted resume point after a crash.
//!
//! A checkpoint stores the last block whose backfill chunk was fully
//! recorded. It lives in the same store as the events, so on restart the
//! backfill resumes at `block_number + 1` instead of the configured start
//! block.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::SyncError;

/// A persisted checkpoint for one sync pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Pipeline identifier (one per contract deployment).
    pub sync_id: String,
    /// Last fully processed block number.
    pub block_number: u64,
    /// Unix timestamp of when this checkpoint was saved.
    pub updated_at: i64,
}

impl Checkpoint {
    pub fn new(sync_id: impl Into<String>, block_number: u64) -> Self {
        Self {
            sync_id: sync_id.into(),
            block_number,
            updated_at: chrono::Utc::now().timestamp(),
        }
    }

    /// First block still to be processed.
    pub fn next_block(&self) -> u64 {
        self.block_number.saturating_add(1)
    }
}

/// Storage for checkpoints. Backends implement this next to [`EventSink`](crate::sink::EventSink).
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Load the checkpoint for a pipeline, if one was saved.
    async fn load(&self, sync_id: &str) -> Result<Option<Checkpoint>, SyncError>;

    /// Save (upsert) a checkpoint.
    async fn save(&self, checkpoint: &Checkpoint) -> Result<(), SyncError>;

    /// Delete a checkpoint (resets the pipeline to its configured start).
    async fn delete(&self, sync_id: &str) -> Result<(), SyncError>;
}

/// Resolve the backfill start block from config and an optional checkpoint.
pub fn resume_block(configured_start: u64, checkpoint: Option<&Checkpoint>) -> u64 {
    match checkpoint {
        Some(cp) => configured_start.max(cp.next_block()),
        None => configured_start,
    }
}
