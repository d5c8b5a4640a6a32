//! Historical backfill: chunked `eth_getLogs` replay from a start block to
//! the chain head.
//!
//! # Loop
//! For each chunk `[cursor, min(cursor + chunk_size - 1, head)]`:
//!   - re-read the head and extend the target if the chain grew
//!   - fetch the chunk's logs (retried with backoff on transient errors)
//!   - decode and record every stored event
//!   - save the checkpoint, advance, pause
//!
//! A fetch that exhausts its retries, a non-retryable provider error, or a
//! sink failure fails the run. The checkpoint only moves after a chunk is
//! fully recorded, so a restart replays the failed chunk.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use nftsync_abi::LogDecoder;
use nftsync_core::checkpoint::resume_block;
use nftsync_core::types::chunk_end;
use nftsync_core::{BlockRange, Checkpoint, CheckpointStore, EventSink, RawLog, SyncError};
use nftsync_rpc::{LogFilter, LogProvider, RetryConfig, RetryPolicy};

use crate::pipeline::decode_log;

/// Lifecycle of a backfill engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BackfillState {
    Idle,
    Running,
    Completed,
    Failed,
}

impl std::fmt::Display for BackfillState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Summary of one backfill run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackfillReport {
    /// Covered range; `to` is the last head the run observed. Empty when the
    /// start block was already past the head.
    pub range: BlockRange,
    pub chunks: u64,
    /// Raw logs returned by the provider.
    pub logs: u64,
    /// Events handed to the sink (duplicates included).
    pub recorded: u64,
    /// Removed or undecodable logs.
    pub skipped: u64,
}

impl BackfillReport {
    fn empty(from: u64, to: u64) -> Self {
        Self {
            range: BlockRange::new(from, to),
            chunks: 0,
            logs: 0,
            recorded: 0,
            skipped: 0,
        }
    }
}

/// Tunables for a [`BackfillEngine`].
#[derive(Debug, Clone)]
pub struct BackfillOptions {
    /// Checkpoint key.
    pub sync_id: String,
    pub contract_address: String,
    /// Start block when no checkpoint exists.
    pub start_block: u64,
    pub chunk_size: u64,
    pub pacing: Duration,
    /// Retry budget for each chunk fetch and head read.
    pub retry: RetryConfig,
}

impl BackfillOptions {
    pub fn from_config(config: &nftsync_core::SyncConfig) -> Self {
        Self {
            sync_id: config.sync_id.clone(),
            contract_address: config.contract_address.clone(),
            start_block: config.start_block,
            chunk_size: config.chunk_size,
            pacing: config.chunk_pacing(),
            retry: RetryConfig::with_max_retries(config.max_retries),
        }
    }
}

/// The chunk partition of `[from, to]`.
pub fn plan_chunks(from: u64, to: u64, size: u64) -> Vec<BlockRange> {
    BlockRange::new(from, to).chunks(size).collect()
}

/// Sequential, checkpointed backfill over one contract's logs.
pub struct BackfillEngine {
    provider: Arc<dyn LogProvider>,
    decoder: Arc<LogDecoder>,
    sink: Arc<dyn EventSink>,
    checkpoints: Arc<dyn CheckpointStore>,
    options: BackfillOptions,
    retry: RetryPolicy,
    state: watch::Sender<BackfillState>,
}

impl BackfillEngine {
    pub fn new(
        provider: Arc<dyn LogProvider>,
        decoder: Arc<LogDecoder>,
        sink: Arc<dyn EventSink>,
        checkpoints: Arc<dyn CheckpointStore>,
        options: BackfillOptions,
    ) -> Self {
        let retry = RetryPolicy::new(options.retry.clone());
        let (state, _) = watch::channel(BackfillState::Idle);
        Self {
            provider,
            decoder,
            sink,
            checkpoints,
            options,
            retry,
            state,
        }
    }

    pub fn state(&self) -> BackfillState {
        *self.state.borrow()
    }

    pub fn options(&self) -> &BackfillOptions {
        &self.options
    }

    /// First block to scan: the configured start, or one past the saved
    /// checkpoint if that is later.
    pub async fn resume_point(&self) -> Result<u64, SyncError> {
        let checkpoint = self.checkpoints.load(&self.options.sync_id).await?;
        if let Some(cp) = &checkpoint {
            info!(sync_id = %cp.sync_id, block = cp.block_number, "resuming from checkpoint");
        }
        Ok(resume_block(self.options.start_block, checkpoint.as_ref()))
    }

    /// Current chain head, retried like a chunk fetch.
    pub async fn head(&self) -> Result<u64, SyncError> {
        self.retry
            .run("eth_blockNumber", || self.provider.current_height())
            .await
    }

    /// Backfill from `from` to the head, following the head as it grows.
    pub async fn run(&self, from: u64) -> Result<BackfillReport, SyncError> {
        self.run_tracked(from, None).await
    }

    /// Backfill the fixed range `[from, to]`.
    pub async fn run_range(&self, from: u64, to: u64) -> Result<BackfillReport, SyncError> {
        self.run_tracked(from, Some(to)).await
    }

    async fn run_tracked(&self, from: u64, bound: Option<u64>) -> Result<BackfillReport, SyncError> {
        self.state.send_replace(BackfillState::Running);
        let result = self.drive(from, bound).await;
        match &result {
            Ok(report) => {
                self.state.send_replace(BackfillState::Completed);
                info!(
                    range = %report.range,
                    chunks = report.chunks,
                    recorded = report.recorded,
                    skipped = report.skipped,
                    "backfill complete"
                );
            }
            Err(e) => {
                self.state.send_replace(BackfillState::Failed);
                tracing::error!(from, error = %e, "backfill failed");
            }
        }
        result
    }

    async fn drive(&self, from: u64, bound: Option<u64>) -> Result<BackfillReport, SyncError> {
        let mut to = match bound {
            Some(to) => to,
            None => self.head().await?,
        };
        if from > to {
            debug!(from, to, "nothing to backfill");
            return Ok(BackfillReport::empty(from, to));
        }

        let mut saved = self
            .checkpoints
            .load(&self.options.sync_id)
            .await?
            .map(|cp| cp.block_number);
        let mut report = BackfillReport::empty(from, to);
        let mut cursor = from;
        info!(from, to, chunk_size = self.options.chunk_size, "backfill starting");

        loop {
            if bound.is_none() {
                let head = self.head().await?;
                if head > to {
                    debug!(previous = to, head, "head advanced, extending backfill");
                    to = head;
                }
            }

            let end = chunk_end(cursor, self.options.chunk_size, to);
            let range = BlockRange::new(cursor, end);
            let logs = self.fetch_chunk(range).await?;

            let (recorded, skipped) = self.record_logs(&logs).await?;
            self.advance_checkpoint(end, &mut saved).await?;

            report.chunks += 1;
            report.logs += logs.len() as u64;
            report.recorded += recorded;
            report.skipped += skipped;
            info!(
                chunk = %range,
                target = to,
                logs = logs.len(),
                recorded,
                skipped,
                "backfill chunk complete"
            );

            if end >= to {
                break;
            }
            cursor = end + 1;
            if !self.options.pacing.is_zero() {
                tokio::time::sleep(self.options.pacing).await;
            }
        }

        report.range = BlockRange::new(from, to);
        Ok(report)
    }

    async fn fetch_chunk(&self, range: BlockRange) -> Result<Vec<RawLog>, SyncError> {
        let filter = LogFilter::new(self.options.contract_address.clone(), range);
        self.retry
            .run("eth_getLogs", || self.provider.get_logs(&filter))
            .await
            .map_err(|e| {
                if e.is_range_error() {
                    warn!(chunk = %range, error = %e, "provider rejected chunk; lower ETH_RPC_BLOCK_LIMIT");
                }
                e
            })
    }

    /// Decode and record a chunk's logs in provider order.
    async fn record_logs(&self, logs: &[RawLog]) -> Result<(u64, u64), SyncError> {
        let mut recorded = 0u64;
        let mut skipped = 0u64;
        for log in logs {
            let Some(event) = decode_log(&self.decoder, log) else {
                skipped += 1;
                continue;
            };
            let (name, block, tx) = (event.event_type(), event.block_number, event.transaction_hash.clone());
            self.sink.record(event).await.map_err(|e| {
                tracing::error!(event = %name, block, tx = %tx, error = %e, "failed to record event");
                e
            })?;
            recorded += 1;
        }
        Ok((recorded, skipped))
    }

    /// Persist `end` unless a later block is already checkpointed.
    async fn advance_checkpoint(&self, end: u64, saved: &mut Option<u64>) -> Result<(), SyncError> {
        if saved.is_some_and(|s| s >= end) {
            return Ok(());
        }
        self.checkpoints
            .save(&Checkpoint::new(self.options.sync_id.clone(), end))
            .await?;
        *saved = Some(end);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_plan_matches_provider_limit() {
        assert_eq!(
            plan_chunks(100, 250, 100),
            vec![BlockRange::new(100, 199), BlockRange::new(200, 250)]
        );
    }

    #[test]
    fn chunk_plan_single_block() {
        assert_eq!(plan_chunks(7, 7, 400), vec![BlockRange::new(7, 7)]);
        assert!(plan_chunks(8, 7, 400).is_empty());
    }

    #[test]
    fn options_follow_config() {
        let config = nftsync_core::SyncConfig {
            chunk_size: 50,
            chunk_pacing_ms: 0,
            max_retries: 7,
            ..Default::default()
        };
        let opts = BackfillOptions::from_config(&config);
        assert_eq!(opts.chunk_size, 50);
        assert!(opts.pacing.is_zero());
        assert_eq!(opts.retry.max_retries, 7);
        assert_eq!(opts.sync_id, "nft-hub");
    }
}
