//! Sync orchestrator: backfill, then live, with a catch-up pass between.
//!
//! # Startup
//! 1. Resume point = max(configured start block, checkpoint + 1)
//! 2. Backfill to the head (following it while it grows)
//! 3. Open the live subscription and its sink writer
//! 4. Catch-up: replay from the live cursor to the current head, covering
//!    blocks mined between the end of backfill and the subscription start
//! 5. State `Live`
//!
//! A subscription that is lost or closes after startup moves the state to
//! `Failed`.
//!
//! Overlap between the catch-up and live events is absorbed by the sink's
//! idempotent insert.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use nftsync_abi::LogDecoder;
use nftsync_core::{
    BlockCursor, CheckpointStore, EventSink, EventType, SyncConfig, SyncError, SyncState,
};
use nftsync_rpc::{LogProvider, LogSubscriber};

use crate::backfill::{BackfillEngine, BackfillOptions, BackfillReport};
use crate::live::{spawn_sink_writer, LiveEngine, LiveExit, WriterStats};

/// Capacity of the live engine → sink writer channel.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Report of a successful startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartupReport {
    pub backfill: BackfillReport,
    pub catch_up: BackfillReport,
}

/// Runs one contract's sync pipeline.
pub struct SyncOrchestrator {
    backfill: BackfillEngine,
    live: LiveEngine,
    sink: Arc<dyn EventSink>,
    live_cursor: BlockCursor,
    channel_capacity: usize,
    started: AtomicBool,
    writer: Mutex<Option<JoinHandle<WriterStats>>>,
    monitor: Mutex<Option<JoinHandle<()>>>,
    state: Arc<watch::Sender<SyncState>>,
}

impl SyncOrchestrator {
    pub fn new(
        config: &SyncConfig,
        provider: Arc<dyn LogProvider>,
        subscriber: Arc<dyn LogSubscriber>,
        decoder: Arc<LogDecoder>,
        sink: Arc<dyn EventSink>,
        checkpoints: Arc<dyn CheckpointStore>,
    ) -> Self {
        let backfill = BackfillEngine::new(
            provider,
            decoder.clone(),
            sink.clone(),
            checkpoints,
            BackfillOptions::from_config(config),
        );
        let live = LiveEngine::new(subscriber, decoder, config.contract_address.clone(), &EventType::ALL);
        let state = Arc::new(watch::channel(SyncState::Idle).0);
        Self {
            backfill,
            live,
            sink,
            live_cursor: config.live_cursor,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            started: AtomicBool::new(false),
            writer: Mutex::new(None),
            monitor: Mutex::new(None),
            state,
        }
    }

    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity.max(1);
        self
    }

    /// Backfill, then follow the chain.
    ///
    /// Calling it again after a start (successful or not) logs a warning and
    /// returns `Ok(None)`. On failure the state is `Failed`, the subscription
    /// is released, and the error is returned.
    pub async fn start_listening(&self) -> Result<Option<StartupReport>, SyncError> {
        if self.started.swap(true, Ordering::SeqCst) {
            warn!(state = %self.state(), "start_listening called more than once; ignoring");
            return Ok(None);
        }

        match self.startup().await {
            Ok(report) => {
                let went_live = self.state.send_if_modified(|s| {
                    if *s == SyncState::Backfilling {
                        *s = SyncState::Live;
                        true
                    } else {
                        false
                    }
                });
                if !went_live {
                    warn!(state = %self.state(), "live subscription ended during startup");
                    return Ok(Some(report));
                }
                info!(
                    backfilled = %report.backfill.range,
                    caught_up = %report.catch_up.range,
                    "sync is live"
                );
                Ok(Some(report))
            }
            Err(e) => {
                error!(error = %e, "sync startup failed");
                self.stop_live().await;
                self.state.send_replace(SyncState::Failed);
                Err(e)
            }
        }
    }

    async fn startup(&self) -> Result<StartupReport, SyncError> {
        self.state.send_replace(SyncState::Backfilling);
        let from = self.backfill.resume_point().await?;
        let backfill = self.backfill.run(from).await?;

        let (tx, rx) = mpsc::channel(self.channel_capacity);
        *self.writer.lock().await = Some(spawn_sink_writer(self.sink.clone(), rx));
        self.live.start(tx).await?;
        *self.monitor.lock().await = Some(self.watch_live());

        let replay_from = self.live_cursor.replay_from(Some(backfill.range.to));
        info!(cursor = %self.live_cursor, from = replay_from, "catch-up replay");
        let catch_up = self.backfill.run(replay_from).await?;

        Ok(StartupReport { backfill, catch_up })
    }

    /// Move to `Failed` when the live task ends for any reason but shutdown.
    fn watch_live(&self) -> JoinHandle<()> {
        let mut exits = self.live.exits();
        let state = self.state.clone();
        tokio::spawn(async move {
            let exit = loop {
                if let Some(exit) = exits.borrow_and_update().clone() {
                    break exit;
                }
                if exits.changed().await.is_err() {
                    return;
                }
            };
            if exit == LiveExit::Shutdown {
                return;
            }
            error!(?exit, "live subscription ended; sync is no longer live");
            state.send_if_modified(|s| match s {
                SyncState::Backfilling | SyncState::Live => {
                    *s = SyncState::Failed;
                    true
                }
                _ => false,
            });
        })
    }

    pub fn is_listening(&self) -> bool {
        self.live.is_listening()
    }

    pub fn state(&self) -> SyncState {
        *self.state.borrow()
    }

    /// Watch state transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<SyncState> {
        self.state.subscribe()
    }

    /// `true` while live and the subscription is still delivering.
    pub fn is_healthy(&self) -> bool {
        self.state() == SyncState::Live && self.is_listening()
    }

    pub fn backfill(&self) -> &BackfillEngine {
        &self.backfill
    }

    /// Stop the live engine, drain the writer, and mark the pipeline stopped.
    pub async fn shutdown(&self) -> Option<WriterStats> {
        let stats = self.stop_live().await;
        if self.state() != SyncState::Failed {
            self.state.send_replace(SyncState::Stopped);
        }
        stats
    }

    async fn stop_live(&self) -> Option<WriterStats> {
        self.live.shutdown().await;
        if let Some(monitor) = self.monitor.lock().await.take() {
            monitor.abort();
        }
        // The live task owned the only sender; the writer ends once drained.
        let writer = self.writer.lock().await.take()?;
        match writer.await {
            Ok(stats) => {
                info!(recorded = stats.recorded, failed = stats.failed, "sink writer drained");
                Some(stats)
            }
            Err(e) => {
                error!(error = %e, "sink writer panicked");
                None
            }
        }
    }
}
