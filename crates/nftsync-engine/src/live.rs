//! Live subscription engine.
//!
//! A background task owns the `eth_subscribe("logs")` subscription, decodes
//! each notification and sends the event down a bounded channel. A separate
//! sink-writer task drains the channel into the [`EventSink`]. Both tasks end
//! when the subscription is lost, the engine is shut down, or the other side
//! of the channel goes away.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use nftsync_abi::LogDecoder;
use nftsync_core::{ContractEvent, EventSink, EventType, SyncError};
use nftsync_rpc::{LogNotification, LogSubscriber, LogSubscription, SubscriptionFilter};

use crate::pipeline::decode_log;

/// Why the live task stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LiveExit {
    /// `shutdown()` was called.
    Shutdown,
    /// The transport gave up reconnecting.
    Lost { attempts: u32 },
    /// The subscription stream ended or the event channel was closed.
    Closed,
}

struct LiveTask {
    stop: oneshot::Sender<()>,
    handle: JoinHandle<LiveExit>,
}

/// Follows new contract logs over a push subscription.
pub struct LiveEngine {
    subscriber: Arc<dyn LogSubscriber>,
    decoder: Arc<LogDecoder>,
    filter: SubscriptionFilter,
    listening: Arc<AtomicBool>,
    exit: Arc<watch::Sender<Option<LiveExit>>>,
    task: Mutex<Option<LiveTask>>,
}

impl LiveEngine {
    /// Subscribe to `event_types` emitted by `contract_address`.
    pub fn new(
        subscriber: Arc<dyn LogSubscriber>,
        decoder: Arc<LogDecoder>,
        contract_address: impl Into<String>,
        event_types: &[EventType],
    ) -> Self {
        let filter = SubscriptionFilter {
            address: contract_address.into(),
            topics: decoder.topics_for(event_types),
        };
        Self {
            subscriber,
            decoder,
            filter,
            listening: Arc::new(AtomicBool::new(false)),
            exit: Arc::new(watch::channel(None).0),
            task: Mutex::new(None),
        }
    }

    pub fn filter(&self) -> &SubscriptionFilter {
        &self.filter
    }

    pub fn is_listening(&self) -> bool {
        self.listening.load(Ordering::SeqCst)
    }

    /// How the current task ended; `None` while it runs or before a start.
    pub fn exits(&self) -> watch::Receiver<Option<LiveExit>> {
        self.exit.subscribe()
    }

    /// Open the subscription and start forwarding decoded events to `events`.
    ///
    /// Fails if the engine is already running or the subscription cannot be
    /// opened.
    pub async fn start(&self, events: mpsc::Sender<ContractEvent>) -> Result<(), SyncError> {
        let mut slot = self.task.lock().await;
        if slot.as_ref().is_some_and(|t| !t.handle.is_finished()) {
            return Err(SyncError::Other("live engine is already running".into()));
        }

        let subscription = self.subscriber.subscribe_logs(&self.filter).await?;
        info!(
            subscription = subscription.id(),
            address = %self.filter.address,
            topics = self.filter.topics.len(),
            "live subscription open"
        );

        self.listening.store(true, Ordering::SeqCst);
        self.exit.send_replace(None);
        let (stop, stop_rx) = oneshot::channel();
        let handle = tokio::spawn(run_subscription(
            subscription,
            self.decoder.clone(),
            events,
            stop_rx,
            self.listening.clone(),
            self.exit.clone(),
        ));
        *slot = Some(LiveTask { stop, handle });
        Ok(())
    }

    /// Stop the task and release the subscription. Returns how the task
    /// ended, or `None` if it was never started.
    pub async fn shutdown(&self) -> Option<LiveExit> {
        let task = self.task.lock().await.take()?;
        let _ = task.stop.send(());
        let exit = match task.handle.await {
            Ok(exit) => exit,
            Err(e) => {
                error!(error = %e, "live task panicked");
                LiveExit::Closed
            }
        };
        self.listening.store(false, Ordering::SeqCst);
        info!(?exit, "live engine stopped");
        Some(exit)
    }
}

async fn run_subscription(
    mut subscription: LogSubscription,
    decoder: Arc<LogDecoder>,
    events: mpsc::Sender<ContractEvent>,
    mut stop: oneshot::Receiver<()>,
    listening: Arc<AtomicBool>,
    exit_tx: Arc<watch::Sender<Option<LiveExit>>>,
) -> LiveExit {
    let exit = loop {
        tokio::select! {
            // Notifications already delivered are forwarded before a stop.
            biased;
            item = subscription.next() => match item {
                Some(LogNotification::Log(log)) => {
                    let Some(event) = decode_log(&decoder, &log) else { continue };
                    debug!(event = %event.event_type(), block = event.block_number, "live event");
                    if events.send(event).await.is_err() {
                        warn!("event channel closed, stopping live subscription");
                        break LiveExit::Closed;
                    }
                }
                Some(LogNotification::Lost { attempts }) => {
                    error!(attempts, "live subscription lost after reconnect attempts");
                    break LiveExit::Lost { attempts };
                }
                None => {
                    error!("live subscription stream ended");
                    break LiveExit::Closed;
                }
            },
            _ = &mut stop => break LiveExit::Shutdown,
        }
    };
    listening.store(false, Ordering::SeqCst);
    drop(subscription);
    exit_tx.send_replace(Some(exit.clone()));
    exit
}

/// Counters from a finished sink writer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriterStats {
    pub recorded: u64,
    pub failed: u64,
}

/// Drain `events` into `sink` until every sender is dropped.
///
/// A failed write is logged with enough context to replay the event by hand
/// and does not stop the writer.
pub fn spawn_sink_writer(
    sink: Arc<dyn EventSink>,
    mut events: mpsc::Receiver<ContractEvent>,
) -> JoinHandle<WriterStats> {
    tokio::spawn(async move {
        let mut stats = WriterStats::default();
        while let Some(event) = events.recv().await {
            let (name, block, tx, log_index) = (
                event.event_type(),
                event.block_number,
                event.transaction_hash.clone(),
                event.log_index,
            );
            match sink.record(event).await {
                Ok(stored) => {
                    stats.recorded += 1;
                    debug!(id = stored.id, event = %name, block, "live event recorded");
                }
                Err(e) => {
                    stats.failed += 1;
                    error!(event = %name, block, tx = %tx, log_index, error = %e, "failed to record live event");
                }
            }
        }
        debug!(recorded = stats.recorded, failed = stats.failed, "sink writer finished");
        stats
    })
}
