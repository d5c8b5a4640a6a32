//! Scripted provider, subscriber and log builders for engine tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use nftsync_abi::LogDecoder;
use nftsync_core::log::to_hex_quantity;
use nftsync_core::{BlockRange, ContractEvent, EventSink, EventType, RawLog, StoredEvent, SyncConfig, SyncError};
use nftsync_rpc::{LogFilter, LogNotification, LogProvider, LogSubscriber, LogSubscription, SubscriptionFilter};

pub const CONTRACT: &str = "0x7ab383c0389eeffe0073838c9016151731136143";
pub const ALICE: &str = "0x00000000000000000000000000000000000000a1";

pub fn decoder() -> Arc<LogDecoder> {
    Arc::new(LogDecoder::nft_hub().unwrap())
}

pub fn test_config() -> SyncConfig {
    SyncConfig {
        contract_address: CONTRACT.into(),
        chunk_pacing_ms: 0,
        max_retries: 0,
        database_url: "memory:".into(),
        ..SyncConfig::default()
    }
}

// ─── Log builders ────────────────────────────────────────────────────────────

fn word(n: u64) -> String {
    format!("{n:064x}")
}

fn address_topic(addr: &str) -> String {
    format!("0x{:0>64}", addr.trim_start_matches("0x"))
}

fn raw(topics: Vec<String>, data: String, block: u64, log_index: u64) -> RawLog {
    RawLog {
        address: CONTRACT.into(),
        topics,
        data,
        block_number: Some(to_hex_quantity(block)),
        block_hash: Some(format!("0x{}", word(block))),
        transaction_hash: Some(format!("0x{}", word(block * 1_000 + log_index))),
        log_index: Some(to_hex_quantity(log_index)),
        removed: false,
    }
}

pub fn registered_log(user: &str, block: u64, log_index: u64) -> RawLog {
    let topic0 = decoder().topic0(EventType::UserRegistered).unwrap().to_string();
    raw(
        vec![topic0, address_topic(user)],
        format!("0x{}", word(1_700_000_000 + block)),
        block,
        log_index,
    )
}

pub fn minted_log(to: &str, token_id: u64, uri: &str, block: u64, log_index: u64) -> RawLog {
    let topic0 = decoder().topic0(EventType::NftMinted).unwrap().to_string();
    let mut tail = hex_bytes(uri.as_bytes());
    while tail.len() % 64 != 0 {
        tail.push('0');
    }
    let data = format!(
        "0x{}{}{}{}",
        word(0x40),
        word(1_700_000_000 + block),
        word(uri.len() as u64),
        tail
    );
    raw(
        vec![topic0, address_topic(to), format!("0x{}", word(token_id))],
        data,
        block,
        log_index,
    )
}

/// An ERC-721 `Transfer`, declared in the ABI but not stored.
pub fn transfer_log(block: u64, log_index: u64) -> RawLog {
    let topic0 = "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef".to_string();
    raw(
        vec![topic0, address_topic(ALICE), address_topic(ALICE), format!("0x{}", word(1))],
        "0x".into(),
        block,
        log_index,
    )
}

pub fn unknown_log(block: u64, log_index: u64) -> RawLog {
    raw(vec![format!("0x{}", word(0xdead))], "0x".into(), block, log_index)
}

fn hex_bytes(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

// ─── MockProvider ────────────────────────────────────────────────────────────

#[derive(Default)]
struct ProviderInner {
    heights: VecDeque<u64>,
    logs: Vec<RawLog>,
    failures: VecDeque<SyncError>,
    calls: Vec<BlockRange>,
}

/// `LogProvider` with scripted heights, a fixed log set, and injectable
/// `get_logs` failures.
#[derive(Default)]
pub struct MockProvider {
    inner: Mutex<ProviderInner>,
}

impl MockProvider {
    pub fn new(height: u64) -> Arc<Self> {
        let provider = Self::default();
        provider.inner.lock().unwrap().heights.push_back(height);
        Arc::new(provider)
    }

    /// Heights returned by successive `current_height` calls. The last one
    /// repeats.
    pub fn script_heights(&self, heights: &[u64]) {
        let mut inner = self.inner.lock().unwrap();
        inner.heights = heights.iter().copied().collect();
    }

    pub fn set_height(&self, height: u64) {
        self.script_heights(&[height]);
    }

    pub fn add_log(&self, log: RawLog) {
        self.inner.lock().unwrap().logs.push(log);
    }

    /// Make the next `get_logs` call fail with `err`.
    pub fn fail_next(&self, err: SyncError) {
        self.inner.lock().unwrap().failures.push_back(err);
    }

    /// Ranges of every `get_logs` call, failed ones included.
    pub fn calls(&self) -> Vec<BlockRange> {
        self.inner.lock().unwrap().calls.clone()
    }
}

#[async_trait]
impl LogProvider for MockProvider {
    async fn current_height(&self) -> Result<u64, SyncError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.heights.len() > 1 {
            Ok(inner.heights.pop_front().unwrap())
        } else {
            inner
                .heights
                .front()
                .copied()
                .ok_or_else(|| SyncError::Connectivity("no height scripted".into()))
        }
    }

    async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<RawLog>, SyncError> {
        let mut inner = self.inner.lock().unwrap();
        let range = filter.range();
        inner.calls.push(range);
        if let Some(err) = inner.failures.pop_front() {
            return Err(err);
        }
        Ok(inner
            .logs
            .iter()
            .filter(|l| l.block_number_u64().is_some_and(|b| range.contains(b)))
            .cloned()
            .collect())
    }

    fn url(&self) -> &str {
        "mock://provider"
    }
}

// ─── MockSubscriber ──────────────────────────────────────────────────────────

type Hook = Box<dyn FnOnce() + Send>;

/// `LogSubscriber` whose notifications are pushed by the test.
#[derive(Default)]
pub struct MockSubscriber {
    sender: Mutex<Option<mpsc::UnboundedSender<LogNotification>>>,
    released: Arc<AtomicBool>,
    filters: Mutex<Vec<SubscriptionFilter>>,
    on_subscribe: Mutex<Option<Hook>>,
}

impl MockSubscriber {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Run `hook` inside the next `subscribe_logs` call.
    pub fn on_subscribe(&self, hook: impl FnOnce() + Send + 'static) {
        *self.on_subscribe.lock().unwrap() = Some(Box::new(hook));
    }

    pub fn push(&self, log: RawLog) {
        self.send(LogNotification::Log(log));
    }

    pub fn lose(&self, attempts: u32) {
        self.send(LogNotification::Lost { attempts });
    }

    fn send(&self, item: LogNotification) {
        let sender = self.sender.lock().unwrap();
        sender.as_ref().expect("not subscribed").send(item).unwrap();
    }

    pub fn released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    pub fn filters(&self) -> Vec<SubscriptionFilter> {
        self.filters.lock().unwrap().clone()
    }
}

#[async_trait]
impl LogSubscriber for MockSubscriber {
    async fn subscribe_logs(&self, filter: &SubscriptionFilter) -> Result<LogSubscription, SyncError> {
        if let Some(hook) = self.on_subscribe.lock().unwrap().take() {
            hook();
        }
        self.filters.lock().unwrap().push(filter.clone());
        let (tx, rx) = mpsc::unbounded_channel();
        *self.sender.lock().unwrap() = Some(tx);
        let released = self.released.clone();
        Ok(LogSubscription::new("0xmock", rx, move || {
            released.store(true, Ordering::SeqCst)
        }))
    }
}

// ─── Sinks & helpers ─────────────────────────────────────────────────────────

/// A sink that rejects every write.
pub struct FailingSink;

#[async_trait]
impl EventSink for FailingSink {
    async fn record(&self, _event: ContractEvent) -> Result<StoredEvent, SyncError> {
        Err(SyncError::Storage("disk full".into()))
    }
}

/// Poll `check` until it returns `true`, failing the test after two seconds.
pub async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !check().await {
        assert!(tokio::time::Instant::now() < deadline, "condition not reached in time");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
