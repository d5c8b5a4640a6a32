//! nftsync CLI: run the NFT hub sync pipeline and inspect its store.
//!
//! # Commands
//! ```text
//! nftsync run                                   backfill, then follow the chain
//! nftsync backfill [--from N] [--to N]          one-off backfill, no subscription
//! nftsync events [--type T] [--address A] [--from N] [--to N] [--json]
//! nftsync user <address>                        registration, blacklist, minted NFTs
//! nftsync status                                checkpoint, stored events, chain head
//! nftsync reset                                 drop the checkpoint
//! nftsync info
//! ```
//!
//! Configuration comes from the environment (and `.env`): `ETH_RPC_URL`,
//! `ETH_WS_URL`, `ETH_CONTRACT_ADDRESS`, `DB_URI`, ... Flags given on the
//! command line override it. Only `run` and `backfill` need the RPC settings.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::{debug, error, info, warn};

use nftsync_abi::LogDecoder;
use nftsync_core::{CheckpointStore, EventQueries, EventType, StoredEvent, SyncConfig, SyncState};
use nftsync_engine::{BackfillEngine, BackfillOptions, SyncBuilder};
use nftsync_rpc::{HttpProvider, HttpProviderConfig, LogProvider, RetryConfig};
use nftsync_storage::AnyStorage;

mod telemetry;

use telemetry::{init_tracing, LogConfig};

#[derive(Parser)]
#[command(
    name = "nftsync",
    about = "Contract-event sync for the NFT hub marketplace",
    long_about = "
nftsync mirrors the NFT hub contract's events into a local store: a chunked
eth_getLogs backfill from the last checkpoint, then a live eth_subscribe feed.

ENVIRONMENT VARIABLES:
  ETH_RPC_URL           HTTP JSON-RPC endpoint
  ETH_WS_URL            WebSocket endpoint for the live subscription
  ETH_CONTRACT_ADDRESS  NFT hub contract address
  ETH_START_BLOCK       First block to backfill without a checkpoint
  ETH_RPC_BLOCK_LIMIT   Blocks per eth_getLogs call
  DB_URI                sqlite:<path> | postgres://... | memory:
  LOG_LEVEL, LOG_JSON   Logging
",
    version
)]
struct Cli {
    #[command(flatten)]
    overrides: Overrides,

    #[command(subcommand)]
    command: Commands,
}

/// Flags that override the environment configuration.
#[derive(Args)]
struct Overrides {
    /// Storage URL
    #[arg(long, global = true)]
    database_url: Option<String>,
    /// Contract address
    #[arg(long, global = true)]
    contract: Option<String>,
    /// HTTP JSON-RPC endpoint
    #[arg(long, global = true)]
    rpc_url: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Backfill from the checkpoint, then follow new events until Ctrl-C
    Run,

    /// Backfill a block range without opening a subscription
    Backfill {
        /// First block (default: checkpoint + 1 or ETH_START_BLOCK)
        #[arg(long)]
        from: Option<u64>,
        /// Last block (default: follow the head)
        #[arg(long)]
        to: Option<u64>,
    },

    /// List stored events, newest first
    Events {
        /// Event name, e.g. NFTMinted
        #[arg(long = "type")]
        event_type: Option<EventType>,
        /// Only events whose user or recipient is this address
        #[arg(long)]
        address: Option<String>,
        #[arg(long)]
        from: Option<u64>,
        #[arg(long)]
        to: Option<u64>,
        /// Print at most this many events
        #[arg(long, default_value_t = 50)]
        limit: usize,
        /// One JSON object per line
        #[arg(long)]
        json: bool,
    },

    /// Show what the store knows about one user
    User {
        address: String,
    },

    /// Show checkpoint, stored event count and chain head
    Status,

    /// Delete the checkpoint so the next run starts at ETH_START_BLOCK
    Reset,

    /// Show the effective configuration
    Info,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing(&LogConfig::from_env());

    let cli = Cli::parse();
    let needs_rpc = matches!(cli.command, Commands::Run | Commands::Backfill { .. });
    let config = load_config(&cli.overrides, needs_rpc)?;

    match cli.command {
        Commands::Run => cmd_run(config).await,
        Commands::Backfill { from, to } => cmd_backfill(config, from, to).await,
        Commands::Events {
            event_type,
            address,
            from,
            to,
            limit,
            json,
        } => {
            let filter = EventFilter {
                event_type,
                address,
                from,
                to,
            };
            cmd_events(config, filter, limit, json).await
        }
        Commands::User { address } => cmd_user(config, &address).await,
        Commands::Status => cmd_status(config).await,
        Commands::Reset => cmd_reset(config).await,
        Commands::Info => {
            cmd_info(&config);
            Ok(())
        }
    }
}

/// Environment configuration with command-line overrides applied.
///
/// Store-only commands fall back to defaults when the RPC settings are
/// missing or invalid.
fn load_config(overrides: &Overrides, needs_rpc: bool) -> Result<SyncConfig> {
    let lookup = |key: &str| {
        let flag = match key {
            "DB_URI" => overrides.database_url.clone(),
            "ETH_CONTRACT_ADDRESS" => overrides.contract.clone(),
            "ETH_RPC_URL" => overrides.rpc_url.clone(),
            _ => None,
        };
        flag.or_else(|| std::env::var(key).ok())
    };

    match SyncConfig::from_lookup(&lookup) {
        Ok(config) => Ok(config),
        Err(e) if needs_rpc => Err(e).context("invalid configuration"),
        Err(e) => {
            debug!(error = %e, "incomplete configuration, using defaults for the RPC settings");
            let defaults = SyncConfig::default();
            Ok(SyncConfig {
                sync_id: lookup("SYNC_ID").unwrap_or(defaults.sync_id.clone()),
                rpc_url: lookup("ETH_RPC_URL").unwrap_or(defaults.rpc_url.clone()),
                contract_address: lookup("ETH_CONTRACT_ADDRESS").unwrap_or_default(),
                database_url: lookup("DB_URI").unwrap_or(defaults.database_url.clone()),
                ..defaults
            })
        }
    }
}

async fn open_storage(config: &SyncConfig) -> Result<Arc<AnyStorage>> {
    let storage = AnyStorage::connect(&config.database_url)
        .await
        .with_context(|| format!("cannot open storage at {}", config.database_url))?;
    Ok(Arc::new(storage))
}

fn http_provider(config: &SyncConfig) -> Result<HttpProvider> {
    // Chunk fetches are retried by the backfill engine.
    let provider = HttpProvider::new(
        config.rpc_url.clone(),
        HttpProviderConfig {
            retry: RetryConfig::with_max_retries(0),
            request_timeout: config.request_timeout(),
        },
    )?;
    Ok(provider)
}

// ─── run ─────────────────────────────────────────────────────────────────────

async fn cmd_run(config: SyncConfig) -> Result<()> {
    let pipeline = SyncBuilder::from_config(config)
        .connect()
        .await
        .context("failed to start the sync pipeline")?;
    let orchestrator = &pipeline.orchestrator;

    let mut state = orchestrator.subscribe_state();
    let startup = tokio::select! {
        result = orchestrator.start_listening() => result,
        _ = tokio::signal::ctrl_c() => {
            warn!("interrupted during startup");
            return Ok(());
        }
    };
    if let Err(e) = startup {
        orchestrator.shutdown().await;
        return Err(e).context("sync startup failed");
    }

    let mut health = tokio::time::interval(Duration::from_secs(5));
    let outcome = loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                break Ok(());
            }
            changed = state.changed() => {
                if changed.is_err() || *state.borrow() == SyncState::Failed {
                    break Err(anyhow::anyhow!("sync pipeline failed"));
                }
            }
            _ = health.tick() => {
                if !orchestrator.is_healthy() {
                    error!(state = %orchestrator.state(), "live subscription is gone");
                    break Err(anyhow::anyhow!("live subscription lost"));
                }
            }
        }
    };

    if let Some(stats) = orchestrator.shutdown().await {
        info!(recorded = stats.recorded, failed = stats.failed, "live events written");
    }
    outcome
}

// ─── backfill ────────────────────────────────────────────────────────────────

async fn cmd_backfill(config: SyncConfig, from: Option<u64>, to: Option<u64>) -> Result<()> {
    config.validate()?;
    let storage = open_storage(&config).await?;
    let decoder = Arc::new(LogDecoder::nft_hub().context("embedded ABI is invalid")?);
    let engine = BackfillEngine::new(
        Arc::new(http_provider(&config)?),
        decoder,
        storage.clone(),
        storage,
        BackfillOptions::from_config(&config),
    );

    let from = match from {
        Some(block) => block,
        None => engine.resume_point().await?,
    };
    let report = match to {
        Some(to) => {
            if to < from {
                bail!("--to ({to}) is before the first block ({from})");
            }
            engine.run_range(from, to).await?
        }
        None => engine.run(from).await?,
    };

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

// ─── events ──────────────────────────────────────────────────────────────────

struct EventFilter {
    event_type: Option<EventType>,
    address: Option<String>,
    from: Option<u64>,
    to: Option<u64>,
}

impl EventFilter {
    fn matches(&self, stored: &StoredEvent) -> bool {
        let event = &stored.event;
        self.event_type.map_or(true, |t| event.event_type() == t)
            && self.from.map_or(true, |from| event.block_number >= from)
            && self.to.map_or(true, |to| event.block_number <= to)
    }
}

async fn query_events(storage: &AnyStorage, filter: &EventFilter) -> Result<Vec<StoredEvent>> {
    let mut events = if let Some(address) = &filter.address {
        storage.by_address(address).await?
    } else if filter.from.is_some() || filter.to.is_some() {
        let from = filter.from.unwrap_or(0);
        let to = filter.to.unwrap_or(u64::MAX);
        storage.by_block_range(from, to).await?
    } else if let Some(event_type) = filter.event_type {
        storage.by_type(event_type).await?
    } else {
        storage.all().await?
    };
    events.retain(|e| filter.matches(e));
    Ok(events)
}

async fn cmd_events(config: SyncConfig, filter: EventFilter, limit: usize, json: bool) -> Result<()> {
    let storage = open_storage(&config).await?;
    let events = query_events(&storage, &filter).await?;
    let total = events.len();

    for stored in events.iter().take(limit) {
        if json {
            println!("{}", serde_json::to_string(stored)?);
        } else {
            println!("{}", describe(stored));
        }
    }
    if !json && total > limit {
        println!("... {} more (raise --limit)", total - limit);
    }
    Ok(())
}

fn describe(stored: &StoredEvent) -> String {
    let event = &stored.event;
    let cols = event.columns();
    let mut line = format!(
        "#{:<6} block {:<10} log {:<4} {:<26}",
        stored.id,
        event.block_number,
        event.log_index,
        event.event_type().as_str()
    );
    if let Some(user) = &cols.user {
        line.push_str(&format!(" user={user}"));
    }
    if let Some(to) = &cols.to {
        line.push_str(&format!(" to={to}"));
    }
    if let Some(token_id) = &cols.token_id {
        line.push_str(&format!(" token={token_id}"));
    }
    if let Some(uri) = &cols.metadata_uri {
        line.push_str(&format!(" uri={uri}"));
    }
    if let (Some(reg), Some(mint)) = (&cols.registration_fee, &cols.minting_fee) {
        line.push_str(&format!(" registrationFee={reg} mintingFee={mint}"));
    }
    line.push_str(&format!(" tx={}", event.transaction_hash));
    line
}

// ─── user / status / reset / info ────────────────────────────────────────────

async fn cmd_user(config: SyncConfig, address: &str) -> Result<()> {
    let storage = open_storage(&config).await?;
    let registered = storage.is_user_registered(address).await?;
    let blacklisted = storage.is_user_blacklisted(address).await?;
    let nfts = storage.user_nfts(address).await?;

    println!("User {address}");
    println!("  Registered:  {registered}");
    println!("  Blacklisted: {blacklisted}");
    println!("  NFTs minted: {}", nfts.len());
    for stored in &nfts {
        let cols = stored.event.columns();
        println!(
            "    token {} (block {}) {}",
            cols.token_id.unwrap_or_default(),
            stored.event.block_number,
            cols.metadata_uri.unwrap_or_default()
        );
    }
    Ok(())
}

async fn cmd_status(config: SyncConfig) -> Result<()> {
    let storage = open_storage(&config).await?;
    let checkpoint = storage.load(&config.sync_id).await?;
    let count = storage.event_count().await?;

    println!("Sync {} ({} storage)", config.sync_id, storage.backend());
    match &checkpoint {
        Some(cp) => println!("  Checkpoint:    block {} (saved at {})", cp.block_number, cp.updated_at),
        None => println!("  Checkpoint:    none, next run starts at block {}", config.start_block),
    }
    println!("  Stored events: {count}");

    match http_provider(&config)?.current_height().await {
        Ok(head) => {
            let synced = checkpoint.as_ref().map_or(0, |cp| cp.block_number);
            println!("  Chain head:    {head} ({} blocks behind)", head.saturating_sub(synced));
        }
        Err(e) => println!("  Chain head:    unavailable ({e})"),
    }
    if let Ok(Some(fees)) = storage.latest_fees_update().await {
        let cols = fees.event.columns();
        println!(
            "  Fees:          registration {} / minting {} (block {})",
            cols.registration_fee.unwrap_or_default(),
            cols.minting_fee.unwrap_or_default(),
            fees.event.block_number
        );
    }
    Ok(())
}

async fn cmd_reset(config: SyncConfig) -> Result<()> {
    let storage = open_storage(&config).await?;
    storage.delete(&config.sync_id).await?;
    println!("Checkpoint for {} deleted; stored events are kept.", config.sync_id);
    Ok(())
}

fn cmd_info(config: &SyncConfig) {
    println!("nftsync v{}", env!("CARGO_PKG_VERSION"));
    println!("  Sync id:          {}", config.sync_id);
    println!("  Contract:         {}", display_or_unset(&config.contract_address));
    println!("  HTTP RPC:         {}", config.rpc_url);
    println!("  WebSocket:        {}", config.ws_url);
    println!("  Start block:      {}", config.start_block);
    println!("  Chunk size:       {} blocks/call", config.chunk_size);
    println!("  Chunk pacing:     {} ms", config.chunk_pacing_ms);
    println!("  Max retries:      {}", config.max_retries);
    println!("  Live cursor:      {}", config.live_cursor);
    println!("  Storage:          {}", config.database_url);
    println!("  Events:           {}", event_names());
}

fn display_or_unset(value: &str) -> &str {
    if value.is_empty() {
        "(unset)"
    } else {
        value
    }
}

fn event_names() -> String {
    EventType::ALL
        .iter()
        .map(|t| t.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}
