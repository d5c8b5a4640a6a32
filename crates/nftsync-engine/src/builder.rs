//! Fluent builder for [`SyncConfig`] and for wiring a full pipeline.
//!
//! # Example
//!
//! ```rust,no_run
//! use nftsync_engine::SyncBuilder;
//!
//! # async fn example() -> Result<(), nftsync_core::SyncError> {
//! let pipeline = SyncBuilder::new()
//!     .rpc_url("https://sepolia.example/v3/key")
//!     .ws_url("wss://sepolia.example/ws/v3/key")
//!     .contract_address("0x7ab383C0389eEffE0073838C9016151731136143")
//!     .start_block(5_000_000)
//!     .chunk_size(400)
//!     .database_url("sqlite:./nftsync.db")
//!     .connect()
//!     .await?;
//! pipeline.orchestrator.start_listening().await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use nftsync_abi::LogDecoder;
use nftsync_core::{BlockCursor, SyncConfig, SyncError};
use nftsync_rpc::{HttpProvider, HttpProviderConfig, RetryConfig, WsProvider, WsProviderConfig};
use nftsync_storage::AnyStorage;

use crate::orchestrator::SyncOrchestrator;

/// Fluent builder for `SyncConfig`.
#[derive(Default)]
pub struct SyncBuilder {
    config: SyncConfig,
}

impl SyncBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing configuration (e.g. [`SyncConfig::from_env`]).
    pub fn from_config(config: SyncConfig) -> Self {
        Self { config }
    }

    /// Set the checkpoint key.
    pub fn sync_id(mut self, id: impl Into<String>) -> Self {
        self.config.sync_id = id.into();
        self
    }

    pub fn rpc_url(mut self, url: impl Into<String>) -> Self {
        self.config.rpc_url = url.into();
        self
    }

    pub fn ws_url(mut self, url: impl Into<String>) -> Self {
        self.config.ws_url = url.into();
        self
    }

    pub fn contract_address(mut self, address: impl Into<String>) -> Self {
        self.config.contract_address = address.into();
        self
    }

    /// Set the backfill start block used when no checkpoint exists.
    pub fn start_block(mut self, block: u64) -> Self {
        self.config.start_block = block;
        self
    }

    /// Set the number of blocks per `eth_getLogs` call.
    pub fn chunk_size(mut self, size: u64) -> Self {
        self.config.chunk_size = size;
        self
    }

    pub fn chunk_pacing_ms(mut self, ms: u64) -> Self {
        self.config.chunk_pacing_ms = ms;
        self
    }

    pub fn request_timeout_ms(mut self, ms: u64) -> Self {
        self.config.request_timeout_ms = ms;
        self
    }

    pub fn max_retries(mut self, retries: u32) -> Self {
        self.config.max_retries = retries;
        self
    }

    pub fn max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.config.max_reconnect_attempts = attempts;
        self
    }

    /// Set where the post-backfill catch-up replay starts.
    pub fn live_cursor(mut self, cursor: BlockCursor) -> Self {
        self.config.live_cursor = cursor;
        self
    }

    pub fn database_url(mut self, url: impl Into<String>) -> Self {
        self.config.database_url = url.into();
        self
    }

    /// Validate and return the configuration.
    pub fn build_config(self) -> Result<SyncConfig, SyncError> {
        self.config.validate()?;
        Ok(self.config)
    }

    /// Connect the providers and storage and assemble the orchestrator.
    ///
    /// Fails if the WebSocket endpoint or the database cannot be reached.
    pub async fn connect(self) -> Result<SyncPipeline, SyncError> {
        let config = self.build_config()?;

        let decoder = Arc::new(
            LogDecoder::nft_hub().map_err(|e| SyncError::Config(format!("embedded ABI: {e}")))?,
        );
        let storage = Arc::new(AnyStorage::connect(&config.database_url).await?);

        // The backfill engine retries whole chunk fetches itself.
        let http = HttpProvider::new(
            config.rpc_url.clone(),
            HttpProviderConfig {
                retry: RetryConfig::with_max_retries(0),
                request_timeout: config.request_timeout(),
            },
        )?;
        let ws = WsProvider::connect(
            config.ws_url.clone(),
            WsProviderConfig {
                max_reconnect_attempts: config.max_reconnect_attempts,
                request_timeout: config.request_timeout(),
                ..WsProviderConfig::default()
            },
        )
        .await?;

        let orchestrator = SyncOrchestrator::new(
            &config,
            Arc::new(http),
            Arc::new(ws),
            decoder,
            storage.clone(),
            storage.clone(),
        );
        Ok(SyncPipeline {
            config,
            storage,
            orchestrator,
        })
    }
}

/// A connected pipeline plus the storage it writes, for read-side queries.
pub struct SyncPipeline {
    pub config: SyncConfig,
    pub storage: Arc<AnyStorage>,
    pub orchestrator: SyncOrchestrator,
}
