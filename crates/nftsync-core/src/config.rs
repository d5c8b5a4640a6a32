//! Pipeline configuration, loaded from the environment.
//!
//! Variable names match the marketplace backend's deployment (`ETH_RPC_URL`,
//! `ETH_RPC_BLOCK_LIMIT`, `DB_URI`, ...). The binary loads `.env` first, so
//! both real environment variables and a `.env` file work.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cursor::BlockCursor;
use crate::error::SyncError;

/// Default chunk size for `eth_getLogs`, sized for free-tier providers.
pub const DEFAULT_CHUNK_SIZE: u64 = 400;
/// Default pause between backfill chunks.
pub const DEFAULT_CHUNK_PACING_MS: u64 = 100;

/// Configuration for one sync pipeline (one contract, one chain).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Checkpoint key for this pipeline.
    pub sync_id: String,
    /// HTTP JSON-RPC endpoint used for height and log queries.
    pub rpc_url: String,
    /// WebSocket endpoint used for the live subscription.
    pub ws_url: String,
    /// NFT hub contract address.
    pub contract_address: String,
    /// First block the backfill scans when no checkpoint exists.
    pub start_block: u64,
    /// Maximum blocks per `eth_getLogs` call.
    pub chunk_size: u64,
    /// Pause between backfill chunks (milliseconds).
    pub chunk_pacing_ms: u64,
    /// Per-call timeout for RPC requests (milliseconds).
    pub request_timeout_ms: u64,
    /// Retries for a failing chunk fetch before the backfill fails.
    pub max_retries: u32,
    /// WebSocket reconnect attempts before the subscription is declared lost.
    pub max_reconnect_attempts: u32,
    /// Where the live engine's catch-up replay starts.
    pub live_cursor: BlockCursor,
    /// Storage URL (`sqlite:...`, `postgres://...`, `memory:`).
    pub database_url: String,
    /// API key of the surrounding HTTP service. Carried for the API layer.
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            sync_id: "nft-hub".into(),
            rpc_url: "http://127.0.0.1:8545".into(),
            ws_url: "ws://127.0.0.1:8546".into(),
            contract_address: String::new(),
            start_block: 0,
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_pacing_ms: DEFAULT_CHUNK_PACING_MS,
            request_timeout_ms: 30_000,
            max_retries: 3,
            max_reconnect_attempts: 5,
            live_cursor: BlockCursor::Latest,
            database_url: "sqlite:./nftsync.db".into(),
            api_key: None,
        }
    }
}

impl SyncConfig {
    /// Load from process environment variables.
    pub fn from_env() -> Result<Self, SyncError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load using an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, SyncError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let config = Self {
            sync_id: get("SYNC_ID").unwrap_or(defaults.sync_id),
            rpc_url: required(&get, "ETH_RPC_URL")?,
            ws_url: required(&get, "ETH_WS_URL")?,
            contract_address: required(&get, "ETH_CONTRACT_ADDRESS")?,
            start_block: parse_or(&get, "ETH_START_BLOCK", defaults.start_block)?,
            chunk_size: parse_or(&get, "ETH_RPC_BLOCK_LIMIT", defaults.chunk_size)?,
            chunk_pacing_ms: parse_or(&get, "ETH_CHUNK_PACING_MS", defaults.chunk_pacing_ms)?,
            request_timeout_ms: parse_or(&get, "ETH_REQUEST_TIMEOUT_MS", defaults.request_timeout_ms)?,
            max_retries: parse_or(&get, "ETH_MAX_RETRIES", defaults.max_retries)?,
            max_reconnect_attempts: parse_or(
                &get,
                "ETH_WS_MAX_RECONNECTS",
                defaults.max_reconnect_attempts,
            )?,
            live_cursor: match get("ETH_LIVE_FROM") {
                Some(v) => v.parse()?,
                None => defaults.live_cursor,
            },
            database_url: get("DB_URI").unwrap_or(defaults.database_url),
            api_key: get("API_KEY"),
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), SyncError> {
        if self.chunk_size == 0 {
            return Err(SyncError::Config("ETH_RPC_BLOCK_LIMIT must be at least 1".into()));
        }
        if !is_address(&self.contract_address) {
            return Err(SyncError::Config(format!(
                "'{}' is not a 20-byte hex contract address",
                self.contract_address
            )));
        }
        if !(self.ws_url.starts_with("ws://") || self.ws_url.starts_with("wss://")) {
            return Err(SyncError::Config(format!(
                "ETH_WS_URL must be a ws:// or wss:// URL, got '{}'",
                self.ws_url
            )));
        }
        if self.api_key.is_none() {
            tracing::debug!("API_KEY not set; the HTTP API layer will run unauthenticated");
        }
        Ok(())
    }

    pub fn chunk_pacing(&self) -> Duration {
        Duration::from_millis(self.chunk_pacing_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

fn required<G>(get: &G, key: &str) -> Result<String, SyncError>
where
    G: Fn(&str) -> Option<String>,
{
    get(key).ok_or_else(|| SyncError::Config(format!("{key} is not set")))
}

fn parse_or<G, T>(get: &G, key: &str, default: T) -> Result<T, SyncError>
where
    G: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| SyncError::Config(format!("{key}='{raw}' is not a valid number"))),
        None => Ok(default),
    }
}

fn is_address(s: &str) -> bool {
    s.strip_prefix("0x")
        .is_some_and(|hex| hex.len() == 40 && hex.chars().all(|c| c.is_ascii_hexdigit()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    fn base() -> HashMap<String, String> {
        env(&[
            ("ETH_RPC_URL", "https://sepolia.example/v3/key"),
            ("ETH_WS_URL", "wss://sepolia.example/ws/v3/key"),
            ("ETH_CONTRACT_ADDRESS", "0x7ab383C0389eEffE0073838C9016151731136143"),
        ])
    }

    #[test]
    fn loads_with_defaults() {
        let vars = base();
        let config = SyncConfig::from_lookup(|k| vars.get(k).cloned()).unwrap();
        assert_eq!(config.chunk_size, 400);
        assert_eq!(config.chunk_pacing_ms, 100);
        assert_eq!(config.start_block, 0);
        assert_eq!(config.live_cursor, BlockCursor::Latest);
        assert_eq!(config.sync_id, "nft-hub");
        assert!(config.api_key.is_none());
    }

    #[test]
    fn reads_overrides() {
        let mut vars = base();
        vars.extend(env(&[
            ("ETH_START_BLOCK", "5400000"),
            ("ETH_RPC_BLOCK_LIMIT", "2000"),
            ("ETH_LIVE_FROM", "genesis"),
            ("DB_URI", "postgres://sync@localhost/nfthub"),
            ("API_KEY", "secret"),
        ]));
        let config = SyncConfig::from_lookup(|k| vars.get(k).cloned()).unwrap();
        assert_eq!(config.start_block, 5_400_000);
        assert_eq!(config.chunk_size, 2_000);
        assert_eq!(config.live_cursor, BlockCursor::Genesis);
        assert_eq!(config.database_url, "postgres://sync@localhost/nfthub");
        assert_eq!(config.api_key.as_deref(), Some("secret"));
    }

    #[test]
    fn missing_endpoint_is_a_config_error() {
        let mut vars = base();
        vars.remove("ETH_WS_URL");
        let err = SyncConfig::from_lookup(|k| vars.get(k).cloned()).unwrap_err();
        assert!(err.to_string().contains("ETH_WS_URL"));
    }

    #[test]
    fn rejects_bad_values() {
        let mut vars = base();
        vars.insert("ETH_RPC_BLOCK_LIMIT".into(), "0".into());
        assert!(SyncConfig::from_lookup(|k| vars.get(k).cloned()).is_err());

        let mut vars = base();
        vars.insert("ETH_START_BLOCK".into(), "-1".into());
        assert!(SyncConfig::from_lookup(|k| vars.get(k).cloned()).is_err());

        let mut vars = base();
        vars.insert("ETH_CONTRACT_ADDRESS".into(), "0x1234".into());
        assert!(SyncConfig::from_lookup(|k| vars.get(k).cloned()).is_err());
    }
}
