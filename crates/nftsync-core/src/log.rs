//! Raw EVM log as returned by `eth_getLogs` and `eth_subscribe("logs")`.

use serde::{Deserialize, Serialize};

/// A raw log before ABI decoding.
///
/// Position fields are optional on the wire (pending logs carry `null`), so
/// they stay `Option` here; the decoder refuses logs that lack them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawLog {
    pub address: String,
    pub topics: Vec<String>,
    pub data: String,
    #[serde(rename = "blockNumber", default)]
    pub block_number: Option<String>,
    #[serde(rename = "blockHash", default)]
    pub block_hash: Option<String>,
    #[serde(rename = "transactionHash", default)]
    pub transaction_hash: Option<String>,
    #[serde(rename = "logIndex", default)]
    pub log_index: Option<String>,
    #[serde(default)]
    pub removed: bool,
}

impl RawLog {
    pub fn block_number_u64(&self) -> Option<u64> {
        self.block_number.as_deref().and_then(parse_hex_u64)
    }

    pub fn log_index_u64(&self) -> Option<u64> {
        self.log_index.as_deref().and_then(parse_hex_u64)
    }

    /// `true` if the node flagged this log as dropped by a reorg.
    pub fn is_removed(&self) -> bool {
        self.removed
    }

    pub fn topic0(&self) -> Option<&str> {
        self.topics.first().map(String::as_str)
    }
}

/// Parse a `0x`-prefixed hex quantity.
pub fn parse_hex_u64(s: &str) -> Option<u64> {
    let digits = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X"))?;
    if digits.is_empty() {
        return None;
    }
    u64::from_str_radix(digits, 16).ok()
}

/// Encode a block number as a JSON-RPC hex quantity.
pub fn to_hex_quantity(n: u64) -> String {
    format!("0x{n:x}")
}
