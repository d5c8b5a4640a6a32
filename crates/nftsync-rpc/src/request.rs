//! JSON-RPC 2.0 wire types and provider error classification.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use nftsync_core::{BlockRange, SyncError};

/// JSON-RPC request ID (string, number or null).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RpcId {
    Number(u64),
    String(String),
    Null,
}

/// A JSON-RPC 2.0 request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub method: String,
    pub params: Vec<Value>,
    pub id: RpcId,
}

impl JsonRpcRequest {
    pub fn new(id: u64, method: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            jsonrpc: "2.0".into(),
            method: method.into(),
            params,
            id: RpcId::Number(id),
        }
    }
}

/// A JSON-RPC 2.0 error object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl std::fmt::Display for JsonRpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "JSON-RPC error {}: {}", self.code, self.message)
    }
}

/// A JSON-RPC 2.0 response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    #[serde(default)]
    pub jsonrpc: String,
    pub id: RpcId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    /// The result value, or the error object the node returned.
    pub fn into_result(self) -> Result<Value, JsonRpcError> {
        if let Some(err) = self.error {
            Err(err)
        } else {
            Ok(self.result.unwrap_or(Value::Null))
        }
    }
}

// ─── Error classification ────────────────────────────────────────────────────

/// Phrases providers use when an `eth_getLogs` span is too wide.
const RANGE_HINTS: &[&str] = &[
    "block range",
    "range too large",
    "range is too large",
    "more than",
    "query returned more than",
    "exceed maximum block range",
    "response size exceeded",
    "log response size",
    "too many blocks",
];

const RATE_LIMIT_HINTS: &[&str] = &[
    "rate limit",
    "too many requests",
    "compute units",
    "capacity",
    "exceeded the quota",
];

/// Map a node error onto the pipeline's error taxonomy.
///
/// `range` is the block span of the request, when it had one. Range
/// rejections only make sense for such requests.
pub fn classify_rpc_error(err: &JsonRpcError, range: Option<BlockRange>) -> SyncError {
    let message = err.message.to_ascii_lowercase();
    let rate_limited = RATE_LIMIT_HINTS.iter().any(|h| message.contains(h));

    // -32005 on a ranged call is a range rejection unless the node says rate.
    if let Some(r) = range {
        let range_hint = RANGE_HINTS.iter().any(|h| message.contains(h));
        if range_hint || (err.code == -32005 && !rate_limited) {
            return SyncError::ProviderRange {
                from: r.from,
                to: r.to,
                reason: err.message.clone(),
            };
        }
    }

    if err.code == 429 || err.code == -32029 || err.code == -32005 || rate_limited {
        return SyncError::RateLimited(err.message.clone());
    }

    SyncError::Rpc {
        code: err.code,
        message: err.message.clone(),
    }
}
