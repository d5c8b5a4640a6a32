//! HTTP JSON-RPC provider backed by `reqwest`.
//!
//! Every call carries a per-request timeout and runs under the retry policy:
//! connectivity failures, timeouts, and rate limits are retried with
//! exponential backoff; range rejections and other node errors are not.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;

use nftsync_core::log::parse_hex_u64;
use nftsync_core::{BlockRange, RawLog, SyncError};

use crate::provider::{LogFilter, LogProvider};
use crate::request::{classify_rpc_error, JsonRpcRequest, JsonRpcResponse};
use crate::retry::{RetryConfig, RetryPolicy};

/// Configuration for [`HttpProvider`].
#[derive(Debug, Clone)]
pub struct HttpProviderConfig {
    pub retry: RetryConfig,
    pub request_timeout: Duration,
}

impl Default for HttpProviderConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// HTTP JSON-RPC provider.
pub struct HttpProvider {
    url: String,
    http: reqwest::Client,
    retry: RetryPolicy,
    request_timeout: Duration,
    next_id: AtomicU64,
}

impl HttpProvider {
    pub fn new(url: impl Into<String>, config: HttpProviderConfig) -> Result<Self, SyncError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| SyncError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            url: url.into(),
            http,
            retry: RetryPolicy::new(config.retry),
            request_timeout: config.request_timeout,
            next_id: AtomicU64::new(1),
        })
    }

    /// Call `method` and deserialize its result, retrying transient failures.
    ///
    /// `range` is the block span the call covers, used to classify range
    /// rejections.
    pub async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<Value>,
        range: Option<BlockRange>,
    ) -> Result<T, SyncError> {
        let value = self
            .retry
            .run(method, || {
                let req = JsonRpcRequest::new(self.next_id.fetch_add(1, Ordering::Relaxed), method, params.clone());
                async move { self.send_once(&req, range).await }
            })
            .await?;
        serde_json::from_value(value).map_err(|e| {
            SyncError::InvalidResponse(format!("{method}: unexpected result shape: {e}"))
        })
    }

    async fn send_once(&self, req: &JsonRpcRequest, range: Option<BlockRange>) -> Result<Value, SyncError> {
        let send = self.http.post(&self.url).json(req).send();
        let resp = tokio::time::timeout(self.request_timeout, send)
            .await
            .map_err(|_| SyncError::Timeout {
                ms: self.request_timeout.as_millis() as u64,
            })?
            .map_err(|e| self.map_reqwest(e))?;

        let status = resp.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(SyncError::RateLimited(format!("HTTP 429 from {}", self.url)));
        }
        if status.is_server_error() {
            return Err(SyncError::Connectivity(format!("HTTP {status} from {}", self.url)));
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(SyncError::Rpc {
                code: i64::from(status.as_u16()),
                message: body,
            });
        }

        let body: JsonRpcResponse = resp.json().await.map_err(|e| self.map_reqwest(e))?;
        body.into_result().map_err(|err| classify_rpc_error(&err, range))
    }

    fn map_reqwest(&self, e: reqwest::Error) -> SyncError {
        if e.is_timeout() {
            SyncError::Timeout {
                ms: self.request_timeout.as_millis() as u64,
            }
        } else if e.is_decode() {
            SyncError::InvalidResponse(e.to_string())
        } else {
            SyncError::Connectivity(format!("{}: {e}", self.url))
        }
    }
}

#[async_trait]
impl LogProvider for HttpProvider {
    async fn current_height(&self) -> Result<u64, SyncError> {
        let hex: String = self.call("eth_blockNumber", vec![], None).await?;
        parse_hex_u64(&hex)
            .ok_or_else(|| SyncError::InvalidResponse(format!("eth_blockNumber returned '{hex}'")))
    }

    async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<RawLog>, SyncError> {
        let logs: Vec<RawLog> = self
            .call("eth_getLogs", vec![filter.to_param()], Some(filter.range()))
            .await?;
        tracing::debug!(
            from = filter.from_block,
            to = filter.to_block,
            logs = logs.len(),
            "eth_getLogs"
        );
        Ok(logs)
    }

    fn url(&self) -> &str {
        &self.url
    }
}
