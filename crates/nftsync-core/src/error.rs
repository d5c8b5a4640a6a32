//! Error types for the sync pipeline.

use thiserror::Error;

/// Errors that can occur while syncing contract events.
///
/// Decode problems are not represented here: an undecodable log is a normal
/// outcome that callers log and skip.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("connectivity error: {0}")]
    Connectivity(String),

    #[error("provider rejected block range [{from}, {to}]: {reason}")]
    ProviderRange { from: u64, to: u64, reason: String },

    #[error("rate limited by provider: {0}")]
    RateLimited(String),

    #[error("request timed out after {ms}ms")]
    Timeout { ms: u64 },

    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("invalid provider response: {0}")]
    InvalidResponse(String),

    #[error("log subscription lost after {attempts} reconnect attempts")]
    SubscriptionLost { attempts: u32 },

    #[error("storage error: {0}")]
    Storage(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl SyncError {
    /// Returns `true` for transient transport failures worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Connectivity(_) | Self::Timeout { .. } | Self::RateLimited(_)
        )
    }

    /// Returns `true` if the provider refused the requested block span.
    pub fn is_range_error(&self) -> bool {
        matches!(self, Self::ProviderRange { .. })
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(e: serde_json::Error) -> Self {
        Self::InvalidResponse(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_errors_are_retryable() {
        assert!(SyncError::Connectivity("refused".into()).is_retryable());
        assert!(SyncError::Timeout { ms: 30_000 }.is_retryable());
        assert!(SyncError::RateLimited("429".into()).is_retryable());
    }

    #[test]
    fn range_and_storage_errors_are_not_retryable() {
        let range = SyncError::ProviderRange {
            from: 0,
            to: 100_000,
            reason: "query returned more than 10000 results".into(),
        };
        assert!(!range.is_retryable());
        assert!(range.is_range_error());
        assert!(!SyncError::Storage("disk full".into()).is_retryable());
        assert!(!SyncError::SubscriptionLost { attempts: 5 }.is_retryable());
    }

    #[test]
    fn range_error_message_names_the_span() {
        let e = SyncError::ProviderRange {
            from: 100,
            to: 199,
            reason: "block range too large".into(),
        };
        assert_eq!(
            e.to_string(),
            "provider rejected block range [100, 199]: block range too large"
        );
    }
}
