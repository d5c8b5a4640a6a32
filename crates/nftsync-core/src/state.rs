//! Runtime state of the sync pipeline.

use serde::{Deserialize, Serialize};

/// Lifecycle of the sync orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncState {
    /// Not yet started.
    Idle,
    /// Replaying historical blocks up to the chain head.
    Backfilling,
    /// Following new logs over the WebSocket subscription.
    Live,
    /// Shut down on request.
    Stopped,
    /// Startup failed or the subscription was lost.
    Failed,
}

impl std::fmt::Display for SyncState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Backfilling => write!(f, "backfilling"),
            Self::Live => write!(f, "live"),
            Self::Stopped => write!(f, "stopped"),
            Self::Failed => write!(f, "failed"),
        }
    }
}
