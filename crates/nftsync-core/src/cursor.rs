//! Live subscription cursor: where the live engine's catch-up replay starts.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::SyncError;

/// Start position for the live subscription.
///
/// - `Latest` only follows new blocks (after a short catch-up to close the
///   window between the end of backfill and the subscription start).
/// - `Genesis` replays the contract's whole history before following.
/// - `Block(n)` replays from block `n`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockCursor {
    Genesis,
    #[default]
    Latest,
    Block(u64),
}

impl BlockCursor {
    /// First block the catch-up replay must cover, given the last block
    /// the backfill already processed.
    pub fn replay_from(&self, backfilled_to: Option<u64>) -> u64 {
        match self {
            Self::Genesis => 0,
            Self::Block(n) => *n,
            Self::Latest => backfilled_to.map_or(0, |b| b.saturating_add(1)),
        }
    }
}

impl fmt::Display for BlockCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Genesis => f.write_str("genesis"),
            Self::Latest => f.write_str("latest"),
            Self::Block(n) => write!(f, "{n}"),
        }
    }
}

impl FromStr for BlockCursor {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "genesis" | "earliest" | "start" => Ok(Self::Genesis),
            "latest" | "" => Ok(Self::Latest),
            other => other
                .parse::<u64>()
                .map(Self::Block)
                .map_err(|_| SyncError::Config(format!("invalid live cursor '{s}'"))),
        }
    }
}
