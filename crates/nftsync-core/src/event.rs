//! The closed event model emitted by the NFT hub contract.
//!
//! Every stored row is a [`ContractEvent`]: common log metadata plus an
//! [`EventKind`] carrying the per-event fields. Adding a new event type means
//! adding a variant here, and the compiler then points at every decode and
//! persistence site that has to handle it.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::SyncError;

// ─── EventType ───────────────────────────────────────────────────────────────

/// Names of the contract events the pipeline stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventType {
    UserRegistered,
    #[serde(rename = "NFTMinted")]
    NftMinted,
    UserBlacklisted,
    UserRemovedFromBlacklist,
    FeesUpdated,
}

impl EventType {
    /// Every stored event type, in ABI declaration order.
    pub const ALL: [EventType; 5] = [
        EventType::UserRegistered,
        EventType::NftMinted,
        EventType::UserBlacklisted,
        EventType::UserRemovedFromBlacklist,
        EventType::FeesUpdated,
    ];

    /// The event name exactly as declared in the contract ABI.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UserRegistered => "UserRegistered",
            Self::NftMinted => "NFTMinted",
            Self::UserBlacklisted => "UserBlacklisted",
            Self::UserRemovedFromBlacklist => "UserRemovedFromBlacklist",
            Self::FeesUpdated => "FeesUpdated",
        }
    }

    /// Look up an ABI event name. Names outside the closed set return `None`.
    pub fn from_abi_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == name)
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_abi_name(s)
            .or_else(|| Self::ALL.into_iter().find(|t| t.as_str().eq_ignore_ascii_case(s)))
            .ok_or_else(|| SyncError::Config(format!("unknown event type '{s}'")))
    }
}

/// Blacklist transition carried by the two blacklist events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlacklistAction {
    Blacklisted,
    Removed,
}

impl BlacklistAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Blacklisted => "blacklisted",
            Self::Removed => "removed",
        }
    }
}

// ─── EventKind ───────────────────────────────────────────────────────────────

/// Per-event payload. Addresses are lowercase `0x` hex; token ids and fees
/// are decimal strings of the full 256-bit value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "eventType")]
pub enum EventKind {
    UserRegistered {
        user: String,
    },
    #[serde(rename = "NFTMinted")]
    NftMinted {
        to: String,
        #[serde(rename = "tokenId")]
        token_id: String,
        #[serde(rename = "metadataURI")]
        metadata_uri: String,
    },
    UserBlacklisted {
        user: String,
    },
    UserRemovedFromBlacklist {
        user: String,
    },
    FeesUpdated {
        #[serde(rename = "registrationFee")]
        registration_fee: String,
        #[serde(rename = "mintingFee")]
        minting_fee: String,
    },
}

impl EventKind {
    pub fn event_type(&self) -> EventType {
        match self {
            Self::UserRegistered { .. } => EventType::UserRegistered,
            Self::NftMinted { .. } => EventType::NftMinted,
            Self::UserBlacklisted { .. } => EventType::UserBlacklisted,
            Self::UserRemovedFromBlacklist { .. } => EventType::UserRemovedFromBlacklist,
            Self::FeesUpdated { .. } => EventType::FeesUpdated,
        }
    }

    /// The user address, for the user-centric events.
    pub fn user(&self) -> Option<&str> {
        match self {
            Self::UserRegistered { user }
            | Self::UserBlacklisted { user }
            | Self::UserRemovedFromBlacklist { user } => Some(user),
            Self::NftMinted { .. } | Self::FeesUpdated { .. } => None,
        }
    }

    /// The mint recipient, for `NFTMinted`.
    pub fn to(&self) -> Option<&str> {
        match self {
            Self::NftMinted { to, .. } => Some(to),
            _ => None,
        }
    }

    pub fn action(&self) -> Option<BlacklistAction> {
        match self {
            Self::UserBlacklisted { .. } => Some(BlacklistAction::Blacklisted),
            Self::UserRemovedFromBlacklist { .. } => Some(BlacklistAction::Removed),
            _ => None,
        }
    }
}

// ─── ContractEvent ───────────────────────────────────────────────────────────

/// A decoded contract event, ready to be recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractEvent {
    pub transaction_hash: String,
    pub block_number: u64,
    /// Position of the log within its block; half of the dedup key.
    pub log_index: u64,
    /// Unix seconds from the event's own `timestamp` argument.
    pub timestamp: u64,
    #[serde(flatten)]
    pub kind: EventKind,
    /// Every decoded ABI argument by name, integers as decimal strings.
    pub raw_data: Map<String, Value>,
}

impl ContractEvent {
    pub fn event_type(&self) -> EventType {
        self.kind.event_type()
    }

    /// The sink's uniqueness key.
    pub fn key(&self) -> (&str, u64) {
        (&self.transaction_hash, self.log_index)
    }

    /// Flatten into nullable columns for row-oriented storage.
    pub fn columns(&self) -> EventColumns {
        let mut cols = EventColumns {
            event_type: self.event_type(),
            ..EventColumns::default()
        };
        match &self.kind {
            EventKind::UserRegistered { user }
            | EventKind::UserBlacklisted { user }
            | EventKind::UserRemovedFromBlacklist { user } => {
                cols.user = Some(user.clone());
                cols.action = self.kind.action();
            }
            EventKind::NftMinted { to, token_id, metadata_uri } => {
                cols.to = Some(to.clone());
                cols.token_id = Some(token_id.clone());
                cols.metadata_uri = Some(metadata_uri.clone());
            }
            EventKind::FeesUpdated { registration_fee, minting_fee } => {
                cols.registration_fee = Some(registration_fee.clone());
                cols.minting_fee = Some(minting_fee.clone());
            }
        }
        cols
    }

    /// Rebuild an event from its stored columns.
    ///
    /// Fails with [`SyncError::Storage`] if a column the event type requires
    /// is missing.
    pub fn from_columns(
        transaction_hash: String,
        block_number: u64,
        log_index: u64,
        timestamp: u64,
        cols: EventColumns,
        raw_data: Map<String, Value>,
    ) -> Result<Self, SyncError> {
        let ty = cols.event_type;
        let need = |field: Option<String>, name: &str| {
            field.ok_or_else(|| {
                SyncError::Storage(format!("{ty} row {transaction_hash}#{log_index} has no {name}"))
            })
        };
        let kind = match ty {
            EventType::UserRegistered => EventKind::UserRegistered {
                user: need(cols.user, "user")?,
            },
            EventType::NftMinted => EventKind::NftMinted {
                to: need(cols.to, "to")?,
                token_id: need(cols.token_id, "tokenId")?,
                metadata_uri: need(cols.metadata_uri, "metadataURI")?,
            },
            EventType::UserBlacklisted => EventKind::UserBlacklisted {
                user: need(cols.user, "user")?,
            },
            EventType::UserRemovedFromBlacklist => EventKind::UserRemovedFromBlacklist {
                user: need(cols.user, "user")?,
            },
            EventType::FeesUpdated => EventKind::FeesUpdated {
                registration_fee: need(cols.registration_fee, "registrationFee")?,
                minting_fee: need(cols.minting_fee, "mintingFee")?,
            },
        };
        Ok(Self {
            transaction_hash,
            block_number,
            log_index,
            timestamp,
            kind,
            raw_data,
        })
    }
}

/// Nullable column projection of an [`EventKind`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventColumns {
    pub event_type: EventType,
    pub user: Option<String>,
    pub to: Option<String>,
    pub token_id: Option<String>,
    pub metadata_uri: Option<String>,
    pub action: Option<BlacklistAction>,
    pub registration_fee: Option<String>,
    pub minting_fee: Option<String>,
}

impl Default for EventColumns {
    fn default() -> Self {
        Self {
            event_type: EventType::UserRegistered,
            user: None,
            to: None,
            token_id: None,
            metadata_uri: None,
            action: None,
            registration_fee: None,
            minting_fee: None,
        }
    }
}

/// A recorded event as returned by the sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredEvent {
    pub id: i64,
    #[serde(flatten)]
    pub event: ContractEvent,
    /// Unix seconds at which the row was first written.
    pub indexed_at: i64,
}

/// Normalize an address for storage and lookups.
pub fn normalize_address(address: &str) -> String {
    address.trim().to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minted() -> ContractEvent {
        ContractEvent {
            transaction_hash: "0xabc".into(),
            block_number: 42,
            log_index: 3,
            timestamp: 1_700_000_000,
            kind: EventKind::NftMinted {
                to: "0x00000000000000000000000000000000000000aa".into(),
                token_id: "115792089237316195423570985008687907853269984665640564039457584007913129639935".into(),
                metadata_uri: "ipfs://bafy/1.json".into(),
            },
            raw_data: Map::new(),
        }
    }

    #[test]
    fn event_type_names_match_abi() {
        assert_eq!(EventType::NftMinted.as_str(), "NFTMinted");
        assert_eq!(EventType::from_abi_name("FeesUpdated"), Some(EventType::FeesUpdated));
        assert_eq!(EventType::from_abi_name("Transfer"), None);
        assert_eq!("nftminted".parse::<EventType>().unwrap(), EventType::NftMinted);
        assert!("Approval".parse::<EventType>().is_err());
    }

    #[test]
    fn columns_carry_variant_fields() {
        let cols = minted().columns();
        assert_eq!(cols.event_type, EventType::NftMinted);
        assert_eq!(cols.token_id.as_deref().map(str::len), Some(78));
        assert!(cols.user.is_none());
        assert!(cols.action.is_none());

        let blacklisted = EventKind::UserRemovedFromBlacklist { user: "0x1".into() };
        assert_eq!(blacklisted.action(), Some(BlacklistAction::Removed));
        assert_eq!(blacklisted.user(), Some("0x1"));
    }

    #[test]
    fn from_columns_restores_the_event() {
        let ev = minted();
        let back = ContractEvent::from_columns(
            ev.transaction_hash.clone(),
            ev.block_number,
            ev.log_index,
            ev.timestamp,
            ev.columns(),
            Map::new(),
        )
        .unwrap();
        assert_eq!(back, ev);
    }

    #[test]
    fn from_columns_rejects_incomplete_rows() {
        let cols = EventColumns {
            event_type: EventType::FeesUpdated,
            registration_fee: Some("1000".into()),
            ..EventColumns::default()
        };
        let err = ContractEvent::from_columns("0xabc".into(), 1, 0, 0, cols, Map::new()).unwrap_err();
        assert!(err.to_string().contains("mintingFee"));
    }

    #[test]
    fn serializes_with_event_type_tag() {
        let json = serde_json::to_value(minted()).unwrap();
        assert_eq!(json["eventType"], "NFTMinted");
        assert_eq!(json["transactionHash"], "0xabc");
        assert_eq!(json["metadataURI"], "ipfs://bafy/1.json");
        assert_eq!(json["logIndex"], 3);
    }
}
