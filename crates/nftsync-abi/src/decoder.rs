//! `LogDecoder`: turns raw NFT hub logs into typed [`ContractEvent`]s.

use std::collections::HashMap;

use alloy_dyn_abi::{DynSolType, DynSolValue};
use alloy_json_abi::{Event, JsonAbi};
use alloy_primitives::B256;
use serde_json::Map;

use nftsync_core::{ContractEvent, EventKind, EventType, RawLog};

use crate::error::{AbiError, Undecodable};
use crate::{fingerprint, normalizer, NFT_HUB_ABI};

/// Result of decoding one log.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodeOutcome {
    Decoded(ContractEvent),
    Undecodable(Undecodable),
}

impl DecodeOutcome {
    pub fn is_decoded(&self) -> bool {
        matches!(self, Self::Decoded(_))
    }

    pub fn into_event(self) -> Option<ContractEvent> {
        match self {
            Self::Decoded(ev) => Some(ev),
            Self::Undecodable(_) => None,
        }
    }
}

/// One ABI event, prepared for decoding.
#[derive(Debug, Clone)]
struct EventDef {
    name: String,
    /// `None` for ABI events outside the stored set (e.g. ERC-721 `Transfer`).
    kind: Option<EventType>,
    topic0: String,
    indexed: Vec<(String, DynSolType)>,
    body: Vec<(String, DynSolType)>,
}

impl EventDef {
    fn from_abi(event: &Event) -> Result<Self, AbiError> {
        let mut indexed = Vec::new();
        let mut body = Vec::new();
        for param in &event.inputs {
            let ty = DynSolType::parse(&param.ty).map_err(|e| AbiError::UnsupportedType {
                event: event.name.clone(),
                param: param.name.clone(),
                ty: param.ty.clone(),
                reason: e.to_string(),
            })?;
            if param.indexed {
                indexed.push((param.name.clone(), ty));
            } else {
                body.push((param.name.clone(), ty));
            }
        }
        Ok(Self {
            name: event.name.clone(),
            kind: EventType::from_abi_name(&event.name),
            topic0: fingerprint::keccak256_signature(&event.signature()),
            indexed,
            body,
        })
    }
}

/// Decoder for the NFT hub contract's logs.
///
/// Thread-safe and immutable after construction; share it behind an `Arc`.
#[derive(Debug, Clone)]
pub struct LogDecoder {
    by_topic: HashMap<String, EventDef>,
    topics: HashMap<EventType, String>,
}

impl LogDecoder {
    /// Decoder for the embedded NFT hub ABI.
    pub fn nft_hub() -> Result<Self, AbiError> {
        Self::from_abi_json(NFT_HUB_ABI)
    }

    /// Build a decoder from a JSON ABI. Every stored event type must be
    /// declared in it.
    pub fn from_abi_json(json: &str) -> Result<Self, AbiError> {
        let abi: JsonAbi = serde_json::from_str(json)?;
        let mut by_topic = HashMap::new();
        let mut topics = HashMap::new();

        for event in abi.events().filter(|e| !e.anonymous) {
            let def = EventDef::from_abi(event)?;
            if let Some(kind) = def.kind {
                topics.insert(kind, def.topic0.clone());
            }
            by_topic.insert(def.topic0.clone(), def);
        }

        if let Some(missing) = EventType::ALL.iter().find(|t| !topics.contains_key(*t)) {
            return Err(AbiError::MissingEvent(missing.as_str().to_string()));
        }

        tracing::debug!(events = by_topic.len(), "ABI event table loaded");
        Ok(Self { by_topic, topics })
    }

    /// Topic-0 (signature hash) of a stored event type.
    pub fn topic0(&self, event_type: EventType) -> Option<&str> {
        self.topics.get(&event_type).map(String::as_str)
    }

    /// Topic-0 values for an allow-list of event types.
    pub fn topics_for(&self, types: &[EventType]) -> Vec<String> {
        types
            .iter()
            .filter_map(|t| self.topic0(*t).map(str::to_string))
            .collect()
    }

    /// Decode one raw log.
    pub fn decode(&self, log: &RawLog) -> DecodeOutcome {
        match self.try_decode(log) {
            Ok(ev) => DecodeOutcome::Decoded(ev),
            Err(reason) => DecodeOutcome::Undecodable(reason),
        }
    }

    fn try_decode(&self, log: &RawLog) -> Result<ContractEvent, Undecodable> {
        let topic0 = log.topic0().ok_or(Undecodable::NoTopics)?;
        let def = fingerprint::normalize_topic(topic0)
            .and_then(|t| self.by_topic.get(&t))
            .ok_or_else(|| Undecodable::UnknownSignature {
                topic0: topic0.to_string(),
            })?;
        let kind = def.kind.ok_or_else(|| Undecodable::UnsupportedEvent {
            name: def.name.clone(),
        })?;

        let transaction_hash = log
            .transaction_hash
            .as_deref()
            .ok_or(Undecodable::MissingMetadata { field: "transactionHash" })?
            .to_ascii_lowercase();
        let block_number = log
            .block_number_u64()
            .ok_or(Undecodable::MissingMetadata { field: "blockNumber" })?;
        let log_index = log
            .log_index_u64()
            .ok_or(Undecodable::MissingMetadata { field: "logIndex" })?;

        if log.topics.len() != def.indexed.len() + 1 {
            return Err(Undecodable::TopicCount {
                event: def.name.clone(),
                expected: def.indexed.len() + 1,
                actual: log.topics.len(),
            });
        }

        let mut fields = Fields::new(&def.name);
        for (i, (name, ty)) in def.indexed.iter().enumerate() {
            let value = decode_topic(&def.name, i + 1, &log.topics[i + 1], ty)?;
            fields.insert(name, value);
        }
        for (name, value) in decode_body(def, &log.data)? {
            fields.insert(&name, value);
        }

        let timestamp = fields.u64("timestamp")?;
        let event_kind = match kind {
            EventType::UserRegistered => EventKind::UserRegistered {
                user: fields.address("user")?,
            },
            EventType::NftMinted => EventKind::NftMinted {
                to: fields.address("to")?,
                token_id: fields.decimal("tokenId")?,
                metadata_uri: fields.string("metadataURI")?,
            },
            EventType::UserBlacklisted => EventKind::UserBlacklisted {
                user: fields.address("user")?,
            },
            EventType::UserRemovedFromBlacklist => EventKind::UserRemovedFromBlacklist {
                user: fields.address("user")?,
            },
            EventType::FeesUpdated => EventKind::FeesUpdated {
                registration_fee: fields.decimal("registrationFee")?,
                minting_fee: fields.decimal("mintingFee")?,
            },
        };

        Ok(ContractEvent {
            transaction_hash,
            block_number,
            log_index,
            timestamp,
            kind: event_kind,
            raw_data: fields.raw_data(),
        })
    }
}

/// Decode the indexed parameter at `topics[position]`.
///
/// Reference types (string, bytes, arrays, tuples) are stored as the keccak256
/// of their encoding in indexed position, so only the hash is recoverable.
fn decode_topic(event: &str, position: usize, topic: &str, ty: &DynSolType) -> Result<DynSolValue, Undecodable> {
    let hex_str = topic.strip_prefix("0x").unwrap_or(topic);
    let bytes = hex::decode(hex_str).map_err(|e| Undecodable::MalformedHex {
        event: event.to_string(),
        part: format!("topics[{position}]"),
        reason: e.to_string(),
    })?;
    if bytes.len() != 32 {
        return Err(Undecodable::MalformedHex {
            event: event.to_string(),
            part: format!("topics[{position}]"),
            reason: format!("expected 32 bytes, got {}", bytes.len()),
        });
    }

    match ty {
        DynSolType::String
        | DynSolType::Bytes
        | DynSolType::Array(_)
        | DynSolType::FixedArray(..)
        | DynSolType::Tuple(_) => Ok(DynSolValue::FixedBytes(B256::from_slice(&bytes), 32)),
        _ => ty.abi_decode(&bytes).map_err(|e| Undecodable::AbiDecode {
            event: event.to_string(),
            reason: format!("topics[{position}]: {e}"),
        }),
    }
}

/// Decode the non-indexed parameters from the log's `data` payload.
fn decode_body(def: &EventDef, data: &str) -> Result<Vec<(String, DynSolValue)>, Undecodable> {
    if def.body.is_empty() {
        return Ok(Vec::new());
    }
    let hex_str = data.strip_prefix("0x").unwrap_or(data);
    let bytes = hex::decode(hex_str).map_err(|e| Undecodable::MalformedHex {
        event: def.name.clone(),
        part: "data".into(),
        reason: e.to_string(),
    })?;

    let tuple = DynSolType::Tuple(def.body.iter().map(|(_, ty)| ty.clone()).collect());
    let decoded = tuple.abi_decode_params(&bytes).map_err(|e| Undecodable::AbiDecode {
        event: def.name.clone(),
        reason: e.to_string(),
    })?;
    let values = match decoded {
        DynSolValue::Tuple(vals) => vals,
        other => vec![other],
    };
    if values.len() != def.body.len() {
        return Err(Undecodable::AbiDecode {
            event: def.name.clone(),
            reason: format!("expected {} data values, got {}", def.body.len(), values.len()),
        });
    }
    Ok(def
        .body
        .iter()
        .map(|(name, _)| name.clone())
        .zip(values)
        .collect())
}

/// Decoded arguments of one log, looked up by ABI name.
struct Fields<'a> {
    event: &'a str,
    values: Vec<(String, DynSolValue)>,
}

impl<'a> Fields<'a> {
    fn new(event: &'a str) -> Self {
        Self {
            event,
            values: Vec::new(),
        }
    }

    fn insert(&mut self, name: &str, value: DynSolValue) {
        self.values.push((name.to_string(), value));
    }

    fn get(&self, name: &str) -> Result<&DynSolValue, Undecodable> {
        self.values
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
            .ok_or_else(|| self.invalid(name, "is missing from the ABI"))
    }

    fn invalid(&self, field: &str, reason: &str) -> Undecodable {
        Undecodable::InvalidField {
            event: self.event.to_string(),
            field: field.to_string(),
            reason: reason.to_string(),
        }
    }

    fn address(&self, name: &str) -> Result<String, Undecodable> {
        normalizer::as_address(self.get(name)?).ok_or_else(|| self.invalid(name, "is not an address"))
    }

    fn decimal(&self, name: &str) -> Result<String, Undecodable> {
        normalizer::as_decimal(self.get(name)?).ok_or_else(|| self.invalid(name, "is not an unsigned integer"))
    }

    fn u64(&self, name: &str) -> Result<u64, Undecodable> {
        normalizer::as_u64(self.get(name)?).ok_or_else(|| self.invalid(name, "does not fit in u64"))
    }

    fn string(&self, name: &str) -> Result<String, Undecodable> {
        normalizer::as_string(self.get(name)?).ok_or_else(|| self.invalid(name, "is not a string"))
    }

    fn raw_data(&self) -> Map<String, serde_json::Value> {
        self.values
            .iter()
            .map(|(name, v)| (name.clone(), normalizer::to_json(v)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::U256;

    const USER: &str = "0x00000000000000000000000000000000000000a1";

    fn topic_address(addr: &str) -> String {
        format!("0x{:0>64}", addr.trim_start_matches("0x"))
    }

    fn topic_uint(n: u64) -> String {
        format!("0x{n:064x}")
    }

    fn encode_data(values: Vec<DynSolValue>) -> String {
        format!("0x{}", hex::encode(DynSolValue::Tuple(values).abi_encode_params()))
    }

    fn uint(n: u64) -> DynSolValue {
        DynSolValue::Uint(U256::from(n), 256)
    }

    fn raw_log(topics: Vec<String>, data: String) -> RawLog {
        RawLog {
            address: "0x7ab383c0389eeffe0073838c9016151731136143".into(),
            topics,
            data,
            block_number: Some("0x64".into()),
            block_hash: Some(format!("0x{:064x}", 1)),
            transaction_hash: Some("0xABC".into()),
            log_index: Some("0x2".into()),
            removed: false,
        }
    }

    fn decoder() -> LogDecoder {
        LogDecoder::nft_hub().unwrap()
    }

    fn topic0(ty: EventType) -> String {
        decoder().topic0(ty).unwrap().to_string()
    }

    #[test]
    fn decodes_user_registered() {
        let log = raw_log(
            vec![topic0(EventType::UserRegistered), topic_address(USER)],
            encode_data(vec![uint(1_700_000_000)]),
        );
        let ev = decoder().decode(&log).into_event().unwrap();
        assert_eq!(ev.kind, EventKind::UserRegistered { user: USER.into() });
        assert_eq!(ev.transaction_hash, "0xabc");
        assert_eq!(ev.block_number, 100);
        assert_eq!(ev.log_index, 2);
        assert_eq!(ev.timestamp, 1_700_000_000);
        assert_eq!(ev.raw_data["user"], USER);
        assert_eq!(ev.raw_data["timestamp"], "1700000000");
    }

    #[test]
    fn decodes_nft_minted_with_full_width_token_id() {
        let log = raw_log(
            vec![
                topic0(EventType::NftMinted),
                topic_address(USER),
                format!("0x{}", "f".repeat(64)),
            ],
            encode_data(vec![DynSolValue::String("ipfs://bafy/7.json".into()), uint(1_700_000_123)]),
        );
        let ev = decoder().decode(&log).into_event().unwrap();
        assert_eq!(
            ev.kind,
            EventKind::NftMinted {
                to: USER.into(),
                token_id: U256::MAX.to_string(),
                metadata_uri: "ipfs://bafy/7.json".into(),
            }
        );
        assert_eq!(ev.timestamp, 1_700_000_123);
        assert_eq!(ev.raw_data.len(), 4);
    }

    #[test]
    fn decodes_fees_updated_without_indexed_args() {
        let fee = U256::from(10u64).pow(U256::from(18u64));
        let log = raw_log(
            vec![topic0(EventType::FeesUpdated)],
            encode_data(vec![
                DynSolValue::Uint(fee, 256),
                uint(500_000_000_000_000),
                uint(1_700_000_000),
            ]),
        );
        let ev = decoder().decode(&log).into_event().unwrap();
        assert_eq!(
            ev.kind,
            EventKind::FeesUpdated {
                registration_fee: "1000000000000000000".into(),
                minting_fee: "500000000000000".into(),
            }
        );
    }

    #[test]
    fn blacklist_events_carry_action() {
        for ty in [EventType::UserBlacklisted, EventType::UserRemovedFromBlacklist] {
            let log = raw_log(vec![topic0(ty), topic_address(USER)], encode_data(vec![uint(5)]));
            let ev = decoder().decode(&log).into_event().unwrap();
            assert_eq!(ev.event_type(), ty);
            assert_eq!(ev.kind.user(), Some(USER));
            assert!(ev.kind.action().is_some());
        }
    }

    #[test]
    fn unknown_signature_is_undecodable() {
        let log = raw_log(vec![topic_uint(0xdead)], "0x".into());
        assert!(matches!(
            decoder().decode(&log),
            DecodeOutcome::Undecodable(Undecodable::UnknownSignature { .. })
        ));
    }

    #[test]
    fn known_but_unstored_event_is_undecodable() {
        let transfer = fingerprint::keccak256_signature("Transfer(address,address,uint256)");
        let log = raw_log(
            vec![transfer, topic_address(USER), topic_address(USER), topic_uint(1)],
            "0x".into(),
        );
        assert_eq!(
            decoder().decode(&log),
            DecodeOutcome::Undecodable(Undecodable::UnsupportedEvent {
                name: "Transfer".into()
            })
        );
    }

    #[test]
    fn missing_log_index_is_undecodable() {
        let mut log = raw_log(
            vec![topic0(EventType::UserRegistered), topic_address(USER)],
            encode_data(vec![uint(1)]),
        );
        log.log_index = None;
        assert_eq!(
            decoder().decode(&log),
            DecodeOutcome::Undecodable(Undecodable::MissingMetadata { field: "logIndex" })
        );
    }

    #[test]
    fn wrong_topic_count_is_undecodable() {
        let log = raw_log(vec![topic0(EventType::UserRegistered)], encode_data(vec![uint(1)]));
        assert!(matches!(
            decoder().decode(&log),
            DecodeOutcome::Undecodable(Undecodable::TopicCount { expected: 2, actual: 1, .. })
        ));
    }

    #[test]
    fn truncated_data_is_undecodable() {
        let log = raw_log(
            vec![topic0(EventType::UserRegistered), topic_address(USER)],
            "0x1234".into(),
        );
        assert!(matches!(
            decoder().decode(&log),
            DecodeOutcome::Undecodable(Undecodable::AbiDecode { .. })
        ));
    }

    #[test]
    fn oversized_timestamp_is_undecodable() {
        let log = raw_log(
            vec![topic0(EventType::UserRegistered), topic_address(USER)],
            encode_data(vec![DynSolValue::Uint(U256::MAX, 256)]),
        );
        assert!(matches!(
            decoder().decode(&log),
            DecodeOutcome::Undecodable(Undecodable::InvalidField { .. })
        ));
    }

    #[test]
    fn topics_match_alloy_selectors() {
        let abi: JsonAbi = serde_json::from_str(NFT_HUB_ABI).unwrap();
        let dec = decoder();
        for ty in EventType::ALL {
            let event = &abi.event(ty.as_str()).unwrap()[0];
            assert_eq!(dec.topic0(ty).unwrap(), format!("0x{}", hex::encode(event.selector())));
        }
        assert_eq!(dec.topics_for(&EventType::ALL).len(), 5);
    }

    #[test]
    fn abi_without_a_stored_event_is_rejected() {
        let abi = r#"[{"type":"event","name":"UserRegistered","anonymous":false,
            "inputs":[{"name":"user","type":"address","indexed":true}]}]"#;
        assert!(matches!(
            LogDecoder::from_abi_json(abi),
            Err(AbiError::MissingEvent(name)) if name == "NFTMinted"
        ));
    }
}
