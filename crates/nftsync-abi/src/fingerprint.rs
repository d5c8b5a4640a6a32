//! Event signature hashing.
//!
//! Topic-0 of a non-anonymous event log is the keccak256 hash of its
//! canonical signature, e.g.:
//!   keccak256("Transfer(address,address,uint256)")
//!   → 0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef

use tiny_keccak::{Hasher, Keccak};

/// Keccak256 of a canonical event signature, as lowercase `0x` hex.
pub fn keccak256_signature(signature: &str) -> String {
    let mut hasher = Keccak::v256();
    let mut output = [0u8; 32];
    hasher.update(signature.as_bytes());
    hasher.finalize(&mut output);
    format!("0x{}", hex::encode(output))
}

/// Normalize a topic-0 string for lookup. Returns `None` unless it is a
/// 32-byte hex word.
pub fn normalize_topic(topic: &str) -> Option<String> {
    let hex = topic.strip_prefix("0x").unwrap_or(topic);
    if hex.len() == 64 && hex.chars().all(|c| c.is_ascii_hexdigit()) {
        Some(format!("0x{}", hex.to_ascii_lowercase()))
    } else {
        None
    }
}
