//! Decoder errors and undecodable-log reasons.

use thiserror::Error;

/// Failure to load the contract ABI.
#[derive(Debug, Error)]
pub enum AbiError {
    #[error("invalid ABI JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("ABI has no event '{0}'")]
    MissingEvent(String),

    #[error("event '{event}' parameter '{param}' has unsupported type '{ty}': {reason}")]
    UnsupportedType {
        event: String,
        param: String,
        ty: String,
        reason: String,
    },
}

/// Why a log could not be turned into a stored event.
///
/// This is an expected outcome, not a failure of the pipeline: callers log
/// it and move on.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Undecodable {
    #[error("log has no topics")]
    NoTopics,

    #[error("unknown event signature {topic0}")]
    UnknownSignature { topic0: String },

    #[error("event '{name}' is not a stored event type")]
    UnsupportedEvent { name: String },

    #[error("log is missing {field}")]
    MissingMetadata { field: &'static str },

    #[error("{event}: expected {expected} topics, got {actual}")]
    TopicCount {
        event: String,
        expected: usize,
        actual: usize,
    },

    #[error("{event}: malformed hex in {part}: {reason}")]
    MalformedHex {
        event: String,
        part: String,
        reason: String,
    },

    #[error("{event}: ABI decode failed: {reason}")]
    AbiDecode { event: String, reason: String },

    #[error("{event}: field '{field}' {reason}")]
    InvalidField {
        event: String,
        field: String,
        reason: String,
    },
}
