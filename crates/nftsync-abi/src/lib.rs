//! nftsync-abi: decodes raw NFT hub logs into [`ContractEvent`](nftsync_core::ContractEvent)s.
//!
//! The contract ABI is embedded at compile time. [`LogDecoder`] matches a
//! log's topic-0 against the ABI's event signatures, decodes indexed
//! arguments from the remaining topics and the rest from `data`, and builds
//! the typed event. Anything it cannot turn into one of the stored event
//! types comes back as [`DecodeOutcome::Undecodable`].

pub mod decoder;
pub mod error;
pub mod fingerprint;
pub mod normalizer;

pub use decoder::{DecodeOutcome, LogDecoder};
pub use error::{AbiError, Undecodable};

/// The NFT hub contract ABI (events only).
pub const NFT_HUB_ABI: &str = include_str!("../abi/NFTHub.json");
