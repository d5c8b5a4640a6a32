//! Per-log step shared by the backfill and live engines.

use nftsync_abi::{DecodeOutcome, LogDecoder};
use nftsync_core::{ContractEvent, RawLog};
use tracing::{debug, warn};

/// Decode one log, logging and dropping anything that is not a stored event.
///
/// Logs flagged `removed` (dropped by a reorg) are skipped before decoding.
pub fn decode_log(decoder: &LogDecoder, log: &RawLog) -> Option<ContractEvent> {
    if log.is_removed() {
        debug!(
            tx = log.transaction_hash.as_deref().unwrap_or("?"),
            log_index = log.log_index.as_deref().unwrap_or("?"),
            "skipping removed log"
        );
        return None;
    }
    match decoder.decode(log) {
        DecodeOutcome::Decoded(event) => Some(event),
        DecodeOutcome::Undecodable(reason) => {
            warn!(
                tx = log.transaction_hash.as_deref().unwrap_or("?"),
                block = log.block_number.as_deref().unwrap_or("?"),
                topic0 = log.topic0().unwrap_or("-"),
                %reason,
                "skipping undecodable log"
            );
            None
        }
    }
}
