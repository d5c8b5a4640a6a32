//! nftsync-core: shared foundation for the NFT hub contract-event sync pipeline.
//!
//! # Architecture
//!
//! ```text
//! SyncOrchestrator
//!     ├── BackfillEngine   (chunked eth_getLogs replay, checkpointed)
//!     ├── LiveEngine       (eth_subscribe("logs") task → mpsc channel)
//!     ├── LogDecoder       (NFT hub ABI → ContractEvent)
//!     └── EventSink        (idempotent on (tx hash, log index))
//! ```
//!
//! This crate holds the pieces every other crate agrees on: the closed event
//! model, the raw log shape, the error taxonomy, configuration, and the sink
//! and checkpoint traits that storage backends implement.

pub mod checkpoint;
pub mod config;
pub mod cursor;
pub mod error;
pub mod event;
pub mod log;
pub mod sink;
pub mod state;
pub mod types;

pub use checkpoint::{Checkpoint, CheckpointStore};
pub use config::SyncConfig;
pub use cursor::BlockCursor;
pub use error::SyncError;
pub use event::{BlacklistAction, ContractEvent, EventColumns, EventKind, EventType, StoredEvent};
pub use log::RawLog;
pub use sink::{EventQueries, EventSink};
pub use state::SyncState;
pub use types::BlockRange;
