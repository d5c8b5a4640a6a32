//! nftsync-engine: drives the NFT hub event sync.
//!
//! - [`backfill`]: chunked, checkpointed `eth_getLogs` replay to the head
//! - [`live`]: `eth_subscribe("logs")` task feeding a sink-writer task
//! - [`orchestrator`]: backfill → live → catch-up, with lifecycle state
//! - [`builder`]: fluent config builder and pipeline wiring

pub mod backfill;
pub mod builder;
pub mod live;
pub mod orchestrator;
pub mod pipeline;

pub use backfill::{plan_chunks, BackfillEngine, BackfillOptions, BackfillReport, BackfillState};
pub use builder::{SyncBuilder, SyncPipeline};
pub use live::{spawn_sink_writer, LiveEngine, LiveExit, WriterStats};
pub use orchestrator::{StartupReport, SyncOrchestrator};
