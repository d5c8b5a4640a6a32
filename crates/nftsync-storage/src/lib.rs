//! nftsync-storage: event and checkpoint stores for the NFT hub sync.
//!
//! Backends:
//! - [`memory`]: in-memory (tests, throwaway runs)
//! - [`sqlite`]: SQLite via `sqlx` (default; single-file persistence)
//! - `postgres`: PostgreSQL via `sqlx` (feature `postgres`)
//!
//! Every backend implements [`EventSink`](nftsync_core::EventSink),
//! [`EventQueries`](nftsync_core::EventQueries) and
//! [`CheckpointStore`](nftsync_core::CheckpointStore). [`AnyStorage`] picks
//! one from a `DB_URI`.

pub mod any;
pub mod memory;

#[cfg(any(feature = "sqlite", feature = "postgres"))]
mod sql;

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "postgres")]
pub mod postgres;

pub use any::AnyStorage;
pub use memory::InMemoryStorage;
