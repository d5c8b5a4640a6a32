//! Backend selection by URL.

use async_trait::async_trait;
use tracing::info;

use nftsync_core::{
    Checkpoint, CheckpointStore, ContractEvent, EventQueries, EventSink, EventType, StoredEvent,
    SyncError,
};

use crate::memory::InMemoryStorage;

/// One of the compiled-in storage backends.
///
/// Wrap it in an `Arc` and coerce to `Arc<dyn EventSink>`,
/// `Arc<dyn EventQueries>` or `Arc<dyn CheckpointStore>` as needed.
pub enum AnyStorage {
    Memory(InMemoryStorage),
    #[cfg(feature = "sqlite")]
    Sqlite(crate::sqlite::SqliteStorage),
    #[cfg(feature = "postgres")]
    Postgres(crate::postgres::PostgresStorage),
}

macro_rules! delegate {
    ($self:ident, $s:ident => $call:expr) => {
        match $self {
            AnyStorage::Memory($s) => $call,
            #[cfg(feature = "sqlite")]
            AnyStorage::Sqlite($s) => $call,
            #[cfg(feature = "postgres")]
            AnyStorage::Postgres($s) => $call,
        }
    };
}

impl AnyStorage {
    /// Open the backend a database URL names.
    ///
    /// | URL                              | Backend          |
    /// |----------------------------------|------------------|
    /// | `memory:`                        | in-memory        |
    /// | `sqlite::memory:`                | in-memory SQLite |
    /// | `sqlite:<path>`                  | SQLite file      |
    /// | `postgres://…`, `postgresql://…` | PostgreSQL       |
    pub async fn connect(url: &str) -> Result<Self, SyncError> {
        let url = url.trim();
        let storage = if url == "memory:" || url == "memory" {
            Self::Memory(InMemoryStorage::new())
        } else if url.starts_with("sqlite:") {
            Self::open_sqlite(url).await?
        } else if url.starts_with("postgres://") || url.starts_with("postgresql://") {
            Self::open_postgres(url).await?
        } else {
            return Err(SyncError::Config(format!(
                "unsupported DB_URI '{url}' (expected memory:, sqlite:<path>, or postgres://…)"
            )));
        };
        info!(backend = storage.backend(), "storage ready");
        Ok(storage)
    }

    #[cfg(feature = "sqlite")]
    async fn open_sqlite(url: &str) -> Result<Self, SyncError> {
        let store = if url == "sqlite::memory:" {
            crate::sqlite::SqliteStorage::in_memory().await?
        } else {
            crate::sqlite::SqliteStorage::open(url).await?
        };
        Ok(Self::Sqlite(store))
    }

    #[cfg(not(feature = "sqlite"))]
    async fn open_sqlite(_url: &str) -> Result<Self, SyncError> {
        Err(SyncError::Config("built without the `sqlite` feature".into()))
    }

    #[cfg(feature = "postgres")]
    async fn open_postgres(url: &str) -> Result<Self, SyncError> {
        Ok(Self::Postgres(crate::postgres::PostgresStorage::connect(url).await?))
    }

    #[cfg(not(feature = "postgres"))]
    async fn open_postgres(_url: &str) -> Result<Self, SyncError> {
        Err(SyncError::Config("built without the `postgres` feature".into()))
    }

    pub fn backend(&self) -> &'static str {
        match self {
            Self::Memory(_) => "memory",
            #[cfg(feature = "sqlite")]
            Self::Sqlite(_) => "sqlite",
            #[cfg(feature = "postgres")]
            Self::Postgres(_) => "postgres",
        }
    }
}

#[async_trait]
impl EventSink for AnyStorage {
    async fn record(&self, event: ContractEvent) -> Result<StoredEvent, SyncError> {
        delegate!(self, s => s.record(event).await)
    }
}

#[async_trait]
impl EventQueries for AnyStorage {
    async fn by_address(&self, address: &str) -> Result<Vec<StoredEvent>, SyncError> {
        delegate!(self, s => s.by_address(address).await)
    }

    async fn all(&self) -> Result<Vec<StoredEvent>, SyncError> {
        delegate!(self, s => s.all().await)
    }

    async fn by_type(&self, event_type: EventType) -> Result<Vec<StoredEvent>, SyncError> {
        delegate!(self, s => s.by_type(event_type).await)
    }

    async fn by_block_range(&self, from: u64, to: u64) -> Result<Vec<StoredEvent>, SyncError> {
        delegate!(self, s => s.by_block_range(from, to).await)
    }

    async fn user_nfts(&self, address: &str) -> Result<Vec<StoredEvent>, SyncError> {
        delegate!(self, s => s.user_nfts(address).await)
    }

    async fn is_user_registered(&self, address: &str) -> Result<bool, SyncError> {
        delegate!(self, s => s.is_user_registered(address).await)
    }

    async fn is_user_blacklisted(&self, address: &str) -> Result<bool, SyncError> {
        delegate!(self, s => s.is_user_blacklisted(address).await)
    }

    async fn latest_fees_update(&self) -> Result<Option<StoredEvent>, SyncError> {
        delegate!(self, s => s.latest_fees_update().await)
    }

    async fn event_count(&self) -> Result<u64, SyncError> {
        delegate!(self, s => s.event_count().await)
    }
}

#[async_trait]
impl CheckpointStore for AnyStorage {
    async fn load(&self, sync_id: &str) -> Result<Option<Checkpoint>, SyncError> {
        delegate!(self, s => s.load(sync_id).await)
    }

    async fn save(&self, checkpoint: &Checkpoint) -> Result<(), SyncError> {
        delegate!(self, s => s.save(checkpoint).await)
    }

    async fn delete(&self, sync_id: &str) -> Result<(), SyncError> {
        delegate!(self, s => s.delete(sync_id).await)
    }
}
