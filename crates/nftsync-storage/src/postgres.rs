//! PostgreSQL storage backend.
//!
//! Requires the `postgres` feature:
//! ```toml
//! nftsync-storage = { version = "0.1", features = ["postgres"] }
//! ```
//!
//! # Schema
//! Created on first connect:
//! - `contract_events`: one row per recorded event, unique on
//!   `(transaction_hash, log_index)`; `raw_data` is JSONB
//! - `sync_checkpoints`: backfill progress per sync id

use async_trait::async_trait;
use serde_json::{Map, Value};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use tracing::{debug, info};

use nftsync_core::event::normalize_address;
use nftsync_core::{
    Checkpoint, CheckpointStore, ContractEvent, EventColumns, EventQueries, EventSink, EventType,
    StoredEvent, SyncError,
};

use crate::sql::{from_sql, to_sql, to_sql_bound};

const SELECT_EVENTS: &str = "SELECT id, event_type, transaction_hash, block_number, log_index, timestamp,
        user_address, to_address, token_id, metadata_uri, action,
        registration_fee, minting_fee, raw_data, indexed_at
     FROM contract_events";

const NEWEST_FIRST: &str = "ORDER BY block_number DESC, log_index DESC";

fn storage_err(e: impl std::fmt::Display) -> SyncError {
    SyncError::Storage(e.to_string())
}

// ─── Connection options ────────────────────────────────────────────────────────

/// Pool options for the Postgres backend.
#[derive(Debug, Clone)]
pub struct PostgresOptions {
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_secs: u64,
}

impl Default for PostgresOptions {
    fn default() -> Self {
        Self {
            max_connections: 10,
            min_connections: 1,
            connect_timeout_secs: 30,
        }
    }
}

// ─── PostgresStorage ─────────────────────────────────────────────────────────

/// PostgreSQL-backed event and checkpoint store.
#[derive(Clone)]
pub struct PostgresStorage {
    pool: PgPool,
}

impl PostgresStorage {
    /// Connect with default pool options and initialize the schema.
    pub async fn connect(database_url: &str) -> Result<Self, SyncError> {
        Self::connect_with_options(database_url, PostgresOptions::default()).await
    }

    pub async fn connect_with_options(database_url: &str, opts: PostgresOptions) -> Result<Self, SyncError> {
        let pool = PgPoolOptions::new()
            .max_connections(opts.max_connections)
            .min_connections(opts.min_connections)
            .acquire_timeout(std::time::Duration::from_secs(opts.connect_timeout_secs))
            .connect(database_url)
            .await
            .map_err(|e| SyncError::Storage(format!("postgres connect: {e}")))?;

        let storage = Self { pool };
        storage.init_schema().await?;
        info!("PostgresStorage connected and schema initialized");
        Ok(storage)
    }

    async fn init_schema(&self) -> Result<(), SyncError> {
        let statements = [
            "CREATE TABLE IF NOT EXISTS contract_events (
                id               BIGSERIAL PRIMARY KEY,
                event_type       TEXT      NOT NULL,
                transaction_hash TEXT      NOT NULL,
                block_number     BIGINT    NOT NULL,
                log_index        BIGINT    NOT NULL,
                timestamp        BIGINT    NOT NULL,
                user_address     TEXT,
                to_address       TEXT,
                token_id         TEXT,
                metadata_uri     TEXT,
                action           TEXT,
                registration_fee TEXT,
                minting_fee      TEXT,
                raw_data         JSONB     NOT NULL,
                indexed_at       BIGINT    NOT NULL DEFAULT EXTRACT(EPOCH FROM NOW())::BIGINT,
                UNIQUE (transaction_hash, log_index)
            )",
            "CREATE INDEX IF NOT EXISTS idx_contract_events_user
             ON contract_events (LOWER(user_address))",
            "CREATE INDEX IF NOT EXISTS idx_contract_events_to
             ON contract_events (LOWER(to_address))",
            "CREATE INDEX IF NOT EXISTS idx_contract_events_type
             ON contract_events (event_type, block_number DESC)",
            "CREATE INDEX IF NOT EXISTS idx_contract_events_block
             ON contract_events (block_number DESC, log_index DESC)",
            "CREATE TABLE IF NOT EXISTS sync_checkpoints (
                sync_id      TEXT   PRIMARY KEY,
                block_number BIGINT NOT NULL,
                updated_at   BIGINT NOT NULL
            )",
        ];
        for sql in statements {
            sqlx::query(sql).execute(&self.pool).await.map_err(storage_err)?;
        }
        debug!("PostgresStorage schema initialized");
        Ok(())
    }

    async fn fetch(&self, sql: &str, binds: &[&str]) -> Result<Vec<StoredEvent>, SyncError> {
        let mut query = sqlx::query(sql);
        for b in binds {
            query = query.bind(*b);
        }
        let rows = query.fetch_all(&self.pool).await.map_err(storage_err)?;
        rows.iter().map(row_to_event).collect()
    }
}

fn row_to_event(row: &PgRow) -> Result<StoredEvent, SyncError> {
    let type_name: String = row.try_get("event_type").map_err(storage_err)?;
    let event_type = EventType::from_abi_name(&type_name)
        .ok_or_else(|| SyncError::Storage(format!("unknown event_type '{type_name}' in contract_events")))?;
    let cols = EventColumns {
        event_type,
        user: row.try_get("user_address").map_err(storage_err)?,
        to: row.try_get("to_address").map_err(storage_err)?,
        token_id: row.try_get("token_id").map_err(storage_err)?,
        metadata_uri: row.try_get("metadata_uri").map_err(storage_err)?,
        action: None,
        registration_fee: row.try_get("registration_fee").map_err(storage_err)?,
        minting_fee: row.try_get("minting_fee").map_err(storage_err)?,
    };
    let Json(raw_data): Json<Map<String, Value>> = row.try_get("raw_data").map_err(storage_err)?;

    let event = ContractEvent::from_columns(
        row.try_get("transaction_hash").map_err(storage_err)?,
        from_sql("block_number", row.try_get("block_number").map_err(storage_err)?)?,
        from_sql("log_index", row.try_get("log_index").map_err(storage_err)?)?,
        from_sql("timestamp", row.try_get("timestamp").map_err(storage_err)?)?,
        cols,
        raw_data,
    )?;
    Ok(StoredEvent {
        id: row.try_get("id").map_err(storage_err)?,
        event,
        indexed_at: row.try_get("indexed_at").map_err(storage_err)?,
    })
}

#[async_trait]
impl EventSink for PostgresStorage {
    async fn record(&self, event: ContractEvent) -> Result<StoredEvent, SyncError> {
        let cols = event.columns();
        let inserted = sqlx::query(
            "INSERT INTO contract_events
                (event_type, transaction_hash, block_number, log_index, timestamp,
                 user_address, to_address, token_id, metadata_uri, action,
                 registration_fee, minting_fee, raw_data, indexed_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
             ON CONFLICT (transaction_hash, log_index) DO NOTHING",
        )
        .bind(cols.event_type.as_str())
        .bind(&event.transaction_hash)
        .bind(to_sql("block_number", event.block_number)?)
        .bind(to_sql("log_index", event.log_index)?)
        .bind(to_sql("timestamp", event.timestamp)?)
        .bind(cols.user.as_deref())
        .bind(cols.to.as_deref())
        .bind(cols.token_id.as_deref())
        .bind(cols.metadata_uri.as_deref())
        .bind(cols.action.map(|a| a.as_str()))
        .bind(cols.registration_fee.as_deref())
        .bind(cols.minting_fee.as_deref())
        .bind(Json(&event.raw_data))
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await
        .map_err(storage_err)?
        .rows_affected();

        if inserted == 0 {
            debug!(tx = %event.transaction_hash, log_index = event.log_index, "duplicate event ignored");
        }

        let row = sqlx::query(&format!(
            "{SELECT_EVENTS} WHERE transaction_hash = $1 AND log_index = $2"
        ))
        .bind(&event.transaction_hash)
        .bind(to_sql("log_index", event.log_index)?)
        .fetch_one(&self.pool)
        .await
        .map_err(storage_err)?;
        row_to_event(&row)
    }
}

#[async_trait]
impl EventQueries for PostgresStorage {
    async fn by_address(&self, address: &str) -> Result<Vec<StoredEvent>, SyncError> {
        let address = normalize_address(address);
        self.fetch(
            &format!("{SELECT_EVENTS} WHERE LOWER(user_address) = $1 OR LOWER(to_address) = $1 {NEWEST_FIRST}"),
            &[address.as_str()],
        )
        .await
    }

    async fn all(&self) -> Result<Vec<StoredEvent>, SyncError> {
        self.fetch(&format!("{SELECT_EVENTS} {NEWEST_FIRST}"), &[]).await
    }

    async fn by_type(&self, event_type: EventType) -> Result<Vec<StoredEvent>, SyncError> {
        self.fetch(
            &format!("{SELECT_EVENTS} WHERE event_type = $1 {NEWEST_FIRST}"),
            &[event_type.as_str()],
        )
        .await
    }

    async fn by_block_range(&self, from: u64, to: u64) -> Result<Vec<StoredEvent>, SyncError> {
        let rows = sqlx::query(&format!(
            "{SELECT_EVENTS} WHERE block_number BETWEEN $1 AND $2 {NEWEST_FIRST}"
        ))
        .bind(to_sql_bound(from))
        .bind(to_sql_bound(to))
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err)?;
        rows.iter().map(row_to_event).collect()
    }

    async fn user_nfts(&self, address: &str) -> Result<Vec<StoredEvent>, SyncError> {
        let address = normalize_address(address);
        self.fetch(
            &format!("{SELECT_EVENTS} WHERE event_type = $1 AND LOWER(to_address) = $2 {NEWEST_FIRST}"),
            &[EventType::NftMinted.as_str(), address.as_str()],
        )
        .await
    }

    async fn is_user_registered(&self, address: &str) -> Result<bool, SyncError> {
        let row = sqlx::query(
            "SELECT EXISTS (
                SELECT 1 FROM contract_events
                WHERE event_type = $1 AND LOWER(user_address) = $2
             ) AS found",
        )
        .bind(EventType::UserRegistered.as_str())
        .bind(normalize_address(address))
        .fetch_one(&self.pool)
        .await
        .map_err(storage_err)?;
        row.try_get("found").map_err(storage_err)
    }

    async fn is_user_blacklisted(&self, address: &str) -> Result<bool, SyncError> {
        let latest: Option<String> = sqlx::query_scalar(&format!(
            "SELECT event_type FROM contract_events
             WHERE event_type IN ($1, $2) AND LOWER(user_address) = $3
             {NEWEST_FIRST} LIMIT 1"
        ))
        .bind(EventType::UserBlacklisted.as_str())
        .bind(EventType::UserRemovedFromBlacklist.as_str())
        .bind(normalize_address(address))
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_err)?;
        Ok(latest.as_deref() == Some(EventType::UserBlacklisted.as_str()))
    }

    async fn latest_fees_update(&self) -> Result<Option<StoredEvent>, SyncError> {
        let rows = self
            .fetch(
                &format!("{SELECT_EVENTS} WHERE event_type = $1 {NEWEST_FIRST} LIMIT 1"),
                &[EventType::FeesUpdated.as_str()],
            )
            .await?;
        Ok(rows.into_iter().next())
    }

    async fn event_count(&self) -> Result<u64, SyncError> {
        let cnt: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM contract_events")
            .fetch_one(&self.pool)
            .await
            .map_err(storage_err)?;
        from_sql("count", cnt)
    }
}

// ─── CheckpointStore impl ────────────────────────────────────────────────────

#[async_trait]
impl CheckpointStore for PostgresStorage {
    async fn load(&self, sync_id: &str) -> Result<Option<Checkpoint>, SyncError> {
        let row = sqlx::query(
            "SELECT sync_id, block_number, updated_at FROM sync_checkpoints WHERE sync_id = $1",
        )
        .bind(sync_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_err)?;

        row.map(|r| {
            Ok(Checkpoint {
                sync_id: r.try_get("sync_id").map_err(storage_err)?,
                block_number: from_sql("block_number", r.try_get("block_number").map_err(storage_err)?)?,
                updated_at: r.try_get("updated_at").map_err(storage_err)?,
            })
        })
        .transpose()
    }

    async fn save(&self, checkpoint: &Checkpoint) -> Result<(), SyncError> {
        sqlx::query(
            "INSERT INTO sync_checkpoints (sync_id, block_number, updated_at)
             VALUES ($1, $2, $3)
             ON CONFLICT (sync_id) DO UPDATE
             SET block_number = EXCLUDED.block_number, updated_at = EXCLUDED.updated_at",
        )
        .bind(&checkpoint.sync_id)
        .bind(to_sql("block_number", checkpoint.block_number)?)
        .bind(checkpoint.updated_at)
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        debug!(sync_id = %checkpoint.sync_id, block = checkpoint.block_number, "checkpoint saved");
        Ok(())
    }

    async fn delete(&self, sync_id: &str) -> Result<(), SyncError> {
        sqlx::query("DELETE FROM sync_checkpoints WHERE sync_id = $1")
            .bind(sync_id)
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(())
    }
}
