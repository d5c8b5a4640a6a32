//! SQLite storage backend.
//!
//! Persists events and checkpoints to a single SQLite file with WAL enabled.
//! The `(transaction_hash, log_index)` unique constraint is what makes
//! [`EventSink::record`] idempotent.
//!
//! # Usage
//! ```rust,no_run
//! use nftsync_storage::sqlite::SqliteStorage;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // File-backed (persistent)
//! let store = SqliteStorage::open("./nftsync.db").await?;
//!
//! // In-memory (tests / ephemeral)
//! let store = SqliteStorage::in_memory().await?;
//! # Ok(())
//! # }
//! ```

use std::str::FromStr;

use async_trait::async_trait;
use serde_json::{Map, Value};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use tracing::debug;

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

/// SQLite-backed event and checkpoint store.
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Open (or create) a SQLite database.
    ///
    /// `path` may be a plain file path (`"./nftsync.db"`) or a full SQLite
    /// URL (`"sqlite:./nftsync.db"`).
    pub async fn open(path: &str) -> Result<Self, SyncError> {
        let url = if path.starts_with("sqlite:") {
            path.to_string()
        } else {
            format!("sqlite:{path}")
        };
        let options = SqliteConnectOptions::from_str(&url)
            .map_err(|e| SyncError::Config(format!("invalid SQLite URL '{url}': {e}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePool::connect_with(options).await.map_err(storage_err)?;
        let storage = Self { pool };
        storage.init_schema().await?;
        debug!(url = %url, "SQLite storage opened");
        Ok(storage)
    }

    /// Open an in-memory database.
    ///
    /// Every pooled connection would see its own empty database, so the pool
    /// is pinned to a single connection that never expires.
    pub async fn in_memory() -> Result<Self, SyncError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .map_err(storage_err)?;

        let storage = Self { pool };
        storage.init_schema().await?;
        Ok(storage)
    }

    async fn init_schema(&self) -> Result<(), SyncError> {
        let statements = [
            "CREATE TABLE IF NOT EXISTS contract_events (
                id               INTEGER PRIMARY KEY AUTOINCREMENT,
                event_type       TEXT    NOT NULL,
                transaction_hash TEXT    NOT NULL,
                block_number     INTEGER NOT NULL,
                log_index        INTEGER NOT NULL,
                timestamp        INTEGER NOT NULL,
                user_address     TEXT,
                to_address       TEXT,
                token_id         TEXT,
                metadata_uri     TEXT,
                action           TEXT,
                registration_fee TEXT,
                minting_fee      TEXT,
                raw_data         TEXT    NOT NULL,
                indexed_at       INTEGER NOT NULL,
                UNIQUE (transaction_hash, log_index)
            )",
            "CREATE INDEX IF NOT EXISTS idx_contract_events_user ON contract_events (user_address)",
            "CREATE INDEX IF NOT EXISTS idx_contract_events_to ON contract_events (to_address)",
            "CREATE INDEX IF NOT EXISTS idx_contract_events_type ON contract_events (event_type)",
            "CREATE INDEX IF NOT EXISTS idx_contract_events_block ON contract_events (block_number, log_index)",
            "CREATE TABLE IF NOT EXISTS sync_checkpoints (
                sync_id      TEXT    PRIMARY KEY,
                block_number INTEGER NOT NULL,
                updated_at   INTEGER NOT NULL
            )",
        ];
        for sql in statements {
            sqlx::query(sql).execute(&self.pool).await.map_err(storage_err)?;
        }
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

    async fn fetch_by_key(&self, tx_hash: &str, log_index: u64) -> Result<StoredEvent, SyncError> {
        let row = sqlx::query(&format!(
            "{SELECT_EVENTS} WHERE transaction_hash = ? AND log_index = ?"
        ))
        .bind(tx_hash)
        .bind(to_sql("log_index", log_index)?)
        .fetch_one(&self.pool)
        .await
        .map_err(storage_err)?;
        row_to_event(&row)
    }
}

fn row_to_event(row: &SqliteRow) -> Result<StoredEvent, SyncError> {
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
    let raw: String = row.try_get("raw_data").map_err(storage_err)?;
    let raw_data: Map<String, Value> = serde_json::from_str(&raw).map_err(storage_err)?;

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
impl EventSink for SqliteStorage {
    async fn record(&self, event: ContractEvent) -> Result<StoredEvent, SyncError> {
        let cols = event.columns();
        let raw = serde_json::to_string(&event.raw_data).map_err(storage_err)?;

        let result = sqlx::query(
            "INSERT INTO contract_events
                (event_type, transaction_hash, block_number, log_index, timestamp,
                 user_address, to_address, token_id, metadata_uri, action,
                 registration_fee, minting_fee, raw_data, indexed_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
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
        .bind(&raw)
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        if result.rows_affected() == 0 {
            debug!(tx = %event.transaction_hash, log_index = event.log_index, "duplicate event ignored");
        }
        self.fetch_by_key(&event.transaction_hash, event.log_index).await
    }
}

#[async_trait]
impl EventQueries for SqliteStorage {
    async fn by_address(&self, address: &str) -> Result<Vec<StoredEvent>, SyncError> {
        let address = normalize_address(address);
        self.fetch(
            &format!("{SELECT_EVENTS} WHERE LOWER(user_address) = ? OR LOWER(to_address) = ? {NEWEST_FIRST}"),
            &[address.as_str(), address.as_str()],
        )
        .await
    }

    async fn all(&self) -> Result<Vec<StoredEvent>, SyncError> {
        self.fetch(&format!("{SELECT_EVENTS} {NEWEST_FIRST}"), &[]).await
    }

    async fn by_type(&self, event_type: EventType) -> Result<Vec<StoredEvent>, SyncError> {
        self.fetch(
            &format!("{SELECT_EVENTS} WHERE event_type = ? {NEWEST_FIRST}"),
            &[event_type.as_str()],
        )
        .await
    }

    async fn by_block_range(&self, from: u64, to: u64) -> Result<Vec<StoredEvent>, SyncError> {
        let rows = sqlx::query(&format!(
            "{SELECT_EVENTS} WHERE block_number >= ? AND block_number <= ? {NEWEST_FIRST}"
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
            &format!("{SELECT_EVENTS} WHERE event_type = ? AND LOWER(to_address) = ? {NEWEST_FIRST}"),
            &[EventType::NftMinted.as_str(), address.as_str()],
        )
        .await
    }

    async fn is_user_registered(&self, address: &str) -> Result<bool, SyncError> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS cnt FROM contract_events
             WHERE event_type = ? AND LOWER(user_address) = ?",
        )
        .bind(EventType::UserRegistered.as_str())
        .bind(normalize_address(address))
        .fetch_one(&self.pool)
        .await
        .map_err(storage_err)?;
        let cnt: i64 = row.try_get("cnt").map_err(storage_err)?;
        Ok(cnt > 0)
    }

    async fn is_user_blacklisted(&self, address: &str) -> Result<bool, SyncError> {
        let row = sqlx::query(&format!(
            "SELECT event_type FROM contract_events
             WHERE event_type IN (?, ?) AND LOWER(user_address) = ?
             {NEWEST_FIRST} LIMIT 1"
        ))
        .bind(EventType::UserBlacklisted.as_str())
        .bind(EventType::UserRemovedFromBlacklist.as_str())
        .bind(normalize_address(address))
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_err)?;

        match row {
            Some(r) => {
                let ty: String = r.try_get("event_type").map_err(storage_err)?;
                Ok(ty == EventType::UserBlacklisted.as_str())
            }
            None => Ok(false),
        }
    }

    async fn latest_fees_update(&self) -> Result<Option<StoredEvent>, SyncError> {
        let rows = self
            .fetch(
                &format!("{SELECT_EVENTS} WHERE event_type = ? {NEWEST_FIRST} LIMIT 1"),
                &[EventType::FeesUpdated.as_str()],
            )
            .await?;
        Ok(rows.into_iter().next())
    }

    async fn event_count(&self) -> Result<u64, SyncError> {
        let row = sqlx::query("SELECT COUNT(*) AS cnt FROM contract_events")
            .fetch_one(&self.pool)
            .await
            .map_err(storage_err)?;
        let cnt: i64 = row.try_get("cnt").map_err(storage_err)?;
        from_sql("count", cnt)
    }
}

// ─── CheckpointStore impl ────────────────────────────────────────────────────

#[async_trait]
impl CheckpointStore for SqliteStorage {
    async fn load(&self, sync_id: &str) -> Result<Option<Checkpoint>, SyncError> {
        let row = sqlx::query(
            "SELECT sync_id, block_number, updated_at FROM sync_checkpoints WHERE sync_id = ?",
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
             VALUES (?, ?, ?)
             ON CONFLICT (sync_id) DO UPDATE
             SET block_number = excluded.block_number, updated_at = excluded.updated_at",
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
        sqlx::query("DELETE FROM sync_checkpoints WHERE sync_id = ?")
            .bind(sync_id)
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nftsync_core::EventKind;
    use serde_json::json;

    fn minted(tx: &str, block: u64, log_index: u64) -> ContractEvent {
        let mut raw_data = Map::new();
        raw_data.insert("tokenId".into(), json!("7"));
        ContractEvent {
            transaction_hash: tx.into(),
            block_number: block,
            log_index,
            timestamp: 1_700_000_000,
            kind: EventKind::NftMinted {
                to: "0x00000000000000000000000000000000000000bb".into(),
                token_id: "7".into(),
                metadata_uri: "ipfs://bafy/7.json".into(),
            },
            raw_data,
        }
    }

    #[tokio::test]
    async fn record_then_read_back() {
        let store = SqliteStorage::in_memory().await.unwrap();
        let stored = store.record(minted("0x01", 50, 2)).await.unwrap();

        assert!(stored.id > 0);
        assert_eq!(stored.event, minted("0x01", 50, 2));

        let all = store.all().await.unwrap();
        assert_eq!(all, vec![stored]);
        assert_eq!(all[0].event.raw_data["tokenId"], "7");
    }

    #[tokio::test]
    async fn conflicting_insert_keeps_original_row() {
        let store = SqliteStorage::in_memory().await.unwrap();
        let first = store.record(minted("0x01", 50, 2)).await.unwrap();

        let mut dup = minted("0x01", 50, 2);
        dup.timestamp = 1;
        let second = store.record(dup).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(store.event_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn block_numbers_past_bigint_are_rejected() {
        let store = SqliteStorage::in_memory().await.unwrap();
        let err = store.record(minted("0x03", u64::MAX, 0)).await.unwrap_err();
        assert!(matches!(err, SyncError::Storage(_)));
        assert_eq!(store.event_count().await.unwrap(), 0);

        assert!(store.save(&Checkpoint::new("nft-hub", u64::MAX)).await.is_err());

        store.record(minted("0x04", 12, 0)).await.unwrap();
        assert_eq!(store.by_block_range(10, u64::MAX).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn checkpoint_upsert() {
        let store = SqliteStorage::in_memory().await.unwrap();
        assert!(store.load("nft-hub").await.unwrap().is_none());

        store.save(&Checkpoint::new("nft-hub", 100)).await.unwrap();
        store.save(&Checkpoint::new("nft-hub", 200)).await.unwrap();
        assert_eq!(store.load("nft-hub").await.unwrap().unwrap().block_number, 200);

        store.delete("nft-hub").await.unwrap();
        assert!(store.load("nft-hub").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn file_database_survives_reopen() {
        let path = std::env::temp_dir().join(format!("nftsync-{}.db", std::process::id()));
        let path = path.to_string_lossy().to_string();
        {
            let store = SqliteStorage::open(&path).await.unwrap();
            store.record(minted("0x02", 9, 0)).await.unwrap();
            store.save(&Checkpoint::new("nft-hub", 9)).await.unwrap();
        }
        let store = SqliteStorage::open(&path).await.unwrap();
        assert_eq!(store.event_count().await.unwrap(), 1);
        assert_eq!(store.load("nft-hub").await.unwrap().unwrap().block_number, 9);
        drop(store);
        let _ = std::fs::remove_file(&path);
    }
}
