//! Conversions between the pipeline's `u64` block numbers and SQL `BIGINT`.

use nftsync_core::SyncError;

/// `value` as a `BIGINT` for a stored column.
pub(crate) fn to_sql(column: &str, value: u64) -> Result<i64, SyncError> {
    i64::try_from(value)
        .map_err(|_| SyncError::Storage(format!("{column} {value} does not fit a BIGINT column")))
}

/// `value` as a query bound. Bounds past `i64::MAX` match the same rows as
/// `i64::MAX`.
pub(crate) fn to_sql_bound(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

/// A stored `BIGINT` back as `u64`.
pub(crate) fn from_sql(column: &str, value: i64) -> Result<u64, SyncError> {
    u64::try_from(value).map_err(|_| SyncError::Storage(format!("negative {column} {value} in store")))
}
