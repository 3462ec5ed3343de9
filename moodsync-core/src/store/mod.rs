//! Durable on-device storage: the local entry store and the change queue.
//!
//! Both live in one SQLite database so that recording an entry and enqueueing
//! its change commit in a single transaction.

mod change_queue;
mod local_store;

pub use change_queue::ChangeQueue;
pub use local_store::{LocalStore, StoreChange};

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use thiserror::Error;

use crate::entry_id::EntryId;
use crate::models::ValidationError;

/// Errors raised by the local store and change queue.
///
/// `StorageFault` is fatal to the operation that raised it; callers retry or
/// surface it, nothing is retried silently.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("storage fault: {0}")]
    StorageFault(#[from] sqlx::Error),

    #[error("failed to prepare database at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("database migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("corrupt row for entry {id}: {reason}")]
    Corrupt { id: String, reason: String },

    #[error("invalid entry: {0}")]
    Invalid(#[from] ValidationError),

    #[error("entry not found: {0}")]
    NotFound(EntryId),
}

/// Open (creating if needed) the device database and run migrations.
pub async fn open_pool(path: &Path) -> Result<SqlitePool, StoreError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                path: parent.display().to_string(),
                source,
            })?;
        }
    }

    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;

    Ok(pool)
}

pub(crate) fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

pub(crate) fn from_millis(id: &str, millis: i64) -> Result<DateTime<Utc>, StoreError> {
    DateTime::<Utc>::from_timestamp_millis(millis).ok_or_else(|| StoreError::Corrupt {
        id: id.to_string(),
        reason: format!("timestamp {} out of range", millis),
    })
}

/// Current time truncated to the millisecond precision the store keeps.
pub fn now_millis() -> DateTime<Utc> {
    let now = Utc::now();
    DateTime::<Utc>::from_timestamp_millis(now.timestamp_millis()).unwrap_or(now)
}
