//! Server-side document and blob storage.
//!
//! Documents are kept in SQLite, one row per `(owner, entry id)` holding the
//! latest revision. Writes are compare-and-set on the revision token and are
//! serialized so the check and the write cannot interleave.

use chrono::{DateTime, Utc};
use moodsync_core::{EntryId, MoodEntry, RemoteDocument, RevisionToken};
use rand::Rng;
use sha2::{Digest, Sha256};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteConnection, SqliteJournalMode, SqlitePool, SqlitePoolOptions,
};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

/// Longest accepted blob key.
const MAX_BLOB_KEY_LEN: usize = 200;

/// Errors that can occur in the server repository.
#[derive(Debug)]
pub enum RepositoryError {
    /// SQLite failed.
    Storage(sqlx::Error),
    Migration(sqlx::migrate::MigrateError),
    /// Could not create the data directory.
    Io(PathBuf, std::io::Error),
    /// A stored row could not be decoded.
    Corrupt(String),
    /// The expected revision did not match; carries the current document.
    Conflict(Option<Box<RemoteDocument>>),
    NotFound,
    /// The request was well-formed but its content is unacceptable.
    Invalid(String),
}

impl std::fmt::Display for RepositoryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RepositoryError::Storage(e) => write!(f, "Storage error: {}", e),
            RepositoryError::Migration(e) => write!(f, "Migration failed: {}", e),
            RepositoryError::Io(path, e) => write!(f, "I/O error for {}: {}", path.display(), e),
            RepositoryError::Corrupt(e) => write!(f, "Corrupt document: {}", e),
            RepositoryError::Conflict(_) => write!(f, "Revision conflict"),
            RepositoryError::NotFound => write!(f, "Not found"),
            RepositoryError::Invalid(e) => write!(f, "Invalid request: {}", e),
        }
    }
}

impl std::error::Error for RepositoryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RepositoryError::Storage(e) => Some(e),
            RepositoryError::Migration(e) => Some(e),
            RepositoryError::Io(_, e) => Some(e),
            _ => None,
        }
    }
}

impl From<sqlx::Error> for RepositoryError {
    fn from(e: sqlx::Error) -> Self {
        RepositoryError::Storage(e)
    }
}

impl From<sqlx::migrate::MigrateError> for RepositoryError {
    fn from(e: sqlx::migrate::MigrateError) -> Self {
        RepositoryError::Migration(e)
    }
}

#[derive(sqlx::FromRow)]
struct DocumentRow {
    revision: String,
    entry: String,
    server_time: i64,
    deleted: bool,
}

impl TryFrom<DocumentRow> for RemoteDocument {
    type Error = RepositoryError;

    fn try_from(row: DocumentRow) -> Result<Self, Self::Error> {
        let entry: MoodEntry =
            serde_json::from_str(&row.entry).map_err(|e| RepositoryError::Corrupt(e.to_string()))?;
        let server_time = DateTime::<Utc>::from_timestamp_millis(row.server_time).ok_or_else(
            || RepositoryError::Corrupt(format!("server time {} out of range", row.server_time)),
        )?;
        Ok(RemoteDocument {
            revision: RevisionToken::new(row.revision),
            entry,
            server_time,
            deleted: row.deleted,
        })
    }
}

/// A fresh revision: salted digest of the stored payload.
fn new_revision(payload: &str) -> RevisionToken {
    let salt: [u8; 16] = rand::rng().random();
    let mut hasher = Sha256::new();
    hasher.update(payload.as_bytes());
    hasher.update(salt);
    let digest = hasher.finalize();
    RevisionToken::new(bs58::encode(&digest[..16]).into_string())
}

fn check_expected(
    current: Option<&RemoteDocument>,
    expected: Option<&RevisionToken>,
) -> Result<(), RepositoryError> {
    match (current, expected) {
        (None, None) => Ok(()),
        (Some(doc), Some(rev)) if &doc.revision == rev => Ok(()),
        (current, _) => Err(RepositoryError::Conflict(current.cloned().map(Box::new))),
    }
}

fn encode(entry: &MoodEntry) -> Result<String, RepositoryError> {
    serde_json::to_string(entry).map_err(|e| RepositoryError::Corrupt(e.to_string()))
}

pub struct DocumentRepository {
    pool: SqlitePool,
    writes: Mutex<()>,
}

impl DocumentRepository {
    /// Open (creating if needed) `moodsync.db` under `data_dir`.
    pub async fn open(data_dir: &Path) -> Result<Self, RepositoryError> {
        std::fs::create_dir_all(data_dir)
            .map_err(|e| RepositoryError::Io(data_dir.to_path_buf(), e))?;

        let options = SqliteConnectOptions::new()
            .filename(data_dir.join("moodsync.db"))
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self {
            pool,
            writes: Mutex::new(()),
        })
    }

    async fn get_in(
        conn: &mut SqliteConnection,
        owner: &str,
        id: EntryId,
    ) -> Result<Option<RemoteDocument>, RepositoryError> {
        let row: Option<DocumentRow> = sqlx::query_as(
            "SELECT revision, entry, server_time, deleted FROM documents WHERE owner = ? AND id = ?",
        )
        .bind(owner)
        .bind(id.to_string())
        .fetch_optional(&mut *conn)
        .await?;
        row.map(RemoteDocument::try_from).transpose()
    }

    /// Next server timestamp, strictly greater than any issued before.
    async fn tick_in(conn: &mut SqliteConnection) -> Result<DateTime<Utc>, RepositoryError> {
        let millis: i64 = sqlx::query_scalar(
            "INSERT INTO server_clock (id, value) VALUES (1, ?) \
             ON CONFLICT(id) DO UPDATE SET value = MAX(value + 1, excluded.value) \
             RETURNING value",
        )
        .bind(Utc::now().timestamp_millis())
        .fetch_one(&mut *conn)
        .await?;
        DateTime::<Utc>::from_timestamp_millis(millis)
            .ok_or_else(|| RepositoryError::Corrupt(format!("server time {} out of range", millis)))
    }

    async fn write_in(
        conn: &mut SqliteConnection,
        owner: &str,
        entry: &MoodEntry,
    ) -> Result<RevisionToken, RepositoryError> {
        let payload = encode(entry)?;
        let revision = new_revision(&payload);
        let server_time = Self::tick_in(conn).await?;
        sqlx::query(
            "INSERT OR REPLACE INTO documents (owner, id, revision, entry, server_time, deleted) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(owner)
        .bind(entry.id.to_string())
        .bind(revision.as_str())
        .bind(&payload)
        .bind(server_time.timestamp_millis())
        .bind(entry.deleted)
        .execute(&mut *conn)
        .await?;
        Ok(revision)
    }

    pub async fn get(
        &self,
        owner: &str,
        id: EntryId,
    ) -> Result<Option<RemoteDocument>, RepositoryError> {
        let mut conn = self.pool.acquire().await?;
        Self::get_in(&mut conn, owner, id).await
    }

    /// Write `entry` if the stored revision matches `expected`.
    pub async fn put(
        &self,
        owner: &str,
        entry: &MoodEntry,
        expected: Option<&RevisionToken>,
    ) -> Result<RevisionToken, RepositoryError> {
        if entry.owner != owner {
            return Err(RepositoryError::Invalid(
                "entry owner does not match the authenticated owner".to_string(),
            ));
        }
        entry
            .validate()
            .map_err(|e| RepositoryError::Invalid(e.to_string()))?;

        let _write = self.writes.lock().await;
        let mut tx = self.pool.begin().await?;
        let current = Self::get_in(&mut tx, owner, entry.id).await?;
        check_expected(current.as_ref(), expected)?;

        let mut stored = entry.to_remote_payload();
        stored.deleted = false;
        let revision = Self::write_in(&mut tx, owner, &stored).await?;
        tx.commit().await?;

        tracing::debug!(owner, entry = %entry.id, revision = %revision, "Document written");
        Ok(revision)
    }

    /// Replace the document with a tombstone if `expected` matches.
    ///
    /// The tombstone's last-modified time is `deleted_at` when given, never
    /// earlier than the document it replaces.
    pub async fn delete(
        &self,
        owner: &str,
        id: EntryId,
        deleted_at: Option<DateTime<Utc>>,
        expected: Option<&RevisionToken>,
    ) -> Result<RevisionToken, RepositoryError> {
        let _write = self.writes.lock().await;
        let mut tx = self.pool.begin().await?;
        let current = Self::get_in(&mut tx, owner, id)
            .await?
            .ok_or(RepositoryError::NotFound)?;
        check_expected(Some(&current), expected)?;

        let mut tombstone = current.entry;
        tombstone.deleted = true;
        if let Some(deleted_at) = deleted_at {
            tombstone.last_modified = tombstone.last_modified.max(deleted_at);
        }
        let revision = Self::write_in(&mut tx, owner, &tombstone).await?;
        tx.commit().await?;

        tracing::debug!(owner, entry = %id, revision = %revision, "Document deleted");
        Ok(revision)
    }

    /// Documents of `owner` written strictly after `since`, oldest first.
    pub async fn changed_since(
        &self,
        owner: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<RemoteDocument>, RepositoryError> {
        let since = since.map(|s| s.timestamp_millis()).unwrap_or(i64::MIN);
        let rows: Vec<DocumentRow> = sqlx::query_as(
            "SELECT revision, entry, server_time, deleted FROM documents WHERE owner = ? AND server_time > ? ORDER BY server_time",
        )
        .bind(owner)
        .bind(since)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(RemoteDocument::try_from).collect()
    }

    /// Store a blob and return its reference.
    pub async fn put_blob(
        &self,
        owner: &str,
        key: &str,
        content_type: &str,
        data: &[u8],
    ) -> Result<String, RepositoryError> {
        if key.is_empty() || key.len() > MAX_BLOB_KEY_LEN {
            return Err(RepositoryError::Invalid(format!(
                "blob key must be 1 to {} bytes",
                MAX_BLOB_KEY_LEN
            )));
        }
        sqlx::query(
            "INSERT OR REPLACE INTO blobs (owner, blob_key, content_type, data, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(owner)
        .bind(key)
        .bind(content_type)
        .bind(data)
        .bind(Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await?;
        Ok(key.to_string())
    }

    /// Load a blob as `(content_type, bytes)`.
    pub async fn get_blob(
        &self,
        owner: &str,
        reference: &str,
    ) -> Result<(String, Vec<u8>), RepositoryError> {
        let row: Option<(String, Vec<u8>)> = sqlx::query_as(
            "SELECT content_type, data FROM blobs WHERE owner = ? AND blob_key = ?",
        )
        .bind(owner)
        .bind(reference)
        .fetch_optional(&self.pool)
        .await?;
        row.ok_or(RepositoryError::NotFound)
    }
}
