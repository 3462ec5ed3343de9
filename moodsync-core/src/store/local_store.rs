use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnection, SqlitePool};
use std::path::Path;
use tokio::sync::broadcast;

use super::{from_millis, now_millis, open_pool, to_millis, StoreError};
use crate::entry_id::EntryId;
use crate::models::{
    AttachmentRef, ConflictOutcome, ConflictRecord, Coordinate, MoodCategory, MoodEntry,
    MoodFilter, RevisionToken, SocialSituation, SyncState, Visibility,
};

const CHANGE_CHANNEL_CAPACITY: usize = 256;

/// Notification published after a local store mutation commits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreChange {
    Upserted(EntryId),
    Tombstoned(EntryId),
    Purged(EntryId),
}

/// Durable on-device log of mood entries.
///
/// Every method returns only after its write has committed to SQLite.
#[derive(Clone)]
pub struct LocalStore {
    pool: SqlitePool,
    changes: broadcast::Sender<StoreChange>,
}

#[derive(sqlx::FromRow)]
struct MoodEntryRow {
    id: String,
    owner: String,
    mood: String,
    note: Option<String>,
    trigger_text: Option<String>,
    social_situation: Option<String>,
    visibility: String,
    latitude: Option<f64>,
    longitude: Option<f64>,
    place_name: Option<String>,
    attachment_kind: Option<String>,
    attachment_value: Option<String>,
    created_at: i64,
    last_modified: i64,
    sync_state: String,
    revision: Option<String>,
    deleted: bool,
}

#[derive(sqlx::FromRow)]
struct ConflictRow {
    local_payload: String,
    remote_payload: String,
    outcome: String,
    resolved_at: i64,
    entry_id: String,
}

fn corrupt(id: &str, reason: impl Into<String>) -> StoreError {
    StoreError::Corrupt {
        id: id.to_string(),
        reason: reason.into(),
    }
}

impl TryFrom<MoodEntryRow> for MoodEntry {
    type Error = StoreError;

    fn try_from(row: MoodEntryRow) -> Result<Self, Self::Error> {
        let id: EntryId = row.id.parse().map_err(|e| corrupt(&row.id, format!("{}", e)))?;
        let mood: MoodCategory = row.mood.parse().map_err(|e: String| corrupt(&row.id, e))?;
        let social_situation: Option<SocialSituation> = row
            .social_situation
            .as_deref()
            .map(str::parse::<SocialSituation>)
            .transpose()
            .map_err(|e: String| corrupt(&row.id, e))?;
        let visibility: Visibility = row
            .visibility
            .parse()
            .map_err(|e: String| corrupt(&row.id, e))?;
        let sync_state: SyncState = row
            .sync_state
            .parse()
            .map_err(|e: String| corrupt(&row.id, e))?;

        let coordinate = match (row.latitude, row.longitude) {
            (Some(lat), Some(lon)) => Some(Coordinate::new(lat, lon)),
            (None, None) => None,
            _ => return Err(corrupt(&row.id, "half of a coordinate is missing")),
        };

        let attachment = match (row.attachment_kind.as_deref(), row.attachment_value) {
            (Some("pending"), Some(local_key)) => Some(AttachmentRef::Pending { local_key }),
            (Some("remote"), Some(reference)) => Some(AttachmentRef::Remote { reference }),
            (None, None) => None,
            (kind, _) => {
                return Err(corrupt(
                    &row.id,
                    format!("unknown attachment kind {:?}", kind),
                ))
            }
        };

        Ok(MoodEntry {
            id,
            owner: row.owner,
            mood,
            note: row.note,
            trigger: row.trigger_text,
            social_situation,
            visibility,
            coordinate,
            place_name: row.place_name,
            attachment,
            created_at: from_millis(&row.id, row.created_at)?,
            last_modified: from_millis(&row.id, row.last_modified)?,
            sync_state,
            revision: row.revision.map(RevisionToken::new),
            deleted: row.deleted,
        })
    }
}

impl LocalStore {
    /// Open the store at `path`, creating the database if needed.
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        let pool = open_pool(path).await?;
        Ok(Self::new(pool))
    }

    pub fn new(pool: SqlitePool) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self { pool, changes }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Subscribe to change notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.changes.subscribe()
    }

    pub(crate) fn notify(&self, change: StoreChange) {
        // No subscribers is fine.
        let _ = self.changes.send(change);
    }

    /// Insert or replace an entry.
    pub async fn put(&self, entry: &MoodEntry) -> Result<(), StoreError> {
        let mut conn = self.pool.acquire().await?;
        Self::put_in(&mut conn, entry).await?;
        self.notify(StoreChange::Upserted(entry.id));
        Ok(())
    }

    pub(crate) async fn put_in(
        conn: &mut SqliteConnection,
        entry: &MoodEntry,
    ) -> Result<(), StoreError> {
        entry.validate()?;

        let (attachment_kind, attachment_value) = match &entry.attachment {
            Some(AttachmentRef::Pending { local_key }) => (Some("pending"), Some(local_key.as_str())),
            Some(AttachmentRef::Remote { reference }) => (Some("remote"), Some(reference.as_str())),
            None => (None, None),
        };

        sqlx::query(
            r#"
            INSERT OR REPLACE INTO mood_entries (
                id, owner, mood, note, trigger_text, social_situation, visibility,
                latitude, longitude, place_name, attachment_kind, attachment_value,
                created_at, last_modified, sync_state, revision, deleted
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(entry.id.to_string())
        .bind(&entry.owner)
        .bind(entry.mood.as_str())
        .bind(&entry.note)
        .bind(&entry.trigger)
        .bind(entry.social_situation.map(|s| s.to_string()))
        .bind(entry.visibility.to_string())
        .bind(entry.coordinate.map(|c| c.latitude))
        .bind(entry.coordinate.map(|c| c.longitude))
        .bind(&entry.place_name)
        .bind(attachment_kind)
        .bind(attachment_value)
        .bind(to_millis(entry.created_at))
        .bind(to_millis(entry.last_modified))
        .bind(entry.sync_state.to_string())
        .bind(entry.revision.as_ref().map(|r| r.as_str().to_string()))
        .bind(entry.deleted)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    /// Fetch an entry, tombstoned or not.
    pub async fn get(&self, id: EntryId) -> Result<Option<MoodEntry>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        Self::get_in(&mut conn, id).await
    }

    pub(crate) async fn get_in(
        conn: &mut SqliteConnection,
        id: EntryId,
    ) -> Result<Option<MoodEntry>, StoreError> {
        let row: Option<MoodEntryRow> = sqlx::query_as("SELECT * FROM mood_entries WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&mut *conn)
            .await?;

        row.map(MoodEntry::try_from).transpose()
    }

    /// Tombstone an entry.
    ///
    /// The row stays until the sync engine confirms the remote deletion and
    /// calls [`LocalStore::purge`]. Returns the tombstone, or `None` if the
    /// entry does not exist or is already deleted.
    pub async fn delete(&self, id: EntryId) -> Result<Option<MoodEntry>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        let tombstone = Self::delete_in(&mut conn, id).await?;
        if tombstone.is_some() {
            self.notify(StoreChange::Tombstoned(id));
        }
        Ok(tombstone)
    }

    pub(crate) async fn delete_in(
        conn: &mut SqliteConnection,
        id: EntryId,
    ) -> Result<Option<MoodEntry>, StoreError> {
        let Some(mut entry) = Self::get_in(conn, id).await? else {
            return Ok(None);
        };
        if entry.deleted {
            return Ok(None);
        }

        entry.deleted = true;
        entry.last_modified = Self::next_timestamp_in(conn, &entry.owner).await?;
        if entry.sync_state != SyncState::LocalOnly {
            entry.sync_state = SyncState::Pending;
        }
        Self::put_in(conn, &entry).await?;
        Ok(Some(entry))
    }

    /// Physically remove a row once its deletion is confirmed remotely.
    ///
    /// Locally held attachment bytes for the entry go with it.
    pub async fn purge(&self, id: EntryId) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await?;
        let removed = Self::purge_in(&mut tx, id).await?;
        tx.commit().await?;
        if removed {
            self.notify(StoreChange::Purged(id));
        }
        Ok(removed)
    }

    pub(crate) async fn purge_in(
        conn: &mut SqliteConnection,
        id: EntryId,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM mood_entries WHERE id = ?")
            .bind(id.to_string())
            .execute(&mut *conn)
            .await?;
        sqlx::query("DELETE FROM attachment_blobs WHERE entry_id = ?")
            .bind(id.to_string())
            .execute(&mut *conn)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Entries of `owner` modified at or after `since`, oldest first.
    ///
    /// Tombstones are included so incremental consumers observe deletions.
    pub async fn list_since(
        &self,
        owner: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<MoodEntry>, StoreError> {
        let rows: Vec<MoodEntryRow> = sqlx::query_as(
            "SELECT * FROM mood_entries WHERE owner = ? AND last_modified >= ? ORDER BY last_modified, id",
        )
        .bind(owner)
        .bind(to_millis(since))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(MoodEntry::try_from).collect()
    }

    /// Live entries of `owner` matching `filter`, newest first.
    pub async fn list(
        &self,
        owner: &str,
        filter: &MoodFilter,
    ) -> Result<Vec<MoodEntry>, StoreError> {
        let now = Utc::now();
        let cutoff = filter.period.cutoff(now).map(to_millis).unwrap_or(i64::MIN);

        let rows: Vec<MoodEntryRow> = sqlx::query_as(
            "SELECT * FROM mood_entries WHERE owner = ? AND deleted = 0 AND created_at >= ? ORDER BY created_at DESC, id",
        )
        .bind(owner)
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            let entry = MoodEntry::try_from(row)?;
            if filter.matches(&entry, now) {
                entries.push(entry);
            }
        }
        Ok(entries)
    }

    /// Every live entry regardless of owner, oldest first.
    pub async fn list_live(&self) -> Result<Vec<MoodEntry>, StoreError> {
        let rows: Vec<MoodEntryRow> = sqlx::query_as(
            "SELECT * FROM mood_entries WHERE deleted = 0 ORDER BY created_at, id",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(MoodEntry::try_from).collect()
    }

    /// Record the outcome of a sync for one entry.
    pub async fn set_sync_state(
        &self,
        id: EntryId,
        state: SyncState,
        revision: Option<&RevisionToken>,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE mood_entries SET sync_state = ?, revision = COALESCE(?, revision) WHERE id = ?",
        )
        .bind(state.to_string())
        .bind(revision.map(|r| r.as_str().to_string()))
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id));
        }
        self.notify(StoreChange::Upserted(id));
        Ok(())
    }

    /// Issue a client timestamp strictly greater than any issued before for `owner`.
    pub async fn next_timestamp(&self, owner: &str) -> Result<DateTime<Utc>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        Self::next_timestamp_in(&mut conn, owner).await
    }

    pub(crate) async fn next_timestamp_in(
        conn: &mut SqliteConnection,
        owner: &str,
    ) -> Result<DateTime<Utc>, StoreError> {
        let now = to_millis(now_millis());
        let key = format!("clock:{}", owner);

        let issued: String = sqlx::query_scalar(
            r#"
            INSERT INTO sync_meta (key, value) VALUES (?, ?)
            ON CONFLICT(key) DO UPDATE
                SET value = CAST(MAX(CAST(value AS INTEGER) + 1, CAST(excluded.value AS INTEGER)) AS TEXT)
            RETURNING value
            "#,
        )
        .bind(&key)
        .bind(now.to_string())
        .fetch_one(&mut *conn)
        .await?;

        let millis: i64 = issued
            .parse()
            .map_err(|_| corrupt(&key, format!("clock value '{}' is not a number", issued)))?;
        from_millis(&key, millis)
    }

    /// Advance the owner's clock past a timestamp issued elsewhere, so later
    /// local edits sort after changes pulled from other devices.
    pub(crate) async fn observe_timestamp_in(
        conn: &mut SqliteConnection,
        owner: &str,
        seen: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO sync_meta (key, value) VALUES (?, ?)
            ON CONFLICT(key) DO UPDATE
                SET value = CAST(MAX(CAST(value AS INTEGER), CAST(excluded.value AS INTEGER)) AS TEXT)
            "#,
        )
        .bind(format!("clock:{}", owner))
        .bind(to_millis(seen).to_string())
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    /// Replace a pending attachment placeholder with its remote reference.
    ///
    /// Returns the updated entry, or `None` if the entry is gone or no longer
    /// points at `local_key`.
    pub(crate) async fn resolve_attachment_in(
        conn: &mut SqliteConnection,
        id: EntryId,
        local_key: &str,
        reference: &str,
    ) -> Result<Option<MoodEntry>, StoreError> {
        let Some(mut entry) = Self::get_in(conn, id).await? else {
            return Ok(None);
        };
        match &entry.attachment {
            Some(AttachmentRef::Pending { local_key: key }) if key == local_key && !entry.deleted => {}
            _ => return Ok(None),
        }

        entry.attachment = Some(AttachmentRef::Remote {
            reference: reference.to_string(),
        });
        entry.last_modified = Self::next_timestamp_in(conn, &entry.owner).await?;
        if entry.sync_state == SyncState::Synced || entry.sync_state == SyncState::Conflict {
            entry.sync_state = SyncState::Pending;
        }
        Self::put_in(conn, &entry).await?;
        Ok(Some(entry))
    }

    /// Keep photo bytes locally until the uploader confirms them.
    pub async fn store_blob(
        &self,
        local_key: &str,
        entry_id: EntryId,
        content_type: &str,
        data: &[u8],
    ) -> Result<(), StoreError> {
        let mut conn = self.pool.acquire().await?;
        Self::store_blob_in(&mut conn, local_key, entry_id, content_type, data).await
    }

    pub(crate) async fn store_blob_in(
        conn: &mut SqliteConnection,
        local_key: &str,
        entry_id: EntryId,
        content_type: &str,
        data: &[u8],
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT OR REPLACE INTO attachment_blobs (local_key, entry_id, content_type, data, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(local_key)
        .bind(entry_id.to_string())
        .bind(content_type)
        .bind(data)
        .bind(to_millis(now_millis()))
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    /// Load a locally held blob as `(content_type, bytes)`.
    pub async fn load_blob(&self, local_key: &str) -> Result<Option<(String, Vec<u8>)>, StoreError> {
        let row: Option<(String, Vec<u8>)> =
            sqlx::query_as("SELECT content_type, data FROM attachment_blobs WHERE local_key = ?")
                .bind(local_key)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row)
    }

    pub async fn delete_blob(&self, local_key: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM attachment_blobs WHERE local_key = ?")
            .bind(local_key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Live entries whose attachment has not been uploaded yet, as `(entry, local_key)`.
    pub async fn pending_attachments(&self) -> Result<Vec<(EntryId, String)>, StoreError> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            "SELECT id, attachment_value FROM mood_entries WHERE attachment_kind = 'pending' AND deleted = 0 ORDER BY last_modified",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(id, key)| {
                let entry_id = id.parse().map_err(|e| corrupt(&id, format!("{}", e)))?;
                Ok((entry_id, key))
            })
            .collect()
    }

    pub async fn get_meta(&self, key: &str) -> Result<Option<String>, StoreError> {
        let value: Option<String> = sqlx::query_scalar("SELECT value FROM sync_meta WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(value)
    }

    pub async fn set_meta(&self, key: &str, value: &str) -> Result<(), StoreError> {
        sqlx::query("INSERT OR REPLACE INTO sync_meta (key, value) VALUES (?, ?)")
            .bind(key)
            .bind(value)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Append a resolved conflict to the audit log.
    pub async fn record_conflict(&self, record: &ConflictRecord) -> Result<(), StoreError> {
        let local = serde_json::to_string(&record.local)
            .map_err(|e| corrupt(&record.entry_id.to_string(), e.to_string()))?;
        let remote = serde_json::to_string(&record.remote)
            .map_err(|e| corrupt(&record.entry_id.to_string(), e.to_string()))?;

        sqlx::query(
            "INSERT INTO sync_conflicts (entry_id, local_payload, remote_payload, outcome, resolved_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(record.entry_id.to_string())
        .bind(local)
        .bind(remote)
        .bind(record.outcome.to_string())
        .bind(to_millis(record.resolved_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Most recent conflicts first.
    pub async fn conflicts(&self, limit: u32) -> Result<Vec<ConflictRecord>, StoreError> {
        let rows: Vec<ConflictRow> = sqlx::query_as(
            "SELECT entry_id, local_payload, remote_payload, outcome, resolved_at FROM sync_conflicts ORDER BY id DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let entry_id = row
                    .entry_id
                    .parse()
                    .map_err(|e| corrupt(&row.entry_id, format!("{}", e)))?;
                let local = serde_json::from_str(&row.local_payload)
                    .map_err(|e| corrupt(&row.entry_id, e.to_string()))?;
                let remote = serde_json::from_str(&row.remote_payload)
                    .map_err(|e| corrupt(&row.entry_id, e.to_string()))?;
                let outcome: ConflictOutcome = row
                    .outcome
                    .parse()
                    .map_err(|e: String| corrupt(&row.entry_id, e))?;
                Ok(ConflictRecord {
                    entry_id,
                    local,
                    remote,
                    outcome,
                    resolved_at: from_millis(&row.entry_id, row.resolved_at)?,
                })
            })
            .collect()
    }
}
