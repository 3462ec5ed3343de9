//! The write path used by front ends.
//!
//! Every mutation stamps the entry from the owner's monotonic clock, writes
//! it and enqueues the matching change in one transaction, then wakes the
//! sync engine. Writes never wait on the network.

use sqlx::sqlite::SqliteConnection;

use crate::entry_id::{EntryId, EntryIdGenerator};
use crate::models::{ChangeRecord, MoodCategory, MoodEntry, MoodFilter, SyncState};
use crate::store::{now_millis, ChangeQueue, LocalStore, StoreChange, StoreError};

pub struct Journal {
    store: LocalStore,
    queue: ChangeQueue,
    ids: EntryIdGenerator,
    owner: String,
}

impl Journal {
    pub fn new(
        store: LocalStore,
        queue: ChangeQueue,
        ids: EntryIdGenerator,
        owner: impl Into<String>,
    ) -> Self {
        Self {
            store,
            queue,
            ids,
            owner: owner.into(),
        }
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn store(&self) -> &LocalStore {
        &self.store
    }

    pub fn queue(&self) -> &ChangeQueue {
        &self.queue
    }

    /// A fresh, unsaved entry with a new identifier.
    ///
    /// Fill it in with the `with_*` builders and pass it to [`Journal::record`].
    pub fn draft(&self, mood: MoodCategory) -> MoodEntry {
        MoodEntry::new(self.ids.generate(), self.owner.clone(), mood, now_millis())
    }

    /// Save a new entry and queue its creation.
    pub async fn record(&self, draft: MoodEntry) -> Result<MoodEntry, StoreError> {
        let mut entry = draft;
        entry.owner = self.owner.clone();
        entry.sync_state = SyncState::LocalOnly;
        entry.revision = None;
        entry.deleted = false;

        let mut tx = self.store.pool().begin().await?;
        let stamped = LocalStore::next_timestamp_in(&mut tx, &self.owner).await?;
        entry.created_at = stamped;
        entry.last_modified = stamped;
        LocalStore::put_in(&mut tx, &entry).await?;
        ChangeQueue::enqueue_in(&mut tx, &ChangeRecord::create(entry.clone())).await?;
        tx.commit().await?;

        self.store.notify(StoreChange::Upserted(entry.id));
        self.queue.wake();
        Ok(entry)
    }

    /// Modify a live entry and queue the update.
    ///
    /// Identity, creation time and sync bookkeeping are not editable.
    pub async fn edit<F>(&self, id: EntryId, apply: F) -> Result<MoodEntry, StoreError>
    where
        F: FnOnce(&mut MoodEntry),
    {
        let mut tx = self.store.pool().begin().await?;
        let entry = Self::edit_in(&mut tx, id, apply).await?;
        ChangeQueue::enqueue_in(&mut tx, &ChangeRecord::update(entry.clone())).await?;
        tx.commit().await?;

        self.store.notify(StoreChange::Upserted(id));
        self.queue.wake();
        Ok(entry)
    }

    async fn edit_in<F>(
        conn: &mut SqliteConnection,
        id: EntryId,
        apply: F,
    ) -> Result<MoodEntry, StoreError>
    where
        F: FnOnce(&mut MoodEntry),
    {
        let current = LocalStore::get_in(conn, id)
            .await?
            .filter(|e| !e.deleted)
            .ok_or(StoreError::NotFound(id))?;

        let mut edited = current.clone();
        apply(&mut edited);
        edited.id = current.id;
        edited.owner = current.owner.clone();
        edited.created_at = current.created_at;
        edited.revision = current.revision.clone();
        edited.deleted = false;
        edited.sync_state = match current.sync_state {
            SyncState::LocalOnly => SyncState::LocalOnly,
            _ => SyncState::Pending,
        };
        edited.last_modified = LocalStore::next_timestamp_in(conn, &current.owner).await?;
        LocalStore::put_in(conn, &edited).await?;
        Ok(edited)
    }

    /// Tombstone an entry and queue its deletion.
    ///
    /// Returns `false` if the entry is missing or already deleted.
    pub async fn remove(&self, id: EntryId) -> Result<bool, StoreError> {
        let mut tx = self.store.pool().begin().await?;
        let Some(tombstone) = LocalStore::delete_in(&mut tx, id).await? else {
            return Ok(false);
        };
        ChangeQueue::enqueue_in(&mut tx, &ChangeRecord::delete(tombstone)).await?;
        tx.commit().await?;

        self.store.notify(StoreChange::Tombstoned(id));
        self.queue.wake();
        Ok(true)
    }

    pub async fn get(&self, id: EntryId) -> Result<Option<MoodEntry>, StoreError> {
        Ok(self.store.get(id).await?.filter(|e| !e.deleted))
    }

    /// The owner's live entries matching `filter`, newest first.
    pub async fn history(&self, filter: &MoodFilter) -> Result<Vec<MoodEntry>, StoreError> {
        self.store.list(&self.owner, filter).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ChangeOp;
    use crate::store::open_pool;
    use tempfile::TempDir;

    async fn setup() -> (Journal, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let pool = open_pool(&temp_dir.path().join("test.db")).await.unwrap();
        let journal = Journal::new(
            LocalStore::new(pool.clone()),
            ChangeQueue::new(pool),
            EntryIdGenerator::new("test-device"),
            "alice",
        );
        (journal, temp_dir)
    }

    #[tokio::test]
    async fn test_record_saves_and_enqueues_create() {
        let (journal, _dir) = setup().await;
        let entry = journal
            .record(journal.draft(MoodCategory::Happiness).with_note("sunny"))
            .await
            .unwrap();

        assert_eq!(entry.sync_state, SyncState::LocalOnly);
        assert_eq!(journal.get(entry.id).await.unwrap(), Some(entry.clone()));

        let pending = journal.queue().pending_for(entry.id).await.unwrap().unwrap();
        assert_eq!(pending.op, ChangeOp::Create);
        assert_eq!(pending.payload, entry);
    }

    #[tokio::test]
    async fn test_record_rejects_invalid_without_enqueueing() {
        let (journal, _dir) = setup().await;
        let draft = journal
            .draft(MoodCategory::Fear)
            .with_trigger("a trigger that is far too long");
        assert!(matches!(
            journal.record(draft).await,
            Err(StoreError::Invalid(_))
        ));
        assert!(journal.queue().is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn test_edit_coalesces_into_pending_create() {
        let (journal, _dir) = setup().await;
        let entry = journal
            .record(journal.draft(MoodCategory::Happiness))
            .await
            .unwrap();

        let edited = journal
            .edit(entry.id, |e| {
                e.mood = MoodCategory::Sadness;
                e.created_at = e.created_at - chrono::Duration::days(3);
            })
            .await
            .unwrap();
        assert_eq!(edited.created_at, entry.created_at);
        assert!(edited.last_modified > entry.last_modified);

        assert_eq!(journal.queue().len().await.unwrap(), 1);
        let pending = journal.queue().pending_for(entry.id).await.unwrap().unwrap();
        assert_eq!(pending.op, ChangeOp::Create);
        assert_eq!(pending.payload.mood, MoodCategory::Sadness);
    }

    #[tokio::test]
    async fn test_remove_tombstones_and_enqueues_delete() {
        let (journal, _dir) = setup().await;
        let entry = journal
            .record(journal.draft(MoodCategory::Anger))
            .await
            .unwrap();

        assert!(journal.remove(entry.id).await.unwrap());
        assert!(!journal.remove(entry.id).await.unwrap());
        assert!(journal.get(entry.id).await.unwrap().is_none());
        assert!(journal.store().get(entry.id).await.unwrap().unwrap().deleted);

        let pending = journal.queue().pending_for(entry.id).await.unwrap().unwrap();
        assert_eq!(pending.op, ChangeOp::Delete);
        assert!(matches!(
            journal.edit(entry.id, |_| {}).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_history_is_owner_scoped() {
        let (journal, _dir) = setup().await;
        journal
            .record(journal.draft(MoodCategory::Shame))
            .await
            .unwrap();
        let mut foreign = journal.draft(MoodCategory::Shame);
        foreign.owner = "bob".into();
        journal.store().put(&foreign).await.unwrap();

        let history = journal.history(&MoodFilter::new()).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].owner, "alice");
    }
}
