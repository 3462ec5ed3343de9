use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use super::{BlobStore, DocumentStore, RemoteError};
use crate::entry_id::EntryId;
use crate::models::{MoodEntry, RemoteDocument, RevisionToken};

#[derive(Default)]
struct Inner {
    documents: HashMap<EntryId, RemoteDocument>,
    blobs: HashMap<String, (String, Vec<u8>)>,
    last_server_millis: i64,
    offline: bool,
    auth_revoked: bool,
    failing_puts: u32,
    rejecting_puts: u32,
    failing_blob_puts: u32,
    put_calls: usize,
    blob_put_calls: usize,
}

impl Inner {
    fn check_reachable(&self) -> Result<(), RemoteError> {
        if self.offline {
            return Err(RemoteError::Transient("network unreachable".to_string()));
        }
        if self.auth_revoked {
            return Err(RemoteError::AuthLost);
        }
        Ok(())
    }

    /// Strictly increasing server clock.
    fn server_time(&mut self) -> DateTime<Utc> {
        let now = Utc::now().timestamp_millis();
        self.last_server_millis = now.max(self.last_server_millis + 1);
        DateTime::<Utc>::from_timestamp_millis(self.last_server_millis).unwrap_or_else(Utc::now)
    }

    fn owned(&self, owner: &str, id: EntryId) -> Result<Option<&RemoteDocument>, RemoteError> {
        match self.documents.get(&id) {
            Some(doc) if doc.entry.owner != owner => {
                Err(RemoteError::Rejected(format!("entry {} belongs to another owner", id)))
            }
            other => Ok(other),
        }
    }
}

fn new_revision() -> RevisionToken {
    RevisionToken::new(uuid::Uuid::new_v4().simple().to_string())
}

fn check_expected(
    current: Option<&RemoteDocument>,
    expected: Option<&RevisionToken>,
) -> Result<(), RemoteError> {
    match (current, expected) {
        (None, None) => Ok(()),
        (Some(doc), Some(rev)) if &doc.revision == rev => Ok(()),
        (current, _) => Err(RemoteError::Conflict(current.cloned().map(Box::new))),
    }
}

/// In-process remote document and blob store.
///
/// Share one instance between several engines (behind an `Arc`) to simulate
/// multiple devices. Faults can be injected to exercise retry paths.
#[derive(Default)]
pub struct MemoryRemote {
    inner: Mutex<Inner>,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Make every call fail with a transient error until reset.
    pub fn set_offline(&self, offline: bool) {
        self.lock().offline = offline;
    }

    pub fn revoke_auth(&self) {
        self.lock().auth_revoked = true;
    }

    pub fn restore_auth(&self) {
        self.lock().auth_revoked = false;
    }

    /// Fail the next `n` document writes with a transient error.
    pub fn fail_next_puts(&self, n: u32) {
        self.lock().failing_puts = n;
    }

    /// Reject the next `n` document writes as malformed.
    pub fn reject_next_puts(&self, n: u32) {
        self.lock().rejecting_puts = n;
    }

    /// Fail the next `n` blob uploads with a transient error.
    pub fn fail_next_blob_puts(&self, n: u32) {
        self.lock().failing_blob_puts = n;
    }

    /// Document writes attempted, including failed ones.
    pub fn put_calls(&self) -> usize {
        self.lock().put_calls
    }

    /// Blob uploads attempted, including failed ones.
    pub fn blob_put_calls(&self) -> usize {
        self.lock().blob_put_calls
    }

    pub fn document(&self, id: EntryId) -> Option<RemoteDocument> {
        self.lock().documents.get(&id).cloned()
    }

    /// Live (non-tombstoned) documents.
    pub fn live_count(&self) -> usize {
        self.lock().documents.values().filter(|d| !d.deleted).count()
    }

    pub fn blob_count(&self) -> usize {
        self.lock().blobs.len()
    }
}

#[async_trait]
impl DocumentStore for MemoryRemote {
    async fn fetch(
        &self,
        owner: &str,
        id: EntryId,
    ) -> Result<Option<RemoteDocument>, RemoteError> {
        let inner = self.lock();
        inner.check_reachable()?;
        Ok(inner.owned(owner, id)?.cloned())
    }

    async fn put(
        &self,
        owner: &str,
        entry: &MoodEntry,
        expected: Option<&RevisionToken>,
    ) -> Result<RevisionToken, RemoteError> {
        let mut inner = self.lock();
        inner.put_calls += 1;
        inner.check_reachable()?;
        if inner.failing_puts > 0 {
            inner.failing_puts -= 1;
            return Err(RemoteError::Transient("injected failure".to_string()));
        }
        if inner.rejecting_puts > 0 {
            inner.rejecting_puts -= 1;
            return Err(RemoteError::Rejected("injected rejection".to_string()));
        }
        if entry.owner != owner {
            return Err(RemoteError::Rejected("owner mismatch".to_string()));
        }
        entry
            .validate()
            .map_err(|e| RemoteError::Rejected(e.to_string()))?;

        check_expected(inner.owned(owner, entry.id)?, expected)?;

        let revision = new_revision();
        let server_time = inner.server_time();
        let mut stored = entry.to_remote_payload();
        stored.deleted = false;
        inner.documents.insert(
            entry.id,
            RemoteDocument {
                revision: revision.clone(),
                entry: stored,
                server_time,
                deleted: false,
            },
        );
        Ok(revision)
    }

    async fn delete(
        &self,
        owner: &str,
        id: EntryId,
        deleted_at: DateTime<Utc>,
        expected: Option<&RevisionToken>,
    ) -> Result<RevisionToken, RemoteError> {
        let mut inner = self.lock();
        inner.check_reachable()?;

        let current = inner.owned(owner, id)?.cloned().ok_or(RemoteError::NotFound)?;
        check_expected(Some(&current), expected)?;

        let revision = new_revision();
        let server_time = inner.server_time();
        let mut entry = current.entry;
        entry.deleted = true;
        entry.last_modified = entry.last_modified.max(deleted_at);
        inner.documents.insert(
            id,
            RemoteDocument {
                revision: revision.clone(),
                entry,
                server_time,
                deleted: true,
            },
        );
        Ok(revision)
    }

    async fn changed_since(
        &self,
        owner: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<RemoteDocument>, RemoteError> {
        let inner = self.lock();
        inner.check_reachable()?;

        let mut docs: Vec<RemoteDocument> = inner
            .documents
            .values()
            .filter(|d| d.entry.owner == owner)
            .filter(|d| since.map_or(true, |s| d.server_time > s))
            .cloned()
            .collect();
        docs.sort_by_key(|d| d.server_time);
        Ok(docs)
    }
}

#[async_trait]
impl BlobStore for MemoryRemote {
    async fn put_blob(
        &self,
        key: &str,
        content_type: &str,
        data: Vec<u8>,
    ) -> Result<String, RemoteError> {
        let mut inner = self.lock();
        inner.blob_put_calls += 1;
        inner.check_reachable()?;
        if inner.failing_blob_puts > 0 {
            inner.failing_blob_puts -= 1;
            return Err(RemoteError::Transient("injected upload failure".to_string()));
        }

        let reference = format!("mem://{}", key);
        inner
            .blobs
            .insert(reference.clone(), (content_type.to_string(), data));
        Ok(reference)
    }

    async fn get_blob(&self, reference: &str) -> Result<Vec<u8>, RemoteError> {
        let inner = self.lock();
        inner.check_reachable()?;
        inner
            .blobs
            .get(reference)
            .map(|(_, data)| data.clone())
            .ok_or(RemoteError::NotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry_id::EntryIdGenerator;
    use crate::models::MoodCategory;

    fn entry() -> MoodEntry {
        let id = EntryIdGenerator::new("dev").generate();
        MoodEntry::new(id, "alice", MoodCategory::Happiness, Utc::now())
    }

    #[tokio::test]
    async fn test_put_is_compare_and_set() {
        let remote = MemoryRemote::new();
        let e = entry();

        let r1 = remote.put("alice", &e, None).await.unwrap();
        // Creating twice conflicts
        let err = remote.put("alice", &e, None).await.unwrap_err();
        match err {
            RemoteError::Conflict(Some(doc)) => assert_eq!(doc.revision, r1),
            other => panic!("expected conflict, got {:?}", other),
        }

        let r2 = remote.put("alice", &e, Some(&r1)).await.unwrap();
        assert_ne!(r1, r2);

        // Stale revision conflicts
        assert!(matches!(
            remote.put("alice", &e, Some(&r1)).await,
            Err(RemoteError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_leaves_tombstone() {
        let remote = MemoryRemote::new();
        let e = entry();
        let r1 = remote.put("alice", &e, None).await.unwrap();

        let deleted_at = e.last_modified + chrono::Duration::seconds(30);
        let r2 = remote.delete("alice", e.id, deleted_at, Some(&r1)).await.unwrap();
        let doc = remote.document(e.id).unwrap();
        assert!(doc.deleted);
        assert_eq!(doc.revision, r2);
        assert_eq!(doc.entry.last_modified, deleted_at);
        assert_eq!(remote.live_count(), 0);

        let missing = entry();
        assert_eq!(
            remote.delete("alice", missing.id, deleted_at, None).await,
            Err(RemoteError::NotFound)
        );
    }

    #[tokio::test]
    async fn test_changed_since_is_owner_scoped_and_ordered() {
        let remote = MemoryRemote::new();
        let a = entry();
        let b = entry();
        let mut other = entry();
        other.owner = "bob".into();

        remote.put("alice", &a, None).await.unwrap();
        let cursor = remote.document(a.id).unwrap().server_time;
        remote.put("alice", &b, None).await.unwrap();
        remote.put("bob", &other, None).await.unwrap();

        let all = remote.changed_since("alice", None).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].entry.id, a.id);

        let since = remote.changed_since("alice", Some(cursor)).await.unwrap();
        assert_eq!(since.len(), 1);
        assert_eq!(since[0].entry.id, b.id);
    }

    #[tokio::test]
    async fn test_other_owner_is_rejected() {
        let remote = MemoryRemote::new();
        let e = entry();
        remote.put("alice", &e, None).await.unwrap();
        assert!(matches!(
            remote.fetch("bob", e.id).await,
            Err(RemoteError::Rejected(_))
        ));
    }

    #[tokio::test]
    async fn test_fault_injection() {
        let remote = MemoryRemote::new();
        let e = entry();

        remote.fail_next_puts(2);
        assert!(remote.put("alice", &e, None).await.unwrap_err().is_transient());
        assert!(remote.put("alice", &e, None).await.unwrap_err().is_transient());
        assert!(remote.put("alice", &e, None).await.is_ok());
        assert_eq!(remote.put_calls(), 3);

        remote.revoke_auth();
        assert_eq!(
            remote.fetch("alice", e.id).await,
            Err(RemoteError::AuthLost)
        );
        remote.restore_auth();

        remote.set_offline(true);
        assert!(remote.fetch("alice", e.id).await.unwrap_err().is_transient());
    }

    #[tokio::test]
    async fn test_blobs() {
        let remote = MemoryRemote::new();
        remote.fail_next_blob_puts(1);
        assert!(remote
            .put_blob("k", "image/png", vec![1, 2])
            .await
            .unwrap_err()
            .is_transient());

        let reference = remote.put_blob("k", "image/png", vec![1, 2]).await.unwrap();
        assert_eq!(remote.get_blob(&reference).await.unwrap(), vec![1, 2]);
        assert_eq!(remote.blob_put_calls(), 2);
    }
}
