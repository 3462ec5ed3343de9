//! Photo uploads, decoupled from document sync.
//!
//! An attached photo is kept in the local store under a `local_key` and the
//! entry carries an [`AttachmentRef::Pending`] placeholder. Uploads run on a
//! bounded worker pool and retry transient failures with the sync backoff
//! policy. Once the blob store confirms, the placeholder is swapped for the
//! remote reference and an update is queued for the sync engine, all in one
//! transaction.

use futures::future::join_all;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{broadcast, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::entry_id::EntryId;
use crate::models::{AttachmentRef, ChangeRecord, SyncState};
use crate::remote::{BlobStore, RemoteError};
use crate::store::{ChangeQueue, LocalStore, StoreChange, StoreError};
use crate::sync::{Backoff, BackoffPolicy, SyncConfig, SyncEvent};

/// Attempts per upload before giving up until the next `resume_pending`.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 8;

#[derive(Error, Debug)]
pub enum UploadError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("no local blob for key {0}")]
    BlobMissing(String),

    #[error("upload failed: {0}")]
    Remote(RemoteError),

    #[error("upload cancelled")]
    Cancelled,
}

/// Keep `data` in the local store and point the entry at it with a
/// pending placeholder. Nothing is uploaded; `resume_pending` picks it up.
///
/// The blob and the entry update commit together.
pub async fn stage_attachment(
    store: &LocalStore,
    entry_id: EntryId,
    content_type: &str,
    data: &[u8],
) -> Result<String, StoreError> {
    let mut tx = store.pool().begin().await?;
    let mut entry = LocalStore::get_in(&mut tx, entry_id)
        .await?
        .filter(|e| !e.deleted)
        .ok_or(StoreError::NotFound(entry_id))?;

    let local_key = uuid::Uuid::new_v4().simple().to_string();
    LocalStore::store_blob_in(&mut tx, &local_key, entry_id, content_type, data).await?;

    entry.attachment = Some(AttachmentRef::Pending {
        local_key: local_key.clone(),
    });
    entry.last_modified = LocalStore::next_timestamp_in(&mut tx, &entry.owner).await?;
    if entry.sync_state != SyncState::LocalOnly {
        entry.sync_state = SyncState::Pending;
    }
    LocalStore::put_in(&mut tx, &entry).await?;
    tx.commit().await?;

    store.notify(StoreChange::Upserted(entry_id));
    debug!(entry = %entry_id, key = %local_key, bytes = data.len(), "Photo attached");
    Ok(local_key)
}

struct Inner {
    store: LocalStore,
    queue: ChangeQueue,
    blobs: Arc<dyn BlobStore>,
    policy: BackoffPolicy,
    workers: Semaphore,
    events: broadcast::Sender<SyncEvent>,
    cancel: CancellationToken,
}

#[derive(Clone)]
pub struct AttachmentUploader {
    inner: Arc<Inner>,
    max_attempts: u32,
}

impl AttachmentUploader {
    pub fn new(
        store: LocalStore,
        queue: ChangeQueue,
        blobs: Arc<dyn BlobStore>,
        config: &SyncConfig,
        events: broadcast::Sender<SyncEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                queue,
                blobs,
                policy: config.backoff,
                workers: Semaphore::new(config.upload_workers.max(1)),
                events,
                cancel,
            }),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    fn emit(&self, event: SyncEvent) {
        let _ = self.inner.events.send(event);
    }

    /// Keep `data` locally, point the entry at it, and start uploading.
    ///
    /// Returns the local key and the handle of the upload task.
    pub async fn attach(
        &self,
        entry_id: EntryId,
        content_type: &str,
        data: Vec<u8>,
    ) -> Result<(String, JoinHandle<Result<String, UploadError>>), StoreError> {
        let local_key = stage_attachment(&self.inner.store, entry_id, content_type, &data).await?;
        let handle = self.spawn_upload(entry_id, local_key.clone());
        Ok((local_key, handle))
    }

    /// Upload a locally held blob in a background task.
    pub fn spawn_upload(
        &self,
        entry_id: EntryId,
        local_key: String,
    ) -> JoinHandle<Result<String, UploadError>> {
        let uploader = self.clone();
        tokio::spawn(async move {
            let (content_type, data) = uploader
                .inner
                .store
                .load_blob(&local_key)
                .await?
                .ok_or_else(|| UploadError::BlobMissing(local_key.clone()))?;
            uploader
                .upload(entry_id, &local_key, &content_type, data)
                .await
        })
    }

    /// Re-schedule uploads for placeholders that survived a restart.
    pub async fn resume_pending(
        &self,
    ) -> Result<Vec<JoinHandle<Result<String, UploadError>>>, StoreError> {
        let pending = self.inner.store.pending_attachments().await?;
        if !pending.is_empty() {
            info!(count = pending.len(), "Resuming attachment uploads");
        }
        Ok(pending
            .into_iter()
            .map(|(entry_id, key)| self.spawn_upload(entry_id, key))
            .collect())
    }

    /// Resume pending uploads and wait for all of them to settle.
    ///
    /// Returns one result per upload; a panicked task counts as cancelled.
    pub async fn flush_pending(&self) -> Result<Vec<Result<String, UploadError>>, StoreError> {
        let handles = self.resume_pending().await?;
        Ok(join_all(handles)
            .await
            .into_iter()
            .map(|joined| joined.unwrap_or(Err(UploadError::Cancelled)))
            .collect())
    }

    /// Upload `data` for `entry_id`, returning the blob store's reference.
    ///
    /// Waits for a free worker, retries transient failures with backoff, and
    /// on success resolves the entry's placeholder.
    pub async fn upload(
        &self,
        entry_id: EntryId,
        local_key: &str,
        content_type: &str,
        data: Vec<u8>,
    ) -> Result<String, UploadError> {
        let inner = &self.inner;
        let _permit = tokio::select! {
            biased;
            _ = inner.cancel.cancelled() => return Err(UploadError::Cancelled),
            permit = inner.workers.acquire() => permit.map_err(|_| UploadError::Cancelled)?,
        };

        let mut backoff = Backoff::new(inner.policy);
        let reference = loop {
            let attempt = tokio::select! {
                biased;
                _ = inner.cancel.cancelled() => return Err(UploadError::Cancelled),
                result = inner.blobs.put_blob(local_key, content_type, data.clone()) => result,
            };

            match attempt {
                Ok(reference) => break reference,
                Err(e) if e.is_transient() && backoff.attempts() + 1 < self.max_attempts => {
                    let delay = backoff.next_delay();
                    warn!(
                        entry = %entry_id,
                        attempt = backoff.attempts(),
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Attachment upload failed, retrying"
                    );
                    tokio::select! {
                        _ = inner.cancel.cancelled() => return Err(UploadError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(e) => {
                    warn!(entry = %entry_id, error = %e, "Attachment upload gave up");
                    self.emit(SyncEvent::UploadFailed {
                        entry_id,
                        reason: e.to_string(),
                    });
                    return Err(UploadError::Remote(e));
                }
            }
        };

        self.finish(entry_id, local_key, &reference).await?;
        Ok(reference)
    }

    async fn finish(
        &self,
        entry_id: EntryId,
        local_key: &str,
        reference: &str,
    ) -> Result<(), UploadError> {
        let inner = &self.inner;
        let mut tx = inner.store.pool().begin().await.map_err(StoreError::from)?;
        let resolved =
            LocalStore::resolve_attachment_in(&mut tx, entry_id, local_key, reference).await?;
        if let Some(entry) = &resolved {
            ChangeQueue::enqueue_in(&mut tx, &ChangeRecord::update(entry.clone())).await?;
        }
        tx.commit().await.map_err(StoreError::from)?;

        if resolved.is_some() {
            inner.store.notify(StoreChange::Upserted(entry_id));
            inner.queue.wake();
        } else {
            debug!(entry = %entry_id, "Entry changed during upload, reference not applied");
        }
        inner.store.delete_blob(local_key).await?;

        info!(entry = %entry_id, reference = %reference, "Attachment uploaded");
        self.emit(SyncEvent::AttachmentUploaded {
            entry_id,
            reference: reference.to_string(),
        });
        Ok(())
    }
}
