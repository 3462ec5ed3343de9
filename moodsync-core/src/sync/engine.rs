//! The sync engine: drains the change queue against the remote document
//! store, settles conflicts, and pulls remote changes back into the local
//! store.
//!
//! # States
//!
//! ```text
//! Idle → Draining → AwaitingAck → Reconciling → Idle
//!          │             │
//!          └──── Backoff ┘  (transient failure, back to Idle after the delay)
//!          └──── Halted     (identity lost, left only by resume_after_auth)
//! ```

use chrono::{DateTime, Utc};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::backoff::Backoff;
use super::config::SyncConfig;
use super::conflict::{resolve, Resolution};
use super::error::{SyncError, SyncEvent};
use crate::models::{
    ChangeOp, ChangeRecord, ConflictRecord, MoodEntry, RemoteDocument, RevisionToken, SyncState,
};
use crate::remote::{DocumentStore, IdentityProvider, RemoteError};
use crate::store::{ChangeQueue, LocalStore, StoreChange, StoreError};

const EVENT_CHANNEL_CAPACITY: usize = 256;
/// Compare-and-set rounds per record before giving up until the next pass.
const MAX_CONFLICT_ROUNDS: usize = 3;
const PULL_CURSOR_KEY: &str = "pull_cursor";

/// Sync engine lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    /// Taking a batch from the change queue.
    Draining,
    /// A write is in flight.
    AwaitingAck,
    /// Settling a conflict or applying remote changes.
    Reconciling,
    /// Waiting out a transient failure.
    Backoff,
    /// Identity lost; nothing is sent until re-authentication.
    Halted,
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Draining => write!(f, "draining"),
            Self::AwaitingAck => write!(f, "awaiting-ack"),
            Self::Reconciling => write!(f, "reconciling"),
            Self::Backoff => write!(f, "backoff"),
            Self::Halted => write!(f, "halted"),
        }
    }
}

/// Counts from one sync pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub accepted: usize,
    pub deleted: usize,
    pub conflicts: usize,
    pub rejected: usize,
    pub pulled: usize,
    pub purged: usize,
}

impl SyncReport {
    pub fn is_empty(&self) -> bool {
        *self == SyncReport::default()
    }
}

/// What applying one pulled document did locally.
enum PullOutcome {
    Changed(StoreChange),
    Unchanged,
    /// A local change for the entry is still queued.
    Deferred,
}

/// Result of pushing one change record.
enum Pushed {
    Accepted,
    Deleted,
    Conflict,
    Rejected,
}

/// Race a remote call against cancellation.
async fn call<T>(
    cancel: &CancellationToken,
    fut: impl Future<Output = Result<T, RemoteError>>,
) -> Result<Result<T, RemoteError>, SyncError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(SyncError::Cancelled),
        result = fut => Ok(result),
    }
}

/// True when the local row has moved on since `record` was enqueued.
fn superseded(local: &MoodEntry, record: &ChangeRecord) -> bool {
    local.last_modified != record.payload.last_modified || local.deleted != record.payload.deleted
}

pub struct SyncEngine {
    store: LocalStore,
    queue: ChangeQueue,
    documents: Arc<dyn DocumentStore>,
    identity: Arc<dyn IdentityProvider>,
    config: SyncConfig,
    state: watch::Sender<EngineState>,
    events: broadcast::Sender<SyncEvent>,
    backoff: Mutex<Backoff>,
    delayed: AtomicBool,
    /// Serializes passes.
    pass_lock: tokio::sync::Mutex<()>,
}

impl SyncEngine {
    pub fn new(
        store: LocalStore,
        queue: ChangeQueue,
        documents: Arc<dyn DocumentStore>,
        identity: Arc<dyn IdentityProvider>,
        config: SyncConfig,
    ) -> Self {
        let (state, _) = watch::channel(EngineState::Idle);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let backoff = Mutex::new(Backoff::new(config.backoff));
        Self {
            store,
            queue,
            documents,
            identity,
            config,
            state,
            events,
            backoff,
            delayed: AtomicBool::new(false),
            pass_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn state(&self) -> EngineState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<EngineState> {
        self.state.subscribe()
    }

    /// Subscribe to sync events (the asynchronous error channel).
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    /// Sender for components that publish on the same channel.
    pub fn event_sender(&self) -> broadcast::Sender<SyncEvent> {
        self.events.clone()
    }

    /// Leave `Halted` after the user re-authenticated.
    pub fn resume_after_auth(&self) {
        if self.state() == EngineState::Halted {
            info!("Resuming sync after re-authentication");
            self.lock_backoff().reset();
            self.set_state(EngineState::Idle);
            self.queue.wake();
        }
    }

    fn lock_backoff(&self) -> MutexGuard<'_, Backoff> {
        self.backoff.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn set_state(&self, next: EngineState) {
        self.state.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            debug!(from = %current, to = %next, "Sync state");
            *current = next;
            true
        });
    }

    fn emit(&self, event: SyncEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// Run one full pass: push every queued change, then pull remote changes.
    ///
    /// On a transient failure the engine is left in `Backoff` and the error
    /// carries the delay before the next attempt.
    pub async fn sync_once(&self, cancel: &CancellationToken) -> Result<SyncReport, SyncError> {
        let _pass = self.pass_lock.lock().await;
        if self.state() == EngineState::Halted {
            return Err(SyncError::AuthLost);
        }

        let mut report = SyncReport::default();
        match self.pass(cancel, &mut report).await {
            Ok(()) => {
                self.lock_backoff().reset();
                if self.delayed.swap(false, Ordering::SeqCst) {
                    info!("Sync recovered");
                    self.emit(SyncEvent::Recovered);
                }
                self.set_state(EngineState::Idle);
                Ok(report)
            }
            Err(e) => Err(self.failed(e).await),
        }
    }

    /// Drive the engine until cancelled.
    ///
    /// Passes run when the change queue signals new work, every poll
    /// interval, and after each backoff delay.
    pub async fn run(&self, cancel: CancellationToken) {
        info!("Sync engine started");
        loop {
            match self.sync_once(&cancel).await {
                Ok(_) | Err(SyncError::Storage(_)) => {}
                Err(SyncError::Network { retry_in, .. }) => {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(retry_in) => {}
                    }
                    self.set_state(EngineState::Idle);
                    continue;
                }
                Err(SyncError::AuthLost) => {
                    if !self.wait_for_resume(&cancel).await {
                        break;
                    }
                    continue;
                }
                Err(SyncError::Cancelled) => break,
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.config.poll_interval) => {}
                _ = self.queue.wait_for_work() => {}
            }
        }
        if self.state() != EngineState::Halted {
            self.set_state(EngineState::Idle);
        }
        info!("Sync engine stopped");
    }

    async fn wait_for_resume(&self, cancel: &CancellationToken) -> bool {
        let mut rx = self.state.subscribe();
        tokio::select! {
            _ = cancel.cancelled() => false,
            resumed = async { rx.wait_for(|s| *s != EngineState::Halted).await.is_ok() } => resumed,
        }
    }

    async fn failed(&self, error: SyncError) -> SyncError {
        if let Err(e) = self.queue.release().await {
            warn!(error = %e, "Failed to release leased change records");
        }

        match error {
            SyncError::Network { reason, .. } => {
                let (delay, attempt, failing_for) = {
                    let mut backoff = self.lock_backoff();
                    let delay = backoff.next_delay();
                    (delay, backoff.attempts(), backoff.failing_for())
                };
                self.set_state(EngineState::Backoff);
                warn!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    reason = %reason,
                    "Transient sync failure, backing off"
                );
                self.emit(SyncEvent::RetryScheduled { attempt, delay });

                if let Some(failing_for) = failing_for {
                    if failing_for >= self.config.delay_ceiling
                        && !self.delayed.swap(true, Ordering::SeqCst)
                    {
                        warn!(failing_for_s = failing_for.as_secs(), "Sync delayed");
                        self.emit(SyncEvent::SyncDelayed { failing_for });
                    }
                }
                SyncError::Network {
                    reason,
                    retry_in: delay,
                }
            }
            SyncError::AuthLost => {
                warn!("Identity lost, halting sync until re-authentication");
                self.set_state(EngineState::Halted);
                self.emit(SyncEvent::AuthLost);
                SyncError::AuthLost
            }
            SyncError::Cancelled => {
                info!("Sync pass cancelled, in-flight records left queued");
                self.set_state(EngineState::Idle);
                SyncError::Cancelled
            }
            SyncError::Storage(e) => {
                error!(error = %e, "Storage fault during sync");
                self.set_state(EngineState::Idle);
                self.emit(SyncEvent::StorageFault(e.to_string()));
                SyncError::Storage(e)
            }
        }
    }

    async fn pass(
        &self,
        cancel: &CancellationToken,
        report: &mut SyncReport,
    ) -> Result<(), SyncError> {
        let owner = call(cancel, self.identity.current_owner()).await??;
        self.drain(&owner, cancel, report).await?;
        self.set_state(EngineState::Reconciling);
        self.pull(&owner, cancel, report).await
    }

    async fn drain(
        &self,
        owner: &str,
        cancel: &CancellationToken,
        report: &mut SyncReport,
    ) -> Result<(), SyncError> {
        loop {
            self.set_state(EngineState::Draining);
            let batch = self.queue.peek_batch(self.config.batch_size).await?;
            if batch.is_empty() {
                return Ok(());
            }
            debug!(records = batch.len(), "Draining change queue");

            for record in &batch {
                match self.push(owner, record, cancel).await? {
                    Pushed::Accepted => report.accepted += 1,
                    Pushed::Deleted => report.deleted += 1,
                    Pushed::Conflict => report.conflicts += 1,
                    Pushed::Rejected => report.rejected += 1,
                }
            }
        }
    }

    async fn push(
        &self,
        owner: &str,
        record: &ChangeRecord,
        cancel: &CancellationToken,
    ) -> Result<Pushed, SyncError> {
        self.set_state(EngineState::AwaitingAck);
        let local = self.store.get(record.entry_id).await?;
        // Compare against the newest revision this device has seen.
        let base = local
            .as_ref()
            .and_then(|e| e.revision.clone())
            .or_else(|| record.payload.revision.clone());

        match record.op {
            ChangeOp::Delete => self.push_delete(owner, record, base, cancel).await,
            ChangeOp::Create | ChangeOp::Update => self.push_put(owner, record, base, cancel).await,
        }
    }

    async fn push_put(
        &self,
        owner: &str,
        record: &ChangeRecord,
        base: Option<RevisionToken>,
        cancel: &CancellationToken,
    ) -> Result<Pushed, SyncError> {
        let payload = record.payload.to_remote_payload();
        let mut expected = base;
        let mut won_conflict = false;

        for _ in 0..MAX_CONFLICT_ROUNDS {
            match call(cancel, self.documents.put(owner, &payload, expected.as_ref())).await? {
                Ok(revision) => {
                    self.confirm_write(record, revision).await?;
                    return Ok(if won_conflict {
                        Pushed::Conflict
                    } else {
                        Pushed::Accepted
                    });
                }
                Err(RemoteError::Conflict(current)) => {
                    self.set_state(EngineState::Reconciling);
                    let current = match current {
                        Some(doc) => Some(*doc),
                        None => call(cancel, self.documents.fetch(owner, record.entry_id)).await??,
                    };
                    let Some(current) = current else {
                        // Gone remotely; write it as new.
                        expected = None;
                        continue;
                    };

                    if !current.deleted && current.entry.same_content(&payload) {
                        debug!(entry = %record.entry_id, "Remote already holds this write");
                        self.confirm_write(record, current.revision).await?;
                        return Ok(Pushed::Accepted);
                    }

                    let resolution = resolve(&record.payload, &current);
                    self.audit(record, &current, resolution).await?;
                    match resolution {
                        Resolution::KeepLocal => {
                            won_conflict = true;
                            expected = Some(current.revision);
                            self.set_state(EngineState::AwaitingAck);
                        }
                        Resolution::TakeRemote { mark } => {
                            self.adopt_remote(record, current, mark).await?;
                            return Ok(Pushed::Conflict);
                        }
                    }
                }
                Err(RemoteError::Rejected(reason)) => {
                    self.reject(record, reason).await?;
                    return Ok(Pushed::Rejected);
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(SyncError::Network {
            reason: format!("entry {} kept changing remotely", record.entry_id),
            retry_in: Duration::ZERO,
        })
    }

    async fn push_delete(
        &self,
        owner: &str,
        record: &ChangeRecord,
        base: Option<RevisionToken>,
        cancel: &CancellationToken,
    ) -> Result<Pushed, SyncError> {
        let mut expected = base;

        for _ in 0..MAX_CONFLICT_ROUNDS {
            match call(
                cancel,
                self.documents.delete(
                    owner,
                    record.entry_id,
                    record.payload.last_modified,
                    expected.as_ref(),
                ),
            )
            .await?
            {
                // Never reached the remote, or already gone.
                Ok(_) | Err(RemoteError::NotFound) => {
                    self.confirm_delete(record).await?;
                    return Ok(Pushed::Deleted);
                }
                Err(RemoteError::Conflict(current)) => {
                    self.set_state(EngineState::Reconciling);
                    let current = match current {
                        Some(doc) => Some(*doc),
                        None => call(cancel, self.documents.fetch(owner, record.entry_id)).await??,
                    };
                    let current = match current {
                        Some(doc) if !doc.deleted => doc,
                        _ => {
                            self.confirm_delete(record).await?;
                            return Ok(Pushed::Deleted);
                        }
                    };

                    let resolution = resolve(&record.payload, &current);
                    self.audit(record, &current, resolution).await?;
                    match resolution {
                        Resolution::KeepLocal => {
                            expected = Some(current.revision);
                            self.set_state(EngineState::AwaitingAck);
                        }
                        Resolution::TakeRemote { mark } => {
                            self.adopt_remote(record, current, mark).await?;
                            return Ok(Pushed::Conflict);
                        }
                    }
                }
                Err(RemoteError::Rejected(reason)) => {
                    self.reject(record, reason).await?;
                    return Ok(Pushed::Rejected);
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(SyncError::Network {
            reason: format!("entry {} kept changing remotely", record.entry_id),
            retry_in: Duration::ZERO,
        })
    }

    /// Store the accepted revision and acknowledge the record.
    ///
    /// The entry becomes `synced` unless it changed locally in the meantime
    /// or still waits on an attachment upload.
    async fn confirm_write(
        &self,
        record: &ChangeRecord,
        revision: RevisionToken,
    ) -> Result<(), SyncError> {
        let mut tx = self.store.pool().begin().await.map_err(StoreError::from)?;
        let local = LocalStore::get_in(&mut tx, record.entry_id).await?;
        let touched = local.is_some();
        if let Some(mut local) = local {
            local.sync_state = if superseded(&local, record) || local.has_pending_attachment() {
                SyncState::Pending
            } else {
                SyncState::Synced
            };
            local.revision = Some(revision.clone());
            LocalStore::put_in(&mut tx, &local).await?;
        }
        ChangeQueue::acknowledge_in(&mut tx, record.seq).await?;
        tx.commit().await.map_err(StoreError::from)?;

        if touched {
            self.store.notify(StoreChange::Upserted(record.entry_id));
        }
        info!(entry = %record.entry_id, revision = %revision, "Write accepted");
        self.emit(SyncEvent::Accepted {
            entry_id: record.entry_id,
            revision,
        });
        Ok(())
    }

    /// Purge the local tombstone and acknowledge the record.
    async fn confirm_delete(&self, record: &ChangeRecord) -> Result<(), SyncError> {
        let mut tx = self.store.pool().begin().await.map_err(StoreError::from)?;
        let local = LocalStore::get_in(&mut tx, record.entry_id).await?;
        let purged = match local {
            Some(local) if local.deleted => LocalStore::purge_in(&mut tx, record.entry_id).await?,
            _ => false,
        };
        ChangeQueue::acknowledge_in(&mut tx, record.seq).await?;
        tx.commit().await.map_err(StoreError::from)?;

        if purged {
            self.store.notify(StoreChange::Purged(record.entry_id));
        }
        info!(entry = %record.entry_id, "Delete confirmed");
        self.emit(SyncEvent::Deleted {
            entry_id: record.entry_id,
        });
        Ok(())
    }

    /// Replace the local entry with the winning remote document and
    /// acknowledge the record.
    async fn adopt_remote(
        &self,
        record: &ChangeRecord,
        current: RemoteDocument,
        mark: bool,
    ) -> Result<(), SyncError> {
        let id = record.entry_id;
        let mut tx = self.store.pool().begin().await.map_err(StoreError::from)?;
        let local = LocalStore::get_in(&mut tx, id).await?;

        let change = match local {
            // A newer local edit is queued; it gets its own comparison.
            Some(local) if superseded(&local, record) => None,
            _ if current.deleted => {
                LocalStore::purge_in(&mut tx, id).await?;
                Some(StoreChange::Purged(id))
            }
            local => {
                let mut entry = current.entry;
                entry.revision = Some(current.revision);
                entry.deleted = false;
                entry.sync_state = if mark {
                    SyncState::Conflict
                } else {
                    SyncState::Synced
                };
                if let Some(local) = local.filter(|l| l.has_pending_attachment()) {
                    if entry.attachment.is_none() {
                        entry.attachment = local.attachment;
                        if !mark {
                            entry.sync_state = SyncState::Pending;
                        }
                    }
                }
                LocalStore::observe_timestamp_in(&mut tx, &entry.owner, entry.last_modified)
                    .await?;
                LocalStore::put_in(&mut tx, &entry).await?;
                Some(StoreChange::Upserted(id))
            }
        };
        ChangeQueue::acknowledge_in(&mut tx, record.seq).await?;
        tx.commit().await.map_err(StoreError::from)?;

        if let Some(change) = change {
            self.store.notify(change);
        }
        Ok(())
    }

    /// Drop a record the remote refused and surface the failure.
    async fn reject(&self, record: &ChangeRecord, reason: String) -> Result<(), SyncError> {
        let id = record.entry_id;
        let mut tx = self.store.pool().begin().await.map_err(StoreError::from)?;
        let local = LocalStore::get_in(&mut tx, id).await?;

        let change = match local {
            Some(local) if superseded(&local, record) => None,
            Some(local) if local.deleted => {
                LocalStore::purge_in(&mut tx, id).await?;
                Some(StoreChange::Purged(id))
            }
            Some(mut local) => {
                local.sync_state = SyncState::LocalOnly;
                LocalStore::put_in(&mut tx, &local).await?;
                Some(StoreChange::Upserted(id))
            }
            None => None,
        };
        ChangeQueue::acknowledge_in(&mut tx, record.seq).await?;
        tx.commit().await.map_err(StoreError::from)?;

        if let Some(change) = change {
            self.store.notify(change);
        }
        warn!(entry = %id, reason = %reason, "Change rejected by remote, dropped");
        self.emit(SyncEvent::Rejected {
            entry_id: id,
            reason,
        });
        Ok(())
    }

    async fn audit(
        &self,
        record: &ChangeRecord,
        current: &RemoteDocument,
        resolution: Resolution,
    ) -> Result<(), SyncError> {
        let outcome = resolution.outcome();
        self.store
            .record_conflict(&ConflictRecord {
                entry_id: record.entry_id,
                local: record.payload.clone(),
                remote: current.entry.clone(),
                outcome,
                resolved_at: Utc::now(),
            })
            .await?;

        info!(
            entry = %record.entry_id,
            outcome = %outcome,
            local_modified = %record.payload.last_modified,
            remote_modified = %current.entry.last_modified,
            "Conflict resolved"
        );
        self.emit(SyncEvent::ConflictResolved {
            entry_id: record.entry_id,
            outcome,
        });
        Ok(())
    }

    /// Apply remote documents written since the stored cursor.
    ///
    /// Entries with a queued local change are skipped; their push settles
    /// the difference. The cursor stops short of the earliest skipped
    /// document so it is fetched again if that push is rejected.
    async fn pull(
        &self,
        owner: &str,
        cancel: &CancellationToken,
        report: &mut SyncReport,
    ) -> Result<(), SyncError> {
        let cursor_key = format!("{}:{}", PULL_CURSOR_KEY, owner);
        let cursor = self
            .store
            .get_meta(&cursor_key)
            .await?
            .and_then(|v| v.parse::<i64>().ok())
            .and_then(DateTime::<Utc>::from_timestamp_millis);

        let documents = call(cancel, self.documents.changed_since(owner, cursor)).await??;
        if documents.is_empty() {
            return Ok(());
        }

        let mut applied = 0;
        let mut purged = 0;
        let mut latest = cursor;
        let mut held: Option<DateTime<Utc>> = None;
        for doc in documents {
            let server_time = doc.server_time;
            latest = latest.max(Some(server_time));
            match self.apply_pulled(doc).await? {
                PullOutcome::Changed(StoreChange::Purged(id)) => {
                    purged += 1;
                    self.store.notify(StoreChange::Purged(id));
                }
                PullOutcome::Changed(change) => {
                    applied += 1;
                    self.store.notify(change);
                }
                PullOutcome::Unchanged => {}
                // Documents arrive in server-time order, so the first is the earliest.
                PullOutcome::Deferred => {
                    held.get_or_insert(server_time);
                }
            }
        }

        if let Some(held) = held {
            latest = latest.min(Some(held - chrono::Duration::milliseconds(1)));
        }
        if let Some(latest) = latest {
            self.store
                .set_meta(&cursor_key, &latest.timestamp_millis().to_string())
                .await?;
        }

        report.pulled += applied;
        report.purged += purged;
        if applied + purged > 0 {
            info!(applied, purged, "Pulled remote changes");
            self.emit(SyncEvent::Pulled { applied, purged });
        }
        Ok(())
    }

    async fn apply_pulled(&self, doc: RemoteDocument) -> Result<PullOutcome, SyncError> {
        let id = doc.entry.id;
        let mut tx = self.store.pool().begin().await.map_err(StoreError::from)?;

        if ChangeQueue::has_pending_in(&mut tx, id).await? {
            debug!(entry = %id, "Local change pending, skipping pulled revision");
            return Ok(PullOutcome::Deferred);
        }

        let local = LocalStore::get_in(&mut tx, id).await?;
        let change = if doc.deleted {
            if local.is_some() && LocalStore::purge_in(&mut tx, id).await? {
                Some(StoreChange::Purged(id))
            } else {
                None
            }
        } else if local.as_ref().and_then(|l| l.revision.as_ref()) == Some(&doc.revision) {
            None
        } else {
            let mut entry = doc.entry;
            entry.revision = Some(doc.revision);
            entry.sync_state = SyncState::Synced;
            entry.deleted = false;
            if let Some(local) = local.filter(|l| l.has_pending_attachment()) {
                if entry.attachment.is_none() {
                    entry.attachment = local.attachment;
                    entry.sync_state = SyncState::Pending;
                }
            }
            if let Err(e) = entry.validate() {
                warn!(entry = %id, error = %e, "Ignoring invalid remote document");
                return Ok(PullOutcome::Unchanged);
            }
            LocalStore::observe_timestamp_in(&mut tx, &entry.owner, entry.last_modified).await?;
            LocalStore::put_in(&mut tx, &entry).await?;
            Some(StoreChange::Upserted(id))
        };

        tx.commit().await.map_err(StoreError::from)?;
        Ok(change.map_or(PullOutcome::Unchanged, PullOutcome::Changed))
    }
}
