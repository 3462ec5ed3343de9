//! Sync error and event types.

use std::time::Duration;

use crate::entry_id::EntryId;
use crate::models::{ConflictOutcome, RevisionToken};
use crate::remote::RemoteError;
use crate::store::StoreError;

/// Errors returned by a sync pass.
#[derive(Debug)]
pub enum SyncError {
    /// Local storage failed; the pass stopped.
    Storage(StoreError),
    /// The remote was unreachable. Records stay queued; retry after `retry_in`.
    Network { reason: String, retry_in: Duration },
    /// Identity lost; the engine is halted until re-authentication.
    AuthLost,
    /// The pass was cancelled; in-flight records stay queued.
    Cancelled,
}

impl std::fmt::Display for SyncError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncError::Storage(e) => write!(f, "Storage error: {}", e),
            SyncError::Network { reason, retry_in } => write!(
                f,
                "Remote unavailable ({}), retrying in {:.1}s",
                reason,
                retry_in.as_secs_f64()
            ),
            SyncError::AuthLost => write!(f, "Authentication lost. Log in again to resume sync."),
            SyncError::Cancelled => write!(f, "Sync cancelled"),
        }
    }
}

impl std::error::Error for SyncError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SyncError::Storage(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StoreError> for SyncError {
    fn from(e: StoreError) -> Self {
        SyncError::Storage(e)
    }
}

impl From<RemoteError> for SyncError {
    /// Only transient and auth failures escape a record; conflicts and
    /// rejections are handled where they occur.
    fn from(e: RemoteError) -> Self {
        match e {
            RemoteError::AuthLost => SyncError::AuthLost,
            other => SyncError::Network {
                reason: other.to_string(),
                retry_in: Duration::ZERO,
            },
        }
    }
}

/// Notifications published by the sync engine and attachment uploader.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// The remote applied a write.
    Accepted {
        entry_id: EntryId,
        revision: RevisionToken,
    },
    /// The remote confirmed a deletion and the tombstone was purged.
    Deleted { entry_id: EntryId },
    /// A conflict was settled by last-writer-wins.
    ConflictResolved {
        entry_id: EntryId,
        outcome: ConflictOutcome,
    },
    /// The remote refused a record as malformed. It was dropped.
    Rejected { entry_id: EntryId, reason: String },
    /// A transient failure; another attempt follows after `delay`.
    RetryScheduled { attempt: u32, delay: Duration },
    /// Transient failures have persisted past the configured ceiling.
    SyncDelayed { failing_for: Duration },
    /// Sync succeeded again after `SyncDelayed`.
    Recovered,
    AuthLost,
    StorageFault(String),
    /// Remote changes were applied locally.
    Pulled { applied: usize, purged: usize },
    AttachmentUploaded {
        entry_id: EntryId,
        reference: String,
    },
    /// An upload failed permanently; the blob stays local.
    UploadFailed { entry_id: EntryId, reason: String },
}
