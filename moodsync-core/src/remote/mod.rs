//! Interfaces to the remote services the sync engine consumes.
//!
//! - [`DocumentStore`]: per-entry documents with revision compare-and-set
//! - [`BlobStore`]: opaque binary attachments
//! - [`IdentityProvider`]: the authenticated owner
//!
//! [`MemoryRemote`] keeps documents and blobs in process (tests, offline
//! demos); [`HttpRemote`] talks to `moodsync-server` and implements all three.

mod http;
mod memory;
pub mod wire;

pub use http::HttpRemote;
pub use memory::MemoryRemote;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::entry_id::EntryId;
use crate::models::{MoodEntry, RemoteDocument, RevisionToken};

/// Errors reported by remote services.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteError {
    /// Timeout, connection refused, 5xx. Safe to retry.
    Transient(String),
    /// The expected revision did not match. Carries the current document if known.
    Conflict(Option<Box<RemoteDocument>>),
    /// The payload was refused as malformed. Retrying cannot succeed.
    Rejected(String),
    /// Credentials are missing, expired or revoked.
    AuthLost,
    NotFound,
}

impl RemoteError {
    pub fn is_transient(&self) -> bool {
        matches!(self, RemoteError::Transient(_))
    }
}

impl std::fmt::Display for RemoteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RemoteError::Transient(e) => write!(f, "Remote unavailable: {}", e),
            RemoteError::Conflict(_) => write!(f, "Revision conflict"),
            RemoteError::Rejected(e) => write!(f, "Rejected by remote: {}", e),
            RemoteError::AuthLost => write!(f, "Authentication lost"),
            RemoteError::NotFound => write!(f, "Not found on remote"),
        }
    }
}

impl std::error::Error for RemoteError {}

/// Remote document store keyed by entry id, scoped by owner.
///
/// `expected` is the revision the caller last saw; `None` asserts that the
/// document does not exist yet. A mismatch yields [`RemoteError::Conflict`].
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn fetch(&self, owner: &str, id: EntryId)
        -> Result<Option<RemoteDocument>, RemoteError>;

    async fn put(
        &self,
        owner: &str,
        entry: &MoodEntry,
        expected: Option<&RevisionToken>,
    ) -> Result<RevisionToken, RemoteError>;

    /// Replace the document with a remote tombstone stamped `deleted_at`,
    /// the deleting device's last-modified time.
    async fn delete(
        &self,
        owner: &str,
        id: EntryId,
        deleted_at: DateTime<Utc>,
        expected: Option<&RevisionToken>,
    ) -> Result<RevisionToken, RemoteError>;

    /// Documents (tombstones included) written strictly after `since`,
    /// ordered by server time.
    async fn changed_since(
        &self,
        owner: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<RemoteDocument>, RemoteError>;
}

/// Remote store for attachment bytes.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `data` under `key`, returning a reference usable from any device.
    async fn put_blob(
        &self,
        key: &str,
        content_type: &str,
        data: Vec<u8>,
    ) -> Result<String, RemoteError>;

    async fn get_blob(&self, reference: &str) -> Result<Vec<u8>, RemoteError>;
}

/// Supplies the authenticated owner identity.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn current_owner(&self) -> Result<String, RemoteError>;
}

/// An identity fixed at construction, for single-user devices.
#[derive(Debug, Clone)]
pub struct StaticIdentity(String);

impl StaticIdentity {
    pub fn new(owner: impl Into<String>) -> Self {
        Self(owner.into())
    }
}

#[async_trait]
impl IdentityProvider for StaticIdentity {
    async fn current_owner(&self) -> Result<String, RemoteError> {
        if self.0.is_empty() {
            return Err(RemoteError::AuthLost);
        }
        Ok(self.0.clone())
    }
}
