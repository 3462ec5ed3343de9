//! Last-writer-wins resolution between a local unsynced edit and the remote
//! document it collided with.

use crate::models::{ConflictOutcome, MoodEntry, RemoteDocument};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// The local edit is newer; write it over the remote revision.
    KeepLocal,
    /// The remote is newer or tied; adopt it. `mark` flags the entry as
    /// `conflict` because the local edit said something different.
    TakeRemote { mark: bool },
}

impl Resolution {
    pub fn outcome(&self) -> ConflictOutcome {
        match self {
            Resolution::KeepLocal => ConflictOutcome::LocalWon,
            Resolution::TakeRemote { mark: false } => ConflictOutcome::RemoteWon,
            Resolution::TakeRemote { mark: true } => ConflictOutcome::RemoteWonMarked,
        }
    }
}

/// Compare last-modified timestamps; the remote wins ties.
///
/// A local deletion that loses is always marked, since the user's delete is
/// being undone. A remote tombstone that wins is adopted unmarked.
pub fn resolve(local: &MoodEntry, remote: &RemoteDocument) -> Resolution {
    if local.last_modified > remote.entry.last_modified {
        return Resolution::KeepLocal;
    }
    if remote.deleted {
        return Resolution::TakeRemote { mark: false };
    }
    let mark = local.deleted || local.differs_materially(&remote.entry);
    Resolution::TakeRemote { mark }
}
