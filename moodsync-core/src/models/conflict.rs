use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::mood_entry::MoodEntry;
use crate::entry_id::EntryId;

/// How a last-writer-wins conflict was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictOutcome {
    /// The local edit was newer and was written over the remote revision.
    LocalWon,
    /// The remote was newer (or tied); the local edit matched it in substance.
    RemoteWon,
    /// The remote won over a materially different local edit; entry flagged.
    RemoteWonMarked,
}

impl fmt::Display for ConflictOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConflictOutcome::LocalWon => write!(f, "local-won"),
            ConflictOutcome::RemoteWon => write!(f, "remote-won"),
            ConflictOutcome::RemoteWonMarked => write!(f, "remote-won-marked"),
        }
    }
}

impl FromStr for ConflictOutcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local-won" => Ok(ConflictOutcome::LocalWon),
            "remote-won" => Ok(ConflictOutcome::RemoteWon),
            "remote-won-marked" => Ok(ConflictOutcome::RemoteWonMarked),
            _ => Err(format!("Invalid conflict outcome '{}'", s)),
        }
    }
}

/// Audit row describing one resolved conflict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictRecord {
    pub entry_id: EntryId,
    pub local: MoodEntry,
    pub remote: MoodEntry,
    pub outcome: ConflictOutcome,
    pub resolved_at: DateTime<Utc>,
}
