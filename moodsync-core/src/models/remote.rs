use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::mood_entry::MoodEntry;

/// Opaque server-assigned document version, used for compare-and-set writes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RevisionToken(String);

impl RevisionToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RevisionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A mood entry as held by the remote document store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteDocument {
    pub revision: RevisionToken,
    pub entry: MoodEntry,
    pub server_time: DateTime<Utc>,
    /// Remote tombstone; kept so incremental pulls can propagate deletions.
    #[serde(default)]
    pub deleted: bool,
}
