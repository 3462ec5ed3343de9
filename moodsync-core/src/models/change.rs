use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::mood_entry::MoodEntry;
use crate::entry_id::EntryId;

/// Kind of mutation waiting in the change queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeOp {
    Create,
    Update,
    Delete,
}

impl fmt::Display for ChangeOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeOp::Create => write!(f, "create"),
            ChangeOp::Update => write!(f, "update"),
            ChangeOp::Delete => write!(f, "delete"),
        }
    }
}

impl FromStr for ChangeOp {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(ChangeOp::Create),
            "update" => Ok(ChangeOp::Update),
            "delete" => Ok(ChangeOp::Delete),
            _ => Err(format!("Invalid change op '{}'", s)),
        }
    }
}

/// A pending mutation of one entry.
///
/// `seq` is assigned by the change queue on enqueue; records built by callers
/// carry `seq == 0` until then.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub seq: i64,
    pub entry_id: EntryId,
    pub op: ChangeOp,
    pub payload: MoodEntry,
    pub enqueued_at: DateTime<Utc>,
}

impl ChangeRecord {
    pub fn new(op: ChangeOp, payload: MoodEntry) -> Self {
        Self {
            seq: 0,
            entry_id: payload.id,
            op,
            payload,
            enqueued_at: Utc::now(),
        }
    }

    pub fn create(payload: MoodEntry) -> Self {
        Self::new(ChangeOp::Create, payload)
    }

    pub fn update(payload: MoodEntry) -> Self {
        Self::new(ChangeOp::Update, payload)
    }

    pub fn delete(payload: MoodEntry) -> Self {
        Self::new(ChangeOp::Delete, payload)
    }
}
