use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use super::mood::{MoodCategory, SocialSituation, Visibility};
use super::remote::RevisionToken;
use crate::entry_id::EntryId;

/// Longest trigger text accepted on an entry.
pub const MAX_TRIGGER_LEN: usize = 20;

/// Where an entry stands relative to the remote document store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncState {
    /// Never confirmed by the remote.
    LocalOnly,
    /// Known remotely but carrying unsynced changes (or an unresolved attachment).
    Pending,
    /// Matches the remote revision.
    Synced,
    /// The remote won a conflict over a materially different local edit.
    Conflict,
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncState::LocalOnly => write!(f, "local-only"),
            SyncState::Pending => write!(f, "pending"),
            SyncState::Synced => write!(f, "synced"),
            SyncState::Conflict => write!(f, "conflict"),
        }
    }
}

impl FromStr for SyncState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local-only" => Ok(SyncState::LocalOnly),
            "pending" => Ok(SyncState::Pending),
            "synced" => Ok(SyncState::Synced),
            "conflict" => Ok(SyncState::Conflict),
            _ => Err(format!("Invalid sync state '{}'", s)),
        }
    }
}

/// A latitude/longitude pair in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinate {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }

    /// Great-circle distance in meters (haversine).
    pub fn distance_m(&self, other: &Coordinate) -> f64 {
        const EARTH_RADIUS_M: f64 = 6_371_000.0;
        let lat1 = self.latitude.to_radians();
        let lat2 = other.latitude.to_radians();
        let dlat = lat2 - lat1;
        let dlon = (other.longitude - self.longitude).to_radians();
        let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_M * a.sqrt().asin()
    }
}

/// Photo attached to an entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum AttachmentRef {
    /// Blob held in the local store, upload not yet confirmed.
    Pending { local_key: String },
    /// Opaque reference returned by the blob store.
    Remote { reference: String },
}

impl AttachmentRef {
    pub fn is_pending(&self) -> bool {
        matches!(self, AttachmentRef::Pending { .. })
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("owner must not be empty")]
    MissingOwner,
    #[error("trigger is {0} characters, at most 20 allowed")]
    TriggerTooLong(usize),
    #[error("coordinate ({0}, {1}) is out of range")]
    InvalidCoordinate(f64, f64),
    #[error("last_modified precedes created_at")]
    TimestampsOutOfOrder,
}

/// A single recorded mood observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoodEntry {
    pub id: EntryId,
    pub owner: String,
    pub mood: MoodCategory,
    pub note: Option<String>,
    pub trigger: Option<String>,
    pub social_situation: Option<SocialSituation>,
    #[serde(default)]
    pub visibility: Visibility,
    pub coordinate: Option<Coordinate>,
    pub place_name: Option<String>,
    pub attachment: Option<AttachmentRef>,
    pub created_at: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
    pub sync_state: SyncState,
    pub revision: Option<RevisionToken>,
    #[serde(default)]
    pub deleted: bool,
}

impl MoodEntry {
    pub fn new(
        id: EntryId,
        owner: impl Into<String>,
        mood: MoodCategory,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            owner: owner.into(),
            mood,
            note: None,
            trigger: None,
            social_situation: None,
            visibility: Visibility::Public,
            coordinate: None,
            place_name: None,
            attachment: None,
            created_at,
            last_modified: created_at,
            sync_state: SyncState::LocalOnly,
            revision: None,
            deleted: false,
        }
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    pub fn with_trigger(mut self, trigger: impl Into<String>) -> Self {
        self.trigger = Some(trigger.into());
        self
    }

    pub fn with_social_situation(mut self, situation: SocialSituation) -> Self {
        self.social_situation = Some(situation);
        self
    }

    pub fn with_visibility(mut self, visibility: Visibility) -> Self {
        self.visibility = visibility;
        self
    }

    pub fn with_coordinate(mut self, latitude: f64, longitude: f64) -> Self {
        self.coordinate = Some(Coordinate::new(latitude, longitude));
        self
    }

    pub fn with_place_name(mut self, place: impl Into<String>) -> Self {
        self.place_name = Some(place.into());
        self
    }

    pub fn with_attachment(mut self, attachment: AttachmentRef) -> Self {
        self.attachment = Some(attachment);
        self
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.owner.trim().is_empty() {
            return Err(ValidationError::MissingOwner);
        }
        if let Some(trigger) = &self.trigger {
            let len = trigger.chars().count();
            if len > MAX_TRIGGER_LEN {
                return Err(ValidationError::TriggerTooLong(len));
            }
        }
        if let Some(coord) = &self.coordinate {
            if !coord.is_valid() {
                return Err(ValidationError::InvalidCoordinate(
                    coord.latitude,
                    coord.longitude,
                ));
            }
        }
        if self.last_modified < self.created_at {
            return Err(ValidationError::TimestampsOutOfOrder);
        }
        Ok(())
    }

    pub fn has_pending_attachment(&self) -> bool {
        self.attachment.as_ref().is_some_and(AttachmentRef::is_pending)
    }

    /// True when the user-visible content (mood category or note) differs.
    pub fn differs_materially(&self, other: &MoodEntry) -> bool {
        self.mood != other.mood || self.note != other.note
    }

    /// Copy of this entry as it is written to the remote store.
    ///
    /// Local bookkeeping is cleared and pending attachment placeholders are
    /// dropped, since other devices cannot resolve them.
    pub fn to_remote_payload(&self) -> MoodEntry {
        let mut payload = self.clone();
        if payload.has_pending_attachment() {
            payload.attachment = None;
        }
        payload.sync_state = SyncState::Synced;
        payload.revision = None;
        payload
    }

    /// True when both entries carry the same content, ignoring sync bookkeeping.
    pub fn same_content(&self, other: &MoodEntry) -> bool {
        let mut a = self.clone();
        let mut b = other.clone();
        a.sync_state = SyncState::Synced;
        b.sync_state = SyncState::Synced;
        a.revision = None;
        b.revision = None;
        a == b
    }
}

impl fmt::Display for MoodEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} - {} [{}]",
            self.created_at.format("%Y-%m-%d %H:%M"),
            self.mood,
            self.sync_state
        )?;
        writeln!(f, "  id: {}", self.id)?;
        if let Some(note) = &self.note {
            writeln!(f, "  note: {}", note)?;
        }
        if let Some(trigger) = &self.trigger {
            writeln!(f, "  trigger: {}", trigger)?;
        }
        if let Some(social) = &self.social_situation {
            writeln!(f, "  social: {}", social)?;
        }
        if let Some(coord) = &self.coordinate {
            match &self.place_name {
                Some(place) => writeln!(
                    f,
                    "  location: {} ({:.4}, {:.4})",
                    place, coord.latitude, coord.longitude
                )?,
                None => writeln!(f, "  location: ({:.4}, {:.4})", coord.latitude, coord.longitude)?,
            }
        }
        match &self.attachment {
            Some(AttachmentRef::Pending { .. }) => writeln!(f, "  photo: uploading")?,
            Some(AttachmentRef::Remote { .. }) => writeln!(f, "  photo: attached")?,
            None => {}
        }
        if self.visibility == Visibility::Private {
            writeln!(f, "  private")?;
        }
        Ok(())
    }
}
