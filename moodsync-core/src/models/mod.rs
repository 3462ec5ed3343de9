mod change;
mod conflict;
mod filter;
mod mood;
mod mood_entry;
mod remote;

pub use change::{ChangeOp, ChangeRecord};
pub use conflict::{ConflictOutcome, ConflictRecord};
pub use filter::{MoodFilter, TimePeriod, DEFAULT_NEARBY_KM};
pub use mood::{MoodCategory, SocialSituation, Visibility};
pub use mood_entry::{
    AttachmentRef, Coordinate, MoodEntry, SyncState, ValidationError, MAX_TRIGGER_LEN,
};
pub use remote::{RemoteDocument, RevisionToken};
