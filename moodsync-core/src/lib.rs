//! Moodsync Core Library
//!
//! Offline-first storage and synchronization of mood entries.

pub mod aggregate;
pub mod attachments;
pub mod entry_id;
pub mod journal;
pub mod models;
pub mod remote;
pub mod store;
pub mod sync;

pub use aggregate::{
    AggregateView, Aggregator, BoundingBox, Bucket, ChartPoint, GeoCluster, MonthlyStats,
    TimeRange, TimeSeries,
};
pub use attachments::{stage_attachment, AttachmentUploader, UploadError};
pub use entry_id::{EntryId, EntryIdError, EntryIdGenerator};
pub use journal::Journal;
pub use models::{
    AttachmentRef, ChangeOp, ChangeRecord, ConflictOutcome, ConflictRecord, Coordinate,
    MoodCategory, MoodEntry, MoodFilter, RemoteDocument, RevisionToken, SocialSituation,
    SyncState, TimePeriod, Visibility,
};
pub use remote::{
    BlobStore, DocumentStore, HttpRemote, IdentityProvider, MemoryRemote, RemoteError,
    StaticIdentity,
};
pub use store::{open_pool, ChangeQueue, LocalStore, StoreChange, StoreError};
pub use sync::{
    BackoffPolicy, EngineState, SyncConfig, SyncEngine, SyncError, SyncEvent, SyncReport,
};

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
