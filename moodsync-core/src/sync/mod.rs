//! Sync engine and its supporting pieces.
//!
//! The engine drains the [`ChangeQueue`](crate::store::ChangeQueue) against a
//! [`DocumentStore`](crate::remote::DocumentStore) using revision
//! compare-and-set, resolves conflicts last-writer-wins, then pulls remote
//! changes made by other devices. Failures are reported on a broadcast
//! channel of [`SyncEvent`]s so that recording entries never waits on sync.

mod backoff;
mod config;
mod conflict;
mod engine;
mod error;

pub use backoff::{Backoff, BackoffPolicy};
pub use config::SyncConfig;
pub use conflict::{resolve, Resolution};
pub use engine::{EngineState, SyncEngine, SyncReport};
pub use error::{SyncError, SyncEvent};
