//! A simulated device: its own database, journal, engine and uploader,
//! sharing one in-memory remote with other devices.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use moodsync_core::sync::BackoffPolicy;
use moodsync_core::{
    AttachmentUploader, ChangeQueue, EntryIdGenerator, Journal, LocalStore, MemoryRemote,
    StaticIdentity, SyncConfig, SyncEngine, SyncReport,
};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

pub const OWNER: &str = "alice";

/// Millisecond backoff so retry paths run quickly.
pub fn fast_config() -> SyncConfig {
    SyncConfig::default()
        .with_backoff(BackoffPolicy::new(
            Duration::from_millis(1),
            Duration::from_millis(10),
        ))
        .with_poll_interval(Duration::from_millis(50))
}

pub struct Device {
    pub journal: Journal,
    pub store: LocalStore,
    pub queue: ChangeQueue,
    pub engine: SyncEngine,
    pub uploader: AttachmentUploader,
    pub cancel: CancellationToken,
    _dir: TempDir,
}

impl Device {
    pub async fn new(name: &str, remote: &Arc<MemoryRemote>) -> Self {
        Self::with_config(name, remote, fast_config()).await
    }

    pub async fn with_config(name: &str, remote: &Arc<MemoryRemote>, config: SyncConfig) -> Self {
        let dir = TempDir::new().unwrap();
        let pool = moodsync_core::open_pool(&dir.path().join(format!("{}.db", name)))
            .await
            .unwrap();
        let store = LocalStore::new(pool.clone());
        let queue = ChangeQueue::new(pool);
        let cancel = CancellationToken::new();

        let engine = SyncEngine::new(
            store.clone(),
            queue.clone(),
            remote.clone(),
            Arc::new(StaticIdentity::new(OWNER)),
            config.clone(),
        );
        let uploader = AttachmentUploader::new(
            store.clone(),
            queue.clone(),
            remote.clone(),
            &config,
            engine.event_sender(),
            cancel.clone(),
        );
        let journal = Journal::new(
            store.clone(),
            queue.clone(),
            EntryIdGenerator::new(name),
            OWNER,
        );

        Self {
            journal,
            store,
            queue,
            engine,
            uploader,
            cancel,
            _dir: dir,
        }
    }

    /// One sync pass that is expected to succeed.
    pub async fn sync(&self) -> SyncReport {
        self.engine.sync_once(&self.cancel).await.unwrap()
    }
}

/// Let the per-owner millisecond clocks of two devices move apart.
pub async fn tick() {
    tokio::time::sleep(Duration::from_millis(5)).await;
}
