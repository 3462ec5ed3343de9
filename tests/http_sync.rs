//! Two devices syncing through a live server over HTTP.

use std::sync::Arc;
use std::time::Duration;

use moodsync::server::{router, ApiKeyStore, AppState, DocumentRepository};
use moodsync_core::{
    AttachmentRef, AttachmentUploader, BackoffPolicy, BlobStore, ChangeQueue, EngineState,
    EntryIdGenerator, HttpRemote, Journal, LocalStore, MoodCategory, SyncConfig, SyncEngine,
    SyncError, SyncState,
};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

const API_KEY: &str = "phone-and-tablet-key";

async fn start_server(dir: &TempDir) -> String {
    let repo = DocumentRepository::open(dir.path()).await.unwrap();
    let mut keys = ApiKeyStore::default();
    keys.insert(API_KEY, "alice");
    let app = router(AppState {
        api_keys: Arc::new(keys),
        repo: Arc::new(repo),
    });

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

struct Device {
    journal: Journal,
    store: LocalStore,
    engine: SyncEngine,
    uploader: AttachmentUploader,
    cancel: CancellationToken,
    _dir: TempDir,
}

impl Device {
    async fn new(name: &str, url: &str, api_key: &str) -> Self {
        let dir = TempDir::new().unwrap();
        let pool = moodsync_core::open_pool(&dir.path().join("moods.db"))
            .await
            .unwrap();
        let store = LocalStore::new(pool.clone());
        let queue = ChangeQueue::new(pool);
        let remote = Arc::new(HttpRemote::new(url.to_string(), api_key.to_string()).unwrap());
        let config = SyncConfig::default().with_backoff(BackoffPolicy::new(
            Duration::from_millis(1),
            Duration::from_millis(10),
        ));
        let cancel = CancellationToken::new();

        let engine = SyncEngine::new(
            store.clone(),
            queue.clone(),
            remote.clone(),
            remote.clone(),
            config.clone(),
        );
        let uploader = AttachmentUploader::new(
            store.clone(),
            queue.clone(),
            remote,
            &config,
            engine.event_sender(),
            cancel.clone(),
        );
        // The owner is whatever the server says the key belongs to
        let journal = Journal::new(store.clone(), queue, EntryIdGenerator::new(name), "alice");

        Self {
            journal,
            store,
            engine,
            uploader,
            cancel,
            _dir: dir,
        }
    }
}

#[tokio::test]
async fn entries_and_photos_converge_over_http() {
    let server_dir = TempDir::new().unwrap();
    let url = start_server(&server_dir).await;
    let phone = Device::new("phone", &url, API_KEY).await;
    let tablet = Device::new("tablet", &url, API_KEY).await;

    let entry = phone
        .journal
        .record(
            phone
                .journal
                .draft(MoodCategory::Happiness)
                .with_note("walk in the park")
                .with_coordinate(52.52, 13.405),
        )
        .await
        .unwrap();
    let (_, upload) = phone
        .uploader
        .attach(entry.id, "image/jpeg", b"park photo".to_vec())
        .await
        .unwrap();
    let reference = upload.await.unwrap().unwrap();

    phone.engine.sync_once(&phone.cancel).await.unwrap();
    let synced = phone.store.get(entry.id).await.unwrap().unwrap();
    assert_eq!(synced.sync_state, SyncState::Synced);
    assert!(synced.revision.is_some());

    tablet.engine.sync_once(&tablet.cancel).await.unwrap();
    let copy = tablet.journal.get(entry.id).await.unwrap().unwrap();
    assert_eq!(copy.note.as_deref(), Some("walk in the park"));
    assert_eq!(
        copy.attachment,
        Some(AttachmentRef::Remote {
            reference: reference.clone()
        })
    );

    let remote = HttpRemote::new(url.clone(), API_KEY.to_string()).unwrap();
    assert_eq!(remote.get_blob(&reference).await.unwrap(), b"park photo".to_vec());

    // A deletion on the tablet removes the entry from the phone
    assert!(tablet.journal.remove(entry.id).await.unwrap());
    tablet.engine.sync_once(&tablet.cancel).await.unwrap();
    phone.engine.sync_once(&phone.cancel).await.unwrap();
    assert!(phone.journal.get(entry.id).await.unwrap().is_none());
}

#[tokio::test]
async fn unknown_key_halts_the_engine() {
    let server_dir = TempDir::new().unwrap();
    let url = start_server(&server_dir).await;
    let device = Device::new("phone", &url, "revoked-key").await;

    device
        .journal
        .record(device.journal.draft(MoodCategory::Sadness))
        .await
        .unwrap();

    let result = device.engine.sync_once(&device.cancel).await;
    assert!(matches!(result, Err(SyncError::AuthLost)));
    assert_eq!(device.engine.state(), EngineState::Halted);
}
