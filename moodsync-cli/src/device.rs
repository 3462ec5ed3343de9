//! This device's journal, and its sync session when a server is configured.

use std::sync::Arc;

use moodsync_core::{
    open_pool, AttachmentUploader, ChangeQueue, EntryIdGenerator, HttpRemote, IdentityProvider,
    Journal, LocalStore, RemoteError, StoreError, SyncEngine,
};
use tokio_util::sync::CancellationToken;

use crate::config::{Config, SyncSettings};

const DEVICE_ID_KEY: &str = "device_id";

pub struct Device {
    pub store: LocalStore,
    pub queue: ChangeQueue,
    pub journal: Journal,
}

impl Device {
    pub async fn open(config: &Config) -> Result<Self, StoreError> {
        let pool = open_pool(&config.database_path.value).await?;
        let store = LocalStore::new(pool.clone());
        let queue = ChangeQueue::new(pool);

        let device_id = match &config.device_id {
            Some(id) => id.clone(),
            None => Self::remembered_device_id(&store).await?,
        };
        let journal = Journal::new(
            store.clone(),
            queue.clone(),
            EntryIdGenerator::new(&device_id),
            config.owner.value.clone(),
        );

        Ok(Self {
            store,
            queue,
            journal,
        })
    }

    /// Device salt kept in the database so ids stay stable across runs.
    async fn remembered_device_id(store: &LocalStore) -> Result<String, StoreError> {
        if let Some(id) = store.get_meta(DEVICE_ID_KEY).await? {
            return Ok(id);
        }
        let id = uuid::Uuid::new_v4().simple().to_string();
        store.set_meta(DEVICE_ID_KEY, &id).await?;
        tracing::debug!(device = %id, "Generated device id");
        Ok(id)
    }

    /// Wire up the sync engine and uploader against the configured server.
    pub fn session(&self, settings: &SyncSettings) -> Result<SyncSession, SessionError> {
        let (url, key) = match (&settings.server_url, &settings.api_key) {
            (Some(url), Some(key)) => (url.clone(), key.clone()),
            _ => return Err(SessionError::NotConfigured),
        };
        let remote = Arc::new(HttpRemote::new(url, key).map_err(SessionError::Remote)?);
        let config = settings.engine_config();
        let cancel = CancellationToken::new();

        let engine = SyncEngine::new(
            self.store.clone(),
            self.queue.clone(),
            remote.clone(),
            remote.clone(),
            config.clone(),
        );
        let uploader = AttachmentUploader::new(
            self.store.clone(),
            self.queue.clone(),
            remote.clone(),
            &config,
            engine.event_sender(),
            cancel.clone(),
        );

        Ok(SyncSession {
            remote,
            engine,
            uploader,
            cancel,
        })
    }
}

pub struct SyncSession {
    pub remote: Arc<HttpRemote>,
    pub engine: SyncEngine,
    pub uploader: AttachmentUploader,
    pub cancel: CancellationToken,
}

impl SyncSession {
    /// The owner the server associates with our API key.
    pub async fn server_owner(&self) -> Result<String, RemoteError> {
        self.remote.current_owner().await
    }
}

#[derive(Debug)]
pub enum SessionError {
    NotConfigured,
    Remote(RemoteError),
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionError::NotConfigured => write!(
                f,
                "Sync not configured. Set sync.server_url and sync.api_key in config"
            ),
            SessionError::Remote(e) => write!(f, "Failed to create sync client: {}", e),
        }
    }
}

impl std::error::Error for SessionError {}
