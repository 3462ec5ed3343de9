//! Moodsync Sync Server
//!
//! Stores mood documents with revision compare-and-set and holds photo
//! attachments, so several devices of one owner converge.
//!
//! # Configuration
//!
//! Environment variables:
//! - `MOODSYNC_PORT`: Port to listen on (default: 8080)
//! - `MOODSYNC_DATA_DIR`: Directory for the document database (default: ~/.local/share/moodsync-server)
//! - `MOODSYNC_CONFIG`: Path to config file (default: ~/.config/moodsync-server/config.yaml)
//!
//! # Config File Format
//!
//! ```yaml
//! api_keys:
//!   - key: "your-secret-key-here"
//!     owner_id: "alice"
//! ```

use moodsync::server::{router, ApiKeyStore, AppState, DocumentRepository, ServerConfig};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "moodsync_server=info,moodsync=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ServerConfig::from_env();
    tracing::info!("Data directory: {}", config.data_dir.display());
    tracing::info!("Config file: {}", config.config_path.display());

    let repo = match DocumentRepository::open(&config.data_dir).await {
        Ok(repo) => repo,
        Err(e) => {
            tracing::error!("Failed to open document store: {}", e);
            std::process::exit(1);
        }
    };

    let state = AppState {
        api_keys: Arc::new(ApiKeyStore::load(&config.config_path)),
        repo: Arc::new(repo),
    };
    let app = router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Starting server on {}", addr);

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!("Failed to bind {}: {}", addr, e);
            std::process::exit(1);
        }
    };
    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!("Server error: {}", e);
        std::process::exit(1);
    }
}
