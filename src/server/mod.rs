//! Server-side modules for the moodsync sync server.

pub mod auth;
pub mod config;
pub mod repository;
pub mod routes;

pub use auth::{ApiKeyStore, AuthOwner};
pub use config::ServerConfig;
pub use repository::{DocumentRepository, RepositoryError};
pub use routes::{router, AppState};
