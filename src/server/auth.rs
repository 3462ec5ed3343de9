//! Bearer API key authentication.

use axum::{
    extract::{Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use moodsync_core::remote::wire::ErrorResponse;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

use super::routes::AppState;

/// API key entry in config
#[derive(Debug, Clone, Deserialize)]
struct ApiKeyEntry {
    key: String,
    owner_id: String,
}

/// Config file structure
#[derive(Debug, Clone, Deserialize, Default)]
struct ConfigFile {
    #[serde(default)]
    api_keys: Vec<ApiKeyEntry>,
}

/// Authenticated owner, added to request extensions after auth
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthOwner {
    pub owner_id: String,
}

/// API key store - maps key -> owner
#[derive(Debug, Clone, Default)]
pub struct ApiKeyStore {
    keys: HashMap<String, AuthOwner>,
}

impl ApiKeyStore {
    /// Load API keys from the YAML config file.
    ///
    /// A missing or unreadable file yields an empty store, so every
    /// authenticated request fails rather than the server refusing to start.
    pub fn load(config_path: &Path) -> Self {
        match std::fs::read_to_string(config_path) {
            Ok(contents) => match Self::from_yaml(&contents) {
                Ok(store) => {
                    tracing::info!("Loaded {} API key(s)", store.len());
                    store
                }
                Err(e) => {
                    tracing::warn!("Failed to parse config file: {}", e);
                    Self::default()
                }
            },
            Err(e) => {
                tracing::warn!(
                    "Failed to read config file {}: {}",
                    config_path.display(),
                    e
                );
                tracing::warn!("No API keys loaded - all authenticated requests will fail");
                Self::default()
            }
        }
    }

    pub fn from_yaml(contents: &str) -> Result<Self, serde_yaml::Error> {
        let config: ConfigFile = serde_yaml::from_str(contents)?;
        let keys = config
            .api_keys
            .into_iter()
            .filter(|entry| !entry.key.is_empty() && !entry.owner_id.is_empty())
            .map(|entry| {
                (
                    entry.key,
                    AuthOwner {
                        owner_id: entry.owner_id,
                    },
                )
            })
            .collect();
        Ok(Self { keys })
    }

    pub fn insert(&mut self, key: impl Into<String>, owner_id: impl Into<String>) {
        self.keys.insert(
            key.into(),
            AuthOwner {
                owner_id: owner_id.into(),
            },
        );
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Validate an API key and return the associated owner
    pub fn validate(&self, key: &str) -> Option<AuthOwner> {
        self.keys.get(key).cloned()
    }
}

fn unauthorized(error: &str, message: &str) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(ErrorResponse {
            error: error.to_string(),
            message: message.to_string(),
        }),
    )
        .into_response()
}

/// Authentication middleware
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let auth_header = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok());

    let api_key = match auth_header {
        Some(h) => match h.strip_prefix("Bearer ") {
            Some(key) => key,
            None => {
                return unauthorized(
                    "invalid_auth",
                    "Authorization header must use Bearer scheme",
                )
            }
        },
        None => return unauthorized("missing_auth", "Authorization header required"),
    };

    match state.api_keys.validate(api_key) {
        Some(owner) => {
            request.extensions_mut().insert(owner);
            next.run(request).await
        }
        None => unauthorized("invalid_key", "Invalid API key"),
    }
}
