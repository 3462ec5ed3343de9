//! HTTP routes of the sync server.
//!
//! - `GET /health`: Health check (no auth required)
//! - `GET /me`: The authenticated owner
//! - `GET /entries?since=<ms>`: Documents written after `since`, tombstones included
//! - `GET /entries/{id}`: One document
//! - `PUT /entries/{id}`: Compare-and-set write (`200`, `409` with the current document, `422`)
//! - `DELETE /entries/{id}?deleted_at=<ms>&expected_revision=`: Replace with a tombstone
//! - `PUT /blobs/{key}`, `GET /blobs/{reference}`: Attachment bytes

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::get,
    Extension, Json, Router,
};
use chrono::{DateTime, Utc};
use moodsync_core::remote::wire::{
    BlobResponse, ConflictResponse, ErrorResponse, MeResponse, PutEntryRequest, RevisionResponse,
};
use moodsync_core::{EntryId, RemoteDocument, RevisionToken};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use super::auth::{auth_middleware, ApiKeyStore, AuthOwner};
use super::repository::{DocumentRepository, RepositoryError};

/// Largest accepted request body (photos).
pub const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub api_keys: Arc<ApiKeyStore>,
    pub repo: Arc<DocumentRepository>,
}

/// Errors returned by handlers.
#[derive(Debug)]
pub enum ApiError {
    Repository(RepositoryError),
    BadRequest(String),
}

impl From<RepositoryError> for ApiError {
    fn from(e: RepositoryError) -> Self {
        ApiError::Repository(e)
    }
}

fn error_body(status: StatusCode, error: &str, message: String) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: error.to_string(),
            message,
        }),
    )
        .into_response()
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(message) => {
                error_body(StatusCode::BAD_REQUEST, "bad_request", message)
            }
            ApiError::Repository(RepositoryError::Conflict(current)) => (
                StatusCode::CONFLICT,
                Json(ConflictResponse {
                    current: current.map(|doc| *doc),
                }),
            )
                .into_response(),
            ApiError::Repository(RepositoryError::NotFound) => {
                error_body(StatusCode::NOT_FOUND, "not_found", "Not found".to_string())
            }
            ApiError::Repository(RepositoryError::Invalid(message)) => {
                error_body(StatusCode::UNPROCESSABLE_ENTITY, "invalid_entry", message)
            }
            ApiError::Repository(e) => {
                tracing::error!("Request failed: {}", e);
                error_body(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal",
                    "Internal server error".to_string(),
                )
            }
        }
    }
}

fn parse_id(raw: &str) -> Result<EntryId, ApiError> {
    raw.parse()
        .map_err(|e| ApiError::BadRequest(format!("Invalid entry id '{}': {}", raw, e)))
}

/// Health check response
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

/// Health check endpoint (no auth required)
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn me(Extension(owner): Extension<AuthOwner>) -> Json<MeResponse> {
    Json(MeResponse {
        owner_id: owner.owner_id,
    })
}

#[derive(Deserialize)]
struct SinceQuery {
    since: Option<i64>,
}

async fn list_entries(
    State(state): State<AppState>,
    Extension(owner): Extension<AuthOwner>,
    Query(query): Query<SinceQuery>,
) -> Result<Json<Vec<RemoteDocument>>, ApiError> {
    let since = match query.since {
        Some(millis) => Some(
            DateTime::<Utc>::from_timestamp_millis(millis)
                .ok_or_else(|| ApiError::BadRequest(format!("Invalid since '{}'", millis)))?,
        ),
        None => None,
    };
    let documents = state.repo.changed_since(&owner.owner_id, since).await?;
    Ok(Json(documents))
}

async fn get_entry(
    State(state): State<AppState>,
    Extension(owner): Extension<AuthOwner>,
    Path(id): Path<String>,
) -> Result<Json<RemoteDocument>, ApiError> {
    let id = parse_id(&id)?;
    let document = state
        .repo
        .get(&owner.owner_id, id)
        .await?
        .ok_or(RepositoryError::NotFound)?;
    Ok(Json(document))
}

async fn put_entry(
    State(state): State<AppState>,
    Extension(owner): Extension<AuthOwner>,
    Path(id): Path<String>,
    Json(body): Json<PutEntryRequest>,
) -> Result<Json<RevisionResponse>, ApiError> {
    let id = parse_id(&id)?;
    if body.entry.id != id {
        return Err(ApiError::BadRequest(
            "Entry id does not match the request path".to_string(),
        ));
    }
    let revision = state
        .repo
        .put(&owner.owner_id, &body.entry, body.expected_revision.as_ref())
        .await?;
    Ok(Json(RevisionResponse { revision }))
}

#[derive(Deserialize)]
struct DeleteQuery {
    expected_revision: Option<String>,
    deleted_at: Option<i64>,
}

async fn delete_entry(
    State(state): State<AppState>,
    Extension(owner): Extension<AuthOwner>,
    Path(id): Path<String>,
    Query(query): Query<DeleteQuery>,
) -> Result<Json<RevisionResponse>, ApiError> {
    let id = parse_id(&id)?;
    let expected = query.expected_revision.map(RevisionToken::new);
    let deleted_at = match query.deleted_at {
        Some(millis) => Some(DateTime::<Utc>::from_timestamp_millis(millis).ok_or_else(|| {
            ApiError::BadRequest("deleted_at is out of range".to_string())
        })?),
        None => None,
    };
    let revision = state
        .repo
        .delete(&owner.owner_id, id, deleted_at, expected.as_ref())
        .await?;
    Ok(Json(RevisionResponse { revision }))
}

async fn put_blob(
    State(state): State<AppState>,
    Extension(owner): Extension<AuthOwner>,
    Path(key): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<BlobResponse>, ApiError> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/octet-stream");
    let reference = state
        .repo
        .put_blob(&owner.owner_id, &key, content_type, &body)
        .await?;
    Ok(Json(BlobResponse { reference }))
}

async fn get_blob(
    State(state): State<AppState>,
    Extension(owner): Extension<AuthOwner>,
    Path(reference): Path<String>,
) -> Result<Response, ApiError> {
    let (content_type, data) = state.repo.get_blob(&owner.owner_id, &reference).await?;
    Ok(([(header::CONTENT_TYPE, content_type)], data).into_response())
}

/// Build the application router.
pub fn router(state: AppState) -> Router {
    // Public routes (no auth)
    let public_routes = Router::new().route("/health", get(health));

    // Protected routes (auth required)
    let protected_routes = Router::new()
        .route("/me", get(me))
        .route("/entries", get(list_entries))
        .route(
            "/entries/{id}",
            get(get_entry).put(put_entry).delete(delete_entry),
        )
        .route("/blobs/{key}", get(get_blob).put(put_blob))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use moodsync_core::{EntryIdGenerator, MoodCategory, MoodEntry};
    use tempfile::TempDir;
    use tower::ServiceExt;

    const KEY: &str = "test-key";

    async fn app() -> (Router, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let repo = DocumentRepository::open(temp_dir.path()).await.unwrap();
        let mut keys = ApiKeyStore::default();
        keys.insert(KEY, "alice");
        let state = AppState {
            api_keys: Arc::new(keys),
            repo: Arc::new(repo),
        };
        (router(state), temp_dir)
    }

    fn request(method: &str, uri: &str) -> axum::http::request::Builder {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Bearer {}", KEY))
    }

    fn json_request<T: Serialize>(method: &str, uri: &str, body: &T) -> Request<Body> {
        request(method, uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(serde_json::to_vec(body).unwrap()))
            .unwrap()
    }

    async fn read_json<T: serde::de::DeserializeOwned>(response: Response) -> T {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn entry() -> MoodEntry {
        let id = EntryIdGenerator::new("test").generate();
        MoodEntry::new(id, "alice", MoodCategory::Happiness, Utc::now()).with_note("hi")
    }

    #[tokio::test]
    async fn test_health_needs_no_auth() {
        let (app, _dir) = app().await;
        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_me_requires_valid_key() {
        let (app, _dir) = app().await;

        let response = app
            .clone()
            .oneshot(Request::get("/me").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = app
            .clone()
            .oneshot(
                Request::get("/me")
                    .header(header::AUTHORIZATION, "Bearer wrong")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = app
            .oneshot(request("GET", "/me").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let me: MeResponse = read_json(response).await;
        assert_eq!(me.owner_id, "alice");
    }

    #[tokio::test]
    async fn test_put_conflict_and_delete() {
        let (app, _dir) = app().await;
        let e = entry();
        let uri = format!("/entries/{}", e.id);

        let create = PutEntryRequest {
            expected_revision: None,
            entry: e.clone(),
        };
        let response = app
            .clone()
            .oneshot(json_request("PUT", &uri, &create))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let written: RevisionResponse = read_json(response).await;

        // Creating again conflicts and returns the current document
        let response = app
            .clone()
            .oneshot(json_request("PUT", &uri, &create))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        let conflict: ConflictResponse = read_json(response).await;
        let current = conflict.current.unwrap();
        assert_eq!(current.revision, written.revision);
        assert!(current.entry.same_content(&e));

        // Deleting device's clock is a minute ahead of the stored write
        let deleted_at = e.last_modified.timestamp_millis() + 60_000;

        let response = app
            .clone()
            .oneshot(
                request(
                    "DELETE",
                    &format!(
                        "{}?expected_revision={}&deleted_at={}",
                        uri, written.revision, deleted_at
                    ),
                )
                .body(Body::empty())
                .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(request("GET", &uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let doc: RemoteDocument = read_json(response).await;
        assert!(doc.deleted);
        assert_eq!(doc.entry.last_modified.timestamp_millis(), deleted_at);
    }

    #[tokio::test]
    async fn test_invalid_writes_are_rejected() {
        let (app, _dir) = app().await;
        let e = entry();
        let other = entry();

        // Path and body disagree
        let response = app
            .clone()
            .oneshot(json_request(
                "PUT",
                &format!("/entries/{}", other.id),
                &PutEntryRequest {
                    expected_revision: None,
                    entry: e.clone(),
                },
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        // Trigger too long
        let response = app
            .clone()
            .oneshot(json_request(
                "PUT",
                &format!("/entries/{}", e.id),
                &PutEntryRequest {
                    expected_revision: None,
                    entry: e.clone().with_trigger("x".repeat(25)),
                },
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let response = app
            .oneshot(request("GET", "/entries/not-an-id").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_list_entries_since() {
        let (app, _dir) = app().await;
        for e in [entry(), entry()] {
            let response = app
                .clone()
                .oneshot(json_request(
                    "PUT",
                    &format!("/entries/{}", e.id),
                    &PutEntryRequest {
                        expected_revision: None,
                        entry: e,
                    },
                ))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }

        let response = app
            .clone()
            .oneshot(request("GET", "/entries").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let all: Vec<RemoteDocument> = read_json(response).await;
        assert_eq!(all.len(), 2);

        let since = all[0].server_time.timestamp_millis();
        let response = app
            .oneshot(
                request("GET", &format!("/entries?since={}", since))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let newer: Vec<RemoteDocument> = read_json(response).await;
        assert_eq!(newer.len(), 1);
        assert_eq!(newer[0].entry.id, all[1].entry.id);
    }

    #[tokio::test]
    async fn test_blob_roundtrip() {
        let (app, _dir) = app().await;
        let response = app
            .clone()
            .oneshot(
                request("PUT", "/blobs/photo-1")
                    .header(header::CONTENT_TYPE, "image/png")
                    .body(Body::from(vec![1u8, 2, 3]))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let stored: BlobResponse = read_json(response).await;

        let response = app
            .oneshot(
                request("GET", &format!("/blobs/{}", stored.reference))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "image/png");
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(bytes.as_ref(), &[1, 2, 3]);
    }
}
