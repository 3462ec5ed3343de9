//! JSON bodies exchanged with `moodsync-server`.

use serde::{Deserialize, Serialize};

use crate::models::{MoodEntry, RemoteDocument, RevisionToken};

/// Body of `PUT /entries/{id}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PutEntryRequest {
    pub expected_revision: Option<RevisionToken>,
    pub entry: MoodEntry,
}

/// Successful write of a document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevisionResponse {
    pub revision: RevisionToken,
}

/// Body of a 409 response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictResponse {
    pub current: Option<RemoteDocument>,
}

/// Successful blob upload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlobResponse {
    pub reference: String,
}

/// Body of `GET /me`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeResponse {
    pub owner_id: String,
}

/// Error body returned with 4xx/5xx statuses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}
