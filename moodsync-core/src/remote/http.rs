//! REST client for `moodsync-server`.
//!
//! The server derives the owner from the bearer API key, so the `owner`
//! arguments of the trait methods are not sent on the wire.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Response, StatusCode};
use std::time::Duration;

use super::wire::{
    BlobResponse, ConflictResponse, ErrorResponse, MeResponse, PutEntryRequest, RevisionResponse,
};
use super::{BlobStore, DocumentStore, IdentityProvider, RemoteError};
use crate::entry_id::EntryId;
use crate::models::{MoodEntry, RemoteDocument, RevisionToken};

/// Per-request timeout.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

#[derive(Debug, Clone)]
pub struct HttpRemote {
    client: reqwest::Client,
    server_url: String,
    api_key: String,
}

fn transport_error(e: reqwest::Error) -> RemoteError {
    RemoteError::Transient(e.to_string())
}

/// Map a non-success status to a remote error.
async fn status_error(response: Response) -> RemoteError {
    let status = response.status();
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => RemoteError::AuthLost,
        StatusCode::NOT_FOUND => RemoteError::NotFound,
        StatusCode::CONFLICT => {
            let current = response
                .json::<ConflictResponse>()
                .await
                .ok()
                .and_then(|c| c.current);
            RemoteError::Conflict(current.map(Box::new))
        }
        StatusCode::TOO_MANY_REQUESTS | StatusCode::REQUEST_TIMEOUT => {
            RemoteError::Transient(format!("Server returned status {}", status))
        }
        s if s.is_server_error() => {
            RemoteError::Transient(format!("Server returned status {}", status))
        }
        _ => {
            let message = match response.json::<ErrorResponse>().await {
                Ok(body) => body.message,
                Err(_) => format!("Server returned status {}", status),
            };
            RemoteError::Rejected(message)
        }
    }
}

async fn decode<T: serde::de::DeserializeOwned>(response: Response) -> Result<T, RemoteError> {
    if !response.status().is_success() {
        return Err(status_error(response).await);
    }
    response
        .json()
        .await
        .map_err(|e| RemoteError::Transient(format!("Malformed response: {}", e)))
}

impl HttpRemote {
    pub fn new(server_url: String, api_key: String) -> Result<Self, RemoteError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(transport_error)?;
        Ok(Self {
            client,
            server_url,
            api_key,
        })
    }

    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    fn build_http_url(&self, path: &str) -> String {
        let base_url = if !self.server_url.starts_with("http://")
            && !self.server_url.starts_with("https://")
        {
            format!("http://{}", self.server_url)
        } else {
            self.server_url.clone()
        };

        format!("{}{}", base_url.trim_end_matches('/'), path)
    }

    fn authorized(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder.header("Authorization", format!("Bearer {}", self.api_key))
    }

    fn entry_url(&self, id: EntryId) -> String {
        self.build_http_url(&format!("/entries/{}", id))
    }
}

#[async_trait]
impl DocumentStore for HttpRemote {
    async fn fetch(
        &self,
        _owner: &str,
        id: EntryId,
    ) -> Result<Option<RemoteDocument>, RemoteError> {
        let response = self
            .authorized(self.client.get(self.entry_url(id)))
            .send()
            .await
            .map_err(transport_error)?;

        match decode(response).await {
            Ok(doc) => Ok(Some(doc)),
            Err(RemoteError::NotFound) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn put(
        &self,
        _owner: &str,
        entry: &MoodEntry,
        expected: Option<&RevisionToken>,
    ) -> Result<RevisionToken, RemoteError> {
        let body = PutEntryRequest {
            expected_revision: expected.cloned(),
            entry: entry.clone(),
        };
        let response = self
            .authorized(self.client.put(self.entry_url(entry.id)))
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;

        let written: RevisionResponse = decode(response).await?;
        Ok(written.revision)
    }

    async fn delete(
        &self,
        _owner: &str,
        id: EntryId,
        deleted_at: DateTime<Utc>,
        expected: Option<&RevisionToken>,
    ) -> Result<RevisionToken, RemoteError> {
        let mut url = format!(
            "{}?deleted_at={}",
            self.entry_url(id),
            deleted_at.timestamp_millis()
        );
        if let Some(rev) = expected {
            url = format!("{}&expected_revision={}", url, urlencoding::encode(rev.as_str()));
        }
        let response = self
            .authorized(self.client.delete(url))
            .send()
            .await
            .map_err(transport_error)?;

        let written: RevisionResponse = decode(response).await?;
        Ok(written.revision)
    }

    async fn changed_since(
        &self,
        _owner: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<RemoteDocument>, RemoteError> {
        let url = match since {
            Some(since) => self.build_http_url(&format!(
                "/entries?since={}",
                since.timestamp_millis()
            )),
            None => self.build_http_url("/entries"),
        };
        let response = self
            .authorized(self.client.get(url))
            .send()
            .await
            .map_err(transport_error)?;

        decode(response).await
    }
}

#[async_trait]
impl BlobStore for HttpRemote {
    async fn put_blob(
        &self,
        key: &str,
        content_type: &str,
        data: Vec<u8>,
    ) -> Result<String, RemoteError> {
        let url = self.build_http_url(&format!("/blobs/{}", urlencoding::encode(key)));
        let response = self
            .authorized(self.client.put(url))
            .header("Content-Type", content_type)
            .body(data)
            .send()
            .await
            .map_err(transport_error)?;

        let stored: BlobResponse = decode(response).await?;
        Ok(stored.reference)
    }

    async fn get_blob(&self, reference: &str) -> Result<Vec<u8>, RemoteError> {
        let url = self.build_http_url(&format!("/blobs/{}", urlencoding::encode(reference)));
        let response = self
            .authorized(self.client.get(url))
            .send()
            .await
            .map_err(transport_error)?;

        if !response.status().is_success() {
            return Err(status_error(response).await);
        }
        let bytes = response.bytes().await.map_err(transport_error)?;
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl IdentityProvider for HttpRemote {
    async fn current_owner(&self) -> Result<String, RemoteError> {
        let response = self
            .authorized(self.client.get(self.build_http_url("/me")))
            .send()
            .await
            .map_err(transport_error)?;

        let me: MeResponse = decode(response).await?;
        Ok(me.owner_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn remote(url: &str) -> HttpRemote {
        HttpRemote::new(url.to_string(), "test-key".to_string()).unwrap()
    }

    #[test]
    fn test_build_http_url() {
        assert_eq!(
            remote("http://localhost:8080").build_http_url("/me"),
            "http://localhost:8080/me"
        );
        assert_eq!(
            remote("https://sync.example.com/").build_http_url("/entries"),
            "https://sync.example.com/entries"
        );
        assert_eq!(
            remote("localhost:8080").build_http_url("/me"),
            "http://localhost:8080/me"
        );
    }

    #[test]
    fn test_entry_url_uses_encoded_id() {
        let id = EntryId::from_bytes([3; 16]);
        assert_eq!(
            remote("http://localhost:8080").entry_url(id),
            format!("http://localhost:8080/entries/{}", id)
        );
    }

    #[tokio::test]
    async fn test_unreachable_server_is_transient() {
        // Port 9 (discard) on localhost is expected to refuse connections
        let client = remote("http://127.0.0.1:9");
        let err = client.current_owner().await.unwrap_err();
        assert!(err.is_transient(), "got {:?}", err);
    }
}
