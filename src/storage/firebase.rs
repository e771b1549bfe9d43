//! Firebase Storage blob store.
//!
//! Talks to the Firebase Storage REST API with `reqwest`:
//!
//!   Upload:   `POST {base}/upload/storage/v1/b/{bucket}/o?uploadType=media&name={path}`
//!   Download: `GET  {base}/v0/b/{bucket}/o/{path}?alt=media`
//!   Metadata: `GET  {base}/v0/b/{bucket}/o/{path}`
//!   Delete:   `DELETE {base}/v0/b/{bucket}/o/{path}`
//!
//! When an emulator host is configured, requests go to `http://{host}`
//! without credentials.  Otherwise they go to
//! `https://firebasestorage.googleapis.com` with a bearer access token.

use std::time::Duration;

use futures::TryStreamExt;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::{RequestBuilder, Response, StatusCode};
use tokio::io::AsyncReadExt;
use tokio_util::io::StreamReader;
use tracing::{debug, info};

use super::backend::{BlobFuture, BlobReader, BlobStore};

/// Production Firebase Storage endpoint.
const FIREBASE_API_BASE: &str = "https://firebasestorage.googleapis.com";

/// Upper bound on a buffered upload body when none is configured (50 MiB).
pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 50 * 1024 * 1024;

/// Error bodies are truncated to this many bytes in messages.
const MAX_ERROR_BODY: usize = 1024;

/// Everything but unreserved characters is escaped; object names are a
/// single path segment, so `/` becomes `%2F`.
const OBJECT_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Blob store backed by a Firebase Storage bucket.
pub struct FirebaseBlobStore {
    client: reqwest::Client,
    bucket: String,
    /// `http://{emulator_host}` or the production endpoint.
    base_url: String,
    /// Bearer token for production requests.  `None` in emulator mode.
    access_token: Option<String>,
    /// Uploads are buffered before the POST; larger bodies are refused.
    max_upload_bytes: u64,
}

impl FirebaseBlobStore {
    /// Create a new Firebase blob store.
    ///
    /// With `emulator_host` set, credentials are ignored.  Without it an
    /// access token is required.
    pub fn new(
        bucket: &str,
        emulator_host: Option<&str>,
        access_token: Option<&str>,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        if bucket.is_empty() {
            anyhow::bail!("firebase storage bucket must be configured");
        }

        let (base_url, access_token) = match emulator_host.filter(|h| !h.is_empty()) {
            Some(host) => (format!("http://{}", host.trim_end_matches('/')), None),
            None => {
                let token = access_token
                    .filter(|t| !t.is_empty())
                    .ok_or_else(|| anyhow::anyhow!("firebase access token must be configured"))?;
                (FIREBASE_API_BASE.to_string(), Some(token.to_string()))
            }
        };

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create HTTP client: {e}"))?;

        info!(
            "Firebase blob store initialized: bucket={} endpoint={}",
            bucket, base_url
        );

        Ok(Self {
            client,
            bucket: bucket.to_string(),
            base_url,
            access_token,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
        })
    }

    /// Refuse upload bodies larger than `limit` bytes.
    pub fn with_max_upload_bytes(mut self, limit: u64) -> Self {
        self.max_upload_bytes = limit;
        self
    }

    /// Read at most `max_upload_bytes` from `body`, failing if it is longer.
    async fn buffer_upload(&self, body: BlobReader) -> anyhow::Result<Vec<u8>> {
        let mut data = Vec::new();
        body.take(self.max_upload_bytes.saturating_add(1))
            .read_to_end(&mut data)
            .await?;
        if data.len() as u64 > self.max_upload_bytes {
            anyhow::bail!(
                "upload body exceeds the {} byte limit",
                self.max_upload_bytes
            );
        }
        Ok(data)
    }

    fn encode(value: &str) -> String {
        utf8_percent_encode(value, OBJECT_ENCODE_SET).to_string()
    }

    fn upload_url(&self, path: &str) -> String {
        format!(
            "{}/upload/storage/v1/b/{}/o?uploadType=media&name={}",
            self.base_url,
            Self::encode(&self.bucket),
            Self::encode(path)
        )
    }

    fn object_url(&self, path: &str) -> String {
        format!(
            "{}/v0/b/{}/o/{}",
            self.base_url,
            Self::encode(&self.bucket),
            Self::encode(path)
        )
    }

    fn download_url(&self, path: &str) -> String {
        format!("{}?alt=media", self.object_url(path))
    }

    fn with_auth(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.access_token {
            Some(token) => request.header(AUTHORIZATION, format!("Bearer {token}")),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder, context: &str) -> anyhow::Result<Response> {
        self.with_auth(request)
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("Firebase {context} request failed: {e}"))
    }

    async fn error_from(context: &str, resp: Response) -> anyhow::Error {
        let status = resp.status();
        let mut body = resp.text().await.unwrap_or_default();
        if body.len() > MAX_ERROR_BODY {
            let mut cut = MAX_ERROR_BODY;
            while !body.is_char_boundary(cut) {
                cut -= 1;
            }
            body.truncate(cut);
        }
        anyhow::anyhow!("Firebase {context} failed (HTTP {status}): {body}")
    }
}

impl BlobStore for FirebaseBlobStore {
    fn write(&self, path: &str, body: BlobReader, content_type: &str) -> BlobFuture<'_, ()> {
        let url = self.upload_url(path);
        let path = path.to_string();
        let content_type = content_type.to_string();
        Box::pin(async move {
            let data = self.buffer_upload(body).await?;
            let size = data.len();

            let request = self
                .client
                .post(&url)
                .header(CONTENT_TYPE, content_type)
                .body(data);
            let resp = self.send(request, "upload").await?;
            if !resp.status().is_success() {
                return Err(Self::error_from("upload", resp).await);
            }

            debug!("Firebase upload {} ({} bytes)", path, size);
            Ok(())
        })
    }

    fn read(&self, path: &str) -> BlobFuture<'_, Option<BlobReader>> {
        let url = self.download_url(path);
        Box::pin(async move {
            let resp = self.send(self.client.get(&url), "download").await?;
            if resp.status() == StatusCode::NOT_FOUND {
                return Ok(None);
            }
            if !resp.status().is_success() {
                return Err(Self::error_from("download", resp).await);
            }

            let stream = resp
                .bytes_stream()
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e));
            Ok(Some(Box::pin(StreamReader::new(stream)) as BlobReader))
        })
    }

    fn exists(&self, path: &str) -> BlobFuture<'_, bool> {
        let url = self.object_url(path);
        Box::pin(async move {
            let resp = self.send(self.client.get(&url), "metadata").await?;
            if resp.status().is_success() {
                Ok(true)
            } else if resp.status() == StatusCode::NOT_FOUND {
                Ok(false)
            } else {
                Err(Self::error_from("metadata", resp).await)
            }
        })
    }

    fn delete(&self, path: &str) -> BlobFuture<'_, ()> {
        let url = self.object_url(path);
        let path = path.to_string();
        Box::pin(async move {
            let resp = self.send(self.client.delete(&url), "delete").await?;
            if resp.status() == StatusCode::NOT_FOUND {
                debug!("Firebase delete {}: already absent", path);
                return Ok(());
            }
            if !resp.status().is_success() {
                return Err(Self::error_from("delete", resp).await);
            }
            debug!("Firebase delete {}", path);
            Ok(())
        })
    }

    // Access is governed by Firebase security rules, so the ttl is not
    // encoded in the URL.
    fn generate_access_url(&self, path: &str, _ttl: Duration) -> BlobFuture<'_, String> {
        let url = self.download_url(path);
        Box::pin(async move { Ok(url) })
    }

    fn generate_upload_url(&self, path: &str, _ttl: Duration) -> BlobFuture<'_, String> {
        let url = self.upload_url(path);
        Box::pin(async move { Ok(url) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::backend::reader_from_bytes;

    fn emulator_store() -> FirebaseBlobStore {
        FirebaseBlobStore::new(
            "demo.appspot.com",
            Some("localhost:9199"),
            None,
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[test]
    fn test_emulator_urls() {
        let store = emulator_store();
        assert_eq!(
            store.download_url("projects/u1/abc.png"),
            "http://localhost:9199/v0/b/demo.appspot.com/o/projects%2Fu1%2Fabc.png?alt=media"
        );
        assert_eq!(
            store.upload_url("projects/u1/abc.png"),
            "http://localhost:9199/upload/storage/v1/b/demo.appspot.com/o?uploadType=media&name=projects%2Fu1%2Fabc.png"
        );
        assert!(store.access_token.is_none());
    }

    #[test]
    fn test_production_requires_token() {
        let err = FirebaseBlobStore::new("b", None, None, Duration::from_secs(5));
        assert!(err.is_err());

        let store =
            FirebaseBlobStore::new("b", None, Some("tok"), Duration::from_secs(5)).unwrap();
        assert!(store.object_url("x").starts_with("https://firebasestorage.googleapis.com/v0/b/b/o/"));
        assert_eq!(store.access_token.as_deref(), Some("tok"));
    }

    #[test]
    fn test_requires_bucket() {
        assert!(FirebaseBlobStore::new("", Some("localhost:9199"), None, Duration::from_secs(5))
            .is_err());
    }

    #[tokio::test]
    async fn test_oversized_upload_rejected_before_request() {
        let store = emulator_store().with_max_upload_bytes(8);
        let err = store
            .write(
                "projects/u1/h.png",
                reader_from_bytes(vec![0u8; 9]),
                "image/png",
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("8 byte limit"));
    }

    #[tokio::test]
    async fn test_buffer_upload_at_limit() {
        let store = emulator_store().with_max_upload_bytes(8);
        let data = store
            .buffer_upload(reader_from_bytes(vec![7u8; 8]))
            .await
            .unwrap();
        assert_eq!(data, vec![7u8; 8]);
    }

    #[tokio::test]
    async fn test_access_url_host() {
        let store =
            FirebaseBlobStore::new("b", None, Some("tok"), Duration::from_secs(5)).unwrap();
        let url = store
            .generate_access_url("projects/u1/h.png", Duration::from_secs(60))
            .await
            .unwrap();
        let parsed = reqwest::Url::parse(&url).unwrap();
        assert_eq!(parsed.host_str(), Some("firebasestorage.googleapis.com"));
    }
}
