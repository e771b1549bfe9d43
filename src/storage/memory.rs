//! In-memory blob store.
//!
//! Objects are held in a `tokio::sync::RwLock<HashMap<...>>` keyed by
//! path.  Nothing is persisted.  Access URLs point at a configurable base
//! URL and are not signed; this backend exists for tests and ephemeral
//! deployments.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use bytes::Bytes;
use tracing::debug;

use super::backend::{
    expiry_timestamp, read_to_bytes, reader_from_bytes, BlobFuture, BlobReader, BlobStore,
};

/// Base URL used when none is configured.
pub const DEFAULT_MEMORY_BASE_URL: &str = "http://localhost:9199/blobs";

/// A stored object: its bytes and content type.
#[derive(Debug, Clone)]
pub struct MemoryObject {
    pub data: Bytes,
    pub content_type: String,
}

/// In-memory blob store.
pub struct MemoryBlobStore {
    objects: tokio::sync::RwLock<HashMap<String, MemoryObject>>,
    /// Number of `write` calls that reached the store.
    writes: AtomicUsize,
    base_url: String,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::with_base_url(DEFAULT_MEMORY_BASE_URL)
    }

    /// Create a store whose URLs are rooted at `base_url`.
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            objects: tokio::sync::RwLock::new(HashMap::new()),
            writes: AtomicUsize::new(0),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// How many times `write` has been called.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Snapshot of the object at `path`, if any.
    pub async fn object(&self, path: &str) -> Option<MemoryObject> {
        self.objects.read().await.get(path).cloned()
    }

    fn url_for(&self, path: &str, ttl: Duration, mode: &str) -> String {
        format!(
            "{}/{}?mode={}&expires={}",
            self.base_url,
            path,
            mode,
            expiry_timestamp(ttl)
        )
    }
}

impl Default for MemoryBlobStore {
    fn default() -> Self {
        Self::new()
    }
}

impl BlobStore for MemoryBlobStore {
    fn write(&self, path: &str, body: BlobReader, content_type: &str) -> BlobFuture<'_, ()> {
        let path = path.to_string();
        let content_type = content_type.to_string();
        Box::pin(async move {
            self.writes.fetch_add(1, Ordering::SeqCst);
            let data = read_to_bytes(body).await?;
            debug!("memory blob write {} ({} bytes)", path, data.len());
            self.objects
                .write()
                .await
                .insert(path, MemoryObject { data, content_type });
            Ok(())
        })
    }

    fn read(&self, path: &str) -> BlobFuture<'_, Option<BlobReader>> {
        let path = path.to_string();
        Box::pin(async move {
            let objects = self.objects.read().await;
            Ok(objects.get(&path).map(|o| reader_from_bytes(o.data.clone())))
        })
    }

    fn exists(&self, path: &str) -> BlobFuture<'_, bool> {
        let path = path.to_string();
        Box::pin(async move { Ok(self.objects.read().await.contains_key(&path)) })
    }

    fn delete(&self, path: &str) -> BlobFuture<'_, ()> {
        let path = path.to_string();
        Box::pin(async move {
            self.objects.write().await.remove(&path);
            Ok(())
        })
    }

    fn generate_access_url(&self, path: &str, ttl: Duration) -> BlobFuture<'_, String> {
        let url = self.url_for(path, ttl, "read");
        Box::pin(async move { Ok(url) })
    }

    fn generate_upload_url(&self, path: &str, ttl: Duration) -> BlobFuture<'_, String> {
        let url = self.url_for(path, ttl, "write");
        Box::pin(async move { Ok(url) })
    }
}
