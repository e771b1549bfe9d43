//! Abstract blob store trait.
//!
//! Every blob backend must implement [`BlobStore`].  The trait works in
//! terms of opaque async byte streams so the service never buffers a whole
//! image unless the backend itself needs to.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Streaming blob body, owned by whoever holds it.  Dropping the reader
/// releases the underlying file handle or HTTP connection.
pub type BlobReader = Pin<Box<dyn AsyncRead + Send>>;

/// Boxed future returned by every blob store method.
pub type BlobFuture<'a, T> = Pin<Box<dyn Future<Output = anyhow::Result<T>> + Send + 'a>>;

/// Async path-addressed object storage contract.
pub trait BlobStore: Send + Sync + 'static {
    /// Write the full contents of `body` to `path`, replacing any existing
    /// object.
    fn write(&self, path: &str, body: BlobReader, content_type: &str) -> BlobFuture<'_, ()>;

    /// Open the object at `path` for reading.  Returns `None` if it does
    /// not exist.
    fn read(&self, path: &str) -> BlobFuture<'_, Option<BlobReader>>;

    /// Check whether an object exists at `path`.
    fn exists(&self, path: &str) -> BlobFuture<'_, bool>;

    /// Delete the object at `path`.  Deleting a missing object succeeds.
    fn delete(&self, path: &str) -> BlobFuture<'_, ()>;

    /// Produce a time-limited URL through which `path` can be fetched.
    fn generate_access_url(&self, path: &str, ttl: Duration) -> BlobFuture<'_, String>;

    /// Produce a time-limited URL through which a client can write `path`
    /// directly, bypassing the service.
    fn generate_upload_url(&self, path: &str, ttl: Duration) -> BlobFuture<'_, String>;
}

/// Wrap an in-memory buffer as a [`BlobReader`].
pub fn reader_from_bytes(data: impl Into<Bytes>) -> BlobReader {
    Box::pin(std::io::Cursor::new(data.into()))
}

/// Drain a [`BlobReader`] into a single buffer.
pub async fn read_to_bytes(mut reader: BlobReader) -> std::io::Result<Bytes> {
    let mut buf = Vec::new();
    reader.read_to_end(&mut buf).await?;
    Ok(Bytes::from(buf))
}

/// Unix timestamp `ttl` from now, used as the `expires` query parameter.
pub(crate) fn expiry_timestamp(ttl: Duration) -> i64 {
    let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
    chrono::Utc::now()
        .checked_add_signed(ttl)
        .unwrap_or(chrono::DateTime::<chrono::Utc>::MAX_UTC)
        .timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_reader_round_trip() {
        let reader = reader_from_bytes(&b"hello"[..]);
        let data = read_to_bytes(reader).await.unwrap();
        assert_eq!(&data[..], b"hello");
    }

    #[test]
    fn test_expiry_is_in_the_future() {
        let now = chrono::Utc::now().timestamp();
        let expires = expiry_timestamp(Duration::from_secs(60));
        assert!(expires >= now + 59);
        assert!(expires <= now + 61);
    }

    #[test]
    fn test_expiry_saturates() {
        let expires = expiry_timestamp(Duration::from_secs(u64::MAX));
        assert!(expires > chrono::Utc::now().timestamp());
    }
}
