//! Local filesystem blob store.
//!
//! Objects are stored as plain files under a configurable root directory;
//! the blob path is used directly as the relative file path.
//!
//! All writes follow crash-only design: stream to a temp file, fsync,
//! rename.  A crash mid-write leaves at most a stray file under `.tmp/`.
//!
//! Access and upload URLs are signed with HMAC-SHA256 over
//! `method\npath\nexpires`, so whatever serves `base_url` can check them
//! with [`LocalBlobStore::verify_url_signature`].

use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use hmac::{Hmac, Mac};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use tracing::debug;

use super::backend::{expiry_timestamp, BlobFuture, BlobReader, BlobStore};

type HmacSha256 = Hmac<Sha256>;

/// Characters escaped in URL paths.  `/` is kept so the path stays readable.
const PATH_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~')
    .remove(b'/');

/// HTTP method signed into read URLs.
pub const READ_METHOD: &str = "GET";
/// HTTP method signed into upload URLs.
pub const WRITE_METHOD: &str = "PUT";

/// Stores blobs on the local filesystem.
pub struct LocalBlobStore {
    /// Root directory for all stored blobs.
    root: PathBuf,
    /// Public base URL under which `root` is served.
    base_url: String,
    signing_secret: String,
}

impl LocalBlobStore {
    /// Create a new `LocalBlobStore` rooted at `root`.
    ///
    /// The directory will be created if it does not exist.
    pub fn new(
        root: impl Into<PathBuf>,
        base_url: &str,
        signing_secret: &str,
    ) -> anyhow::Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(root.join(".tmp"))?;
        Ok(Self {
            root,
            base_url: base_url.trim_end_matches('/').to_string(),
            signing_secret: signing_secret.to_string(),
        })
    }

    /// Resolve a blob path to a file under the root, refusing anything that
    /// could escape it.
    fn resolve(&self, path: &str) -> anyhow::Result<PathBuf> {
        if path.is_empty() {
            anyhow::bail!("empty blob path");
        }
        for component in Path::new(path).components() {
            match component {
                Component::Normal(_) => {}
                _ => anyhow::bail!("unsafe component in blob path: {path}"),
            }
        }
        Ok(self.root.join(path))
    }

    fn temp_path(&self) -> PathBuf {
        let id = uuid::Uuid::new_v4();
        self.root.join(".tmp").join(format!("tmp-{id}"))
    }

    fn sign(&self, method: &str, path: &str, expires: i64) -> String {
        let mut mac = HmacSha256::new_from_slice(self.signing_secret.as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(format!("{method}\n{path}\n{expires}").as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    fn signed_url(&self, method: &str, path: &str, ttl: Duration) -> String {
        let expires = expiry_timestamp(ttl);
        let signature = self.sign(method, path, expires);
        format!(
            "{}/{}?expires={}&signature={}",
            self.base_url,
            utf8_percent_encode(path, PATH_ENCODE_SET),
            expires,
            signature
        )
    }

    /// Check a signature produced for `method` on `path`.
    ///
    /// Returns `false` once `expires` has passed.  The comparison is
    /// constant-time.
    pub fn verify_url_signature(
        &self,
        method: &str,
        path: &str,
        expires: i64,
        signature: &str,
    ) -> bool {
        if expires < chrono::Utc::now().timestamp() {
            return false;
        }
        let expected = self.sign(method, path, expires);
        expected.as_bytes().ct_eq(signature.as_bytes()).into()
    }
}

impl BlobStore for LocalBlobStore {
    fn write(&self, path: &str, mut body: BlobReader, _content_type: &str) -> BlobFuture<'_, ()> {
        let path = path.to_string();
        Box::pin(async move {
            let final_path = self.resolve(&path)?;
            if let Some(parent) = final_path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }

            let tmp_path = self.temp_path();
            let result = async {
                let mut file = tokio::fs::File::create(&tmp_path).await?;
                let written = tokio::io::copy(&mut body, &mut file).await?;
                file.sync_all().await?;
                drop(file);
                tokio::fs::rename(&tmp_path, &final_path).await?;
                Ok::<u64, std::io::Error>(written)
            }
            .await;

            match result {
                Ok(written) => {
                    debug!("local blob write {} ({} bytes)", path, written);
                    Ok(())
                }
                Err(e) => {
                    let _ = tokio::fs::remove_file(&tmp_path).await;
                    Err(anyhow::anyhow!("failed to write blob {path}: {e}"))
                }
            }
        })
    }

    fn read(&self, path: &str) -> BlobFuture<'_, Option<BlobReader>> {
        let path = path.to_string();
        Box::pin(async move {
            let file_path = self.resolve(&path)?;
            match tokio::fs::File::open(&file_path).await {
                Ok(file) => Ok(Some(Box::pin(file) as BlobReader)),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
                Err(e) => Err(anyhow::anyhow!("failed to open blob {path}: {e}")),
            }
        })
    }

    fn exists(&self, path: &str) -> BlobFuture<'_, bool> {
        let path = path.to_string();
        Box::pin(async move {
            let file_path = self.resolve(&path)?;
            Ok(tokio::fs::try_exists(&file_path).await?)
        })
    }

    fn delete(&self, path: &str) -> BlobFuture<'_, ()> {
        let path = path.to_string();
        Box::pin(async move {
            let file_path = self.resolve(&path)?;
            match tokio::fs::remove_file(&file_path).await {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(anyhow::anyhow!("failed to delete blob {path}: {e}")),
            }
        })
    }

    fn generate_access_url(&self, path: &str, ttl: Duration) -> BlobFuture<'_, String> {
        let path = path.to_string();
        Box::pin(async move {
            self.resolve(&path)?;
            Ok(self.signed_url(READ_METHOD, &path, ttl))
        })
    }

    fn generate_upload_url(&self, path: &str, ttl: Duration) -> BlobFuture<'_, String> {
        let path = path.to_string();
        Box::pin(async move {
            self.resolve(&path)?;
            Ok(self.signed_url(WRITE_METHOD, &path, ttl))
        })
    }
}
