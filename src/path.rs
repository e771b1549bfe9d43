//! Content-addressable blob paths.
//!
//! A project's blob lives at `projects/{owner_id}/{content_hash}.png`.
//! [`derive_path`] is the only place that builds such a path.

use crate::errors::PathError;

/// Top-level prefix for every project blob.
pub const PROJECT_PREFIX: &str = "projects";

/// File extension for project blobs.
pub const BLOB_EXTENSION: &str = "png";

/// Content type written alongside every project blob.
pub const BLOB_CONTENT_TYPE: &str = "image/png";

/// Map `(owner_id, content_hash)` to the canonical object-store path.
pub fn derive_path(owner_id: &str, content_hash: &str) -> Result<String, PathError> {
    check_segment(owner_id, "owner id")?;
    check_segment(content_hash, "content hash")?;
    Ok(format!(
        "{PROJECT_PREFIX}/{owner_id}/{content_hash}.{BLOB_EXTENSION}"
    ))
}

fn check_segment(value: &str, segment: &'static str) -> Result<(), PathError> {
    if value.is_empty() {
        return Err(PathError::Empty { segment });
    }
    if value.contains('/') || value.contains('\\') || value.contains("..") {
        return Err(PathError::Unsafe { segment });
    }
    Ok(())
}
