//! Project records and the payload shapes that mutate them.
//!
//! Three shapes touch a [`Project`]:
//!
//! - [`NewProject`]: the client create payload.  It has no owner or
//!   storage URL field, so neither can be smuggled in by a client.
//! - [`ProjectUpdate`]: the public partial update (title, visibility, tags).
//! - [`ProjectPatch`]: the internal raw update used only by the service
//!   for content hash, storage URL and dimensions.

use chrono::{DateTime, Utc};
use garde::Validate;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Maximum title length in characters (after trimming).
pub const MAX_TITLE_CHARS: usize = 200;

/// Maximum number of tags on a project.
pub const MAX_TAGS: usize = 20;

/// Maximum tag length in characters.
pub const MAX_TAG_CHARS: usize = 50;

/// Maximum thumbnail data URI length in bytes (500 KiB).
pub const MAX_THUMBNAIL_BYTES: usize = 500 * 1024;

/// Required prefix for thumbnail data URIs.
pub const THUMBNAIL_PREFIX: &str = "data:image/";

/// A project metadata record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    /// Store-assigned identifier.
    pub id: String,
    /// Owner identity, always taken from the authenticated caller.
    pub owner_id: String,
    pub title: String,
    /// Empty, or 64 lowercase hex characters.
    pub content_hash: String,
    /// Empty until a blob upload is confirmed.
    #[serde(rename = "storageURL")]
    pub storage_url: String,
    pub thumbnail_data: String,
    pub width: u32,
    pub height: u32,
    pub is_public: bool,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Project {
    /// Apply every supplied field of `patch` and stamp `updated_at`.
    pub fn apply(&mut self, patch: &ProjectPatch, now: DateTime<Utc>) {
        if let Some(title) = &patch.title {
            self.title = title.clone();
        }
        if let Some(hash) = &patch.content_hash {
            self.content_hash = hash.clone();
        }
        if let Some(url) = &patch.storage_url {
            self.storage_url = url.clone();
        }
        if let Some(thumbnail) = &patch.thumbnail_data {
            self.thumbnail_data = thumbnail.clone();
        }
        if let Some(width) = patch.width {
            self.width = width;
        }
        if let Some(height) = patch.height {
            self.height = height;
        }
        if let Some(is_public) = patch.is_public {
            self.is_public = is_public;
        }
        if let Some(tags) = &patch.tags {
            self.tags = tags.clone();
        }
        self.updated_at = now;
    }

    /// Whether `caller` may read this project.
    pub fn readable_by(&self, caller: &str) -> bool {
        self.owner_id == caller || self.is_public
    }
}

/// Client payload for creating (or upserting) a project.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct NewProject {
    #[garde(length(chars, min = 1, max = 200))]
    pub title: String,
    #[serde(default)]
    #[garde(custom(validate_content_hash))]
    pub content_hash: String,
    #[serde(default)]
    #[garde(custom(validate_thumbnail_data))]
    pub thumbnail_data: String,
    #[serde(default)]
    #[garde(skip)]
    pub width: u32,
    #[serde(default)]
    #[garde(skip)]
    pub height: u32,
    #[serde(default)]
    #[garde(skip)]
    pub is_public: bool,
    #[serde(default)]
    #[garde(custom(validate_tags))]
    pub tags: Vec<String>,
}

impl NewProject {
    /// Trim the title and normalize tags.
    pub fn sanitize(&mut self) {
        self.title = self.title.trim().to_string();
        normalize_tags(&mut self.tags);
    }

    /// Build a fresh record owned by `owner_id`.  The storage URL is
    /// always empty; the store assigns id and timestamps.
    pub fn into_project(self, owner_id: &str, now: DateTime<Utc>) -> Project {
        Project {
            id: String::new(),
            owner_id: owner_id.to_string(),
            title: self.title,
            content_hash: self.content_hash,
            storage_url: String::new(),
            thumbnail_data: self.thumbnail_data,
            width: self.width,
            height: self.height,
            is_public: self.is_public,
            tags: self.tags,
            created_at: now,
            updated_at: now,
        }
    }

    /// Patch that replaces an existing record's content with this payload.
    ///
    /// The storage URL is reset because the old blob reference no longer
    /// matches the new content hash.
    pub fn content_patch(&self) -> ProjectPatch {
        ProjectPatch {
            content_hash: Some(self.content_hash.clone()),
            storage_url: Some(String::new()),
            thumbnail_data: Some(self.thumbnail_data.clone()),
            width: Some(self.width),
            height: Some(self.height),
            is_public: Some(self.is_public),
            tags: Some(self.tags.clone()),
            ..ProjectPatch::default()
        }
    }
}

/// Public partial update.  Unset fields keep their stored values.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ProjectUpdate {
    #[serde(default)]
    #[garde(length(chars, min = 1, max = 200))]
    pub title: Option<String>,
    #[serde(default)]
    #[garde(skip)]
    pub is_public: Option<bool>,
    #[serde(default)]
    #[garde(custom(validate_optional_tags))]
    pub tags: Option<Vec<String>>,
}

impl ProjectUpdate {
    /// Trim the title and normalize tags.
    pub fn sanitize(&mut self) {
        if let Some(title) = self.title.as_mut() {
            *title = title.trim().to_string();
        }
        if let Some(tags) = self.tags.as_mut() {
            normalize_tags(tags);
        }
    }

    /// Whether the update carries no fields at all.
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.is_public.is_none() && self.tags.is_none()
    }

    pub fn to_patch(&self) -> ProjectPatch {
        ProjectPatch {
            title: self.title.clone(),
            is_public: self.is_public,
            tags: self.tags.clone(),
            ..ProjectPatch::default()
        }
    }
}

/// Internal raw update.  Never deserialized from client input.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProjectPatch {
    pub title: Option<String>,
    pub content_hash: Option<String>,
    pub storage_url: Option<String>,
    pub thumbnail_data: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub is_public: Option<bool>,
    pub tags: Option<Vec<String>>,
}

impl ProjectPatch {
    /// Patch that links a confirmed blob.
    pub fn storage_url(url: impl Into<String>) -> Self {
        Self {
            storage_url: Some(url.into()),
            ..Self::default()
        }
    }
}

/// Lowercase hex SHA-256 of `data`, the canonical content hash.
pub fn content_hash(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Whether `value` is a well-formed content hash (64 lowercase hex chars).
pub fn is_content_hash(value: &str) -> bool {
    value.len() == 64 && value.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

fn normalize_tags(tags: &mut [String]) {
    for tag in tags.iter_mut() {
        *tag = tag.trim().to_lowercase();
    }
}

// -- Validators ---------------------------------------------------------------

fn validate_content_hash(value: &str, _ctx: &()) -> garde::Result {
    if value.is_empty() || is_content_hash(value) {
        Ok(())
    } else {
        Err(garde::Error::new(
            "must be a 64-character lowercase hex string",
        ))
    }
}

fn validate_thumbnail_data(value: &str, _ctx: &()) -> garde::Result {
    if value.is_empty() {
        return Ok(());
    }
    if value.len() > MAX_THUMBNAIL_BYTES {
        return Err(garde::Error::new(format!(
            "must be {MAX_THUMBNAIL_BYTES} bytes or less"
        )));
    }
    if !value.starts_with(THUMBNAIL_PREFIX) {
        return Err(garde::Error::new("must be a data:image/ URI"));
    }
    Ok(())
}

fn validate_tags(value: &[String], _ctx: &()) -> garde::Result {
    if value.len() > MAX_TAGS {
        return Err(garde::Error::new(format!(
            "maximum {MAX_TAGS} tags allowed"
        )));
    }
    if value.iter().any(|tag| tag.chars().count() > MAX_TAG_CHARS) {
        return Err(garde::Error::new(format!(
            "each tag must be {MAX_TAG_CHARS} characters or less"
        )));
    }
    Ok(())
}

fn validate_optional_tags(value: &Option<Vec<String>>, ctx: &()) -> garde::Result {
    match value {
        Some(tags) => validate_tags(tags, ctx),
        None => Ok(()),
    }
}
