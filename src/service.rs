//! Project orchestration service.
//!
//! [`ProjectService`] is the only component that touches both the metadata
//! store and the blob store.  It owns every ownership decision, runs input
//! validation before any store mutation, and is the single caller of
//! [`derive_path`].  The authenticated caller identity is always an explicit
//! parameter; nothing in a client payload can set the owner or storage URL.

use std::sync::Arc;

use chrono::Utc;
use garde::Validate;
use serde::Serialize;
use tokio::io::AsyncReadExt;
use tracing::{debug, info, warn};

use crate::config::ServiceConfig;
use crate::errors::ProjectError;
use crate::metadata::store::{ProjectStore, UpsertOutcome};
use crate::model::{NewProject, Project, ProjectPatch, ProjectUpdate};
use crate::path::{derive_path, BLOB_CONTENT_TYPE};
use crate::storage::backend::{BlobReader, BlobStore};

/// The eight bytes every PNG file starts with.
pub const PNG_SIGNATURE: [u8; 8] = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];

pub type ProjectResult<T> = Result<T, ProjectError>;

/// Outcome of [`ProjectService::create_or_upsert`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateProjectResult {
    pub project_id: String,
    /// True when an existing project already held the same content hash
    /// and nothing was written.
    pub duplicate: bool,
}

/// Coordinates project metadata and blob storage for one deployment.
pub struct ProjectService {
    projects: Arc<dyn ProjectStore>,
    blobs: Arc<dyn BlobStore>,
    config: ServiceConfig,
}

impl ProjectService {
    pub fn new(
        projects: Arc<dyn ProjectStore>,
        blobs: Arc<dyn BlobStore>,
        config: ServiceConfig,
    ) -> Self {
        Self {
            projects,
            blobs,
            config,
        }
    }

    // -- Create ---------------------------------------------------------------

    /// Create a project, or replace the content of the owner's project with
    /// the same title.
    ///
    /// If the owner already has a project with the same content hash, its
    /// id is returned with `duplicate = true` and nothing is written.
    pub async fn create_or_upsert(
        &self,
        owner_id: &str,
        mut input: NewProject,
    ) -> ProjectResult<CreateProjectResult> {
        require_id(owner_id, "owner id")?;
        input.sanitize();
        input.validate()?;

        if !input.content_hash.is_empty() {
            if let Some(existing) = self
                .projects
                .find_by_owner_and_hash(owner_id, &input.content_hash)
                .await?
            {
                debug!(
                    "project {} already holds content {}",
                    existing.id, input.content_hash
                );
                return Ok(CreateProjectResult {
                    project_id: existing.id,
                    duplicate: true,
                });
            }
        }

        let patch = input.content_patch();
        let project = input.into_project(owner_id, Utc::now());
        let outcome = self.projects.upsert_by_title(project, patch).await?;
        match &outcome {
            UpsertOutcome::Created(id) => info!("created project {} for {}", id, owner_id),
            UpsertOutcome::Updated(id) => info!("replaced content of project {} for {}", id, owner_id),
        }

        Ok(CreateProjectResult {
            project_id: outcome.id().to_string(),
            duplicate: false,
        })
    }

    // -- Blob flows -----------------------------------------------------------

    /// Stream a PNG into the project's content-addressed path and link it.
    ///
    /// Returns the storage URL recorded on the project.
    pub async fn upload_blob(
        &self,
        owner_id: &str,
        project_id: &str,
        body: BlobReader,
    ) -> ProjectResult<String> {
        let project = self.load_owned(owner_id, project_id).await?;
        let path = content_path(&project)?;
        let body = check_png_signature(body).await?;

        self.blobs.write(&path, body, BLOB_CONTENT_TYPE).await?;
        info!("wrote blob {} for project {}", path, project_id);

        self.link_blob(project_id, &path).await
    }

    /// Link a blob the client uploaded directly through an upload URL.
    pub async fn confirm_upload(&self, owner_id: &str, project_id: &str) -> ProjectResult<String> {
        let project = self.load_owned(owner_id, project_id).await?;
        let path = content_path(&project)?;

        if !self.blobs.exists(&path).await? {
            return Err(ProjectError::NotYetUploaded);
        }
        self.link_blob(project_id, &path).await
    }

    /// Issue a time-limited URL the owner can upload the project's blob to.
    /// Complete the flow with [`Self::confirm_upload`].
    pub async fn issue_upload_url(&self, owner_id: &str, project_id: &str) -> ProjectResult<String> {
        let project = self.load_owned(owner_id, project_id).await?;
        let path = content_path(&project)?;

        let url = self
            .blobs
            .generate_upload_url(&path, self.config.upload_url_ttl())
            .await?;
        self.check_storage_url(&url)?;
        debug!("issued upload url for project {}", project_id);
        Ok(url)
    }

    /// Open the project's blob for reading.  The caller owns the stream.
    pub async fn download_blob(&self, owner_id: &str, project_id: &str) -> ProjectResult<BlobReader> {
        require_id(owner_id, "owner id")?;
        require_id(project_id, "project id")?;

        let project = self.get_record(project_id).await?;
        let allowed = project.owner_id == owner_id
            || (self.config.public_downloads && project.is_public);
        if !allowed {
            return Err(ProjectError::Unauthorized(
                "cannot download another user's project".to_string(),
            ));
        }
        if project.content_hash.is_empty() {
            return Err(ProjectError::NotFound("project content".to_string()));
        }

        let path = derive_path(&project.owner_id, &project.content_hash)?;
        match self.blobs.read(&path).await? {
            Some(reader) => Ok(reader),
            None => Err(ProjectError::NotFound(format!("blob {path}"))),
        }
    }

    async fn link_blob(&self, project_id: &str, path: &str) -> ProjectResult<String> {
        let url = self
            .blobs
            .generate_access_url(path, self.config.access_url_ttl())
            .await?;
        // The blob stays in place if the URL is rejected; it is unlinked,
        // not lost, and the next upload overwrites it.
        self.check_storage_url(&url)?;

        if !self
            .projects
            .update_raw(project_id, &ProjectPatch::storage_url(url.clone()))
            .await?
        {
            return Err(ProjectError::NotFound("project".to_string()));
        }
        info!("linked blob {} to project {}", path, project_id);
        Ok(url)
    }

    fn check_storage_url(&self, url: &str) -> ProjectResult<()> {
        let parsed = reqwest::Url::parse(url)
            .map_err(|e| anyhow::anyhow!("generated storage URL is malformed: {e}"))?;

        let scheme_ok = matches!(parsed.scheme(), "http" | "https");
        let host = parsed.host_str().unwrap_or_default();
        let host_ok = self
            .config
            .allowed_storage_hosts
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(host));

        if scheme_ok && host_ok {
            Ok(())
        } else {
            warn!("rejected generated storage URL with host {:?}", host);
            Err(ProjectError::Io(anyhow::anyhow!(
                "generated storage URL host {host:?} is not allowed"
            )))
        }
    }

    // -- CRUD -----------------------------------------------------------------

    /// Delete a project and, best-effort, its blob.
    pub async fn delete_project(&self, owner_id: &str, project_id: &str) -> ProjectResult<()> {
        let project = self.load_owned(owner_id, project_id).await?;

        if !project.content_hash.is_empty() {
            match derive_path(&project.owner_id, &project.content_hash) {
                Ok(path) => {
                    if let Err(e) = self.blobs.delete(&path).await {
                        warn!("failed to delete blob {} for project {}: {:#}", path, project_id, e);
                    }
                }
                Err(e) => warn!("skipping blob delete for project {}: {}", project_id, e),
            }
        }

        if !self.projects.delete(project_id).await? {
            return Err(ProjectError::NotFound("project".to_string()));
        }
        info!("deleted project {} for {}", project_id, owner_id);
        Ok(())
    }

    /// Apply a partial update to title, visibility or tags.
    pub async fn update_project(
        &self,
        owner_id: &str,
        project_id: &str,
        mut update: ProjectUpdate,
    ) -> ProjectResult<()> {
        require_id(owner_id, "owner id")?;
        require_id(project_id, "project id")?;
        update.sanitize();
        update.validate()?;

        let project = self.load_owned(owner_id, project_id).await?;

        if let Some(title) = update.title.as_deref() {
            if title != project.title {
                if let Some(other) = self.projects.find_by_owner_and_title(owner_id, title).await? {
                    if other.id != project.id {
                        return Err(ProjectError::Validation(format!(
                            "a project titled {title:?} already exists"
                        )));
                    }
                }
            }
        }

        if !self.projects.update(project_id, &update).await? {
            return Err(ProjectError::NotFound("project".to_string()));
        }
        info!("updated project {}", project_id);
        Ok(())
    }

    /// Fetch a project the caller owns, or any public project.
    pub async fn get_project(&self, caller_id: &str, project_id: &str) -> ProjectResult<Project> {
        require_id(caller_id, "owner id")?;
        require_id(project_id, "project id")?;

        let project = self.get_record(project_id).await?;
        if !project.readable_by(caller_id) {
            return Err(ProjectError::Unauthorized(
                "cannot read another user's private project".to_string(),
            ));
        }
        Ok(project)
    }

    /// Fetch the owner's project with exactly this title.
    pub async fn get_project_by_title(&self, owner_id: &str, title: &str) -> ProjectResult<Project> {
        require_id(owner_id, "owner id")?;
        let title = title.trim();
        if title.is_empty() {
            return Err(ProjectError::Validation("title is required".to_string()));
        }

        self.projects
            .find_by_owner_and_title(owner_id, title)
            .await?
            .ok_or_else(|| ProjectError::NotFound("project".to_string()))
    }

    /// List the owner's projects, newest first.
    ///
    /// A `limit` of 0 means the default page size; larger limits are
    /// clamped to the maximum.  `cursor` is the id of the last project on
    /// the previous page.
    pub async fn list_projects(
        &self,
        owner_id: &str,
        limit: usize,
        cursor: Option<&str>,
    ) -> ProjectResult<Vec<Project>> {
        require_id(owner_id, "owner id")?;
        let limit = self.page_size(limit);
        let cursor = cursor.filter(|c| !c.is_empty());
        Ok(self.projects.list(owner_id, limit, cursor).await?)
    }

    pub async fn count_projects(&self, owner_id: &str) -> ProjectResult<u64> {
        require_id(owner_id, "owner id")?;
        Ok(self.projects.count(owner_id).await?)
    }

    // -- Helpers --------------------------------------------------------------

    fn page_size(&self, requested: usize) -> usize {
        let max = self.config.max_page_size.max(1);
        match requested {
            0 => self.config.default_page_size.clamp(1, max),
            n => n.min(max),
        }
    }

    async fn get_record(&self, project_id: &str) -> ProjectResult<Project> {
        self.projects
            .get_by_id(project_id)
            .await?
            .ok_or_else(|| ProjectError::NotFound("project".to_string()))
    }

    /// Load a project and require `owner_id` to own it.
    async fn load_owned(&self, owner_id: &str, project_id: &str) -> ProjectResult<Project> {
        require_id(owner_id, "owner id")?;
        require_id(project_id, "project id")?;

        let project = self.get_record(project_id).await?;
        if project.owner_id != owner_id {
            return Err(ProjectError::Unauthorized(
                "project belongs to another user".to_string(),
            ));
        }
        Ok(project)
    }
}

fn require_id(value: &str, name: &str) -> ProjectResult<()> {
    if value.is_empty() {
        return Err(ProjectError::Validation(format!("{name} is required")));
    }
    Ok(())
}

/// Blob path for a project whose metadata already carries a content hash.
fn content_path(project: &Project) -> ProjectResult<String> {
    if project.content_hash.is_empty() {
        return Err(ProjectError::Validation(
            "project has no content hash; create its metadata first".to_string(),
        ));
    }
    Ok(derive_path(&project.owner_id, &project.content_hash)?)
}

/// Consume the first eight bytes of `body`, require the PNG signature, and
/// hand back a reader that yields the full original stream.
async fn check_png_signature(mut body: BlobReader) -> ProjectResult<BlobReader> {
    let mut header = [0u8; 8];
    if let Err(e) = body.read_exact(&mut header).await {
        return Err(match e.kind() {
            std::io::ErrorKind::UnexpectedEof => {
                ProjectError::Validation("file is not a PNG image".to_string())
            }
            _ => ProjectError::Io(e.into()),
        });
    }
    if header != PNG_SIGNATURE {
        return Err(ProjectError::Validation("file is not a PNG image".to_string()));
    }
    Ok(Box::pin(std::io::Cursor::new(header).chain(body)))
}
