//! Abstract project metadata store trait.
//!
//! Any metadata backend must implement [`ProjectStore`].  The trait uses
//! manually desugared async methods (pinned boxed futures) so it can be
//! held as `Arc<dyn ProjectStore>`.
//!
//! Absence is never an error: lookups return `Option`, and mutations
//! return `false` when the target record does not exist.

use std::future::Future;
use std::pin::Pin;

use crate::model::{Project, ProjectPatch, ProjectUpdate};

/// Boxed future returned by every store method.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = anyhow::Result<T>> + Send + 'a>>;

/// Result of [`ProjectStore::upsert_by_title`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// No project with that (owner, title) existed; a new one was created.
    Created(String),
    /// An existing project was patched in place.
    Updated(String),
}

impl UpsertOutcome {
    /// The id of the created or updated project.
    pub fn id(&self) -> &str {
        match self {
            UpsertOutcome::Created(id) | UpsertOutcome::Updated(id) => id,
        }
    }
}

/// Async project metadata contract.
pub trait ProjectStore: Send + Sync + 'static {
    /// Get a project by id.
    fn get_by_id(&self, id: &str) -> StoreFuture<'_, Option<Project>>;

    /// Find the owner's project bound to `content_hash`.
    fn find_by_owner_and_hash(
        &self,
        owner_id: &str,
        content_hash: &str,
    ) -> StoreFuture<'_, Option<Project>>;

    /// Find the owner's project titled exactly `title`.
    fn find_by_owner_and_title(
        &self,
        owner_id: &str,
        title: &str,
    ) -> StoreFuture<'_, Option<Project>>;

    /// List the owner's projects, newest first.
    ///
    /// `cursor` is the id of the last project of the previous page.  An
    /// unknown cursor, or one belonging to another owner, yields an empty
    /// page.
    fn list(
        &self,
        owner_id: &str,
        limit: usize,
        cursor: Option<&str>,
    ) -> StoreFuture<'_, Vec<Project>>;

    /// Count the owner's projects.
    fn count(&self, owner_id: &str) -> StoreFuture<'_, u64>;

    /// Insert a new project, assigning id, `created_at` and `updated_at`.
    /// Returns the new id.
    fn create(&self, project: Project) -> StoreFuture<'_, String>;

    /// Merge the public partial-update fields and stamp `updated_at`.
    fn update(&self, id: &str, update: &ProjectUpdate) -> StoreFuture<'_, bool> {
        self.update_raw(id, &update.to_patch())
    }

    /// Merge any internal fields and stamp `updated_at`.
    fn update_raw(&self, id: &str, patch: &ProjectPatch) -> StoreFuture<'_, bool>;

    /// Atomically find `(project.owner_id, project.title)` and either apply
    /// `patch` to the match or insert `project`.
    ///
    /// Implementations must make the lookup and the write a single critical
    /// section so two concurrent callers cannot both create.
    fn upsert_by_title(&self, project: Project, patch: ProjectPatch)
        -> StoreFuture<'_, UpsertOutcome>;

    /// Delete a project record.
    fn delete(&self, id: &str) -> StoreFuture<'_, bool>;
}
