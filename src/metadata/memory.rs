//! In-memory project metadata store.
//!
//! Stores all records in memory with no persistence.  Useful for testing
//! and ephemeral deployments.  Uses `RwLock<HashMap>` for thread-safe
//! access; every mutation happens under a single write lock.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::Utc;

use super::store::{ProjectStore, StoreFuture, UpsertOutcome};
use crate::model::{Project, ProjectPatch};

#[derive(Debug, Default)]
struct Inner {
    projects: HashMap<String, Entry>,
    /// Monotonic insertion counter, used to break `created_at` ties.
    next_seq: u64,
}

#[derive(Debug)]
struct Entry {
    seq: u64,
    project: Project,
}

impl Inner {
    fn insert(&mut self, mut project: Project) -> String {
        let now = Utc::now();
        let id = uuid::Uuid::new_v4().simple().to_string();
        project.id = id.clone();
        project.created_at = now;
        project.updated_at = now;
        self.next_seq += 1;
        let seq = self.next_seq;
        self.projects.insert(id.clone(), Entry { seq, project });
        id
    }

    fn find(&self, predicate: impl Fn(&Project) -> bool) -> Option<&Entry> {
        // Oldest match wins so lookups are stable when duplicates exist.
        self.projects
            .values()
            .filter(|e| predicate(&e.project))
            .min_by_key(|e| e.seq)
    }
}

pub struct MemoryProjectStore {
    inner: RwLock<Inner>,
}

impl MemoryProjectStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
        }
    }
}

impl Default for MemoryProjectStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ProjectStore for MemoryProjectStore {
    fn get_by_id(&self, id: &str) -> StoreFuture<'_, Option<Project>> {
        let id = id.to_string();
        Box::pin(async move {
            let inner = self.inner.read().expect("rwlock poisoned");
            Ok(inner.projects.get(&id).map(|e| e.project.clone()))
        })
    }

    fn find_by_owner_and_hash(
        &self,
        owner_id: &str,
        content_hash: &str,
    ) -> StoreFuture<'_, Option<Project>> {
        let owner_id = owner_id.to_string();
        let content_hash = content_hash.to_string();
        Box::pin(async move {
            let inner = self.inner.read().expect("rwlock poisoned");
            Ok(inner
                .find(|p| p.owner_id == owner_id && p.content_hash == content_hash)
                .map(|e| e.project.clone()))
        })
    }

    fn find_by_owner_and_title(
        &self,
        owner_id: &str,
        title: &str,
    ) -> StoreFuture<'_, Option<Project>> {
        let owner_id = owner_id.to_string();
        let title = title.to_string();
        Box::pin(async move {
            let inner = self.inner.read().expect("rwlock poisoned");
            Ok(inner
                .find(|p| p.owner_id == owner_id && p.title == title)
                .map(|e| e.project.clone()))
        })
    }

    fn list(
        &self,
        owner_id: &str,
        limit: usize,
        cursor: Option<&str>,
    ) -> StoreFuture<'_, Vec<Project>> {
        let owner_id = owner_id.to_string();
        let cursor = cursor.map(|s| s.to_string());
        Box::pin(async move {
            let inner = self.inner.read().expect("rwlock poisoned");

            let mut entries: Vec<&Entry> = inner
                .projects
                .values()
                .filter(|e| e.project.owner_id == owner_id)
                .collect();
            entries.sort_by(|a, b| {
                b.project
                    .created_at
                    .cmp(&a.project.created_at)
                    .then_with(|| b.seq.cmp(&a.seq))
            });

            let start = match cursor {
                None => 0,
                Some(cursor) => match entries.iter().position(|e| e.project.id == cursor) {
                    Some(pos) => pos + 1,
                    None => return Ok(Vec::new()),
                },
            };

            Ok(entries
                .into_iter()
                .skip(start)
                .take(limit)
                .map(|e| e.project.clone())
                .collect())
        })
    }

    fn count(&self, owner_id: &str) -> StoreFuture<'_, u64> {
        let owner_id = owner_id.to_string();
        Box::pin(async move {
            let inner = self.inner.read().expect("rwlock poisoned");
            let count = inner
                .projects
                .values()
                .filter(|e| e.project.owner_id == owner_id)
                .count();
            Ok(count as u64)
        })
    }

    fn create(&self, project: Project) -> StoreFuture<'_, String> {
        Box::pin(async move {
            let mut inner = self.inner.write().expect("rwlock poisoned");
            Ok(inner.insert(project))
        })
    }

    fn update_raw(&self, id: &str, patch: &ProjectPatch) -> StoreFuture<'_, bool> {
        let id = id.to_string();
        let patch = patch.clone();
        Box::pin(async move {
            let mut inner = self.inner.write().expect("rwlock poisoned");
            match inner.projects.get_mut(&id) {
                Some(entry) => {
                    entry.project.apply(&patch, Utc::now());
                    Ok(true)
                }
                None => Ok(false),
            }
        })
    }

    fn upsert_by_title(
        &self,
        project: Project,
        patch: ProjectPatch,
    ) -> StoreFuture<'_, UpsertOutcome> {
        Box::pin(async move {
            let mut inner = self.inner.write().expect("rwlock poisoned");
            let existing = inner
                .find(|p| p.owner_id == project.owner_id && p.title == project.title)
                .map(|e| e.project.id.clone());
            match existing {
                Some(id) => {
                    if let Some(entry) = inner.projects.get_mut(&id) {
                        entry.project.apply(&patch, Utc::now());
                    }
                    Ok(UpsertOutcome::Updated(id))
                }
                None => Ok(UpsertOutcome::Created(inner.insert(project))),
            }
        })
    }

    fn delete(&self, id: &str) -> StoreFuture<'_, bool> {
        let id = id.to_string();
        Box::pin(async move {
            let mut inner = self.inner.write().expect("rwlock poisoned");
            Ok(inner.projects.remove(&id).is_some())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{content_hash, ProjectUpdate};
    use std::sync::Arc;

    fn test_store() -> MemoryProjectStore {
        MemoryProjectStore::new()
    }

    fn make_project(owner: &str, title: &str) -> Project {
        Project {
            id: String::new(),
            owner_id: owner.to_string(),
            title: title.to_string(),
            content_hash: content_hash(title.as_bytes()),
            storage_url: String::new(),
            thumbnail_data: String::new(),
            width: 0,
            height: 0,
            is_public: false,
            tags: Vec::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let store = test_store();
        let id = store.create(make_project("alice", "one")).await.unwrap();

        let fetched = store.get_by_id(&id).await.unwrap().unwrap();
        assert_eq!(fetched.id, id);
        assert_eq!(fetched.title, "one");
        assert!(store.get_by_id("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_find_by_hash_and_title_are_owner_scoped() {
        let store = test_store();
        store.create(make_project("alice", "one")).await.unwrap();
        let hash = content_hash(b"one");

        assert!(store
            .find_by_owner_and_hash("alice", &hash)
            .await
            .unwrap()
            .is_some());
        assert!(store
            .find_by_owner_and_hash("bob", &hash)
            .await
            .unwrap()
            .is_none());
        assert!(store
            .find_by_owner_and_title("alice", "one")
            .await
            .unwrap()
            .is_some());
        assert!(store
            .find_by_owner_and_title("bob", "one")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_list_newest_first_with_cursor() {
        let store = test_store();
        for title in ["a", "b", "c", "d", "e"] {
            store.create(make_project("alice", title)).await.unwrap();
        }
        store.create(make_project("bob", "x")).await.unwrap();

        let page1 = store.list("alice", 2, None).await.unwrap();
        let titles: Vec<_> = page1.iter().map(|p| p.title.as_str()).collect();
        assert_eq!(titles, vec!["e", "d"]);

        let page2 = store
            .list("alice", 2, Some(&page1[1].id))
            .await
            .unwrap();
        let titles: Vec<_> = page2.iter().map(|p| p.title.as_str()).collect();
        assert_eq!(titles, vec!["c", "b"]);

        let page3 = store
            .list("alice", 2, Some(&page2[1].id))
            .await
            .unwrap();
        assert_eq!(page3.len(), 1);

        assert!(store.list("alice", 2, Some("nope")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_rejects_foreign_cursor() {
        let store = test_store();
        store.create(make_project("alice", "a")).await.unwrap();
        let bob_id = store.create(make_project("bob", "b")).await.unwrap();
        assert!(store
            .list("alice", 10, Some(&bob_id))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_count() {
        let store = test_store();
        store.create(make_project("alice", "a")).await.unwrap();
        store.create(make_project("alice", "b")).await.unwrap();
        store.create(make_project("bob", "c")).await.unwrap();
        assert_eq!(store.count("alice").await.unwrap(), 2);
        assert_eq!(store.count("carol").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_update_merges_and_stamps() {
        let store = test_store();
        let id = store.create(make_project("alice", "a")).await.unwrap();
        let before = store.get_by_id(&id).await.unwrap().unwrap();

        let update = ProjectUpdate {
            is_public: Some(true),
            ..ProjectUpdate::default()
        };
        assert!(store.update(&id, &update).await.unwrap());

        let after = store.get_by_id(&id).await.unwrap().unwrap();
        assert!(after.is_public);
        assert_eq!(after.title, "a");
        assert!(after.updated_at >= before.updated_at);
        assert!(!store.update("missing", &update).await.unwrap());
    }

    #[tokio::test]
    async fn test_upsert_by_title() {
        let store = test_store();
        let first = store
            .upsert_by_title(make_project("alice", "art"), ProjectPatch::default())
            .await
            .unwrap();
        assert!(matches!(first, UpsertOutcome::Created(_)));

        let patch = ProjectPatch {
            width: Some(640),
            ..ProjectPatch::default()
        };
        let second = store
            .upsert_by_title(make_project("alice", "art"), patch)
            .await
            .unwrap();
        assert_eq!(second, UpsertOutcome::Updated(first.id().to_string()));
        assert_eq!(store.count("alice").await.unwrap(), 1);

        let record = store.get_by_id(first.id()).await.unwrap().unwrap();
        assert_eq!(record.width, 640);
    }

    #[tokio::test]
    async fn test_concurrent_upserts_create_once() {
        let store = Arc::new(test_store());
        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .upsert_by_title(make_project("alice", "race"), ProjectPatch::default())
                    .await
                    .unwrap()
            }));
        }
        let mut created = 0;
        for handle in handles {
            if matches!(handle.await.unwrap(), UpsertOutcome::Created(_)) {
                created += 1;
            }
        }
        assert_eq!(created, 1);
        assert_eq!(store.count("alice").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_delete() {
        let store = test_store();
        let id = store.create(make_project("alice", "a")).await.unwrap();
        assert!(store.delete(&id).await.unwrap());
        assert!(!store.delete(&id).await.unwrap());
        assert!(store.get_by_id(&id).await.unwrap().is_none());
    }
}
