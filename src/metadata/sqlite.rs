//! SQLite-backed project metadata store.
//!
//! Uses `rusqlite` with the `bundled` feature so no system SQLite
//! library is required.  All async trait methods are thin wrappers
//! around synchronous rusqlite calls executed under a `Mutex`.
//!
//! Per-owner title uniqueness is enforced by a unique index, and
//! [`ProjectStore::upsert_by_title`] runs inside an immediate transaction.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, TransactionBehavior};

use super::store::{ProjectStore, StoreFuture, UpsertOutcome};
use crate::model::{Project, ProjectPatch};

/// Current schema version. Bumped when migrations are added.
const SCHEMA_VERSION: i64 = 1;

const PROJECT_COLUMNS: &str = "id, owner_id, title, content_hash, storage_url, thumbnail_data, \
     width, height, is_public, tags, created_at, updated_at";

/// Metadata store backed by a single SQLite database file.
pub struct SqliteProjectStore {
    /// The database connection, guarded by a mutex for Send + Sync.
    conn: Mutex<Connection>,
}

impl SqliteProjectStore {
    /// Open (or create) the database at `path` and initialize the schema.
    ///
    /// Passing `":memory:"` creates an in-memory database (useful for tests).
    pub fn new(path: &str) -> anyhow::Result<Self> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.apply_pragmas()?;
        store.init_db()?;
        Ok(store)
    }

    fn apply_pragmas(&self) -> anyhow::Result<()> {
        let conn = self.conn.lock().expect("mutex poisoned");
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA busy_timeout = 5000;
            ",
        )?;
        Ok(())
    }

    /// Create the required tables and indexes if they do not already exist.
    /// Idempotent, so it runs on every startup.
    fn init_db(&self) -> anyhow::Result<()> {
        let conn = self.conn.lock().expect("mutex poisoned");
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS schema_version (
                version    INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS projects (
                id             TEXT PRIMARY KEY,
                owner_id       TEXT NOT NULL,
                title          TEXT NOT NULL,
                content_hash   TEXT NOT NULL DEFAULT '',
                storage_url    TEXT NOT NULL DEFAULT '',
                thumbnail_data TEXT NOT NULL DEFAULT '',
                width          INTEGER NOT NULL DEFAULT 0,
                height         INTEGER NOT NULL DEFAULT 0,
                is_public      INTEGER NOT NULL DEFAULT 0,
                tags           TEXT NOT NULL DEFAULT '[]',
                created_at     TEXT NOT NULL,
                updated_at     TEXT NOT NULL
            );

            CREATE UNIQUE INDEX IF NOT EXISTS idx_projects_owner_title
                ON projects(owner_id, title);
            CREATE INDEX IF NOT EXISTS idx_projects_owner_hash
                ON projects(owner_id, content_hash);
            CREATE INDEX IF NOT EXISTS idx_projects_owner_created
                ON projects(owner_id, created_at);
            ",
        )?;

        let existing: Option<i64> = conn
            .query_row("SELECT MAX(version) FROM schema_version", [], |row| {
                row.get(0)
            })
            .optional()?
            .flatten();

        if existing.map_or(true, |v| v < SCHEMA_VERSION) {
            conn.execute(
                "INSERT OR REPLACE INTO schema_version (version, applied_at) VALUES (?1, ?2)",
                params![SCHEMA_VERSION, Utc::now().to_rfc3339()],
            )?;
        }

        Ok(())
    }
}

// -- Row mapping --------------------------------------------------------------

fn map_project_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Project> {
    let tags_json: String = row.get(9)?;
    let is_public: i64 = row.get(8)?;
    Ok(Project {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        title: row.get(2)?,
        content_hash: row.get(3)?,
        storage_url: row.get(4)?,
        thumbnail_data: row.get(5)?,
        width: row.get(6)?,
        height: row.get(7)?,
        is_public: is_public != 0,
        tags: serde_json::from_str(&tags_json).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(9, rusqlite::types::Type::Text, Box::new(e))
        })?,
        created_at: parse_timestamp(row, 10)?,
        updated_at: parse_timestamp(row, 11)?,
    })
}

fn parse_timestamp(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

/// Timestamps are stored as fixed-width RFC 3339 so text order is time order.
fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}

fn serialize_tags(tags: &[String]) -> String {
    serde_json::to_string(tags).unwrap_or_else(|_| "[]".to_string())
}

fn insert_project(conn: &Connection, mut project: Project) -> anyhow::Result<String> {
    let now = Utc::now();
    project.id = uuid::Uuid::new_v4().simple().to_string();
    project.created_at = now;
    project.updated_at = now;
    conn.execute(
        &format!(
            "INSERT INTO projects ({PROJECT_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)"
        ),
        params![
            project.id,
            project.owner_id,
            project.title,
            project.content_hash,
            project.storage_url,
            project.thumbnail_data,
            project.width,
            project.height,
            project.is_public as i64,
            serialize_tags(&project.tags),
            format_timestamp(&project.created_at),
            format_timestamp(&project.updated_at),
        ],
    )?;
    Ok(project.id)
}

/// Apply `patch` to row `id`.  Only supplied columns are written;
/// `updated_at` is always stamped.
fn apply_patch(conn: &Connection, id: &str, patch: &ProjectPatch) -> anyhow::Result<bool> {
    let mut sets: Vec<&str> = Vec::new();
    let mut values: Vec<Value> = Vec::new();

    if let Some(title) = &patch.title {
        sets.push("title = ?");
        values.push(Value::Text(title.clone()));
    }
    if let Some(hash) = &patch.content_hash {
        sets.push("content_hash = ?");
        values.push(Value::Text(hash.clone()));
    }
    if let Some(url) = &patch.storage_url {
        sets.push("storage_url = ?");
        values.push(Value::Text(url.clone()));
    }
    if let Some(thumbnail) = &patch.thumbnail_data {
        sets.push("thumbnail_data = ?");
        values.push(Value::Text(thumbnail.clone()));
    }
    if let Some(width) = patch.width {
        sets.push("width = ?");
        values.push(Value::Integer(i64::from(width)));
    }
    if let Some(height) = patch.height {
        sets.push("height = ?");
        values.push(Value::Integer(i64::from(height)));
    }
    if let Some(is_public) = patch.is_public {
        sets.push("is_public = ?");
        values.push(Value::Integer(is_public as i64));
    }
    if let Some(tags) = &patch.tags {
        sets.push("tags = ?");
        values.push(Value::Text(serialize_tags(tags)));
    }
    sets.push("updated_at = ?");
    values.push(Value::Text(format_timestamp(&Utc::now())));
    values.push(Value::Text(id.to_string()));

    let sql = format!("UPDATE projects SET {} WHERE id = ?", sets.join(", "));
    let changed = conn.execute(&sql, params_from_iter(values))?;
    Ok(changed > 0)
}

fn query_one(
    conn: &Connection,
    clause: &str,
    params: impl rusqlite::Params,
) -> anyhow::Result<Option<Project>> {
    let sql = format!(
        "SELECT {PROJECT_COLUMNS} FROM projects WHERE {clause} ORDER BY created_at ASC LIMIT 1"
    );
    let project = conn
        .query_row(&sql, params, map_project_row)
        .optional()?;
    Ok(project)
}

impl ProjectStore for SqliteProjectStore {
    fn get_by_id(&self, id: &str) -> StoreFuture<'_, Option<Project>> {
        let id = id.to_string();
        Box::pin(async move {
            let conn = self.conn.lock().expect("mutex poisoned");
            query_one(&conn, "id = ?1", params![id])
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
            let conn = self.conn.lock().expect("mutex poisoned");
            query_one(
                &conn,
                "owner_id = ?1 AND content_hash = ?2",
                params![owner_id, content_hash],
            )
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
            let conn = self.conn.lock().expect("mutex poisoned");
            query_one(&conn, "owner_id = ?1 AND title = ?2", params![owner_id, title])
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
            let conn = self.conn.lock().expect("mutex poisoned");
            let limit = limit as i64;

            let rows: Vec<Project> = match cursor {
                None => {
                    let mut stmt = conn.prepare(&format!(
                        "SELECT {PROJECT_COLUMNS} FROM projects
                         WHERE owner_id = ?1
                         ORDER BY created_at DESC, rowid DESC
                         LIMIT ?2"
                    ))?;
                    let rows = stmt.query_map(params![owner_id, limit], map_project_row)?;
                    let projects = rows.collect::<rusqlite::Result<Vec<_>>>()?;
                    projects
                }
                Some(cursor) => {
                    let anchor: Option<(String, i64)> = conn
                        .query_row(
                            "SELECT created_at, rowid FROM projects WHERE id = ?1 AND owner_id = ?2",
                            params![cursor, owner_id],
                            |row| Ok((row.get(0)?, row.get(1)?)),
                        )
                        .optional()?;
                    // Unknown or foreign cursor: empty page, no existence leak.
                    let Some((created_at, rowid)) = anchor else {
                        return Ok(Vec::new());
                    };
                    let mut stmt = conn.prepare(&format!(
                        "SELECT {PROJECT_COLUMNS} FROM projects
                         WHERE owner_id = ?1
                           AND (created_at < ?2 OR (created_at = ?2 AND rowid < ?3))
                         ORDER BY created_at DESC, rowid DESC
                         LIMIT ?4"
                    ))?;
                    let rows = stmt.query_map(
                        params![owner_id, created_at, rowid, limit],
                        map_project_row,
                    )?;
                    let projects = rows.collect::<rusqlite::Result<Vec<_>>>()?;
                    projects
                }
            };
            Ok(rows)
        })
    }

    fn count(&self, owner_id: &str) -> StoreFuture<'_, u64> {
        let owner_id = owner_id.to_string();
        Box::pin(async move {
            let conn = self.conn.lock().expect("mutex poisoned");
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM projects WHERE owner_id = ?1",
                params![owner_id],
                |row| row.get(0),
            )?;
            Ok(count as u64)
        })
    }

    fn create(&self, project: Project) -> StoreFuture<'_, String> {
        Box::pin(async move {
            let conn = self.conn.lock().expect("mutex poisoned");
            insert_project(&conn, project)
        })
    }

    fn update_raw(&self, id: &str, patch: &ProjectPatch) -> StoreFuture<'_, bool> {
        let id = id.to_string();
        let patch = patch.clone();
        Box::pin(async move {
            let conn = self.conn.lock().expect("mutex poisoned");
            apply_patch(&conn, &id, &patch)
        })
    }

    fn upsert_by_title(
        &self,
        project: Project,
        patch: ProjectPatch,
    ) -> StoreFuture<'_, UpsertOutcome> {
        Box::pin(async move {
            let mut conn = self.conn.lock().expect("mutex poisoned");
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            let existing: Option<String> = tx
                .query_row(
                    "SELECT id FROM projects WHERE owner_id = ?1 AND title = ?2",
                    params![project.owner_id, project.title],
                    |row| row.get(0),
                )
                .optional()?;

            let outcome = match existing {
                Some(id) => {
                    apply_patch(&tx, &id, &patch)?;
                    UpsertOutcome::Updated(id)
                }
                None => UpsertOutcome::Created(insert_project(&tx, project)?),
            };

            tx.commit()?;
            Ok(outcome)
        })
    }

    fn delete(&self, id: &str) -> StoreFuture<'_, bool> {
        let id = id.to_string();
        Box::pin(async move {
            let conn = self.conn.lock().expect("mutex poisoned");
            let changed = conn.execute("DELETE FROM projects WHERE id = ?1", params![id])?;
            Ok(changed > 0)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{content_hash, ProjectUpdate};

    fn test_store() -> SqliteProjectStore {
        SqliteProjectStore::new(":memory:").expect("failed to create test store")
    }

    fn make_project(owner: &str, title: &str) -> Project {
        Project {
            id: String::new(),
            owner_id: owner.to_string(),
            title: title.to_string(),
            content_hash: content_hash(title.as_bytes()),
            storage_url: String::new(),
            thumbnail_data: String::new(),
            width: 320,
            height: 240,
            is_public: false,
            tags: vec!["sketch".to_string()],
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_schema_idempotent() {
        let store = test_store();
        store.init_db().unwrap();
        store.init_db().unwrap();
    }

    #[tokio::test]
    async fn test_create_and_get_roundtrips_fields() {
        let store = test_store();
        let id = store.create(make_project("alice", "one")).await.unwrap();

        let fetched = store.get_by_id(&id).await.unwrap().unwrap();
        assert_eq!(fetched.id, id);
        assert_eq!(fetched.owner_id, "alice");
        assert_eq!(fetched.width, 320);
        assert_eq!(fetched.tags, vec!["sketch"]);
        assert!(!fetched.is_public);
        assert!(store.get_by_id("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_find_by_hash_and_title() {
        let store = test_store();
        let id = store.create(make_project("alice", "one")).await.unwrap();

        let by_hash = store
            .find_by_owner_and_hash("alice", &content_hash(b"one"))
            .await
            .unwrap();
        assert_eq!(by_hash.map(|p| p.id), Some(id.clone()));

        let by_title = store.find_by_owner_and_title("alice", "one").await.unwrap();
        assert_eq!(by_title.map(|p| p.id), Some(id));

        assert!(store
            .find_by_owner_and_title("bob", "one")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_title_unique_per_owner() {
        let store = test_store();
        store.create(make_project("alice", "dup")).await.unwrap();
        assert!(store.create(make_project("alice", "dup")).await.is_err());
        store.create(make_project("bob", "dup")).await.unwrap();
    }

    #[tokio::test]
    async fn test_list_pagination() {
        let store = test_store();
        for title in ["a", "b", "c", "d", "e"] {
            store.create(make_project("alice", title)).await.unwrap();
        }
        store.create(make_project("bob", "z")).await.unwrap();

        let page1 = store.list("alice", 2, None).await.unwrap();
        let titles: Vec<_> = page1.iter().map(|p| p.title.as_str()).collect();
        assert_eq!(titles, vec!["e", "d"]);

        let page2 = store.list("alice", 2, Some(&page1[1].id)).await.unwrap();
        let titles: Vec<_> = page2.iter().map(|p| p.title.as_str()).collect();
        assert_eq!(titles, vec!["c", "b"]);

        let page3 = store.list("alice", 2, Some(&page2[1].id)).await.unwrap();
        let titles: Vec<_> = page3.iter().map(|p| p.title.as_str()).collect();
        assert_eq!(titles, vec!["a"]);

        assert!(store.list("alice", 2, Some("unknown")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_rejects_foreign_cursor() {
        let store = test_store();
        store.create(make_project("alice", "a")).await.unwrap();
        let bob_id = store.create(make_project("bob", "b")).await.unwrap();
        assert!(store.list("alice", 10, Some(&bob_id)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_count() {
        let store = test_store();
        store.create(make_project("alice", "a")).await.unwrap();
        store.create(make_project("alice", "b")).await.unwrap();
        assert_eq!(store.count("alice").await.unwrap(), 2);
        assert_eq!(store.count("bob").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_update_raw_merges_only_supplied_fields() {
        let store = test_store();
        let id = store.create(make_project("alice", "a")).await.unwrap();

        let patch = ProjectPatch::storage_url("http://localhost/blob");
        assert!(store.update_raw(&id, &patch).await.unwrap());

        let fetched = store.get_by_id(&id).await.unwrap().unwrap();
        assert_eq!(fetched.storage_url, "http://localhost/blob");
        assert_eq!(fetched.width, 320);
        assert_eq!(fetched.title, "a");

        assert!(!store.update_raw("missing", &patch).await.unwrap());
    }

    #[tokio::test]
    async fn test_public_update() {
        let store = test_store();
        let id = store.create(make_project("alice", "a")).await.unwrap();
        let update = ProjectUpdate {
            title: Some("renamed".to_string()),
            is_public: Some(true),
            tags: Some(vec!["x".to_string(), "y".to_string()]),
        };
        assert!(store.update(&id, &update).await.unwrap());

        let fetched = store.get_by_id(&id).await.unwrap().unwrap();
        assert_eq!(fetched.title, "renamed");
        assert!(fetched.is_public);
        assert_eq!(fetched.tags, vec!["x", "y"]);
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
            content_hash: Some(content_hash(b"v2")),
            storage_url: Some(String::new()),
            width: Some(1024),
            ..ProjectPatch::default()
        };
        let second = store
            .upsert_by_title(make_project("alice", "art"), patch)
            .await
            .unwrap();
        assert_eq!(second, UpsertOutcome::Updated(first.id().to_string()));

        let record = store.get_by_id(first.id()).await.unwrap().unwrap();
        assert_eq!(record.content_hash, content_hash(b"v2"));
        assert_eq!(record.width, 1024);
        assert_eq!(store.count("alice").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_upserts_create_once() {
        let store = std::sync::Arc::new(test_store());
        let mut handles = Vec::new();
        for i in 0..16u32 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let patch = ProjectPatch {
                    width: Some(i),
                    ..ProjectPatch::default()
                };
                store
                    .upsert_by_title(make_project("alice", "race"), patch)
                    .await
                    .unwrap()
            }));
        }

        let mut created = Vec::new();
        let mut ids = Vec::new();
        for handle in handles {
            let outcome = handle.await.unwrap();
            if matches!(outcome, UpsertOutcome::Created(_)) {
                created.push(outcome.id().to_string());
            }
            ids.push(outcome.id().to_string());
        }
        assert_eq!(created.len(), 1);
        assert!(ids.iter().all(|id| *id == created[0]));
        assert_eq!(store.count("alice").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_corrupt_tags_column_is_an_error() {
        let store = test_store();
        let id = store.create(make_project("alice", "a")).await.unwrap();
        {
            let conn = store.conn.lock().unwrap();
            conn.execute(
                "UPDATE projects SET tags = 'not json' WHERE id = ?1",
                params![id],
            )
            .unwrap();
        }
        assert!(store.get_by_id(&id).await.is_err());
        assert!(store.list("alice", 10, None).await.is_err());
    }

    #[tokio::test]
    async fn test_delete() {
        let store = test_store();
        let id = store.create(make_project("alice", "a")).await.unwrap();
        assert!(store.delete(&id).await.unwrap());
        assert!(!store.delete(&id).await.unwrap());
    }

    #[tokio::test]
    async fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("projects.db");
        let path = path.to_str().unwrap();

        let id = {
            let store = SqliteProjectStore::new(path).unwrap();
            store.create(make_project("alice", "kept")).await.unwrap()
        };

        let store = SqliteProjectStore::new(path).unwrap();
        let fetched = store.get_by_id(&id).await.unwrap().unwrap();
        assert_eq!(fetched.title, "kept");
    }
}
