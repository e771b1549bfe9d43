//! canvas-store library -- content-addressed project persistence.
//!
//! Keeps drawing-project metadata and the PNG blob behind each project in
//! sync.  Blobs live at a path derived from `(owner, content hash)`, so
//! identical content always maps to the same location; metadata records
//! carry the hash, the dimensions and a time-limited storage URL.

use std::sync::Arc;

pub mod config;
pub mod errors;
pub mod metadata;
pub mod model;
pub mod path;
pub mod service;
pub mod storage;

use crate::config::{Config, MetadataConfig, StorageConfig};
use crate::metadata::store::ProjectStore;
use crate::service::ProjectService;
use crate::storage::backend::BlobStore;
use tracing::info;

/// Open the metadata store named by `config.engine`.
pub fn open_project_store(config: &MetadataConfig) -> anyhow::Result<Arc<dyn ProjectStore>> {
    match config.engine.as_str() {
        "sqlite" => {
            let path = &config.sqlite.path;
            if let Some(parent) = std::path::Path::new(path).parent() {
                std::fs::create_dir_all(parent)?;
            }
            let store = metadata::sqlite::SqliteProjectStore::new(path)?;
            info!("SQLite metadata store initialized at {}", path);
            Ok(Arc::new(store))
        }
        "memory" => {
            info!("In-memory metadata store initialized");
            Ok(Arc::new(metadata::memory::MemoryProjectStore::new()))
        }
        other => anyhow::bail!("unknown metadata engine: {other}"),
    }
}

/// Open the blob store named by `config.backend`.
pub fn open_blob_store(config: &StorageConfig) -> anyhow::Result<Arc<dyn BlobStore>> {
    match config.backend.as_str() {
        "local" => {
            let local = &config.local;
            let store = storage::local::LocalBlobStore::new(
                &local.root_dir,
                &local.base_url,
                &local.signing_secret,
            )?;
            info!("Local blob store initialized at {}", local.root_dir);
            Ok(Arc::new(store))
        }
        "memory" => {
            info!("In-memory blob store initialized");
            Ok(Arc::new(storage::memory::MemoryBlobStore::with_base_url(
                config.memory.base_url.clone(),
            )))
        }
        "firebase" => {
            let firebase = config.firebase.as_ref().ok_or_else(|| {
                anyhow::anyhow!(
                    "storage.backend is 'firebase' but storage.firebase config section is missing"
                )
            })?;
            let store = storage::firebase::FirebaseBlobStore::new(
                &firebase.bucket,
                firebase.emulator_host.as_deref(),
                firebase.access_token.as_deref(),
                std::time::Duration::from_secs(firebase.request_timeout_seconds),
            )?
            .with_max_upload_bytes(firebase.max_upload_bytes);
            Ok(Arc::new(store))
        }
        other => anyhow::bail!("unknown storage backend: {other}"),
    }
}

/// Wire both stores and the service from a loaded configuration.
pub fn build_service(config: &Config) -> anyhow::Result<ProjectService> {
    let projects = open_project_store(&config.metadata)?;
    let blobs = open_blob_store(&config.storage)?;
    Ok(ProjectService::new(projects, blobs, config.service.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{content_hash, NewProject};

    #[tokio::test]
    async fn test_build_memory_service() {
        let mut config = Config::default();
        config.metadata.engine = "memory".to_string();
        config.storage.backend = "memory".to_string();
        let service = build_service(&config).unwrap();

        let input = NewProject {
            title: "Art".to_string(),
            content_hash: content_hash(b"x"),
            ..NewProject::default()
        };
        let created = service.create_or_upsert("alice", input).await.unwrap();
        assert_eq!(service.count_projects("alice").await.unwrap(), 1);
        assert!(!created.duplicate);
    }

    #[test]
    fn test_build_on_disk_service() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.metadata.sqlite.path = dir.path().join("db/projects.db").display().to_string();
        config.storage.local.root_dir = dir.path().join("blobs").display().to_string();

        assert!(build_service(&config).is_ok());
        assert!(dir.path().join("db/projects.db").exists());
        assert!(dir.path().join("blobs").exists());
    }

    #[test]
    fn test_unknown_backends_rejected() {
        let mut config = Config::default();
        config.metadata.engine = "dynamo".to_string();
        assert!(open_project_store(&config.metadata).is_err());

        config.storage.backend = "s3".to_string();
        assert!(open_blob_store(&config.storage).is_err());

        config.storage.backend = "firebase".to_string();
        assert!(open_blob_store(&config.storage).is_err());
    }
}
