//! Configuration loading and types for canvas-store.
//!
//! Configuration is read from a YAML file and deserialized into the
//! [`Config`] struct.  Every field has a default, so an empty file (or no
//! file at all) yields a working local setup.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Project metadata store settings.
    #[serde(default)]
    pub metadata: MetadataConfig,

    /// Blob storage backend settings.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Orchestration service settings.
    #[serde(default)]
    pub service: ServiceConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Default filter level when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Output format: "text" or "json".
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Metadata store configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct MetadataConfig {
    /// Engine: "sqlite" or "memory".
    #[serde(default = "default_metadata_engine")]
    pub engine: String,

    #[serde(default)]
    pub sqlite: SqliteConfig,
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            engine: default_metadata_engine(),
            sqlite: SqliteConfig::default(),
        }
    }
}

/// SQLite metadata configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SqliteConfig {
    /// Database file path.
    #[serde(default = "default_metadata_path")]
    pub path: String,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            path: default_metadata_path(),
        }
    }
}

/// Blob storage configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Backend: "local", "memory", or "firebase".
    #[serde(default = "default_storage_backend")]
    pub backend: String,

    #[serde(default)]
    pub local: LocalStorageConfig,

    #[serde(default)]
    pub memory: MemoryStorageConfig,

    /// Required when `backend` is "firebase".
    #[serde(default)]
    pub firebase: Option<FirebaseStorageConfig>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_storage_backend(),
            local: LocalStorageConfig::default(),
            memory: MemoryStorageConfig::default(),
            firebase: None,
        }
    }
}

/// Local filesystem storage configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LocalStorageConfig {
    /// Root directory for blob files.
    #[serde(default = "default_storage_root")]
    pub root_dir: String,
    /// Public URL under which `root_dir` is served.
    #[serde(default = "default_local_base_url")]
    pub base_url: String,
    /// Key used to sign access and upload URLs.
    #[serde(default = "default_signing_secret")]
    pub signing_secret: String,
}

impl Default for LocalStorageConfig {
    fn default() -> Self {
        Self {
            root_dir: default_storage_root(),
            base_url: default_local_base_url(),
            signing_secret: default_signing_secret(),
        }
    }
}

/// In-memory storage configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct MemoryStorageConfig {
    #[serde(default = "default_memory_base_url")]
    pub base_url: String,
}

impl Default for MemoryStorageConfig {
    fn default() -> Self {
        Self {
            base_url: default_memory_base_url(),
        }
    }
}

/// Firebase Storage configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct FirebaseStorageConfig {
    /// Storage bucket, e.g. `my-app.appspot.com`.
    pub bucket: String,
    /// `host:port` of the Storage emulator.  Disables authentication.
    #[serde(default)]
    pub emulator_host: Option<String>,
    /// OAuth2 bearer token for production requests.
    #[serde(default)]
    pub access_token: Option<String>,
    /// HTTP request timeout in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
    /// Largest upload body accepted, in bytes.  Uploads are buffered.
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: u64,
}

/// Orchestration service configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Hosts a generated storage URL may point at.
    #[serde(default = "default_allowed_storage_hosts")]
    pub allowed_storage_hosts: Vec<String>,

    /// Lifetime of generated access URLs.
    #[serde(default = "default_access_url_ttl")]
    pub access_url_ttl_seconds: u64,

    /// Lifetime of direct-upload URLs.
    #[serde(default = "default_upload_url_ttl")]
    pub upload_url_ttl_seconds: u64,

    /// Page size used when a list request asks for 0.
    #[serde(default = "default_page_size")]
    pub default_page_size: usize,

    /// Upper bound on list page size.
    #[serde(default = "default_max_page_size")]
    pub max_page_size: usize,

    /// Let non-owners download blobs of public projects.
    #[serde(default)]
    pub public_downloads: bool,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            allowed_storage_hosts: default_allowed_storage_hosts(),
            access_url_ttl_seconds: default_access_url_ttl(),
            upload_url_ttl_seconds: default_upload_url_ttl(),
            default_page_size: default_page_size(),
            max_page_size: default_max_page_size(),
            public_downloads: false,
        }
    }
}

impl ServiceConfig {
    pub fn access_url_ttl(&self) -> Duration {
        Duration::from_secs(self.access_url_ttl_seconds)
    }

    pub fn upload_url_ttl(&self) -> Duration {
        Duration::from_secs(self.upload_url_ttl_seconds)
    }
}

// -- Defaults ----------------------------------------------------------------

fn default_metadata_engine() -> String {
    "sqlite".to_string()
}

fn default_metadata_path() -> String {
    "./data/projects.db".to_string()
}

fn default_storage_backend() -> String {
    "local".to_string()
}

fn default_storage_root() -> String {
    "./data/blobs".to_string()
}

fn default_local_base_url() -> String {
    "http://localhost:8080/blobs".to_string()
}

fn default_signing_secret() -> String {
    "canvas-store-dev-secret".to_string()
}

fn default_memory_base_url() -> String {
    crate::storage::memory::DEFAULT_MEMORY_BASE_URL.to_string()
}

fn default_request_timeout() -> u64 {
    60
}

fn default_max_upload_bytes() -> u64 {
    crate::storage::firebase::DEFAULT_MAX_UPLOAD_BYTES
}

fn default_allowed_storage_hosts() -> Vec<String> {
    vec![
        "firebasestorage.googleapis.com".to_string(),
        "localhost".to_string(),
        "127.0.0.1".to_string(),
    ]
}

fn default_access_url_ttl() -> u64 {
    7 * 24 * 60 * 60 // 7 days
}

fn default_upload_url_ttl() -> u64 {
    15 * 60
}

fn default_page_size() -> usize {
    10
}

fn default_max_page_size() -> usize {
    50
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

// -- Loader ------------------------------------------------------------------

/// Load and parse configuration from a YAML file at `path`.
pub fn load_config<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
    let contents = std::fs::read_to_string(path.as_ref())?;
    let config: Config = serde_yaml::from_str(&contents)?;
    Ok(config)
}
