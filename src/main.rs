//! canvas-store -- admin CLI over the project orchestration service.
//!
//! Every subcommand maps onto one service operation, acting as the owner
//! given with `--owner`.  Results are printed to stdout as JSON; failures
//! print `code: message` to stderr and exit non-zero.

use std::path::PathBuf;

use canvas_store::config::{Config, LoggingConfig};
use canvas_store::errors::ProjectError;
use canvas_store::model::{content_hash, NewProject, ProjectUpdate};
use canvas_store::service::{ProjectService, PNG_SIGNATURE};
use canvas_store::storage::backend::BlobReader;
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing::info;

/// Command-line arguments for canvas-store.
#[derive(Parser, Debug)]
#[command(
    name = "canvas-store",
    version,
    about = "Content-addressed drawing project store"
)]
struct Cli {
    /// Path to the YAML configuration file.  Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Identity to act as.
    #[arg(short, long)]
    owner: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create a project, or replace the content of the one with this title
    Create {
        #[arg(long)]
        title: String,
        /// PNG to hash; its dimensions fill in --width/--height
        #[arg(long)]
        file: Option<PathBuf>,
        /// Explicit content hash (ignored when --file is given)
        #[arg(long)]
        content_hash: Option<String>,
        #[arg(long)]
        thumbnail: Option<String>,
        #[arg(long)]
        width: Option<u32>,
        #[arg(long)]
        height: Option<u32>,
        #[arg(long, default_value_t = false)]
        public: bool,
        #[arg(long = "tag")]
        tags: Vec<String>,
    },
    /// Upload a PNG as the project's blob
    Upload {
        #[arg(long)]
        project: String,
        #[arg(long)]
        file: PathBuf,
    },
    /// Print a direct-upload URL for the project's blob
    IssueUploadUrl {
        #[arg(long)]
        project: String,
    },
    /// Link a blob uploaded through an upload URL
    Confirm {
        #[arg(long)]
        project: String,
    },
    /// Write the project's blob to a file ("-" for stdout)
    Download {
        #[arg(long)]
        project: String,
        #[arg(long, default_value = "-")]
        output: String,
    },
    /// Show a project
    Get {
        #[arg(long)]
        project: String,
    },
    /// Show the project with this exact title
    GetByTitle {
        #[arg(long)]
        title: String,
    },
    /// List projects, newest first
    List {
        #[arg(long, default_value_t = 0)]
        limit: usize,
        #[arg(long)]
        cursor: Option<String>,
    },
    /// Count projects
    Count,
    /// Change title, visibility or tags
    Update {
        #[arg(long)]
        project: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        public: Option<bool>,
        /// Replaces all tags; pass --clear-tags to remove them
        #[arg(long = "tag")]
        tags: Vec<String>,
        #[arg(long, default_value_t = false)]
        clear_tags: bool,
    },
    /// Delete a project and its blob
    Delete {
        #[arg(long)]
        project: String,
    },
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&logging.level));

    // Logs go to stderr so stdout stays machine-readable.
    if logging.format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => canvas_store::config::load_config(path)?,
        None => Config::default(),
    };
    init_tracing(&config.logging);
    if let Some(path) = &cli.config {
        info!("Loaded configuration from {}", path.display());
    }

    let service = canvas_store::build_service(&config)?;

    match run(&service, &cli.owner, cli.command).await {
        Ok(Some(output)) => {
            println!("{}", serde_json::to_string_pretty(&output)?);
            Ok(())
        }
        Ok(None) => Ok(()),
        Err(e) => {
            eprintln!("{}: {}", e.code(), e);
            std::process::exit(1);
        }
    }
}

async fn run(
    service: &ProjectService,
    owner: &str,
    command: Commands,
) -> Result<Option<serde_json::Value>, ProjectError> {
    let output = match command {
        Commands::Create {
            title,
            file,
            content_hash: explicit_hash,
            thumbnail,
            width,
            height,
            public,
            tags,
        } => {
            let (hash, dims) = match file {
                Some(path) => {
                    let data = tokio::fs::read(&path)
                        .await
                        .map_err(|e| anyhow::anyhow!("read {}: {e}", path.display()))?;
                    (content_hash(&data), png_dimensions(&data))
                }
                None => (explicit_hash.unwrap_or_default(), None),
            };
            let input = NewProject {
                title,
                content_hash: hash,
                thumbnail_data: thumbnail.unwrap_or_default(),
                width: width.or(dims.map(|d| d.0)).unwrap_or(0),
                height: height.or(dims.map(|d| d.1)).unwrap_or(0),
                is_public: public,
                tags,
            };
            let result = service.create_or_upsert(owner, input).await?;
            serde_json::to_value(result).map_err(anyhow::Error::from)?
        }
        Commands::Upload { project, file } => {
            let handle = tokio::fs::File::open(&file)
                .await
                .map_err(|e| anyhow::anyhow!("open {}: {e}", file.display()))?;
            let body: BlobReader = Box::pin(handle);
            let url = service.upload_blob(owner, &project, body).await?;
            json!({ "projectId": project, "storageURL": url })
        }
        Commands::IssueUploadUrl { project } => {
            let url = service.issue_upload_url(owner, &project).await?;
            json!({ "projectId": project, "uploadURL": url })
        }
        Commands::Confirm { project } => {
            let url = service.confirm_upload(owner, &project).await?;
            json!({ "projectId": project, "storageURL": url })
        }
        Commands::Download { project, output } => {
            let mut reader = service.download_blob(owner, &project).await?;
            let copied = if output == "-" {
                let mut stdout = tokio::io::stdout();
                let n = tokio::io::copy(&mut reader, &mut stdout).await;
                n.map_err(anyhow::Error::from)?
            } else {
                let mut file = tokio::fs::File::create(&output)
                    .await
                    .map_err(|e| anyhow::anyhow!("create {output}: {e}"))?;
                tokio::io::copy(&mut reader, &mut file)
                    .await
                    .map_err(anyhow::Error::from)?
            };
            info!("downloaded {} bytes for project {}", copied, project);
            return Ok(None);
        }
        Commands::Get { project } => {
            let record = service.get_project(owner, &project).await?;
            serde_json::to_value(record).map_err(anyhow::Error::from)?
        }
        Commands::GetByTitle { title } => {
            let record = service.get_project_by_title(owner, &title).await?;
            serde_json::to_value(record).map_err(anyhow::Error::from)?
        }
        Commands::List { limit, cursor } => {
            let projects = service
                .list_projects(owner, limit, cursor.as_deref())
                .await?;
            let next_cursor = projects.last().map(|p| p.id.clone());
            json!({ "projects": projects, "nextCursor": next_cursor })
        }
        Commands::Count => {
            let count = service.count_projects(owner).await?;
            json!({ "count": count })
        }
        Commands::Update {
            project,
            title,
            public,
            tags,
            clear_tags,
        } => {
            let update = ProjectUpdate {
                title,
                is_public: public,
                tags: tags_update(tags, clear_tags),
            };
            service.update_project(owner, &project, update).await?;
            json!({ "projectId": project, "updated": true })
        }
        Commands::Delete { project } => {
            service.delete_project(owner, &project).await?;
            json!({ "projectId": project, "deleted": true })
        }
    };
    Ok(Some(output))
}

/// `--clear-tags` wins; no `--tag` leaves the tags untouched.
fn tags_update(tags: Vec<String>, clear: bool) -> Option<Vec<String>> {
    if clear {
        Some(Vec::new())
    } else if tags.is_empty() {
        None
    } else {
        Some(tags)
    }
}

/// Width and height from a PNG's IHDR chunk.
fn png_dimensions(data: &[u8]) -> Option<(u32, u32)> {
    if data.len() < 24 || data[..8] != PNG_SIGNATURE || &data[12..16] != b"IHDR" {
        return None;
    }
    let width = u32::from_be_bytes(data[16..20].try_into().ok()?);
    let height = u32::from_be_bytes(data[20..24].try_into().ok()?);
    Some((width, height))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn png_header(width: u32, height: u32) -> Vec<u8> {
        let mut data = PNG_SIGNATURE.to_vec();
        data.extend_from_slice(&13u32.to_be_bytes());
        data.extend_from_slice(b"IHDR");
        data.extend_from_slice(&width.to_be_bytes());
        data.extend_from_slice(&height.to_be_bytes());
        data
    }

    #[test]
    fn test_png_dimensions() {
        assert_eq!(png_dimensions(&png_header(640, 480)), Some((640, 480)));
        assert_eq!(png_dimensions(&png_header(1, 70000)), Some((1, 70000)));
    }

    #[test]
    fn test_png_dimensions_rejects_bad_input() {
        let header = png_header(640, 480);
        assert_eq!(png_dimensions(&header[..23]), None);
        assert_eq!(png_dimensions(b""), None);

        let mut not_png = header.clone();
        not_png[0] = b'G';
        assert_eq!(png_dimensions(&not_png), None);

        let mut wrong_chunk = header;
        wrong_chunk[12..16].copy_from_slice(b"IDAT");
        assert_eq!(png_dimensions(&wrong_chunk), None);
    }

    #[test]
    fn test_tags_update() {
        let tags = vec!["a".to_string(), "b".to_string()];
        assert_eq!(tags_update(tags.clone(), false), Some(tags.clone()));
        assert_eq!(tags_update(Vec::new(), false), None);
        assert_eq!(tags_update(Vec::new(), true), Some(Vec::new()));
        assert_eq!(tags_update(tags, true), Some(Vec::new()));
    }

    #[test]
    fn test_cli_parses_update_flags() {
        let cli = Cli::try_parse_from([
            "canvas-store",
            "--owner",
            "alice",
            "update",
            "--project",
            "p1",
            "--clear-tags",
        ])
        .unwrap();
        assert_eq!(cli.owner, "alice");
        match cli.command {
            Commands::Update {
                project,
                tags,
                clear_tags,
                ..
            } => {
                assert_eq!(project, "p1");
                assert_eq!(tags_update(tags, clear_tags), Some(Vec::new()));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
