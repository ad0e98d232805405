//! # Delphic CLI (`delphic`)
//!
//! ## Usage
//!
//! ```bash
//! delphic --config ./config/delphic.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `delphic init` | Create the SQLite database and run schema migrations |
//! | `delphic create --title <t> <paths>...` | Store files as a new `PENDING` collection |
//! | `delphic index <id>` | Run the indexing job for a collection in the foreground |
//! | `delphic status <id>` | Print a collection's status as JSON |
//! | `delphic serve` | Start the HTTP and websocket server |

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use walkdir::WalkDir;

use delphic::config::{self, Config};
use delphic::jobs::{IndexingJobRunner, JobOutcome};
use delphic::orchestrator::{OrchestratorClient, RemoteGraphIndexBuilder, RemoteVectorIndexBuilder};
use delphic::sqlite_store::SqliteStore;
use delphic::{db, logging, migrate, server};
use delphic_core::models::{NewCollection, NewDocument};
use delphic_core::store::CollectionStore;

/// Delphic: chat with your document collections.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/delphic.example.toml` for a full example.
#[derive(Parser)]
#[command(name = "delphic", version, about = "Chat with your document collections")]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/delphic.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Idempotent.
    Init,

    /// Store files as a new collection.
    ///
    /// Directories are walked recursively; their files keep their path
    /// relative to the directory.
    Create {
        #[arg(long)]
        title: String,

        #[arg(long)]
        description: Option<String>,

        /// Build the indexes right away instead of leaving the collection
        /// `PENDING`.
        #[arg(long)]
        index: bool,

        /// Files or directories to upload.
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// Run the indexing job for a collection in the foreground.
    Index {
        id: i64,
    },

    /// Print a collection's status as JSON.
    Status {
        id: i64,
    },

    /// Start the HTTP and websocket server.
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let cfg = config::load_config(&cli.config)?;
    logging::init(&cfg.logging.level)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized at {}", cfg.db.path.display());
        }
        Commands::Create {
            title,
            description,
            index,
            paths,
        } => {
            let store = open_store(&cfg).await?;
            let documents = collect_documents(&paths)?;
            let collection = store
                .create_collection(&NewCollection { title, description })
                .await?;
            for doc in &documents {
                store.add_document(collection.id, doc).await?;
            }
            println!(
                "Created collection {} with {} document(s)",
                collection.id,
                documents.len()
            );
            if index {
                run_index(&cfg, store, collection.id).await?;
            }
        }
        Commands::Index { id } => {
            let store = open_store(&cfg).await?;
            run_index(&cfg, store, id).await?;
        }
        Commands::Status { id } => {
            let store = open_store(&cfg).await?;
            let collection = store
                .get_collection(id)
                .await?
                .with_context(|| format!("collection {} not found", id))?;
            println!("{}", serde_json::to_string_pretty(&collection)?);
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}

async fn open_store(cfg: &Config) -> Result<Arc<SqliteStore>> {
    let pool = db::connect(cfg).await?;
    migrate::migrate_pool(&pool).await?;
    Ok(Arc::new(SqliteStore::new(pool)))
}

async fn run_index(cfg: &Config, store: Arc<SqliteStore>, id: i64) -> Result<()> {
    let client = Arc::new(OrchestratorClient::from_config(cfg)?);
    let runner = IndexingJobRunner::from_config(
        cfg,
        store,
        Arc::new(RemoteVectorIndexBuilder::new(client.clone())),
        Arc::new(RemoteGraphIndexBuilder::new(client)),
    );
    match runner.run(id).await {
        JobOutcome::Completed => {
            println!(
                "Collection {} indexed into {}",
                id,
                runner.layout().collection_dir(id).display()
            );
            Ok(())
        }
        JobOutcome::Failed => bail!("indexing collection {} failed; see log", id),
        JobOutcome::Missing => bail!("collection {} not found", id),
    }
}

fn collect_documents(paths: &[PathBuf]) -> Result<Vec<NewDocument>> {
    let mut documents = Vec::new();
    for root in paths {
        if root.is_file() {
            let name = root
                .file_name()
                .with_context(|| format!("not a file: {}", root.display()))?;
            documents.push(read_document(root, Path::new(name))?);
            continue;
        }
        let mut entries = Vec::new();
        for entry in WalkDir::new(root) {
            let entry = entry?;
            if entry.file_type().is_file() {
                entries.push(entry.into_path());
            }
        }
        entries.sort();
        for path in entries {
            let relative = path.strip_prefix(root).unwrap_or(&path).to_path_buf();
            documents.push(read_document(&path, &relative)?);
        }
    }
    Ok(documents)
}

fn read_document(path: &Path, name: &Path) -> Result<NewDocument> {
    let content =
        std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let file_name = name
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/");
    Ok(NewDocument { file_name, content })
}
