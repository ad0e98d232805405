//! Background indexing jobs.
//!
//! [`IndexingJobRunner::run`] drives one collection through
//! `PENDING → RUNNING → {COMPLETE, ERROR}`:
//!
//! 1. Load the collection and its documents (missing → nothing changes).
//! 2. Mark it `RUNNING`.
//! 3. Write every document into a fresh scratch directory, keeping its
//!    relative path. The directory is a [`TempDir`] and is removed however
//!    the job ends, including time-limit cancellation.
//! 4. Read the tree back and build the vector index, then persist it to
//!    `<root>/<id>/vectorindex/`.
//! 5. Build the knowledge-graph index with the configured graph space, then
//!    persist it to `<root>/<id>/graphindex/`.
//! 6. Mark it `COMPLETE` and record the artifact marker.
//!
//! Failures in 3–5 mark the collection `ERROR` and are reported through
//! [`JobOutcome`]; they are never returned as errors. [`JobQueue`] feeds
//! collection ids to a pool of workers and also turns panics into `ERROR`.

use anyhow::{anyhow, Result};
use sha2::{Digest, Sha256};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::{mpsc, Mutex};
use walkdir::WalkDir;

use delphic_core::error::IndexBuildError;
use delphic_core::models::{CollectionStatus, Document};
use delphic_core::store::CollectionStore;

use crate::config::{Config, GraphSpaceConfig};
use crate::traits::{ArtifactLayout, DocumentIndexBuilder, GraphIndexBuilder, LoadedDocument};

/// Result of one indexing run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    /// Both indexes were built and persisted; status is `COMPLETE`.
    Completed,
    /// The build failed; status is `ERROR` (or unchanged if the job could
    /// not start).
    Failed,
    /// No collection with that id exists.
    Missing,
}

impl JobOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, JobOutcome::Completed)
    }
}

pub struct IndexingJobRunner {
    store: Arc<dyn CollectionStore>,
    vector_builder: Arc<dyn DocumentIndexBuilder>,
    graph_builder: Arc<dyn GraphIndexBuilder>,
    layout: ArtifactLayout,
    graph_space: GraphSpaceConfig,
    scratch_root: Option<PathBuf>,
    soft_time_limit: Duration,
}

impl IndexingJobRunner {
    pub fn new(
        store: Arc<dyn CollectionStore>,
        vector_builder: Arc<dyn DocumentIndexBuilder>,
        graph_builder: Arc<dyn GraphIndexBuilder>,
        layout: ArtifactLayout,
    ) -> Self {
        Self {
            store,
            vector_builder,
            graph_builder,
            layout,
            graph_space: GraphSpaceConfig::default(),
            scratch_root: None,
            soft_time_limit: Duration::from_secs(3000),
        }
    }

    /// Build a runner with storage, graph space, and time limit taken from
    /// the config.
    pub fn from_config(
        config: &Config,
        store: Arc<dyn CollectionStore>,
        vector_builder: Arc<dyn DocumentIndexBuilder>,
        graph_builder: Arc<dyn GraphIndexBuilder>,
    ) -> Self {
        let mut runner = Self::new(
            store,
            vector_builder,
            graph_builder,
            ArtifactLayout::new(&config.storage.root),
        )
        .with_graph_space(config.graph_space.clone())
        .with_soft_time_limit(Duration::from_secs(config.jobs.soft_time_limit_secs));
        if let Some(dir) = &config.storage.scratch_dir {
            runner = runner.with_scratch_root(dir);
        }
        runner
    }

    pub fn with_graph_space(mut self, graph_space: GraphSpaceConfig) -> Self {
        self.graph_space = graph_space;
        self
    }

    /// Create scratch directories under `dir` instead of the system temp dir.
    pub fn with_scratch_root(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_root = Some(dir.into());
        self
    }

    pub fn with_soft_time_limit(mut self, limit: Duration) -> Self {
        self.soft_time_limit = limit;
        self
    }

    pub fn layout(&self) -> &ArtifactLayout {
        &self.layout
    }

    /// Run the indexing job for one collection. Never returns an error.
    pub async fn run(&self, collection_id: i64) -> JobOutcome {
        let collection = match self.store.get_collection(collection_id).await {
            Ok(Some(c)) => c,
            Ok(None) => {
                tracing::error!(collection_id, "collection not found; nothing to index");
                return JobOutcome::Missing;
            }
            Err(e) => {
                tracing::error!(collection_id, error = %e, "failed to load collection");
                return JobOutcome::Failed;
            }
        };

        let documents = match self.store.list_documents(collection_id).await {
            Ok(docs) => docs,
            Err(e) => {
                tracing::error!(collection_id, error = %e, "failed to load documents");
                return JobOutcome::Failed;
            }
        };

        if let Err(e) = self
            .store
            .update_status(collection_id, CollectionStatus::Running)
            .await
        {
            tracing::error!(
                collection_id,
                status = %collection.status,
                error = %e,
                "cannot start indexing"
            );
            return JobOutcome::Failed;
        }
        tracing::info!(
            collection_id,
            title = %collection.title,
            documents = documents.len(),
            "indexing started"
        );

        let limit = self.soft_time_limit;
        let result = match tokio::time::timeout(limit, self.build(collection_id, &documents)).await
        {
            Ok(result) => result,
            Err(_) => Err(IndexBuildError::TimedOut(limit.as_secs())),
        };

        match result {
            Ok(marker) => self.mark_complete(collection_id, &marker).await,
            Err(e) => {
                self.mark_failed(collection_id, &e).await;
                JobOutcome::Failed
            }
        }
    }

    async fn build(
        &self,
        collection_id: i64,
        documents: &[Document],
    ) -> Result<String, IndexBuildError> {
        let scratch = self.scratch_dir()?;
        materialize(scratch.path(), documents).await?;
        let loaded = load_directory(scratch.path())?;
        tracing::info!(
            collection_id,
            scratch = %scratch.path().display(),
            files = loaded.len(),
            "documents materialized"
        );

        let collection_dir = self.layout.collection_dir(collection_id);
        if collection_dir.exists() {
            tokio::fs::remove_dir_all(&collection_dir).await?;
        }

        let vector = self
            .vector_builder
            .build(&loaded)
            .await
            .map_err(|e| builder_error("vector", e))?;
        let vector_dir = self.layout.vector_dir(collection_id);
        tokio::fs::create_dir_all(&vector_dir).await?;
        vector
            .persist(&vector_dir)
            .map_err(|e| builder_error("vector", e))?;
        tracing::info!(collection_id, dir = %vector_dir.display(), "vector index persisted");

        let graph = self
            .graph_builder
            .build(&loaded, &self.graph_space)
            .await
            .map_err(|e| builder_error("graph", e))?;
        let graph_dir = self.layout.graph_dir(collection_id);
        tokio::fs::create_dir_all(&graph_dir).await?;
        graph
            .persist(&graph_dir)
            .map_err(|e| builder_error("graph", e))?;
        tracing::info!(collection_id, dir = %graph_dir.display(), "graph index persisted");

        Ok(format!("success:{}", fingerprint(&loaded)))
    }

    fn scratch_dir(&self) -> Result<TempDir, IndexBuildError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("delphic-index-");
        let dir = match &self.scratch_root {
            Some(root) => {
                std::fs::create_dir_all(root)?;
                builder.tempdir_in(root)?
            }
            None => builder.tempdir()?,
        };
        Ok(dir)
    }

    async fn mark_complete(&self, collection_id: i64, marker: &str) -> JobOutcome {
        if let Err(e) = self
            .store
            .update_status(collection_id, CollectionStatus::Complete)
            .await
        {
            tracing::error!(collection_id, error = %e, "failed to record completion");
            return JobOutcome::Failed;
        }
        if let Err(e) = self.store.set_model(collection_id, Some(marker)).await {
            tracing::warn!(collection_id, error = %e, "failed to record artifact marker");
        }
        tracing::info!(collection_id, "indexing complete");
        JobOutcome::Completed
    }

    /// Record a failed build: log it and move the collection to `ERROR`.
    pub(crate) async fn mark_failed(&self, collection_id: i64, error: &IndexBuildError) {
        tracing::error!(collection_id, error = %error, "error creating index");
        if let Err(e) = self
            .store
            .update_status(collection_id, CollectionStatus::Error)
            .await
        {
            tracing::error!(collection_id, error = %e, "failed to record ERROR status");
        }
    }
}

fn builder_error(stage: &'static str, err: anyhow::Error) -> IndexBuildError {
    IndexBuildError::Builder {
        stage,
        message: format!("{:#}", err),
    }
}

/// Resolve a document's file name inside `root`, refusing anything that
/// would land outside it.
fn scratch_path(root: &Path, file_name: &str) -> Result<PathBuf, IndexBuildError> {
    let mut out = root.to_path_buf();
    let mut parts = 0;
    for component in Path::new(file_name).components() {
        match component {
            Component::Normal(part) => {
                out.push(part);
                parts += 1;
            }
            Component::CurDir => {}
            _ => return Err(IndexBuildError::UnsafePath(file_name.to_string())),
        }
    }
    if parts == 0 {
        return Err(IndexBuildError::UnsafePath(file_name.to_string()));
    }
    Ok(out)
}

async fn materialize(root: &Path, documents: &[Document]) -> Result<(), IndexBuildError> {
    for doc in documents {
        let path = scratch_path(root, &doc.file_name)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, &doc.content).await?;
        tracing::debug!(file = %doc.file_name, bytes = doc.content.len(), "materialized");
    }
    Ok(())
}

/// Recursively read every file under `root`, sorted by path.
fn load_directory(root: &Path) -> Result<Vec<LoadedDocument>, IndexBuildError> {
    let mut loaded = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.map_err(std::io::Error::from)?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry.path().strip_prefix(root).unwrap_or(entry.path());
        let path = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        loaded.push(LoadedDocument {
            path,
            content: std::fs::read(entry.path())?,
        });
    }
    Ok(loaded)
}

fn fingerprint(documents: &[LoadedDocument]) -> String {
    let mut hasher = Sha256::new();
    for doc in documents {
        hasher.update(doc.path.as_bytes());
        hasher.update((doc.content.len() as u64).to_le_bytes());
        hasher.update(&doc.content);
    }
    format!("{:x}", hasher.finalize())
}

// ═══════════════════════════════════════════════════════════════════════
// Worker queue
// ═══════════════════════════════════════════════════════════════════════

/// Hands collection ids to background workers.
///
/// Cloning is cheap; all clones feed the same workers. Workers stop once
/// every clone is dropped.
#[derive(Clone)]
pub struct JobQueue {
    tx: mpsc::UnboundedSender<i64>,
}

impl JobQueue {
    /// Spawn `workers` tasks on the current tokio runtime.
    pub fn start(runner: Arc<IndexingJobRunner>, workers: usize) -> Self {
        let (tx, rx) = mpsc::unbounded_channel::<i64>();
        let rx = Arc::new(Mutex::new(rx));

        for worker in 0..workers.max(1) {
            let rx = rx.clone();
            let runner = runner.clone();
            tokio::spawn(async move {
                loop {
                    let next = rx.lock().await.recv().await;
                    let Some(collection_id) = next else {
                        break;
                    };
                    let outcome = run_guarded(&runner, collection_id).await;
                    tracing::debug!(worker, collection_id, ?outcome, "job finished");
                }
            });
        }

        Self { tx }
    }

    pub fn enqueue(&self, collection_id: i64) -> Result<()> {
        self.tx
            .send(collection_id)
            .map_err(|_| anyhow!("job queue is closed"))?;
        tracing::info!(collection_id, "indexing job queued");
        Ok(())
    }
}

/// Run one job in its own task so a panic is contained and recorded.
async fn run_guarded(runner: &Arc<IndexingJobRunner>, collection_id: i64) -> JobOutcome {
    let task_runner = runner.clone();
    match tokio::spawn(async move { task_runner.run(collection_id).await }).await {
        Ok(outcome) => outcome,
        Err(join_err) => {
            let err = IndexBuildError::Panicked(join_err.to_string());
            runner.mark_failed(collection_id, &err).await;
            JobOutcome::Failed
        }
    }
}
