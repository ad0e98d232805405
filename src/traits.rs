//! Collaborator traits for engines and index builders.
//!
//! Delphic never embeds, retrieves, or prompts by itself. Everything that
//! touches a model goes through the traits in this module, so the query
//! sessions and the indexing job can be driven by the HTTP orchestrator
//! client in production and by stubs in tests.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐ resolve(id) ┌───────────────┐ chat(query) ┌────────────┐
//! │ QuerySession │────────────▶│ EngineFactory │────────────▶│ ChatEngine │
//! └──────────────┘             └───────────────┘             └────────────┘
//!
//! ┌──────────────┐ build(docs) ┌──────────────────────┐ persist(dir) ┌──────────────┐
//! │ IndexingJob  │────────────▶│ Document/GraphIndex  │─────────────▶│ IndexArtifact│
//! │   Runner     │             │       Builder        │              └──────────────┘
//! └──────────────┘             └──────────────────────┘
//! ```

use anyhow::Result;
use async_trait::async_trait;
use std::path::{Path, PathBuf};

use delphic_core::error::EngineResolutionError;
use delphic_core::models::ChatResponse;

use crate::config::GraphSpaceConfig;

// ═══════════════════════════════════════════════════════════════════════
// Engines
// ═══════════════════════════════════════════════════════════════════════

/// A stateful, chat-capable query engine bound to one identifier.
///
/// Engines keep conversation history between calls (questions are
/// condensed against earlier turns), so one engine serves exactly one
/// session.
#[async_trait]
pub trait ChatEngine: Send + Sync {
    /// Answer one query. The result is returned whole; no partial tokens.
    async fn chat(&self, query: &str) -> Result<ChatResponse>;

    /// Release any resources held for this engine. Called once when the
    /// session ends. Defaults to a no-op.
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Resolves an identifier extracted from a socket path into a chat engine.
///
/// # Errors
///
/// - [`EngineResolutionError::NotFound`] / [`EngineResolutionError::NotReady`]
///   when the identifier has no usable index. The session rejects the
///   socket with close code 4000.
/// - [`EngineResolutionError::Backend`] for any other failure. The session
///   closes the socket with 1011.
#[async_trait]
pub trait EngineFactory: Send + Sync {
    /// Short label used in logs (e.g. `"hybrid"`, `"graph"`).
    fn name(&self) -> &str;

    async fn resolve(&self, id: &str) -> Result<Box<dyn ChatEngine>, EngineResolutionError>;
}

// ═══════════════════════════════════════════════════════════════════════
// Index builders
// ═══════════════════════════════════════════════════════════════════════

/// A document read back from the materialized scratch directory.
#[derive(Debug, Clone)]
pub struct LoadedDocument {
    /// Path relative to the scratch directory, `/`-separated.
    pub path: String,
    pub content: Vec<u8>,
}

/// An index produced by a builder, opaque to Delphic.
pub trait IndexArtifact: Send + Sync {
    /// Write the artifact into `dir`. The directory exists and is empty.
    fn persist(&self, dir: &Path) -> Result<()>;
}

/// Builds a vector index from a set of documents.
#[async_trait]
pub trait DocumentIndexBuilder: Send + Sync {
    async fn build(&self, documents: &[LoadedDocument]) -> Result<Box<dyn IndexArtifact>>;
}

/// Builds a knowledge-graph index from a set of documents.
#[async_trait]
pub trait GraphIndexBuilder: Send + Sync {
    async fn build(
        &self,
        documents: &[LoadedDocument],
        graph_space: &GraphSpaceConfig,
    ) -> Result<Box<dyn IndexArtifact>>;
}

// ═══════════════════════════════════════════════════════════════════════
// Artifact layout
// ═══════════════════════════════════════════════════════════════════════

/// On-disk layout of persisted artifacts:
/// `<root>/<collection_id>/{vectorindex,graphindex}/`.
#[derive(Debug, Clone)]
pub struct ArtifactLayout {
    root: PathBuf,
}

impl ArtifactLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn collection_dir(&self, collection_id: i64) -> PathBuf {
        self.root.join(collection_id.to_string())
    }

    pub fn vector_dir(&self, collection_id: i64) -> PathBuf {
        self.collection_dir(collection_id).join("vectorindex")
    }

    pub fn graph_dir(&self, collection_id: i64) -> PathBuf {
        self.collection_dir(collection_id).join("graphindex")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_paths() {
        let layout = ArtifactLayout::new("/srv/storage");
        assert_eq!(layout.collection_dir(42), PathBuf::from("/srv/storage/42"));
        assert_eq!(
            layout.vector_dir(42),
            PathBuf::from("/srv/storage/42/vectorindex")
        );
        assert_eq!(
            layout.graph_dir(42),
            PathBuf::from("/srv/storage/42/graphindex")
        );
    }
}
