//! HTTP client for the external LLM orchestration service.
//!
//! Delphic does not embed, retrieve, or prompt by itself. Engines and index
//! builders in this module forward that work to the orchestrator over JSON
//! and carry the process-wide [`LlmSettings`] on every request.
//!
//! | Type | Trait | Endpoint |
//! |------|-------|----------|
//! | [`HybridEngineFactory`] | [`EngineFactory`] | `POST /engines/hybrid` |
//! | [`GraphEngineFactory`] | [`EngineFactory`] | `POST /engines/graph` |
//! | [`RemoteChatEngine`] | [`ChatEngine`] | `POST /engines/{id}/chat`, `DELETE /engines/{id}` |
//! | [`RemoteVectorIndexBuilder`] | [`DocumentIndexBuilder`] | `POST /indexes/vector` |
//! | [`RemoteGraphIndexBuilder`] | [`GraphIndexBuilder`] | `POST /indexes/graph` |
//!
//! # Retry Strategy
//!
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (other) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, … (capped at 32s)

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use base64::Engine as _;
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Component, Path};
use std::sync::Arc;
use std::time::Duration;

use delphic_core::error::EngineResolutionError;
use delphic_core::models::{ChatResponse, CollectionStatus};
use delphic_core::store::CollectionStore;

use crate::config::{Config, GraphSpaceConfig, LlmSettings, OrchestratorConfig};
use crate::traits::{
    ArtifactLayout, ChatEngine, DocumentIndexBuilder, EngineFactory, GraphIndexBuilder,
    IndexArtifact, LoadedDocument,
};

// ═══════════════════════════════════════════════════════════════════════
// Client
// ═══════════════════════════════════════════════════════════════════════

pub struct OrchestratorClient {
    http: reqwest::Client,
    base_url: String,
    max_retries: u32,
    llm: Arc<LlmSettings>,
}

impl OrchestratorClient {
    pub fn new(config: &OrchestratorConfig, llm: Arc<LlmSettings>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            max_retries: config.max_retries,
            llm,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(&config.orchestrator, Arc::new(config.llm.clone()))
    }

    pub fn llm(&self) -> &LlmSettings {
        &self.llm
    }

    /// Send a request, retrying rate limits, server errors, and network
    /// failures. Any other response (success or 4xx) is returned as is.
    async fn send<B: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<reqwest::Response> {
        let url = format!("{}{}", self.base_url, path);
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let mut request = self.http.request(method.clone(), &url);
            if let Some(body) = body {
                request = request.json(body);
            }

            match request.send().await {
                Ok(response) => {
                    let status = response.status();
                    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                        let body_text = response.text().await.unwrap_or_default();
                        tracing::warn!(%url, %status, attempt, "orchestrator request failed; retrying");
                        last_err = Some(anyhow!("orchestrator error {}: {}", status, body_text));
                        continue;
                    }
                    return Ok(response);
                }
                Err(e) => {
                    tracing::warn!(%url, error = %e, attempt, "orchestrator unreachable; retrying");
                    last_err = Some(e.into());
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow!("orchestrator request failed after retries")))
    }

    async fn call<B, T>(&self, method: Method, path: &str, body: Option<&B>) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let response = self.send(method, path, body).await?;
        decode(response).await
    }

    /// Ask the orchestrator to construct a chat engine. A 404 means the
    /// referenced index does not exist.
    async fn create_engine<B: Serialize>(
        self: &Arc<Self>,
        kind: &str,
        id: &str,
        body: &B,
    ) -> Result<RemoteChatEngine, EngineResolutionError> {
        let path = format!("/engines/{}", kind);
        let response = self
            .send(Method::POST, &path, Some(body))
            .await
            .map_err(|e| EngineResolutionError::Backend(format!("{:#}", e)))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(EngineResolutionError::NotFound(id.to_string()));
        }

        let created: EngineCreated = decode(response)
            .await
            .map_err(|e| EngineResolutionError::Backend(format!("{:#}", e)))?;
        if !is_path_safe_engine_id(&created.engine_id) {
            return Err(EngineResolutionError::Backend(format!(
                "orchestrator returned an unusable engine id: {:?}",
                created.engine_id
            )));
        }
        tracing::debug!(kind, id, engine_id = %created.engine_id, "engine created");

        Ok(RemoteChatEngine {
            client: self.clone(),
            engine_id: created.engine_id,
        })
    }
}

/// Engine ids are spliced into `/engines/{id}` paths, so only a single
/// plain path segment is accepted.
fn is_path_safe_engine_id(engine_id: &str) -> bool {
    !engine_id.is_empty()
        && engine_id != "."
        && engine_id != ".."
        && engine_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    let status = response.status();
    if !status.is_success() {
        let body_text = response.text().await.unwrap_or_default();
        bail!("orchestrator error {}: {}", status, body_text);
    }
    response
        .json()
        .await
        .context("invalid orchestrator response")
}

// ═══════════════════════════════════════════════════════════════════════
// Wire types
// ═══════════════════════════════════════════════════════════════════════

#[derive(Serialize)]
struct HybridEngineRequest<'a> {
    vector_index_dir: String,
    graph_index_dir: String,
    llm: &'a LlmSettings,
}

#[derive(Serialize)]
struct GraphEngineRequest<'a> {
    space_name: &'a str,
    llm: &'a LlmSettings,
}

#[derive(Deserialize)]
struct EngineCreated {
    engine_id: String,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    message: &'a str,
}

#[derive(Serialize)]
struct WireDocument<'a> {
    path: &'a str,
    content_base64: String,
}

impl<'a> From<&'a LoadedDocument> for WireDocument<'a> {
    fn from(doc: &'a LoadedDocument) -> Self {
        Self {
            path: &doc.path,
            content_base64: base64::engine::general_purpose::STANDARD.encode(&doc.content),
        }
    }
}

#[derive(Serialize)]
struct VectorIndexRequest<'a> {
    documents: Vec<WireDocument<'a>>,
    llm: &'a LlmSettings,
}

#[derive(Serialize)]
struct GraphIndexRequest<'a> {
    documents: Vec<WireDocument<'a>>,
    graph_space: &'a GraphSpaceConfig,
    llm: &'a LlmSettings,
}

// ═══════════════════════════════════════════════════════════════════════
// Engines
// ═══════════════════════════════════════════════════════════════════════

/// A chat engine living in the orchestrator, addressed by `engine_id`.
pub struct RemoteChatEngine {
    client: Arc<OrchestratorClient>,
    engine_id: String,
}

impl RemoteChatEngine {
    pub fn engine_id(&self) -> &str {
        &self.engine_id
    }
}

#[async_trait]
impl ChatEngine for RemoteChatEngine {
    async fn chat(&self, query: &str) -> Result<ChatResponse> {
        let path = format!("/engines/{}/chat", self.engine_id);
        self.client
            .call(Method::POST, &path, Some(&ChatRequest { message: query }))
            .await
    }

    async fn close(&self) -> Result<()> {
        let path = format!("/engines/{}", self.engine_id);
        let response = self.client.send::<()>(Method::DELETE, &path, None).await?;
        // Already gone is fine.
        if !response.status().is_success() && response.status() != StatusCode::NOT_FOUND {
            bail!("failed to release engine {}: {}", self.engine_id, response.status());
        }
        Ok(())
    }
}

/// Resolves collection ids into hybrid (vector + keyword graph) engines
/// over the collection's persisted artifacts.
///
/// Only `COMPLETE` collections resolve; anything else is
/// [`EngineResolutionError::NotReady`].
pub struct HybridEngineFactory {
    client: Arc<OrchestratorClient>,
    store: Arc<dyn CollectionStore>,
    layout: ArtifactLayout,
}

impl HybridEngineFactory {
    pub fn new(
        client: Arc<OrchestratorClient>,
        store: Arc<dyn CollectionStore>,
        layout: ArtifactLayout,
    ) -> Self {
        Self {
            client,
            store,
            layout,
        }
    }
}

#[async_trait]
impl EngineFactory for HybridEngineFactory {
    fn name(&self) -> &str {
        "hybrid"
    }

    async fn resolve(&self, id: &str) -> Result<Box<dyn ChatEngine>, EngineResolutionError> {
        let collection_id: i64 = id
            .parse()
            .map_err(|_| EngineResolutionError::NotFound(id.to_string()))?;

        let collection = self
            .store
            .get_collection(collection_id)
            .await
            .map_err(|e| EngineResolutionError::Backend(format!("{:#}", e)))?
            .ok_or_else(|| EngineResolutionError::NotFound(id.to_string()))?;

        if collection.status != CollectionStatus::Complete {
            return Err(EngineResolutionError::NotReady {
                id: id.to_string(),
                status: collection.status,
            });
        }

        let vector_dir = self.layout.vector_dir(collection_id);
        let graph_dir = self.layout.graph_dir(collection_id);
        if !vector_dir.is_dir() || !graph_dir.is_dir() {
            tracing::warn!(collection_id, "collection is COMPLETE but artifacts are missing");
            return Err(EngineResolutionError::NotFound(id.to_string()));
        }

        let request = HybridEngineRequest {
            vector_index_dir: vector_dir.display().to_string(),
            graph_index_dir: graph_dir.display().to_string(),
            llm: self.client.llm(),
        };
        let engine = self.client.create_engine("hybrid", id, &request).await?;
        Ok(Box::new(engine))
    }
}

/// Resolves graph-space names into knowledge-graph-only engines.
pub struct GraphEngineFactory {
    client: Arc<OrchestratorClient>,
}

impl GraphEngineFactory {
    pub fn new(client: Arc<OrchestratorClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl EngineFactory for GraphEngineFactory {
    fn name(&self) -> &str {
        "graph"
    }

    async fn resolve(&self, id: &str) -> Result<Box<dyn ChatEngine>, EngineResolutionError> {
        let request = GraphEngineRequest {
            space_name: id,
            llm: self.client.llm(),
        };
        let engine = self.client.create_engine("graph", id, &request).await?;
        Ok(Box::new(engine))
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Index builders
// ═══════════════════════════════════════════════════════════════════════

/// Files returned by an index build, written verbatim on persist.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FileArtifact {
    pub files: BTreeMap<String, String>,
}

impl IndexArtifact for FileArtifact {
    fn persist(&self, dir: &Path) -> Result<()> {
        for (name, contents) in &self.files {
            let relative = Path::new(name);
            if name.is_empty()
                || !relative
                    .components()
                    .all(|c| matches!(c, Component::Normal(_)))
            {
                bail!("refusing to write artifact file outside the index dir: {}", name);
            }
            let path = dir.join(relative);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&path, contents)
                .with_context(|| format!("failed to write {}", path.display()))?;
        }
        Ok(())
    }
}

pub struct RemoteVectorIndexBuilder {
    client: Arc<OrchestratorClient>,
}

impl RemoteVectorIndexBuilder {
    pub fn new(client: Arc<OrchestratorClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl DocumentIndexBuilder for RemoteVectorIndexBuilder {
    async fn build(&self, documents: &[LoadedDocument]) -> Result<Box<dyn IndexArtifact>> {
        let request = VectorIndexRequest {
            documents: documents.iter().map(WireDocument::from).collect(),
            llm: self.client.llm(),
        };
        let artifact: FileArtifact = self
            .client
            .call(Method::POST, "/indexes/vector", Some(&request))
            .await?;
        Ok(Box::new(artifact))
    }
}

pub struct RemoteGraphIndexBuilder {
    client: Arc<OrchestratorClient>,
}

impl RemoteGraphIndexBuilder {
    pub fn new(client: Arc<OrchestratorClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl GraphIndexBuilder for RemoteGraphIndexBuilder {
    async fn build(
        &self,
        documents: &[LoadedDocument],
        graph_space: &GraphSpaceConfig,
    ) -> Result<Box<dyn IndexArtifact>> {
        let request = GraphIndexRequest {
            documents: documents.iter().map(WireDocument::from).collect(),
            graph_space,
            llm: self.client.llm(),
        };
        let artifact: FileArtifact = self
            .client
            .call(Method::POST, "/indexes/graph", Some(&request))
            .await?;
        Ok(Box::new(artifact))
    }
}
