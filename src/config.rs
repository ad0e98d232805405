//! TOML configuration parsing and validation.
//!
//! Loaded once at startup by [`load_config`] and shared read-only (`Arc`)
//! with every component. The `[llm]` section is the process-wide LLM
//! settings object: it is handed to the orchestrator client at
//! construction and never mutated afterwards.
//!
//! ```toml
//! [db]
//! path = "./data/delphic.sqlite"
//!
//! [storage]
//! root = "./storage"
//!
//! [server]
//! bind = "127.0.0.1:8000"
//!
//! [llm]
//! model_name = "gpt-3.5-turbo"
//! max_tokens = 512
//!
//! [orchestrator]
//! base_url = "http://127.0.0.1:8100"
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub storage: StorageConfig,
    pub server: ServerConfig,
    pub llm: LlmSettings,
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub graph_space: GraphSpaceConfig,
    #[serde(default)]
    pub jobs: JobsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    /// Root directory for persisted index artifacts.
    pub root: PathBuf,
    /// Parent directory for per-job scratch directories. Defaults to the
    /// system temp dir.
    #[serde(default)]
    pub scratch_dir: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

/// LLM service settings passed with every engine and index request.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct LlmSettings {
    pub model_name: String,
    pub max_tokens: u32,
    #[serde(default)]
    pub temperature: f32,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
}

fn default_chunk_size() -> usize {
    512
}

#[derive(Debug, Deserialize, Clone)]
pub struct OrchestratorConfig {
    pub base_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Retries for 429/5xx responses and network errors.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_timeout_secs() -> u64 {
    120
}

fn default_max_retries() -> u32 {
    3
}

/// Knowledge-graph space used when building graph indexes.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct GraphSpaceConfig {
    #[serde(default = "default_space_name")]
    pub space_name: String,
    #[serde(default = "default_relationship")]
    pub edge_types: Vec<String>,
    #[serde(default = "default_relationship")]
    pub rel_prop_names: Vec<String>,
    #[serde(default = "default_tags")]
    pub tags: Vec<String>,
    #[serde(default = "default_max_triplets")]
    pub max_triplets_per_chunk: usize,
    #[serde(default = "default_true")]
    pub include_embeddings: bool,
}

impl Default for GraphSpaceConfig {
    fn default() -> Self {
        Self {
            space_name: default_space_name(),
            edge_types: default_relationship(),
            rel_prop_names: default_relationship(),
            tags: default_tags(),
            max_triplets_per_chunk: default_max_triplets(),
            include_embeddings: true,
        }
    }
}

fn default_space_name() -> String {
    "llamaindex".to_string()
}
fn default_relationship() -> Vec<String> {
    vec!["relationship".to_string()]
}
fn default_tags() -> Vec<String> {
    vec!["entity".to_string()]
}
fn default_max_triplets() -> usize {
    10
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct JobsConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_soft_time_limit")]
    pub soft_time_limit_secs: u64,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            soft_time_limit_secs: default_soft_time_limit(),
        }
    }
}

fn default_workers() -> usize {
    1
}
fn default_soft_time_limit() -> u64 {
    3000
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    parse_config(&content)
}

/// Parse and validate a config document.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    if config.llm.model_name.trim().is_empty() {
        anyhow::bail!("llm.model_name must not be empty");
    }
    if config.llm.max_tokens == 0 {
        anyhow::bail!("llm.max_tokens must be > 0");
    }
    if !(0.0..=2.0).contains(&config.llm.temperature) {
        anyhow::bail!("llm.temperature must be in [0.0, 2.0]");
    }
    if config.llm.chunk_size == 0 {
        anyhow::bail!("llm.chunk_size must be > 0");
    }

    if !config.orchestrator.base_url.starts_with("http://")
        && !config.orchestrator.base_url.starts_with("https://")
    {
        anyhow::bail!(
            "orchestrator.base_url must be an http(s) URL, got '{}'",
            config.orchestrator.base_url
        );
    }

    if config.jobs.workers == 0 {
        anyhow::bail!("jobs.workers must be >= 1");
    }
    if config.jobs.soft_time_limit_secs == 0 {
        anyhow::bail!("jobs.soft_time_limit_secs must be > 0");
    }

    if config.graph_space.space_name.trim().is_empty() {
        anyhow::bail!("graph_space.space_name must not be empty");
    }

    Ok(config)
}
