//! Configuration parsing and validation.
//!
//! `mdrag` reads an optional TOML file (default `./mdrag.toml`). Every
//! section and field has a default, so a missing file is equivalent to an
//! empty one. After parsing, environment overrides are applied and the
//! result is validated.
//!
//! # Example
//!
//! ```toml
//! [store]
//! path = "_vector_db"
//!
//! [ingest]
//! dir = "./markdown_files"
//! glob = "**/*.md"
//!
//! [chunking]
//! chunk_size = 250
//! chunk_overlap = 30
//!
//! [embedding]
//! provider = "openai"
//! model = "text-embedding-3-small"
//!
//! [retrieval]
//! default_k = 4
//! cache_ttl_secs = 300
//!
//! [llm]
//! model = "gpt-4o-mini"
//!
//! [pipeline]
//! timeout_secs = 180
//!
//! [server]
//! bind = "127.0.0.1:7860"
//! ```
//!
//! # Environment
//!
//! | Variable | Effect |
//! |----------|--------|
//! | `VECTOR_DB_PATH` | Overrides `[store].path` |
//! | `OPENAI_API_KEY` | Required by the `openai` embedding and chat providers |

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use markdown_rag_core::cache;
use markdown_rag_core::chunk::ChunkerOptions;

/// Environment variable overriding `[store].path`.
pub const VECTOR_DB_PATH_ENV: &str = "VECTOR_DB_PATH";

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

fn default_store_path() -> PathBuf {
    PathBuf::from("_vector_db")
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    #[serde(default = "default_ingest_dir")]
    pub dir: PathBuf,
    #[serde(default = "default_glob")]
    pub glob: String,
    /// Where `POST /documents` writes uploaded files before ingesting them.
    #[serde(default = "default_upload_dir")]
    pub upload_dir: PathBuf,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            dir: default_ingest_dir(),
            glob: default_glob(),
            upload_dir: default_upload_dir(),
        }
    }
}

fn default_ingest_dir() -> PathBuf {
    PathBuf::from("./markdown_files")
}
fn default_glob() -> String {
    "**/*.md".to_string()
}
fn default_upload_dir() -> PathBuf {
    PathBuf::from("_uploads")
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
    #[serde(default = "default_header_levels")]
    pub header_levels: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            header_levels: default_header_levels(),
        }
    }
}

impl ChunkingConfig {
    pub fn options(&self) -> ChunkerOptions {
        ChunkerOptions {
            chunk_size: self.chunk_size,
            chunk_overlap: self.chunk_overlap,
            header_levels: self.header_levels,
        }
    }
}

fn default_chunk_size() -> usize {
    250
}
fn default_chunk_overlap() -> usize {
    30
}
fn default_header_levels() -> usize {
    4
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Override for the provider's base URL.
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default)]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: None,
            dims: None,
            base_url: None,
            batch_size: default_batch_size(),
            max_retries: 0,
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl EmbeddingConfig {
    /// Configured model, or the provider's default.
    pub fn model_name(&self) -> String {
        match (&self.model, self.provider.as_str()) {
            (Some(m), _) => m.clone(),
            (None, "ollama") => "nomic-embed-text".to_string(),
            (None, _) => "text-embedding-3-small".to_string(),
        }
    }

    /// Configured dimensionality, or the provider default's.
    pub fn dims(&self) -> usize {
        match (self.dims, self.provider.as_str()) {
            (Some(d), _) => d,
            (None, "ollama") => 768,
            (None, _) => 1536,
        }
    }
}

fn default_embedding_provider() -> String {
    "openai".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_k")]
    pub default_k: usize,
    /// Hits scoring below this cosine similarity are dropped. Unset keeps all.
    #[serde(default)]
    pub min_score: Option<f32>,
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    #[serde(default = "default_cache_max_entries")]
    pub cache_max_entries: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_k: default_k(),
            min_score: None,
            cache_ttl_secs: default_cache_ttl_secs(),
            cache_max_entries: default_cache_max_entries(),
        }
    }
}

fn default_k() -> usize {
    4
}
fn default_cache_ttl_secs() -> u64 {
    cache::DEFAULT_TTL.as_secs()
}
fn default_cache_max_entries() -> usize {
    cache::DEFAULT_MAX_ENTRIES
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_llm_provider")]
    pub provider: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_llm_provider(),
            model: default_llm_model(),
            base_url: None,
            temperature: default_temperature(),
            timeout_secs: default_llm_timeout_secs(),
        }
    }
}

fn default_llm_provider() -> String {
    "openai".to_string()
}
fn default_llm_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_temperature() -> f32 {
    0.2
}
fn default_llm_timeout_secs() -> u64 {
    120
}

#[derive(Debug, Deserialize, Clone)]
pub struct PipelineConfig {
    /// Hard wall-clock limit for one answer run.
    #[serde(default = "default_pipeline_timeout_secs")]
    pub timeout_secs: u64,
    /// How often the "working" step label rotates.
    #[serde(default = "default_step_interval_secs")]
    pub step_interval_secs: u64,
    /// Upper bound on search calls the analyst may make per run.
    #[serde(default = "default_max_tool_calls")]
    pub max_tool_calls: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_pipeline_timeout_secs(),
            step_interval_secs: default_step_interval_secs(),
            max_tool_calls: default_max_tool_calls(),
        }
    }
}

fn default_pipeline_timeout_secs() -> u64 {
    180
}
fn default_step_interval_secs() -> u64 {
    10
}
fn default_max_tool_calls() -> usize {
    8
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7860".to_string()
}

impl Config {
    /// Parse a TOML document without touching the environment.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).with_context(|| "Failed to parse config file")
    }

    /// Apply environment overrides read through `lookup`.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup(VECTOR_DB_PATH_ENV).filter(|p| !p.trim().is_empty()) {
            self.store.path = PathBuf::from(path);
        }
    }

    pub fn validate(&self) -> Result<()> {
        // Validate chunking
        self.chunking.options().validate()?;

        // Validate retrieval
        if self.retrieval.default_k < 1 {
            bail!("retrieval.default_k must be >= 1");
        }
        if let Some(min) = self.retrieval.min_score {
            if !(-1.0..=1.0).contains(&min) {
                bail!("retrieval.min_score must be in [-1.0, 1.0]");
            }
        }
        if self.retrieval.cache_max_entries == 0 {
            bail!("retrieval.cache_max_entries must be > 0");
        }

        // Validate embedding
        match self.embedding.provider.as_str() {
            "openai" | "ollama" => {}
            other => bail!(
                "Unknown embedding provider: '{}'. Must be openai or ollama.",
                other
            ),
        }
        if self.embedding.batch_size == 0 {
            bail!("embedding.batch_size must be > 0");
        }
        if self.embedding.dims == Some(0) {
            bail!("embedding.dims must be > 0");
        }

        // Validate llm
        match self.llm.provider.as_str() {
            "openai" | "ollama" => {}
            other => bail!(
                "Unknown llm provider: '{}'. Must be openai or ollama.",
                other
            ),
        }

        // Validate pipeline
        if self.pipeline.timeout_secs == 0 {
            bail!("pipeline.timeout_secs must be > 0");
        }
        if self.pipeline.step_interval_secs == 0 {
            bail!("pipeline.step_interval_secs must be > 0");
        }

        Ok(())
    }
}

/// Load configuration from `path`, falling back to defaults when the file
/// does not exist, then apply environment overrides and validate.
pub fn load_config(path: &Path) -> Result<Config> {
    let mut config = if path.exists() {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Config::from_toml_str(&content)?
    } else {
        tracing::debug!(path = %path.display(), "config file not found, using defaults");
        Config::default()
    };

    config.apply_env_overrides(|key| std::env::var(key).ok());
    config.validate()?;
    Ok(config)
}
