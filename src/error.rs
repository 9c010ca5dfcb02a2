//! Domain error taxonomy.
//!
//! Modules use `anyhow` internally and classify failures into a [`RagError`]
//! at component boundaries, so callers (CLI, HTTP handlers, the pipeline
//! runner) can match on what went wrong without parsing messages.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RagError {
    /// The source directory or a file in it could not be read.
    #[error("failed to load documents: {0}")]
    Load(String),
    /// The embedding provider was unreachable or rejected the input.
    #[error("embedding provider failed: {0}")]
    Embedding(String),
    /// The index location is unwritable or its contents are corrupt.
    #[error("vector store error: {0}")]
    Storage(String),
    /// An index was requested before one was built.
    #[error("no vector index found at {0}; run `mdrag ingest` first")]
    NotFound(String),
    /// The draft or review stage failed.
    #[error("answer pipeline failed: {0}")]
    Pipeline(String),
    #[error("timed out after {0} seconds")]
    Timeout(u64),
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl RagError {
    /// Machine-readable code used in HTTP error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            RagError::Load(_) => "load_error",
            RagError::Embedding(_) => "embedding_error",
            RagError::Storage(_) => "storage_error",
            RagError::NotFound(_) => "not_found",
            RagError::Pipeline(_) => "pipeline_error",
            RagError::Timeout(_) => "timeout",
            RagError::Config(_) => "config_error",
        }
    }

    pub fn load<E: std::fmt::Display>(err: E) -> Self {
        RagError::Load(format!("{:#}", err))
    }

    pub fn embedding<E: std::fmt::Display>(err: E) -> Self {
        RagError::Embedding(format!("{:#}", err))
    }

    pub fn storage<E: std::fmt::Display>(err: E) -> Self {
        RagError::Storage(format!("{:#}", err))
    }

    pub fn pipeline<E: std::fmt::Display>(err: E) -> Self {
        RagError::Pipeline(format!("{:#}", err))
    }
}

pub type RagResult<T> = std::result::Result<T, RagError>;
