//! Core data models used throughout markdown-rag.
//!
//! These types represent the documents, sections, chunks, and search hits
//! that flow through the ingestion and retrieval pipeline.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// String-to-string metadata attached to documents, sections, and chunks.
///
/// A `BTreeMap` keeps serialization order stable, which keeps stored
/// `metadata_json` byte-identical across runs.
pub type Metadata = BTreeMap<String, String>;

/// Metadata key holding the path a document was loaded from.
pub const SOURCE_KEY: &str = "source";

/// Metadata key copied onto every chunk so retrieval can name its origin.
pub const SOURCE_FILENAME_KEY: &str = "source_filename";

/// Number of header levels rendered in a header path.
pub const HEADER_PATH_LEVELS: usize = 4;

/// Metadata key for a header level, e.g. `"Level 2"`.
pub fn header_key(level: usize) -> String {
    format!("Level {}", level)
}

/// Concatenate `Level 1` .. `Level 4` labels present in `metadata`,
/// joined by `" > "`. Missing levels are skipped.
pub fn header_path(metadata: &Metadata) -> String {
    (1..=HEADER_PATH_LEVELS)
        .filter_map(|level| metadata.get(&header_key(level)))
        .map(|s| s.as_str())
        .collect::<Vec<_>>()
        .join(" > ")
}

/// A raw document loaded from disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub text: String,
    pub metadata: Metadata,
}

impl Document {
    pub fn new(source: impl Into<String>, text: impl Into<String>) -> Self {
        let mut metadata = Metadata::new();
        metadata.insert(SOURCE_KEY.to_string(), source.into());
        Self {
            text: text.into(),
            metadata,
        }
    }

    pub fn source(&self) -> &str {
        self.metadata
            .get(SOURCE_KEY)
            .map(|s| s.as_str())
            .unwrap_or("unknown")
    }
}

/// A fragment of a [`Document`] bounded by a markdown header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub text: String,
    pub metadata: Metadata,
}

/// A retrieval-sized span of a section's text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    /// Position within the source document, contiguous from 0.
    pub chunk_index: i64,
    pub text: String,
    pub metadata: Metadata,
    /// SHA-256 of `text`.
    pub hash: String,
}

impl Chunk {
    pub fn source_filename(&self) -> &str {
        self.metadata
            .get(SOURCE_FILENAME_KEY)
            .map(|s| s.as_str())
            .unwrap_or("Unknown source")
    }

    pub fn header_path(&self) -> String {
        header_path(&self.metadata)
    }
}

/// A chunk returned by similarity search, with its cosine score.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub chunk_id: String,
    pub text: String,
    pub metadata: Metadata,
    pub score: f32,
}

impl SearchHit {
    pub fn source_filename(&self) -> &str {
        self.metadata
            .get(SOURCE_FILENAME_KEY)
            .map(|s| s.as_str())
            .unwrap_or("Unknown source")
    }

    pub fn header_path(&self) -> String {
        header_path(&self.metadata)
    }
}
