//! Vector index build and load.
//!
//! [`IndexBuilder`] embeds chunks and appends them to the SQLite store in
//! the configured directory (default `_vector_db/`). [`IndexBuilder::load`]
//! opens an existing store without re-embedding. Both return a
//! [`VectorIndex`] handle that answers similarity queries.
//!
//! Failures are classified at this boundary:
//! - provider failures → [`RagError::Embedding`]
//! - unwritable path, unreadable or corrupt database → [`RagError::Storage`]
//! - no database at the path → [`RagError::NotFound`]
//!
//! `build_and_save` appends. Callers wanting a fresh index call
//! [`IndexBuilder::clear`] first.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use markdown_rag_core::embedding::{embed_query, EmbeddingProvider};
use markdown_rag_core::models::{Chunk, SearchHit};
use markdown_rag_core::store::{VectorRecord, VectorStore};

use crate::db;
use crate::error::{RagError, RagResult};
use crate::migrate;
use crate::progress::{ProgressEvent, ProgressReporter};
use crate::sqlite_store::SqliteStore;

/// Builds and opens the persisted index at one location.
#[derive(Clone)]
pub struct IndexBuilder {
    store_dir: PathBuf,
    embedder: Arc<dyn EmbeddingProvider>,
    batch_size: usize,
    min_score: Option<f32>,
}

impl IndexBuilder {
    pub fn new(store_dir: impl Into<PathBuf>, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            store_dir: store_dir.into(),
            embedder,
            batch_size: 64,
            min_score: None,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Drop hits scoring below `min_score` in indexes this builder returns.
    pub fn with_min_score(mut self, min_score: Option<f32>) -> Self {
        self.min_score = min_score;
        self
    }

    pub fn store_dir(&self) -> &Path {
        &self.store_dir
    }

    /// Embed every chunk and append it to the store, creating the store
    /// when absent.
    pub async fn build_and_save(
        &self,
        chunks: &[Chunk],
        progress: &dyn ProgressReporter,
    ) -> RagResult<VectorIndex> {
        let store = create_store(&self.store_dir).await?;
        let total = chunks.len() as u64;
        let mut written = 0u64;

        for batch in chunks.chunks(self.batch_size) {
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let vectors = self
                .embedder
                .embed(&texts)
                .await
                .map_err(RagError::embedding)?;

            if vectors.len() != batch.len() {
                return Err(RagError::Embedding(format!(
                    "provider returned {} vectors for {} chunks",
                    vectors.len(),
                    batch.len()
                )));
            }

            let records: Vec<VectorRecord> = batch
                .iter()
                .cloned()
                .zip(vectors)
                .map(|(chunk, vector)| VectorRecord { chunk, vector })
                .collect();

            store
                .add(&records, self.embedder.model_name())
                .await
                .map_err(RagError::storage)?;

            written += records.len() as u64;
            progress.report(ProgressEvent::Embedding { n: written, total });
        }

        tracing::info!(
            chunks = written,
            path = %self.store_dir.display(),
            "stored chunks in vector index"
        );

        Ok(self.index_for(store))
    }

    /// Open the existing store without re-embedding.
    pub async fn load(&self) -> RagResult<VectorIndex> {
        let store = open_store(&self.store_dir).await?;
        Ok(self.index_for(store))
    }

    /// Remove the store directory so the next build starts empty.
    pub async fn clear(&self) -> RagResult<()> {
        match tokio::fs::remove_dir_all(&self.store_dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(RagError::Storage(format!(
                "cannot remove {}: {}",
                self.store_dir.display(),
                e
            ))),
        }
    }

    fn index_for(&self, store: SqliteStore) -> VectorIndex {
        VectorIndex::new(Arc::new(store), self.embedder.clone()).with_min_score(self.min_score)
    }
}

/// Open (creating if needed) the store at `store_dir` and ensure its schema.
pub async fn create_store(store_dir: &Path) -> RagResult<SqliteStore> {
    let pool = db::connect(store_dir, true)
        .await
        .map_err(RagError::storage)?;
    migrate::run_migrations(&pool)
        .await
        .map_err(RagError::storage)?;
    Ok(SqliteStore::new(pool))
}

/// Open an existing store at `store_dir`.
///
/// A missing database is [`RagError::NotFound`]; one that cannot be read
/// or lacks the schema is [`RagError::Storage`].
pub async fn open_store(store_dir: &Path) -> RagResult<SqliteStore> {
    if !db::index_file(store_dir).is_file() {
        return Err(RagError::NotFound(store_dir.display().to_string()));
    }

    let pool = db::connect(store_dir, false)
        .await
        .map_err(RagError::storage)?;
    let has_schema = migrate::schema_exists(&pool)
        .await
        .map_err(RagError::storage)?;
    if !has_schema {
        return Err(RagError::Storage(format!(
            "{} is not a vector index (missing records table)",
            db::index_file(store_dir).display()
        )));
    }

    Ok(SqliteStore::new(pool))
}

/// A queryable handle to a vector store.
#[derive(Clone)]
pub struct VectorIndex {
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    min_score: Option<f32>,
}

impl VectorIndex {
    pub fn new(store: Arc<dyn VectorStore>, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            store,
            embedder,
            min_score: None,
        }
    }

    pub fn with_min_score(mut self, min_score: Option<f32>) -> Self {
        self.min_score = min_score;
        self
    }

    /// Embed `query` and return up to `k` nearest chunks, best first.
    ///
    /// An empty store, or no hit reaching `min_score`, yields an empty list.
    pub async fn similarity_search(&self, query: &str, k: usize) -> RagResult<Vec<SearchHit>> {
        if k == 0 {
            return Ok(Vec::new());
        }

        let query_vec = embed_query(self.embedder.as_ref(), query)
            .await
            .map_err(RagError::embedding)?;

        let mut hits = self
            .store
            .search(&query_vec, k)
            .await
            .map_err(RagError::storage)?;

        if let Some(min) = self.min_score {
            hits.retain(|h| h.score >= min);
        }
        Ok(hits)
    }

    pub async fn count(&self) -> RagResult<usize> {
        self.store.count().await.map_err(RagError::storage)
    }
}
