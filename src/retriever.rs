//! Cached search over the vector index.
//!
//! The [`Retriever`] owns a handle to the index and an explicit TTL cache
//! keyed by `(query, k)`. It is built once per process and shared by `Arc`
//! between the CLI, the HTTP handlers, and the pipeline's search tool.
//!
//! [`Retriever::search`] never fails: results, the no-results sentinel,
//! and errors all come back as text for the agent layer. Callers that need
//! structured hits use [`Retriever::search_hits`].

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::OnceCell;

use markdown_rag_core::cache::{Clock, SystemClock, TtlCache};
use markdown_rag_core::format::{render_error, render_hits};
use markdown_rag_core::models::SearchHit;

use crate::config::RetrievalConfig;
use crate::error::RagResult;
use crate::index::{IndexBuilder, VectorIndex};

/// Search results keyed by `(query, k)`.
pub type SearchCache = TtlCache<(String, usize), Vec<SearchHit>>;

/// Build the search cache described by `[retrieval]`.
pub fn build_cache(config: &RetrievalConfig, clock: Arc<dyn Clock>) -> Arc<SearchCache> {
    Arc::new(TtlCache::new(
        Duration::from_secs(config.cache_ttl_secs),
        config.cache_max_entries,
        clock,
    ))
}

enum IndexSource {
    /// Opened on first use; a failed open is retried on the next search.
    Lazy {
        builder: IndexBuilder,
        cell: OnceCell<VectorIndex>,
    },
    Ready(VectorIndex),
}

pub struct Retriever {
    source: IndexSource,
    cache: Arc<SearchCache>,
    default_k: usize,
}

impl Retriever {
    /// A retriever that opens the persisted index on first search.
    pub fn lazy(builder: IndexBuilder, cache: Arc<SearchCache>, default_k: usize) -> Self {
        Self {
            source: IndexSource::Lazy {
                builder,
                cell: OnceCell::new(),
            },
            cache,
            default_k,
        }
    }

    /// A retriever over an already opened index.
    pub fn from_index(index: VectorIndex, cache: Arc<SearchCache>, default_k: usize) -> Self {
        Self {
            source: IndexSource::Ready(index),
            cache,
            default_k,
        }
    }

    /// Convenience for a system-clock cache built from config.
    pub fn from_config(builder: IndexBuilder, config: &RetrievalConfig) -> Self {
        let cache = build_cache(config, Arc::new(SystemClock));
        Self::lazy(builder, cache, config.default_k)
    }

    pub fn default_k(&self) -> usize {
        self.default_k
    }

    async fn index(&self) -> RagResult<&VectorIndex> {
        match &self.source {
            IndexSource::Ready(index) => Ok(index),
            IndexSource::Lazy { builder, cell } => cell.get_or_try_init(|| builder.load()).await,
        }
    }

    /// Ranked hits for `(query, k)`, served from the cache while fresh.
    ///
    /// Successful results (including empty ones) are cached; errors are not.
    pub async fn search_hits(&self, query: &str, k: usize) -> RagResult<Vec<SearchHit>> {
        let key = (query.to_string(), k);
        if let Some(hits) = self.cache.get(&key) {
            tracing::debug!(query, k, "search cache hit");
            return Ok(hits);
        }

        let hits = self.index().await?.similarity_search(query, k).await?;
        self.cache.insert(key, hits.clone());
        Ok(hits)
    }

    /// Search and render the outcome as text. `k` defaults to
    /// `retrieval.default_k`.
    pub async fn search(&self, query: &str, k: Option<usize>) -> String {
        let k = k.unwrap_or(self.default_k);
        match self.search_hits(query, k).await {
            Ok(hits) => render_hits(&hits),
            Err(e) => {
                tracing::warn!(query, error = %e, "search failed");
                render_error(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::NoProgress;
    use crate::test_support::{word_chunks, CountingEmbedder, WordEmbedder};
    use markdown_rag_core::cache::ManualClock;
    use markdown_rag_core::format::{NO_RESULTS_MESSAGE, SEARCH_ERROR_PREFIX};
    use markdown_rag_core::store::memory::InMemoryStore;

    fn cache_with(clock: Arc<ManualClock>) -> Arc<SearchCache> {
        build_cache(&RetrievalConfig::default(), clock)
    }

    #[tokio::test]
    async fn test_empty_store_renders_sentinel() {
        let index = VectorIndex::new(
            Arc::new(InMemoryStore::new()),
            Arc::new(WordEmbedder::default()),
        );
        let r = Retriever::from_index(index, cache_with(Arc::new(ManualClock::new())), 4);
        assert_eq!(r.search("anything", None).await, NO_RESULTS_MESSAGE);
    }

    #[tokio::test]
    async fn test_missing_index_renders_error_text() {
        let tmp = tempfile::tempdir().unwrap();
        let builder = IndexBuilder::new(tmp.path().join("absent"), Arc::new(WordEmbedder::default()));
        let cache = cache_with(Arc::new(ManualClock::new()));
        let r = Retriever::lazy(builder, cache.clone(), 4);

        let text = r.search("anything", None).await;
        assert!(text.starts_with(SEARCH_ERROR_PREFIX), "got {}", text);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_lazy_open_retries_after_failure() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("db");
        let embedder = Arc::new(WordEmbedder::default());
        let r = Retriever::lazy(
            IndexBuilder::new(&dir, embedder.clone()),
            cache_with(Arc::new(ManualClock::new())),
            4,
        );
        assert!(r.search_hits("hello", 1).await.is_err());

        IndexBuilder::new(&dir, embedder)
            .build_and_save(&word_chunks(&[("intro.md", "# Intro\n\nHello world")]), &NoProgress)
            .await
            .unwrap();

        let hits = r.search_hits("hello", 1).await.unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[tokio::test]
    async fn test_cache_hit_within_ttl_and_miss_after() {
        let embedder = Arc::new(CountingEmbedder::default());
        let store = Arc::new(InMemoryStore::new());
        let index = VectorIndex::new(store, embedder.clone());
        let clock = Arc::new(ManualClock::new());
        let r = Retriever::from_index(index, cache_with(clock.clone()), 4);

        let first = r.search("q", Some(2)).await;
        let second = r.search("q", Some(2)).await;
        assert_eq!(first, second);
        assert_eq!(embedder.calls(), 1);

        // Different k is a different key
        r.search("q", Some(3)).await;
        assert_eq!(embedder.calls(), 2);

        clock.advance(Duration::from_secs(300));
        r.search("q", Some(2)).await;
        assert_eq!(embedder.calls(), 3);
    }

    #[tokio::test]
    async fn test_renders_ranked_hits() {
        let embedder = Arc::new(WordEmbedder::default());
        let tmp = tempfile::tempdir().unwrap();
        let index = IndexBuilder::new(tmp.path().join("db"), embedder)
            .build_and_save(
                &word_chunks(&[
                    ("guide.md", "# Guide\n\n## Setup\n\nInstall the tool with cargo."),
                    ("other.md", "# Other\n\nUnrelated words entirely."),
                ]),
                &NoProgress,
            )
            .await
            .unwrap();
        let r = Retriever::from_index(index, cache_with(Arc::new(ManualClock::new())), 4);

        let text = r.search("install cargo", Some(1)).await;
        assert!(text.starts_with("Found 1 relevant document(s):"));
        assert!(text.contains("Source: guide.md"));
        assert!(text.contains("Context: Guide > Setup"));
        assert!(text.contains("Install the tool with cargo."));
    }
}
