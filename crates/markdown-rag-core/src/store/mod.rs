//! Vector storage abstraction.
//!
//! The [`VectorStore`] trait is the narrow contract the index layer needs:
//! append embedded chunks, run a nearest-neighbour query, count records.
//! There is no update or delete; a store is rebuilt by
//! clearing its location and ingesting again.
//!
//! Ranking is shared by every backend through [`rank_hits`] so that ties
//! resolve the same way everywhere: equal scores keep insertion order.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use std::cmp::Ordering;

use crate::models::{Chunk, SearchHit};

/// A chunk together with its embedding vector.
#[derive(Debug, Clone)]
pub struct VectorRecord {
    pub chunk: Chunk,
    pub vector: Vec<f32>,
}

/// A persisted collection of [`VectorRecord`]s.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Append records. Returns the number written.
    async fn add(&self, records: &[VectorRecord], model: &str) -> Result<usize>;

    /// Return up to `k` records nearest to `query_vec` by cosine similarity,
    /// best first.
    async fn search(&self, query_vec: &[f32], k: usize) -> Result<Vec<SearchHit>>;

    /// Number of stored records.
    async fn count(&self) -> Result<usize>;
}

/// Sort `(insertion_seq, hit)` pairs by score descending, breaking ties by
/// insertion order, and keep the best `k`.
pub fn rank_hits(mut scored: Vec<(i64, SearchHit)>, k: usize) -> Vec<SearchHit> {
    scored.sort_by(|(seq_a, a), (seq_b, b)| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then(seq_a.cmp(seq_b))
    });
    scored.truncate(k);
    scored.into_iter().map(|(_, hit)| hit).collect()
}
