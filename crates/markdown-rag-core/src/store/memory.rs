//! In-memory [`VectorStore`] for tests and ephemeral indexes.
//!
//! Records live in a `Vec` behind a `std::sync::RwLock`; search is a
//! brute-force cosine scan.

use std::sync::RwLock;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::embedding::cosine_similarity;
use crate::models::SearchHit;

use super::{rank_hits, VectorRecord, VectorStore};

#[derive(Default)]
pub struct InMemoryStore {
    records: RwLock<Vec<VectorRecord>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorStore for InMemoryStore {
    async fn add(&self, records: &[VectorRecord], _model: &str) -> Result<usize> {
        let mut guard = self
            .records
            .write()
            .map_err(|_| anyhow!("in-memory store lock poisoned"))?;
        guard.extend_from_slice(records);
        Ok(records.len())
    }

    async fn search(&self, query_vec: &[f32], k: usize) -> Result<Vec<SearchHit>> {
        let guard = self
            .records
            .read()
            .map_err(|_| anyhow!("in-memory store lock poisoned"))?;

        let scored = guard
            .iter()
            .enumerate()
            .map(|(seq, rec)| {
                (
                    seq as i64,
                    SearchHit {
                        chunk_id: rec.chunk.id.clone(),
                        text: rec.chunk.text.clone(),
                        metadata: rec.chunk.metadata.clone(),
                        score: cosine_similarity(query_vec, &rec.vector),
                    },
                )
            })
            .collect();

        Ok(rank_hits(scored, k))
    }

    async fn count(&self) -> Result<usize> {
        let guard = self
            .records
            .read()
            .map_err(|_| anyhow!("in-memory store lock poisoned"))?;
        Ok(guard.len())
    }
}
