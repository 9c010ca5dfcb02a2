//! SQLite-backed [`VectorStore`] implementation.
//!
//! One row per embedded chunk in the `records` table. Search is a
//! brute-force cosine scan over every stored vector, ranked through the
//! shared [`rank_hits`] so ties keep insertion order (`seq`).

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use markdown_rag_core::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use markdown_rag_core::models::{Metadata, SearchHit, SOURCE_FILENAME_KEY};
use markdown_rag_core::store::{rank_hits, VectorRecord, VectorStore};

pub struct SqliteStore {
    pool: SqlitePool,
}

/// Summary of a persisted store, shown by `mdrag status`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct StoreInfo {
    pub records: i64,
    pub sources: i64,
    pub model: Option<String>,
    pub dims: Option<i64>,
    pub last_built_at: Option<String>,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Dimensionality of vectors already stored, if any.
    async fn stored_dims(&self) -> Result<Option<i64>> {
        let dims: Option<i64> = sqlx::query_scalar("SELECT dims FROM records ORDER BY seq LIMIT 1")
            .fetch_optional(&self.pool)
            .await?;
        Ok(dims)
    }

    pub async fn info(&self) -> Result<StoreInfo> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS records,
                   COUNT(DISTINCT json_extract(metadata_json, '$.source_filename')) AS sources,
                   MAX(created_at) AS last_built
            FROM records
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        let last: Option<i64> = row.get("last_built");
        let model_row = sqlx::query("SELECT model, dims FROM records ORDER BY seq DESC LIMIT 1")
            .fetch_optional(&self.pool)
            .await?;

        Ok(StoreInfo {
            records: row.get("records"),
            sources: row.get("sources"),
            model: model_row.as_ref().map(|r| r.get("model")),
            dims: model_row.as_ref().map(|r| r.get("dims")),
            last_built_at: last.map(format_ts_iso),
        })
    }
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
        .unwrap_or_else(|| ts.to_string())
}

#[async_trait]
impl VectorStore for SqliteStore {
    async fn add(&self, records: &[VectorRecord], model: &str) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }

        let dims = records[0].vector.len() as i64;
        if let Some(bad) = records.iter().find(|r| r.vector.len() as i64 != dims) {
            bail!(
                "chunk {} has a {}-dimensional vector, expected {}",
                bad.chunk.id,
                bad.vector.len(),
                dims
            );
        }
        if let Some(existing) = self.stored_dims().await? {
            if existing != dims {
                bail!(
                    "store holds {}-dimensional vectors but the provider produced {}; rebuild with --rebuild",
                    existing,
                    dims
                );
            }
        }

        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;

        for record in records {
            let metadata_json = serde_json::to_string(&record.chunk.metadata)?;
            sqlx::query(
                r#"
                INSERT INTO records (id, chunk_index, text, metadata_json, hash,
                                     embedding, model, dims, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&record.chunk.id)
            .bind(record.chunk.chunk_index)
            .bind(&record.chunk.text)
            .bind(&metadata_json)
            .bind(&record.chunk.hash)
            .bind(vec_to_blob(&record.vector))
            .bind(model)
            .bind(dims)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(records.len())
    }

    async fn search(&self, query_vec: &[f32], k: usize) -> Result<Vec<SearchHit>> {
        if k == 0 {
            return Ok(Vec::new());
        }

        let rows = sqlx::query("SELECT seq, id, text, metadata_json, embedding FROM records")
            .fetch_all(&self.pool)
            .await?;

        let mut scored = Vec::with_capacity(rows.len());
        for row in &rows {
            let id: String = row.get("id");
            let metadata_json: String = row.get("metadata_json");
            let metadata: Metadata = serde_json::from_str(&metadata_json)
                .with_context(|| format!("corrupt metadata for record {}", id))?;
            let blob: Vec<u8> = row.get("embedding");

            scored.push((
                row.get::<i64, _>("seq"),
                SearchHit {
                    chunk_id: id,
                    text: row.get("text"),
                    metadata,
                    score: cosine_similarity(query_vec, &blob_to_vec(&blob)),
                },
            ));
        }

        Ok(rank_hits(scored, k))
    }

    async fn count(&self) -> Result<usize> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM records")
            .fetch_one(&self.pool)
            .await?;
        Ok(n as usize)
    }
}

/// Distinct `source_filename` values in insertion order.
pub async fn list_sources(pool: &SqlitePool) -> Result<Vec<String>> {
    let rows = sqlx::query(
        r#"
        SELECT json_extract(metadata_json, '$.' || ?) AS source, MIN(seq) AS first_seq
        FROM records
        GROUP BY source
        ORDER BY first_seq
        "#,
    )
    .bind(SOURCE_FILENAME_KEY)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .filter_map(|r| r.get::<Option<String>, _>("source"))
        .collect())
}
