use anyhow::Result;
use sqlx::SqlitePool;

/// Create the vector store schema if it does not exist yet.
///
/// `seq` is the insertion order used to break score ties.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS records (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            id TEXT NOT NULL,
            chunk_index INTEGER NOT NULL,
            text TEXT NOT NULL,
            metadata_json TEXT NOT NULL DEFAULT '{}',
            hash TEXT NOT NULL,
            embedding BLOB NOT NULL,
            model TEXT NOT NULL,
            dims INTEGER NOT NULL,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_records_id ON records(id)")
        .execute(pool)
        .await?;

    Ok(())
}

/// Whether the schema is present. Used to tell an empty file from a store.
pub async fn schema_exists(pool: &SqlitePool) -> Result<bool> {
    let exists: bool = sqlx::query_scalar(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='records'",
    )
    .fetch_one(pool)
    .await?;
    Ok(exists)
}
