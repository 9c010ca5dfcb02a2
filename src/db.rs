use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::path::{Path, PathBuf};

/// File name of the SQLite database inside the vector store directory.
pub const INDEX_FILE: &str = "index.sqlite";

/// Path of the database file for a store directory.
pub fn index_file(store_dir: &Path) -> PathBuf {
    store_dir.join(INDEX_FILE)
}

/// Open the database in `store_dir`.
///
/// With `create = true` the directory and file are created when missing;
/// otherwise a missing file is an error.
pub async fn connect(store_dir: &Path, create: bool) -> Result<SqlitePool> {
    if create {
        std::fs::create_dir_all(store_dir)
            .with_context(|| format!("cannot create store directory {}", store_dir.display()))?;
    }

    let db_path = index_file(store_dir);
    let options = SqliteConnectOptions::new()
        .filename(&db_path)
        .create_if_missing(create)
        .journal_mode(SqliteJournalMode::Wal);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .with_context(|| format!("cannot open {}", db_path.display()))?;

    Ok(pool)
}
