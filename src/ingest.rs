//! Ingestion orchestration.
//!
//! Coordinates the full build flow: load → chunk → embed → store. Each run
//! appends to the existing index; `--rebuild` clears it first. There is no
//! incremental update: re-ingesting a file stores its chunks again.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

use markdown_rag_core::chunk::chunk_documents;
use markdown_rag_core::models::Chunk;

use crate::config::Config;
use crate::embedding::{create_provider, EmbeddingProvider};
use crate::error::{RagError, RagResult};
use crate::index::IndexBuilder;
use crate::loader::load_documents;
use crate::progress::{ProgressEvent, ProgressReporter};

#[derive(Debug, Clone)]
pub struct IngestOptions {
    pub dir: PathBuf,
    pub glob: String,
    pub rebuild: bool,
    pub dry_run: bool,
}

impl IngestOptions {
    /// Options from `[ingest]`, overridden by CLI flags when given.
    pub fn from_config(config: &Config, dir: Option<PathBuf>, glob: Option<String>) -> Self {
        Self {
            dir: dir.unwrap_or_else(|| config.ingest.dir.clone()),
            glob: glob.unwrap_or_else(|| config.ingest.glob.clone()),
            rebuild: false,
            dry_run: false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestSummary {
    pub documents: usize,
    pub chunks: usize,
    pub stored: usize,
}

/// Load and chunk every matching document under `dir`.
pub fn prepare_chunks(
    config: &Config,
    dir: &Path,
    glob: &str,
    progress: &dyn ProgressReporter,
) -> RagResult<(usize, Vec<Chunk>)> {
    progress.report(ProgressEvent::Loading {
        dir: dir.display().to_string(),
    });
    let docs = load_documents(dir, glob)?;

    progress.report(ProgressEvent::Chunking {
        documents: docs.len() as u64,
    });
    let chunks = chunk_documents(&docs, &config.chunking.options());
    tracing::info!(documents = docs.len(), chunks = chunks.len(), "chunked documents");
    Ok((docs.len(), chunks))
}

/// Index builder for `[store]`, `[embedding]` and `[retrieval]` with the
/// given provider.
pub fn index_builder(config: &Config, embedder: Arc<dyn EmbeddingProvider>) -> IndexBuilder {
    IndexBuilder::new(config.store.path.clone(), embedder)
        .with_batch_size(config.embedding.batch_size)
        .with_min_score(config.retrieval.min_score)
}

/// Load, chunk, and store the documents under `opts.dir`.
///
/// Zero chunks is not an error; the index is left as it was. With
/// `dry_run` nothing is embedded and `stored` stays zero.
pub async fn ingest(
    config: &Config,
    builder: &IndexBuilder,
    opts: &IngestOptions,
    progress: &dyn ProgressReporter,
) -> RagResult<IngestSummary> {
    let (documents, chunks) = prepare_chunks(config, &opts.dir, &opts.glob, progress)?;
    let mut summary = IngestSummary {
        documents,
        chunks: chunks.len(),
        stored: 0,
    };

    if opts.dry_run || chunks.is_empty() {
        return Ok(summary);
    }

    if opts.rebuild {
        builder.clear().await?;
    }
    builder.build_and_save(&chunks, progress).await?;
    summary.stored = chunks.len();
    Ok(summary)
}

/// `mdrag ingest`: run the ingest and print a summary on stdout.
///
/// The embedding provider is only created when chunks will actually be
/// embedded, so `--dry-run` works without credentials.
pub async fn run_ingest(
    config: &Config,
    opts: &IngestOptions,
    progress: &dyn ProgressReporter,
) -> anyhow::Result<()> {
    let (documents, chunks) = prepare_chunks(config, &opts.dir, &opts.glob, progress)?;
    if opts.dry_run {
        println!("ingest {} (dry-run)", opts.dir.display());
        println!("  documents: {}", documents);
        println!("  chunks: {}", chunks.len());
        return Ok(());
    }

    if chunks.is_empty() {
        println!("ingest {}", opts.dir.display());
        println!("  documents: {}", documents);
        println!("  no chunks to index; index unchanged");
        return Ok(());
    }

    let builder = index_builder(config, create_provider(&config.embedding)?);
    if opts.rebuild {
        builder.clear().await?;
    }
    let index = builder.build_and_save(&chunks, progress).await?;

    println!("ingest {}", opts.dir.display());
    println!("  documents: {}", documents);
    println!("  chunks: {}", chunks.len());
    println!("  stored: {}", chunks.len());
    println!("  index records: {}", index.count().await?);
    println!("  index: {}", builder.store_dir().display());
    println!("ok");
    Ok(())
}

/// One uploaded file.
#[derive(Debug, Clone, Deserialize)]
pub struct UploadFile {
    pub name: String,
    pub content: String,
}

/// Save uploaded files into a fresh `<upload_dir>/<uuid>/` directory and
/// return it. Names are reduced to their final path component.
pub fn save_uploads(upload_dir: &Path, files: &[UploadFile]) -> RagResult<PathBuf> {
    if files.is_empty() {
        return Err(RagError::Load("no files uploaded".into()));
    }

    let batch_dir = upload_dir.join(Uuid::new_v4().to_string());
    std::fs::create_dir_all(&batch_dir)
        .map_err(|e| RagError::Load(format!("cannot create {}: {}", batch_dir.display(), e)))?;

    for file in files {
        let name = Path::new(&file.name)
            .file_name()
            .ok_or_else(|| RagError::Load(format!("invalid file name: '{}'", file.name)))?;
        let path = batch_dir.join(name);
        std::fs::write(&path, &file.content)
            .map_err(|e| RagError::Load(format!("cannot write {}: {}", path.display(), e)))?;
    }

    tracing::info!(dir = %batch_dir.display(), files = files.len(), "saved uploads");
    Ok(batch_dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::NoProgress;
    use crate::test_support::WordEmbedder;

    fn config_for(tmp: &Path) -> Config {
        let mut config = Config::default();
        config.store.path = tmp.join("_vector_db");
        config
    }

    fn write(dir: &Path, name: &str, body: &str) {
        std::fs::create_dir_all(dir).unwrap();
        std::fs::write(dir.join(name), body).unwrap();
    }

    #[tokio::test]
    async fn test_ingest_then_search() {
        let tmp = tempfile::tempdir().unwrap();
        let docs = tmp.path().join("markdown_files");
        write(&docs, "intro.md", "# Intro\n\nHello world");
        write(&docs, "notes.txt", "not markdown");

        let config = config_for(tmp.path());
        let builder = index_builder(&config, Arc::new(WordEmbedder::default()));
        let opts = IngestOptions {
            dir: docs,
            glob: "**/*.md".into(),
            rebuild: false,
            dry_run: false,
        };

        let summary = ingest(&config, &builder, &opts, &NoProgress).await.unwrap();
        assert_eq!(summary.documents, 1);
        assert_eq!(summary.chunks, 1);
        assert_eq!(summary.stored, 1);

        let hits = builder.load().await.unwrap().similarity_search("hello", 1).await.unwrap();
        assert_eq!(hits[0].source_filename(), opts.dir.join("intro.md").to_string_lossy());
    }

    #[tokio::test]
    async fn test_rebuild_replaces_index() {
        let tmp = tempfile::tempdir().unwrap();
        let docs = tmp.path().join("md");
        write(&docs, "a.md", "# A\n\nalpha");

        let config = config_for(tmp.path());
        let builder = index_builder(&config, Arc::new(WordEmbedder::default()));
        let mut opts = IngestOptions {
            dir: docs,
            glob: "**/*.md".into(),
            rebuild: false,
            dry_run: false,
        };
        ingest(&config, &builder, &opts, &NoProgress).await.unwrap();
        ingest(&config, &builder, &opts, &NoProgress).await.unwrap();
        assert_eq!(builder.load().await.unwrap().count().await.unwrap(), 2);

        opts.rebuild = true;
        ingest(&config, &builder, &opts, &NoProgress).await.unwrap();
        assert_eq!(builder.load().await.unwrap().count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_dry_run_and_empty_dir_store_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        let docs = tmp.path().join("md");
        std::fs::create_dir_all(&docs).unwrap();

        let config = config_for(tmp.path());
        let builder = index_builder(&config, Arc::new(WordEmbedder::default()));
        let opts = IngestOptions {
            dir: docs.clone(),
            glob: "**/*.md".into(),
            rebuild: false,
            dry_run: false,
        };
        let summary = ingest(&config, &builder, &opts, &NoProgress).await.unwrap();
        assert_eq!(summary.chunks, 0);
        assert!(matches!(builder.load().await.err(), Some(RagError::NotFound(_))));

        write(&docs, "a.md", "# A\n\nalpha");
        let dry = IngestOptions { dry_run: true, ..opts };
        let summary = ingest(&config, &builder, &dry, &NoProgress).await.unwrap();
        assert_eq!((summary.chunks, summary.stored), (1, 0));
        assert!(builder.load().await.is_err());
    }

    #[tokio::test]
    async fn test_missing_dir_is_load_error() {
        let tmp = tempfile::tempdir().unwrap();
        let config = config_for(tmp.path());
        let builder = index_builder(&config, Arc::new(WordEmbedder::default()));
        let opts = IngestOptions {
            dir: tmp.path().join("absent"),
            glob: "**/*.md".into(),
            rebuild: false,
            dry_run: false,
        };
        let err = ingest(&config, &builder, &opts, &NoProgress).await.err().unwrap();
        assert!(matches!(err, RagError::Load(_)));
    }

    #[test]
    fn test_save_uploads_strips_paths() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = save_uploads(
            tmp.path(),
            &[UploadFile {
                name: "../../escape.md".into(),
                content: "# Up\n\nloaded".into(),
            }],
        )
        .unwrap();
        assert!(dir.starts_with(tmp.path()));
        assert_eq!(
            std::fs::read_to_string(dir.join("escape.md")).unwrap(),
            "# Up\n\nloaded"
        );
    }

    #[test]
    fn test_save_uploads_rejects_empty() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(save_uploads(tmp.path(), &[]).is_err());
    }
}
