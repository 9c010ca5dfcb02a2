//! # mdrag CLI
//!
//! Chat with a folder of markdown files: `mdrag` builds a vector index from
//! the documents and answers questions with a two-stage (draft, review)
//! agent pipeline that only uses what it retrieves.
//!
//! ## Usage
//!
//! ```bash
//! mdrag --config ./mdrag.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `mdrag ingest` | Load, chunk, embed, and store markdown files |
//! | `mdrag status` | Show whether an index exists and what it holds |
//! | `mdrag search "<query>"` | Print the retriever's text block |
//! | `mdrag ask "<request>"` | One answer pipeline run |
//! | `mdrag chat` | Interactive conversation on stdin |
//! | `mdrag serve` | Start the HTTP backend |
//!
//! ## Examples
//!
//! ```bash
//! mdrag ingest --dir ./markdown_files
//! mdrag search "total liabilities" --k 2
//! mdrag ask "Tell me about liabilities in 2023" --output crew_report.md
//! mdrag serve
//! ```

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;

use markdown_rag::config::{self, Config};
use markdown_rag::embedding::create_provider;
use markdown_rag::error::RagError;
use markdown_rag::history::Conversation;
use markdown_rag::index::open_store;
use markdown_rag::ingest::{self, IngestOptions};
use markdown_rag::llm::create_chat_model;
use markdown_rag::logging;
use markdown_rag::pipeline::{AnswerPipeline, PipelineInput};
use markdown_rag::progress::{ProgressMode, ProgressReporter};
use markdown_rag::retriever::Retriever;
use markdown_rag::runner::{run_with_deadline, RunLimits, TimedOutput, TIMEOUT_MESSAGE};
use markdown_rag::server;
use markdown_rag::sqlite_store::list_sources;
use markdown_rag::tools::ToolRegistry;

/// mdrag: retrieval-augmented chat over your markdown files.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. A missing file means built-in defaults.
#[derive(Parser)]
#[command(
    name = "mdrag",
    about = "Retrieval-augmented chat over a folder of markdown files",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./mdrag.toml")]
    config: PathBuf,

    /// Progress output on stderr. Defaults to `human` on a terminal,
    /// otherwise `off`.
    #[arg(long, global = true, value_enum)]
    progress: Option<ProgressMode>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the vector index from markdown files.
    ///
    /// Appends to an existing index unless `--rebuild` is given.
    Ingest {
        /// Source directory (default: `[ingest].dir`).
        #[arg(long)]
        dir: Option<PathBuf>,
        /// Glob relative to the directory (default: `[ingest].glob`).
        #[arg(long)]
        glob: Option<String>,
        /// Clear the index before storing.
        #[arg(long)]
        rebuild: bool,
        /// Report document and chunk counts without embedding.
        #[arg(long)]
        dry_run: bool,
    },

    /// Show the state of the vector index.
    Status,

    /// Search the index and print the formatted results.
    Search {
        query: String,
        /// Number of results (default: `[retrieval].default_k`).
        #[arg(long)]
        k: Option<usize>,
    },

    /// Answer a single request.
    Ask {
        request: String,
        /// File holding prior conversation history.
        #[arg(long)]
        history: Option<PathBuf>,
        /// Also write the final answer to this file.
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Interactive chat. `/retry` re-runs the last request, `/clear`
    /// resets the history, `/quit` exits.
    Chat,

    /// Start the HTTP backend on `[server].bind`.
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init();
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    let progress = cli.progress.unwrap_or_else(ProgressMode::default_for_tty).reporter();

    match cli.command {
        Commands::Ingest {
            dir,
            glob,
            rebuild,
            dry_run,
        } => {
            let opts = IngestOptions {
                rebuild,
                dry_run,
                ..IngestOptions::from_config(&cfg, dir, glob)
            };
            ingest::run_ingest(&cfg, &opts, progress.as_ref()).await?;
        }
        Commands::Status => run_status(&cfg).await?,
        Commands::Search { query, k } => {
            if k == Some(0) {
                bail!("--k must be at least 1");
            }
            let retriever = build_retriever(&cfg)?;
            println!("{}", retriever.search(&query, k).await);
        }
        Commands::Ask {
            request,
            history,
            output,
        } => {
            let history = match history {
                Some(path) => std::fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read history file: {}", path.display()))?,
                None => String::new(),
            };
            let pipeline = build_pipeline(&cfg)?;
            let cancel = cancel_on_ctrl_c();
            let input = PipelineInput {
                conversation_history: history,
                user_request: request,
            };
            let timed = answer(&cfg, pipeline, input, &cancel, progress.as_ref()).await?;
            println!("{}", timed.display_answer());
            if let Some(path) = output {
                std::fs::write(&path, &timed.output.answer)
                    .with_context(|| format!("Failed to write report: {}", path.display()))?;
                tracing::info!(path = %path.display(), "report written");
            }
        }
        Commands::Chat => run_chat(&cfg, progress.as_ref()).await?,
        Commands::Serve => server::run_server(&cfg).await?,
    }

    Ok(())
}

async fn run_status(cfg: &Config) -> Result<()> {
    let store = match open_store(&cfg.store.path).await {
        Ok(store) => store,
        Err(RagError::NotFound(path)) => {
            println!("index: {} (not built)", path);
            println!("  run `mdrag ingest` to create it");
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    let info = store.info().await?;
    println!("index: {}", cfg.store.path.display());
    println!("  records: {}", info.records);
    println!("  sources: {}", info.sources);
    if let Some(model) = &info.model {
        println!("  model: {}", model);
    }
    if let Some(dims) = info.dims {
        println!("  dims: {}", dims);
    }
    if let Some(last) = &info.last_built_at {
        println!("  last built: {}", last);
    }
    for source in list_sources(store.pool()).await? {
        println!("    {}", source);
    }
    Ok(())
}

fn build_retriever(cfg: &Config) -> Result<Arc<Retriever>> {
    let builder = ingest::index_builder(cfg, create_provider(&cfg.embedding)?);
    Ok(Arc::new(Retriever::from_config(builder, &cfg.retrieval)))
}

fn build_pipeline(cfg: &Config) -> Result<Arc<AnswerPipeline>> {
    let chat = create_chat_model(&cfg.llm)?;
    let tools = ToolRegistry::with_builtins(build_retriever(cfg)?);
    Ok(Arc::new(AnswerPipeline::new(
        chat,
        Arc::new(tools),
        cfg.pipeline.max_tool_calls,
    )))
}

/// A token cancelled on the first Ctrl-C.
fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            trigger.cancel();
        }
    });
    token
}

/// Run one request, turning a deadline miss into the user-facing timeout
/// message.
async fn answer(
    cfg: &Config,
    pipeline: Arc<AnswerPipeline>,
    input: PipelineInput,
    cancel: &CancellationToken,
    progress: &dyn ProgressReporter,
) -> Result<TimedOutput> {
    match run_with_deadline(pipeline, input, RunLimits::from(&cfg.pipeline), cancel, progress).await
    {
        Ok(timed) => Ok(timed),
        Err(RagError::Timeout(_)) => bail!(TIMEOUT_MESSAGE),
        Err(e) => Err(e.into()),
    }
}

async fn run_chat(cfg: &Config, progress: &dyn ProgressReporter) -> Result<()> {
    let pipeline = build_pipeline(cfg)?;
    let cancel = cancel_on_ctrl_c();
    let mut conversation = Conversation::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    println!("mdrag chat: ask about your documents. /retry, /clear, /quit");
    loop {
        let line = tokio::select! {
            _ = cancel.cancelled() => break,
            line = lines.next_line() => line?,
        };
        let Some(line) = line else {
            break;
        };
        let line = line.trim();

        let mut next = conversation.clone();
        let request = match line {
            "" => continue,
            "/quit" | "/exit" => break,
            "/clear" => {
                conversation.clear();
                println!("(history cleared)");
                continue;
            }
            "/retry" => match next.pop_last_exchange_reply() {
                Some(request) => request,
                None => {
                    println!("(nothing to retry)");
                    continue;
                }
            },
            other => other.to_string(),
        };

        let input = PipelineInput {
            conversation_history: next.format_for_prompt(),
            user_request: request.clone(),
        };
        match answer(cfg, pipeline.clone(), input, &cancel, progress).await {
            Ok(timed) => {
                println!("\n{}\n", timed.display_answer());
                next.push_user(request);
                next.push_assistant(timed.output.answer);
                conversation = next;
            }
            // History is only updated on success
            Err(e) => println!("\n{:#}\n", e),
        }
    }
    Ok(())
}
