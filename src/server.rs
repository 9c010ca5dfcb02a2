//! HTTP backend for the chat front ends.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (version and chat model) |
//! | `POST` | `/documents` | Upload markdown files and ingest them |
//! | `POST` | `/search` | Run the retriever directly |
//! | `POST` | `/ask` | One answer pipeline run |
//! | `POST` | `/sessions/{id}/messages` | Send a chat message |
//! | `POST` | `/sessions/{id}/regenerate` | Re-run the last chat request |
//! | `GET`  | `/sessions/{id}` | Conversation history |
//! | `DELETE` | `/sessions/{id}` | Clear a conversation |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "query must not be empty" } }
//! ```
//!
//! Codes: `bad_request` (400), `not_found` (404), `load_error` (400),
//! `config_error` (400), `embedding_error` (502), `pipeline_error` (502),
//! `timeout` (504), `storage_error` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so browser front ends on
//! another port can call the API.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};

use crate::config::Config;
use crate::embedding::{create_provider, EmbeddingProvider};
use crate::error::RagError;
use crate::history::{Conversation, Turn};
use crate::index::IndexBuilder;
use crate::ingest::{self, IngestOptions, IngestSummary, UploadFile};
use crate::llm::{create_chat_model, ChatModel};
use crate::pipeline::{AnswerPipeline, PipelineInput, PipelineOutput};
use crate::progress::NoProgress;
use crate::retriever::Retriever;
use crate::runner::{run_with_deadline, RunLimits, TimedOutput, TIMEOUT_MESSAGE};
use crate::tools::ToolRegistry;

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    config: Arc<Config>,
    builder: Arc<IndexBuilder>,
    retriever: Arc<Retriever>,
    pipeline: Arc<AnswerPipeline>,
    /// Each session has its own lock, held for a whole turn.
    sessions: Arc<Mutex<HashMap<String, Arc<Mutex<Conversation>>>>>,
    /// Serializes uploads so two ingests never write the store at once.
    ingest_lock: Arc<Mutex<()>>,
    /// Cancelled on shutdown; in-flight runs hold child tokens.
    shutdown: CancellationToken,
}

impl AppState {
    pub fn new(
        config: Config,
        embedder: Arc<dyn EmbeddingProvider>,
        chat: Arc<dyn ChatModel>,
    ) -> Self {
        let builder = ingest::index_builder(&config, embedder);
        let retriever = Arc::new(Retriever::from_config(builder.clone(), &config.retrieval));
        let tools = Arc::new(ToolRegistry::with_builtins(retriever.clone()));
        let pipeline = Arc::new(AnswerPipeline::new(
            chat,
            tools,
            config.pipeline.max_tool_calls,
        ));

        Self {
            config: Arc::new(config),
            builder: Arc::new(builder),
            retriever,
            pipeline,
            sessions: Arc::new(Mutex::new(HashMap::new())),
            ingest_lock: Arc::new(Mutex::new(())),
            shutdown: CancellationToken::new(),
        }
    }

    async fn answer(&self, input: PipelineInput) -> Result<TimedOutput, AppError> {
        let limits = RunLimits::from(&self.config.pipeline);
        Ok(run_with_deadline(
            self.pipeline.clone(),
            input,
            limits,
            &self.shutdown,
            &NoProgress,
        )
        .await?)
    }
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/documents", post(handle_upload))
        .route("/search", post(handle_search))
        .route("/ask", post(handle_ask))
        .route("/sessions/{id}/messages", post(handle_session_message))
        .route("/sessions/{id}/regenerate", post(handle_session_regenerate))
        .route(
            "/sessions/{id}",
            get(handle_session_get).delete(handle_session_delete),
        )
        .layer(cors)
        .with_state(state)
}

/// Starts the HTTP server on `[server].bind`.
///
/// Fails before binding when a provider cannot be created (e.g. a missing
/// `OPENAI_API_KEY`). Ctrl-C stops accepting connections and cancels
/// in-flight answer runs.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let embedder = create_provider(&config.embedding)?;
    let chat = create_chat_model(&config.llm)?;
    let bind_addr = config.server.bind.clone();

    let state = AppState::new(config.clone(), embedder, chat);
    let shutdown = state.shutdown.clone();
    let app = router(state);

    println!("mdrag server listening on http://{}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutting down");
            shutdown.cancel();
        })
        .await?;

    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

/// Internal error type that converts into an Axum HTTP response.
#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<RagError> for AppError {
    fn from(err: RagError) -> Self {
        let status = match &err {
            RagError::Load(_) | RagError::Config(_) => StatusCode::BAD_REQUEST,
            RagError::NotFound(_) => StatusCode::NOT_FOUND,
            RagError::Embedding(_) | RagError::Pipeline(_) => StatusCode::BAD_GATEWAY,
            RagError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            RagError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let message = match &err {
            RagError::Timeout(_) => TIMEOUT_MESSAGE.to_string(),
            other => other.to_string(),
        };
        tracing::warn!(code = err.code(), error = %err, "request failed");
        AppError {
            status,
            code: err.code().to_string(),
            message,
        }
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found".to_string(),
        message: message.into(),
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    chat_model: String,
}

async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        chat_model: state.pipeline.model_name().to_string(),
    })
}

// ============ POST /documents ============

#[derive(Deserialize)]
struct UploadRequest {
    files: Vec<UploadFile>,
}

/// Save the uploaded files and ingest them. Cached search results are left
/// to expire on their own.
async fn handle_upload(
    State(state): State<AppState>,
    Json(req): Json<UploadRequest>,
) -> Result<Json<IngestSummary>, AppError> {
    let _guard = state.ingest_lock.lock().await;

    let dir = ingest::save_uploads(&state.config.ingest.upload_dir, &req.files)?;
    let opts = IngestOptions {
        dir,
        glob: state.config.ingest.glob.clone(),
        rebuild: false,
        dry_run: false,
    };
    let summary = ingest::ingest(&state.config, &state.builder, &opts, &NoProgress).await?;

    Ok(Json(summary))
}

// ============ POST /search ============

#[derive(Deserialize)]
struct SearchRequest {
    query: String,
    k: Option<usize>,
}

#[derive(Serialize)]
struct SearchResponse {
    result: String,
}

async fn handle_search(
    State(state): State<AppState>,
    Json(req): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, AppError> {
    if req.query.trim().is_empty() {
        return Err(bad_request("query must not be empty"));
    }
    if req.k == Some(0) {
        return Err(bad_request("k must be at least 1"));
    }
    let result = state.retriever.search(&req.query, req.k).await;
    Ok(Json(SearchResponse { result }))
}

// ============ POST /ask ============

#[derive(Serialize)]
struct AskResponse {
    #[serde(flatten)]
    output: PipelineOutput,
    elapsed_secs: f64,
}

impl From<TimedOutput> for AskResponse {
    fn from(timed: TimedOutput) -> Self {
        AskResponse {
            elapsed_secs: timed.elapsed.as_secs_f64(),
            output: timed.output,
        }
    }
}

async fn handle_ask(
    State(state): State<AppState>,
    Json(input): Json<PipelineInput>,
) -> Result<Json<AskResponse>, AppError> {
    if input.user_request.trim().is_empty() {
        return Err(bad_request("user_request must not be empty"));
    }
    Ok(Json(state.answer(input).await?.into()))
}

// ============ Sessions ============

#[derive(Deserialize)]
struct MessageRequest {
    content: String,
}

#[derive(Serialize)]
struct SessionReply {
    #[serde(flatten)]
    answer: AskResponse,
    turns: Vec<Turn>,
}

#[derive(Serialize)]
struct SessionView {
    id: String,
    turns: Vec<Turn>,
}

impl AppState {
    async fn session(&self, id: &str) -> Option<Arc<Mutex<Conversation>>> {
        self.sessions.lock().await.get(id).cloned()
    }

    async fn session_or_new(&self, id: &str) -> Arc<Mutex<Conversation>> {
        self.sessions
            .lock()
            .await
            .entry(id.to_string())
            .or_default()
            .clone()
    }
}

/// Run `request` against a copy of `conversation` and, on success, write the
/// extended copy back. A failed run leaves the conversation as it was. The
/// caller holds the session lock, so turns on one session never interleave.
async fn run_turn(
    state: &AppState,
    conversation: &mut Conversation,
    request: String,
) -> Result<Json<SessionReply>, AppError> {
    let input = PipelineInput {
        conversation_history: conversation.format_for_prompt(),
        user_request: request.clone(),
    };
    let timed = state.answer(input).await?;

    conversation.push_user(request);
    conversation.push_assistant(timed.output.answer.clone());

    Ok(Json(SessionReply {
        answer: timed.into(),
        turns: conversation.turns().to_vec(),
    }))
}

async fn handle_session_message(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<MessageRequest>,
) -> Result<Json<SessionReply>, AppError> {
    if req.content.trim().is_empty() {
        return Err(bad_request("content must not be empty"));
    }
    let session = state.session_or_new(&id).await;
    let mut conversation = session.lock().await;
    let mut next = conversation.clone();
    let reply = run_turn(&state, &mut next, req.content).await?;
    *conversation = next;
    Ok(reply)
}

async fn handle_session_regenerate(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SessionReply>, AppError> {
    let session = state
        .session(&id)
        .await
        .ok_or_else(|| not_found(format!("no session with id: {}", id)))?;
    let mut conversation = session.lock().await;
    let mut next = conversation.clone();
    let request = next
        .pop_last_exchange_reply()
        .ok_or_else(|| bad_request("nothing to regenerate"))?;
    let reply = run_turn(&state, &mut next, request).await?;
    *conversation = next;
    Ok(reply)
}

/// A session exists once it has at least one turn.
async fn handle_session_get(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SessionView>, AppError> {
    let missing = || not_found(format!("no session with id: {}", id));
    let session = state.session(&id).await.ok_or_else(missing)?;
    let conversation = session.lock().await;
    if conversation.is_empty() {
        return Err(missing());
    }
    Ok(Json(SessionView {
        turns: conversation.turns().to_vec(),
        id: id.clone(),
    }))
}

async fn handle_session_delete(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> StatusCode {
    state.sessions.lock().await.remove(&id);
    StatusCode::NO_CONTENT
}
