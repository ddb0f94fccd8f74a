//! HTTP API for the chat frontend and for triggering sync passes.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`    | `/health` | Health check (returns version) |
//! | `POST`   | `/threads` | Start a new conversation for a user |
//! | `DELETE` | `/threads` | Delete a user's conversation |
//! | `POST`   | `/threads/attach` | Attach an uploaded file to a user's conversation |
//! | `POST`   | `/upload` | Upload a file (multipart: `user_id`, `file`); returns its id |
//! | `POST`   | `/ask` | Ask a question; returns answer text and cited documents |
//! | `POST`   | `/model` | Switch a user's assistant variant |
//! | `GET`    | `/model/{user_id}` | Current assistant variant of a user |
//! | `POST`   | `/sync` | Run one synchronization pass |
//!
//! A sync pass runs in its own task. A client that disconnects mid-pass
//! does not cancel it; the next request sees 409 until it finishes.
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "user_id must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `sync_in_progress` (409),
//! `upstream_error` (502), `internal` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted; the chat frontend is
//! served from a different origin.

use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::config::Config;
use crate::error::ServiceError;
use crate::filter::NameFilter;
use crate::ingest::{run_pass, PassOptions, PassOutcome};
use crate::progress::NoProgress;
use crate::records::{self, RecordStore};
use crate::session::{SessionError, SessionRegistry};
use crate::traits::{self, FileStore, SearchIndex};

/// Everything a sync pass needs, built once at startup.
pub struct SyncJob {
    pub records: Box<dyn RecordStore>,
    pub store: Arc<dyn FileStore>,
    pub index: Arc<dyn SearchIndex>,
    pub filter: NameFilter,
    pub options: PassOptions,
}

impl SyncJob {
    pub async fn from_config(config: &Config) -> anyhow::Result<Self> {
        Ok(Self {
            records: records::open(config).await?,
            store: traits::file_store_from_config(config)?,
            index: traits::search_index_from_config(config)?,
            filter: NameFilter::from_config(&config.store)?,
            options: PassOptions::from_config(config),
        })
    }

    async fn run(&self) -> anyhow::Result<PassOutcome> {
        run_pass(
            self.records.as_ref(),
            self.store.as_ref(),
            self.index.as_ref(),
            &self.filter,
            &self.options,
            &NoProgress,
        )
        .await
    }
}

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    sessions: Arc<SessionRegistry>,
    /// Held for the whole of a pass; passes never overlap.
    sync: Arc<tokio::sync::Mutex<SyncJob>>,
}

impl AppState {
    pub fn new(sessions: SessionRegistry, sync: SyncJob) -> Self {
        Self {
            sessions: Arc::new(sessions),
            sync: Arc::new(tokio::sync::Mutex::new(sync)),
        }
    }

    pub async fn from_config(config: &Config) -> anyhow::Result<Self> {
        let assistant = traits::assistant_from_config(config)?;
        let sessions = SessionRegistry::new(assistant, config.assistants.clone());
        let sync = SyncJob::from_config(config).await?;
        Ok(Self::new(sessions, sync))
    }
}

/// Largest file accepted by `POST /upload`.
const UPLOAD_LIMIT_BYTES: usize = 32 * 1024 * 1024;

/// Build the router. Separate from [`run_server`] so tests can drive it
/// with stub collaborators.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route(
            "/threads",
            post(handle_create_thread).delete(handle_delete_thread),
        )
        .route("/threads/attach", post(handle_attach_file))
        .route(
            "/upload",
            post(handle_upload).layer(DefaultBodyLimit::max(UPLOAD_LIMIT_BYTES)),
        )
        .route("/ask", post(handle_ask))
        .route("/model", post(handle_set_model))
        .route("/model/{user_id}", get(handle_get_model))
        .route("/sync", post(handle_sync))
        .layer(cors)
        .with_state(state)
}

/// Starts the HTTP server on `[server].bind` and runs until the process
/// is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let state = AppState::from_config(config).await?;
    let app = router(state);

    let bind_addr = config.server.bind.clone();
    println!("relay listening on http://{}", bind_addr);
    tracing::info!(bind = %bind_addr, "server started");

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

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

struct AppError {
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

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn sync_in_progress() -> AppError {
    AppError {
        status: StatusCode::CONFLICT,
        code: "sync_in_progress".to_string(),
        message: "a sync pass is already running".to_string(),
    }
}

/// Maps operation errors: unknown variants are the caller's fault,
/// collaborator failures are upstream, anything else is internal.
fn classify_error(context: &str, err: anyhow::Error) -> AppError {
    tracing::error!("{} failed: {:#}", context, err);

    if let Some(SessionError::UnknownVariant { .. }) = err.downcast_ref::<SessionError>() {
        return bad_request(err.to_string());
    }
    if err.downcast_ref::<ServiceError>().is_some() {
        return AppError {
            status: StatusCode::BAD_GATEWAY,
            code: "upstream_error".to_string(),
            message: format!("{}: {}", context, err),
        };
    }
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: format!("{}: {}", context, err),
    }
}

fn require_user(user_id: &str) -> Result<(), AppError> {
    if user_id.trim().is_empty() {
        return Err(bad_request("user_id must not be empty"));
    }
    Ok(())
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ /threads ============

#[derive(Deserialize)]
struct UserRequest {
    user_id: String,
}

#[derive(Serialize)]
struct ThreadResponse {
    thread_id: String,
}

async fn handle_create_thread(
    State(state): State<AppState>,
    Json(req): Json<UserRequest>,
) -> Result<Json<ThreadResponse>, AppError> {
    require_user(&req.user_id)?;
    let thread_id = state
        .sessions
        .create_thread(&req.user_id)
        .await
        .map_err(|e| classify_error("create thread", e))?;
    Ok(Json(ThreadResponse { thread_id }))
}

#[derive(Serialize)]
struct DeleteResponse {
    deleted: bool,
}

async fn handle_delete_thread(
    State(state): State<AppState>,
    Json(req): Json<UserRequest>,
) -> Result<Json<DeleteResponse>, AppError> {
    require_user(&req.user_id)?;
    let deleted = state
        .sessions
        .delete_thread(&req.user_id)
        .await
        .map_err(|e| classify_error("delete thread", e))?;
    Ok(Json(DeleteResponse { deleted }))
}

#[derive(Deserialize)]
struct AttachRequest {
    user_id: String,
    file_id: String,
}

async fn handle_attach_file(
    State(state): State<AppState>,
    Json(req): Json<AttachRequest>,
) -> Result<Json<ThreadResponse>, AppError> {
    require_user(&req.user_id)?;
    if req.file_id.trim().is_empty() {
        return Err(bad_request("file_id must not be empty"));
    }
    let thread_id = state
        .sessions
        .attach_file(&req.user_id, &req.file_id)
        .await
        .map_err(|e| classify_error("attach file", e))?;
    Ok(Json(ThreadResponse { thread_id }))
}

// ============ POST /upload ============

#[derive(Serialize)]
struct UploadResponse {
    file_id: String,
}

async fn handle_upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, AppError> {
    let mut user_id = None;
    let mut file = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| bad_request(format!("invalid multipart body: {}", e)))?
    {
        let field_name = field.name().map(str::to_string);
        match field_name.as_deref() {
            Some("user_id") => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| bad_request(format!("invalid user_id field: {}", e)))?;
                user_id = Some(text);
            }
            Some("file") => {
                let name = field.file_name().unwrap_or("upload").to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| bad_request(format!("invalid file field: {}", e)))?;
                file = Some((name, bytes.to_vec()));
            }
            _ => {}
        }
    }

    let user_id = user_id.unwrap_or_default();
    require_user(&user_id)?;
    let Some((name, content)) = file else {
        return Err(bad_request("missing 'file' field"));
    };

    let file_id = state
        .sessions
        .upload_file(&user_id, &name, content)
        .await
        .map_err(|e| classify_error("upload", e))?;
    Ok(Json(UploadResponse { file_id }))
}

// ============ POST /ask ============

#[derive(Deserialize)]
struct AskRequest {
    user_id: String,
    question: String,
}

#[derive(Serialize)]
struct AskResponse {
    answer: String,
    citations: Vec<String>,
}

async fn handle_ask(
    State(state): State<AppState>,
    Json(req): Json<AskRequest>,
) -> Result<Json<AskResponse>, AppError> {
    require_user(&req.user_id)?;
    let resolved = state
        .sessions
        .ask(&req.user_id, &req.question)
        .await
        .map_err(|e| classify_error("ask", e))?;
    Ok(Json(AskResponse {
        answer: resolved.text,
        citations: resolved.citations,
    }))
}

// ============ /model ============

#[derive(Deserialize)]
struct ModelRequest {
    user_id: String,
    model: String,
}

#[derive(Serialize)]
struct ModelResponse {
    active_model: String,
}

async fn handle_set_model(
    State(state): State<AppState>,
    Json(req): Json<ModelRequest>,
) -> Result<Json<ModelResponse>, AppError> {
    require_user(&req.user_id)?;
    state
        .sessions
        .set_variant(&req.user_id, &req.model)
        .await
        .map_err(|e| classify_error("set model", e))?;
    Ok(Json(ModelResponse {
        active_model: req.model,
    }))
}

async fn handle_get_model(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Json<ModelResponse> {
    Json(ModelResponse {
        active_model: state.sessions.active_variant(&user_id).await,
    })
}

// ============ POST /sync ============

async fn handle_sync(State(state): State<AppState>) -> Result<Json<PassOutcome>, AppError> {
    let job = state
        .sync
        .clone()
        .try_lock_owned()
        .map_err(|_| sync_in_progress())?;
    // Owns the guard; outlives this handler.
    let pass = tokio::spawn(async move { job.run().await });
    let outcome = pass
        .await
        .map_err(|e| classify_error("sync", anyhow::anyhow!("sync task failed: {}", e)))?
        .map_err(|e| classify_error("sync", e))?;
    tracing::info!(
        indexed = outcome.report.indexed,
        failed = outcome.report.failed,
        pruned = outcome.report.pruned,
        "sync pass finished"
    );
    Ok(Json(outcome))
}
