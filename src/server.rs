//! JSON HTTP surface over the [`Engine`].
//!
//! Handlers are thin: decode the request, call one engine operation, and
//! encode the result.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `POST` | `/documents` | Upload a base64-encoded file for an owner |
//! | `GET`  | `/documents/{owner_id}` | List an owner's documents |
//! | `POST` | `/documents/remove` | Remove all or named documents of an owner |
//! | `POST` | `/search` | Search an owner's documents |
//! | `POST` | `/answer` | Retrieve context and generate a reply |
//! | `POST` | `/knowledge` | Add or replace a knowledge-base source |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "query must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `empty_document` (422),
//! `unsupported_content_type` (415), `embedding_failed` (502),
//! `store_unavailable` (503), `internal` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted to support browser-based
//! clients.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use tutor_rag_core::models::{Document, OneOrMany, RetrievalResult};
use tutor_rag_core::search::{SearchError, SearchTier};
use tutor_rag_core::store::StoreError;

use crate::config::Config;
use crate::engine::{Engine, QueryError};
use crate::extract::ExtractError;
use crate::ingest::{IngestError, KnowledgeReport};
use crate::lifecycle::DeletedCount;
use crate::pipeline::{Answer, AnswerRequest};

/// Build the engine from config and serve on `[server].bind`.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let engine = Engine::from_config(config).await?;
    let listener = TcpListener::bind(&config.server.bind).await?;
    run_server_with_engine(engine, listener).await
}

/// Serve an existing engine on an already-bound listener.
pub async fn run_server_with_engine(engine: Engine, listener: TcpListener) -> anyhow::Result<()> {
    info!(addr = %listener.local_addr()?, "server listening");
    axum::serve(listener, router(engine)).await?;
    Ok(())
}

pub fn router(engine: Engine) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/documents", post(handle_upload))
        .route("/documents/{owner_id}", get(handle_list_documents))
        .route("/documents/remove", post(handle_remove))
        .route("/search", post(handle_search))
        .route("/answer", post(handle_answer))
        .route("/knowledge", post(handle_knowledge))
        .layer(cors)
        .with_state(engine)
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl AppError {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }
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
    AppError::new(StatusCode::BAD_REQUEST, "bad_request", message)
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        AppError::new(StatusCode::SERVICE_UNAVAILABLE, "store_unavailable", e.to_string())
    }
}

impl From<IngestError> for AppError {
    fn from(e: IngestError) -> Self {
        let message = e.to_string();
        match e {
            IngestError::Empty => {
                AppError::new(StatusCode::UNPROCESSABLE_ENTITY, "empty_document", message)
            }
            IngestError::InvalidInput(_) | IngestError::DimensionMismatch(_) => {
                bad_request(message)
            }
            IngestError::Extraction(ExtractError::UnsupportedContentType(_)) => AppError::new(
                StatusCode::UNSUPPORTED_MEDIA_TYPE,
                "unsupported_content_type",
                message,
            ),
            IngestError::Extraction(_) => bad_request(message),
            IngestError::Embedding(_) => {
                AppError::new(StatusCode::BAD_GATEWAY, "embedding_failed", message)
            }
            IngestError::StorageUnavailable(e) => e.into(),
        }
    }
}

impl From<QueryError> for AppError {
    fn from(e: QueryError) -> Self {
        let message = e.to_string();
        match e {
            QueryError::EmptyQuery | QueryError::Search(SearchError::DimensionMismatch(_)) => {
                bad_request(message)
            }
            QueryError::Embedding(_) => {
                AppError::new(StatusCode::BAD_GATEWAY, "embedding_failed", message)
            }
            QueryError::Search(SearchError::StoreUnavailable(_)) => {
                AppError::new(StatusCode::SERVICE_UNAVAILABLE, "store_unavailable", message)
            }
        }
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

// ============ Documents ============

#[derive(Deserialize)]
struct UploadRequest {
    owner_id: String,
    display_name: String,
    /// File bytes, standard base64.
    content_base64: String,
}

async fn handle_upload(
    State(engine): State<Engine>,
    Json(req): Json<UploadRequest>,
) -> Result<(StatusCode, Json<Document>), AppError> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(req.content_base64.as_bytes())
        .map_err(|e| bad_request(format!("content_base64 is not valid base64: {}", e)))?;
    let doc = engine
        .ingest(&bytes, &req.owner_id, &req.display_name)
        .await?;
    Ok((StatusCode::CREATED, Json(doc)))
}

#[derive(Serialize)]
struct DocumentList {
    documents: Vec<Document>,
}

async fn handle_list_documents(
    State(engine): State<Engine>,
    Path(owner_id): Path<String>,
) -> Result<Json<DocumentList>, AppError> {
    let documents = engine.list_documents(&owner_id).await?;
    Ok(Json(DocumentList { documents }))
}

#[derive(Deserialize)]
struct RemoveRequest {
    owner_id: String,
    #[serde(default)]
    doc_filter: Option<OneOrMany<String>>,
}

#[derive(Serialize)]
struct RemoveResponse {
    deleted: u64,
    #[serde(flatten)]
    detail: DeletedCount,
}

async fn handle_remove(
    State(engine): State<Engine>,
    Json(req): Json<RemoveRequest>,
) -> Result<Json<RemoveResponse>, AppError> {
    if req.owner_id.trim().is_empty() {
        return Err(bad_request("owner_id must not be empty"));
    }
    let detail = engine.remove(&req.owner_id, req.doc_filter).await?;
    Ok(Json(RemoveResponse {
        deleted: detail.total(),
        detail,
    }))
}

// ============ POST /search ============

#[derive(Deserialize)]
struct SearchRequest {
    query: String,
    owner_id: String,
    #[serde(default)]
    doc_filter: Option<OneOrMany<String>>,
    #[serde(default)]
    k: Option<usize>,
}

#[derive(Serialize)]
struct SearchResponse {
    results: Vec<RetrievalResult>,
    tier: SearchTier,
    degraded: bool,
}

async fn handle_search(
    State(engine): State<Engine>,
    Json(req): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, AppError> {
    let outcome = engine
        .search(&req.query, &req.owner_id, req.doc_filter, req.k)
        .await?;
    Ok(Json(SearchResponse {
        degraded: outcome.is_degraded(),
        tier: outcome.tier,
        results: outcome.results,
    }))
}

// ============ POST /answer ============

async fn handle_answer(
    State(engine): State<Engine>,
    Json(req): Json<AnswerRequest>,
) -> Result<Json<Answer>, AppError> {
    if req.question.trim().is_empty() {
        return Err(bad_request("question must not be empty"));
    }
    Ok(Json(engine.answer(req).await))
}

// ============ POST /knowledge ============

#[derive(Deserialize)]
struct KnowledgeRequest {
    source_id: String,
    title: String,
    content_base64: String,
}

async fn handle_knowledge(
    State(engine): State<Engine>,
    Json(req): Json<KnowledgeRequest>,
) -> Result<Json<KnowledgeReport>, AppError> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(req.content_base64.as_bytes())
        .map_err(|e| bad_request(format!("content_base64 is not valid base64: {}", e)))?;
    let report = engine
        .ingest_knowledge(&bytes, &req.title, &req.source_id)
        .await?;
    Ok(Json(report))
}
