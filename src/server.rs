//! HTTP JSON API over a [`KnowledgeBase`].
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`    | `/health` | Liveness check (returns version) |
//! | `GET`    | `/status` | Readiness, index and document counts |
//! | `GET`    | `/documents` | List documents in the data directory |
//! | `PUT`    | `/documents/{*name}` | Upload a document (raw request body) |
//! | `DELETE` | `/documents/{*name}` | Delete a document by its listed name |
//! | `POST`   | `/rebuild` | Rebuild the index from all documents |
//! | `POST`   | `/ask` | Answer `{"question": "..."}` |
//!
//! `POST /ask` answers with either
//!
//! ```json
//! { "status": "answered", "answer": "...", "sources": ["a.txt"] }
//! ```
//!
//! or, when there is no usable index,
//!
//! ```json
//! { "status": "not_ready", "message": "The knowledge base is not ready ..." }
//! ```
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "no_documents", "message": "no documents to ingest in data: ..." } }
//! ```
//!
//! | Status | Codes |
//! |--------|-------|
//! | 400 | `bad_request`, `invalid_document` |
//! | 404 | `document_not_found` |
//! | 409 | `no_documents`, `rebuild_in_progress` |
//! | 500 | `configuration`, `ingest`, `index_load`, `io` |
//! | 502 | `retrieval`, `completion` |
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so a browser front end
//! can be served from anywhere.

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};

use crate::error::RagError;
use crate::knowledge_base::{KnowledgeBase, KnowledgeBaseStatus};
use crate::models::{DocumentInfo, IngestSummary};
use crate::query::Reply;

/// Upper bound on an uploaded document.
const MAX_UPLOAD_BYTES: usize = 64 * 1024 * 1024;

/// Build the API router over `kb`.
pub fn router(kb: Arc<KnowledgeBase>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/status", get(handle_status))
        .route("/documents", get(handle_list_documents))
        .route(
            "/documents/{*name}",
            put(handle_add_document).delete(handle_remove_document),
        )
        .route("/rebuild", post(handle_rebuild))
        .route("/ask", post(handle_ask))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(cors)
        .with_state(kb)
}

/// Serve the API on `[server].bind` until the process is terminated.
pub async fn run_server(kb: Arc<KnowledgeBase>) -> anyhow::Result<()> {
    let bind_addr = kb.config().server.bind.clone();
    let app = router(kb);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(addr = %bind_addr, "server listening");
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

/// Error type that converts into an Axum HTTP response.
#[derive(Debug)]
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

impl From<RagError> for AppError {
    fn from(err: RagError) -> Self {
        let status = match &err {
            RagError::InvalidDocument(_) => StatusCode::BAD_REQUEST,
            RagError::DocumentNotFound(_) => StatusCode::NOT_FOUND,
            RagError::NoDocuments(_) | RagError::RebuildInProgress => StatusCode::CONFLICT,
            RagError::Retrieval(_) | RagError::Completion(_) => StatusCode::BAD_GATEWAY,
            RagError::Configuration(_)
            | RagError::Ingest(_)
            | RagError::IndexLoad { .. }
            | RagError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!(code = err.code(), error = %err, "request failed");
        } else {
            warn!(code = err.code(), error = %err, "request rejected");
        }
        AppError {
            status,
            code: err.code().to_string(),
            message: err.to_string(),
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

// ============ GET /status ============

async fn handle_status(
    State(kb): State<Arc<KnowledgeBase>>,
) -> Result<Json<KnowledgeBaseStatus>, AppError> {
    Ok(Json(kb.status()?))
}

// ============ /documents ============

#[derive(Serialize)]
struct DocumentListResponse {
    documents: Vec<DocumentInfo>,
}

async fn handle_list_documents(
    State(kb): State<Arc<KnowledgeBase>>,
) -> Result<Json<DocumentListResponse>, AppError> {
    Ok(Json(DocumentListResponse {
        documents: kb.list_documents()?,
    }))
}

/// Stores the raw body as `name`. The index is not rebuilt.
async fn handle_add_document(
    State(kb): State<Arc<KnowledgeBase>>,
    Path(name): Path<String>,
    body: Bytes,
) -> Result<(StatusCode, Json<DocumentInfo>), AppError> {
    if body.is_empty() {
        return Err(bad_request("request body must not be empty"));
    }
    let info = kb.add_document(&name, &body).await?;
    Ok((StatusCode::CREATED, Json(info)))
}

async fn handle_remove_document(
    State(kb): State<Arc<KnowledgeBase>>,
    Path(name): Path<String>,
) -> Result<StatusCode, AppError> {
    kb.remove_document(&name).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ============ POST /rebuild ============

async fn handle_rebuild(
    State(kb): State<Arc<KnowledgeBase>>,
) -> Result<Json<IngestSummary>, AppError> {
    Ok(Json(kb.rebuild().await?))
}

// ============ POST /ask ============

#[derive(Deserialize)]
struct AskRequest {
    question: String,
}

#[derive(Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
enum AskResponse {
    Answered { answer: String, sources: Vec<String> },
    NotReady { message: String },
}

async fn handle_ask(
    State(kb): State<Arc<KnowledgeBase>>,
    Json(req): Json<AskRequest>,
) -> Result<Json<AskResponse>, AppError> {
    if req.question.trim().is_empty() {
        return Err(bad_request("question must not be empty"));
    }

    let response = match kb.ask(&req.question).await? {
        Reply::Answer(answer) => AskResponse::Answered {
            answer: answer.text,
            sources: answer.sources,
        },
        Reply::NotReady { message } => AskResponse::NotReady { message },
    };
    Ok(Json(response))
}
