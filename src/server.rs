//! HTTP API.
//!
//! A thin axum shim over [`KnowledgeBase`]; every handler delegates to one
//! service operation and maps [`RagError`] onto the error contract below.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`    | `/health` | Health check (returns version) |
//! | `POST`   | `/upload` | Upload a document (multipart field `file`) |
//! | `GET`    | `/documents` | List registered documents |
//! | `DELETE` | `/documents/{id}` | Delete one document |
//! | `POST`   | `/query` | Ask a question: `{"question": "...", "k": 3}` |
//! | `POST`   | `/reset` | Delete every document and chunk |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "empty_knowledge_base", "message": "no documents indexed; upload a document first" } }
//! ```
//!
//! Error codes: `unsupported_format` (400), `bad_request` (400),
//! `empty_knowledge_base` (400), `not_found` (404), `knowledge_base_reset`
//! (409), `payload_too_large` (413), `backend_unavailable` (503),
//! `internal` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted.

use axum::{
    extract::{rejection::JsonRejection, DefaultBodyLimit, Multipart, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::config::Config;
use crate::error::RagError;
use crate::models::{Answer, DocumentSummary, UploadReceipt};
use crate::service::KnowledgeBase;
use crate::trace::TraceEvent;

/// Build the application router around a shared knowledge base.
pub fn router(kb: Arc<KnowledgeBase>, max_upload_bytes: usize) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/upload", post(handle_upload))
        .route("/documents", get(handle_list_documents))
        .route("/documents/{id}", delete(handle_delete_document))
        .route("/query", post(handle_query))
        .route("/reset", post(handle_reset))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(cors)
        .with_state(kb)
}

/// Bind `server.bind` and serve until the process is terminated.
pub async fn run_server(config: &Config, kb: Arc<KnowledgeBase>) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let app = router(kb, config.server.max_upload_bytes);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(addr = %bind_addr, "askdocs server listening");
    println!("askdocs listening on http://{}", bind_addr);

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
    fn from(e: RagError) -> Self {
        if e.status().is_server_error() {
            tracing::error!(code = e.code(), error = %e, "request failed");
        }
        AppError {
            status: e.status(),
            code: e.code().to_string(),
            message: e.to_string(),
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

// ============ POST /upload ============

#[derive(Serialize)]
struct UploadResponse {
    message: String,
    #[serde(flatten)]
    receipt: UploadReceipt,
}

/// Reads the multipart field `file` and hands it to [`KnowledgeBase::upload`].
async fn handle_upload(
    State(kb): State<Arc<KnowledgeBase>>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, AppError> {
    let mut upload = None;
    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field.file_name().unwrap_or_default().to_string();
        let bytes = field.bytes().await.map_err(multipart_error)?;
        upload = Some((filename, bytes));
        break;
    }

    let (filename, bytes) = upload.ok_or_else(|| bad_request("no file part"))?;
    let receipt = kb.upload(&filename, &bytes).await?;

    Ok(Json(UploadResponse {
        message: "File successfully uploaded and processed".to_string(),
        receipt,
    }))
}

fn multipart_error(e: axum::extract::multipart::MultipartError) -> AppError {
    let status = e.status();
    let code = if status == StatusCode::PAYLOAD_TOO_LARGE {
        "payload_too_large"
    } else {
        "bad_request"
    };
    AppError {
        status,
        code: code.to_string(),
        message: e.body_text(),
    }
}

// ============ GET /documents ============

async fn handle_list_documents(State(kb): State<Arc<KnowledgeBase>>) -> Json<Vec<DocumentSummary>> {
    Json(kb.list_documents().await)
}

// ============ DELETE /documents/{id} ============

#[derive(Serialize)]
struct MessageResponse {
    message: String,
}

async fn handle_delete_document(
    State(kb): State<Arc<KnowledgeBase>>,
    Path(id): Path<String>,
) -> Result<Json<MessageResponse>, AppError> {
    kb.delete_document(&id).await?;
    Ok(Json(MessageResponse {
        message: "Document deleted successfully".to_string(),
    }))
}

// ============ POST /query ============

#[derive(Deserialize)]
struct QueryRequest {
    #[serde(default)]
    question: Option<String>,
    #[serde(default)]
    k: Option<usize>,
}

#[derive(Serialize)]
struct QueryResponse {
    answer: String,
    sources: Vec<String>,
    logs: Vec<TraceEvent>,
}

impl From<Answer> for QueryResponse {
    fn from(a: Answer) -> Self {
        QueryResponse {
            answer: a.answer,
            sources: a.sources,
            logs: a.trace,
        }
    }
}

async fn handle_query(
    State(kb): State<Arc<KnowledgeBase>>,
    body: Result<Json<QueryRequest>, JsonRejection>,
) -> Result<Json<QueryResponse>, AppError> {
    let Json(req) = body.map_err(|e| bad_request(e.body_text()))?;
    let question = req
        .question
        .ok_or_else(|| bad_request("no question provided"))?;

    let answer = kb.query(&question, req.k).await?;
    Ok(Json(answer.into()))
}

// ============ POST /reset ============

#[derive(Serialize)]
struct ResetResponse {
    message: String,
    documents_removed: usize,
    files_removed: usize,
    errors: Vec<String>,
}

async fn handle_reset(
    State(kb): State<Arc<KnowledgeBase>>,
) -> Result<Json<ResetResponse>, AppError> {
    let report = kb.reset().await?;
    Ok(Json(ResetResponse {
        message: "Knowledge base reset successfully".to_string(),
        documents_removed: report.documents_removed,
        files_removed: report.files_removed,
        errors: report.errors,
    }))
}
