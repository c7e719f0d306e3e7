//! Error taxonomy for the question-answering pipeline.
//!
//! Every failure that can reach a caller is a [`RagError`]. Each variant has a
//! stable machine-readable [`code`](RagError::code) and an HTTP
//! [`status`](RagError::status), so the CLI and the server report the same
//! condition the same way.
//!
//! | Variant | Code | Status |
//! |---------|------|--------|
//! | `UnsupportedFormat` | `unsupported_format` | 400 |
//! | `InvalidRequest` | `bad_request` | 400 |
//! | `EmptyKnowledgeBase` | `empty_knowledge_base` | 400 |
//! | `KnowledgeBaseReset` | `knowledge_base_reset` | 409 |
//! | `DocumentNotFound` | `not_found` | 404 |
//! | `BackendUnavailable` | `backend_unavailable` | 503 |
//! | `Extraction`, `Registry`, `Io` | `internal` | 500 |

use axum::http::StatusCode;
use thiserror::Error;

use crate::completion::CompletionError;
use crate::extract::ExtractError;
use crate::index::IndexError;

#[derive(Error, Debug)]
pub enum RagError {
    #[error("unsupported file type: {0}")]
    UnsupportedFormat(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("no documents indexed; upload a document first")]
    EmptyKnowledgeBase,

    #[error("knowledge base was reset; re-upload your documents and retry")]
    KnowledgeBaseReset,

    #[error("document not found: {0}")]
    DocumentNotFound(String),

    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error(transparent)]
    Extraction(ExtractError),

    #[error("registry error: {0}")]
    Registry(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type RagResult<T> = Result<T, RagError>;

impl RagError {
    /// Machine-readable error code used in API error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            RagError::UnsupportedFormat(_) => "unsupported_format",
            RagError::InvalidRequest(_) => "bad_request",
            RagError::EmptyKnowledgeBase => "empty_knowledge_base",
            RagError::KnowledgeBaseReset => "knowledge_base_reset",
            RagError::DocumentNotFound(_) => "not_found",
            RagError::BackendUnavailable(_) => "backend_unavailable",
            RagError::Extraction(_) | RagError::Registry(_) | RagError::Io(_) => "internal",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            RagError::UnsupportedFormat(_)
            | RagError::InvalidRequest(_)
            | RagError::EmptyKnowledgeBase => StatusCode::BAD_REQUEST,
            RagError::KnowledgeBaseReset => StatusCode::CONFLICT,
            RagError::DocumentNotFound(_) => StatusCode::NOT_FOUND,
            RagError::BackendUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            RagError::Extraction(_) | RagError::Registry(_) | RagError::Io(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<ExtractError> for RagError {
    fn from(e: ExtractError) -> Self {
        match e {
            ExtractError::UnsupportedFormat(ext) => RagError::UnsupportedFormat(ext),
            other => RagError::Extraction(other),
        }
    }
}

impl From<IndexError> for RagError {
    fn from(e: IndexError) -> Self {
        match e {
            // Stale handles are resolved by the store adapter before reaching
            // here; one leaking through still means the collection was replaced.
            IndexError::StaleCollection(_) => RagError::KnowledgeBaseReset,
            other => RagError::BackendUnavailable(other.to_string()),
        }
    }
}

impl From<CompletionError> for RagError {
    fn from(e: CompletionError) -> Self {
        RagError::BackendUnavailable(e.to_string())
    }
}
