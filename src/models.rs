//! Core data models used throughout askdocs.
//!
//! These types represent the documents, chunks, retrieval hits and answers
//! that flow through the upload and question-answering pipeline.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::trace::TraceEvent;

/// A registered document. Owned exclusively by the [`Registry`](crate::registry::Registry).
///
/// Documents are never mutated after creation; replacing one means deleting
/// it and uploading again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    #[serde(skip)]
    pub id: String,
    pub filename: String,
    pub path: PathBuf,
    pub chunk_ids: Vec<String>,
    #[serde(default)]
    pub created_at: String,
}

/// A chunk of a document's extracted text.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub chunk_index: usize,
    pub text: String,
}

/// A single nearest-neighbor hit returned by the knowledge store.
#[derive(Debug, Clone, Serialize)]
pub struct RetrievalHit {
    pub chunk_id: String,
    pub text: String,
    /// Original filename of the owning document.
    pub source: String,
    pub document_id: String,
    pub chunk_index: usize,
    /// Cosine distance (`1 - similarity`); smaller is more relevant.
    pub distance: f64,
}

/// A grounded answer with the filenames of every retrieved source.
#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub answer: String,
    pub sources: Vec<String>,
    #[serde(rename = "logs")]
    pub trace: Vec<TraceEvent>,
}

/// Lightweight listing entry for `GET /documents` and `askdocs list`.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentSummary {
    pub id: String,
    pub filename: String,
    pub chunk_count: usize,
    pub created_at: String,
}

/// Result of a successful upload.
#[derive(Debug, Clone, Serialize)]
pub struct UploadReceipt {
    pub document_id: String,
    pub filename: String,
    pub chunk_ids: Vec<String>,
    #[serde(rename = "logs")]
    pub trace: Vec<TraceEvent>,
}

/// Outcome of a knowledge-base reset. Per-file failures do not abort the reset.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ResetReport {
    pub documents_removed: usize,
    pub files_removed: usize,
    pub errors: Vec<String>,
}
