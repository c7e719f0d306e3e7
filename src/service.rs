//! The knowledge base service: upload, list, delete, reset and query.
//!
//! One [`KnowledgeBase`] is built at startup and shared (`Arc`) by every
//! caller. Operations that change the document set (upload, delete, reset)
//! hold the registry lock for their whole critical section, so the registry
//! and the index change together. Queries only read the index and do not take
//! that lock.
//!
//! Registry and index writes are not transactional. Chunks are written first
//! and the registry last; if the registry write fails the freshly added chunks
//! are removed again on a best-effort basis. Any drift left behind is repaired
//! by [`reset`](KnowledgeBase::reset).

use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use anyhow::Context;
use regex::Regex;
use serde_json::json;
use tokio::sync::Mutex;

use crate::chunk::build_chunks;
use crate::completion::{create_completion, CompletionService};
use crate::config::Config;
use crate::error::{RagError, RagResult};
use crate::extract::{process_document, DocumentFormat};
use crate::index::{create_index, VectorIndex};
use crate::models::{Answer, Document, DocumentSummary, ResetReport, UploadReceipt};
use crate::rag::RagEngine;
use crate::registry::Registry;
use crate::store::KnowledgeStore;
use crate::trace::{TraceLog, TraceSink};

pub struct KnowledgeBase {
    registry: Mutex<Registry>,
    store: Arc<KnowledgeStore>,
    engine: RagEngine,
    upload_dir: PathBuf,
    chunk_size: usize,
}

impl KnowledgeBase {
    /// Assemble a knowledge base from explicit collaborators.
    pub fn new(
        config: &Config,
        index: Arc<dyn VectorIndex>,
        completion: Arc<dyn CompletionService>,
    ) -> RagResult<Self> {
        let registry = Registry::load(&config.storage.registry_path())?;
        tracing::info!(
            path = %registry.path().display(),
            documents = registry.len(),
            "registry loaded"
        );
        let store = Arc::new(KnowledgeStore::new(index, config.index.collection.clone()));
        let engine = RagEngine::new(
            store.clone(),
            completion,
            config.completion.model.clone(),
            config.retrieval.top_k,
        );

        Ok(Self {
            registry: Mutex::new(registry),
            store,
            engine,
            upload_dir: config.storage.upload_dir.clone(),
            chunk_size: config.chunking.chunk_size,
        })
    }

    /// Build the index and completion backends named in `config`.
    pub async fn open(config: &Config) -> anyhow::Result<Self> {
        let index = create_index(config)
            .await
            .context("Failed to open vector index")?;
        let completion: Arc<dyn CompletionService> =
            Arc::from(create_completion(&config.completion)?);
        let kb = Self::new(config, index, completion)?;
        kb.store.ensure_collection().await?;
        Ok(kb)
    }

    /// Save, extract, index and register an uploaded document.
    pub async fn upload(&self, filename: &str, bytes: &[u8]) -> RagResult<UploadReceipt> {
        if filename.trim().is_empty() {
            return Err(RagError::InvalidRequest("no file selected".into()));
        }
        if bytes.is_empty() {
            return Err(RagError::InvalidRequest("uploaded file is empty".into()));
        }
        let filename = secure_filename(filename);
        if filename.is_empty() {
            return Err(RagError::InvalidRequest("invalid filename".into()));
        }
        DocumentFormat::from_filename(&filename)?;

        let mut registry = self.registry.lock().await;
        let document_id = registry.next_document_id(chrono::Utc::now().timestamp_millis());

        tokio::fs::create_dir_all(&self.upload_dir).await?;
        let path = self
            .upload_dir
            .join(format!("{}_{}", document_id, filename));
        tokio::fs::write(&path, bytes).await?;

        let (texts, mut trace) = match self.extract(&path).await {
            Ok(extracted) => extracted,
            Err(e) => {
                tracing::warn!(file = %filename, error = %e, "extraction failed");
                remove_quietly(&path);
                return Err(e);
            }
        };
        if texts.is_empty() {
            remove_quietly(&path);
            return Err(RagError::InvalidRequest(format!(
                "no text could be extracted from {}",
                filename
            )));
        }

        let chunks = build_chunks(&document_id, &texts);
        let planned_ids: Vec<String> = chunks.iter().map(|c| c.id.clone()).collect();

        trace.request(
            "VectorIndex",
            "add",
            json!({
                "collection": self.store.collection_name(),
                "document_id": document_id,
                "chunk_count": chunks.len(),
            }),
        );
        let chunk_ids = match self.store.add_chunks(&document_id, &filename, &chunks).await {
            Ok(ids) => ids,
            Err(e) => {
                self.rollback_chunks(&planned_ids).await;
                remove_quietly(&path);
                return Err(e);
            }
        };
        trace.response(
            "VectorIndex",
            "add",
            json!({ "chunk_ids": chunk_ids.len() }),
        );

        registry.insert(Document {
            id: document_id.clone(),
            filename: filename.clone(),
            path: path.clone(),
            chunk_ids: chunk_ids.clone(),
            created_at: chrono::Utc::now().to_rfc3339(),
        });
        if let Err(e) = registry.save() {
            registry.remove(&document_id);
            self.rollback_chunks(&chunk_ids).await;
            remove_quietly(&path);
            return Err(e);
        }

        tracing::info!(
            document_id = %document_id,
            file = %filename,
            chunks = chunk_ids.len(),
            "document indexed"
        );

        Ok(UploadReceipt {
            document_id,
            filename,
            chunk_ids,
            trace: trace.into_events(),
        })
    }

    /// Run extraction off the async runtime. A panicked extraction task is
    /// reported like any other extraction failure.
    async fn extract(&self, path: &Path) -> RagResult<(Vec<String>, TraceLog)> {
        let chunk_size = self.chunk_size;
        let path = path.to_path_buf();
        let (result, trace) = tokio::task::spawn_blocking(move || {
            let mut trace = TraceLog::new();
            let result = process_document(&path, chunk_size, &mut trace);
            (result, trace)
        })
        .await
        .map_err(|e| RagError::Io(std::io::Error::other(e)))?;
        Ok((result?, trace))
    }

    async fn rollback_chunks(&self, chunk_ids: &[String]) {
        if let Err(e) = self.store.delete(chunk_ids).await {
            tracing::warn!(error = %e, "failed to roll back chunks");
        }
    }

    pub async fn list_documents(&self) -> Vec<DocumentSummary> {
        let registry = self.registry.lock().await;
        registry
            .documents()
            .map(|doc| DocumentSummary {
                id: doc.id.clone(),
                filename: doc.filename.clone(),
                chunk_count: doc.chunk_ids.len(),
                created_at: doc.created_at.clone(),
            })
            .collect()
    }

    pub async fn document(&self, id: &str) -> Option<Document> {
        self.registry.lock().await.get(id).cloned()
    }

    /// Remove a document's chunks, file and registry entry.
    pub async fn delete_document(&self, id: &str) -> RagResult<()> {
        let mut registry = self.registry.lock().await;
        let doc = registry
            .get(id)
            .cloned()
            .ok_or_else(|| RagError::DocumentNotFound(id.to_string()))?;

        self.store.delete(&doc.chunk_ids).await?;
        if let Err(e) = std::fs::remove_file(&doc.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %doc.path.display(), error = %e, "failed to remove file");
            }
        }

        registry.remove(id);
        registry.save()?;
        tracing::info!(document_id = %id, "document deleted");
        Ok(())
    }

    /// Empty the index, delete every uploaded file and clear the registry.
    ///
    /// Every step runs even when an earlier one fails. Per-file failures are
    /// listed in the report; a failure to clear the index or to save the
    /// registry is returned once all steps have run. Safe to repeat.
    pub async fn reset(&self) -> RagResult<ResetReport> {
        let mut registry = self.registry.lock().await;
        let mut fatal = None;

        if let Err(e) = self.store.clear().await {
            tracing::error!(error = %e, "failed to clear index during reset");
            fatal = Some(e);
        }

        let documents = registry.clear();
        let mut report = ResetReport {
            documents_removed: documents.len(),
            ..ResetReport::default()
        };
        for doc in &documents {
            match std::fs::remove_file(&doc.path) {
                Ok(()) => report.files_removed += 1,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::warn!(path = %doc.path.display(), error = %e, "failed to remove file");
                    report
                        .errors
                        .push(format!("{}: {}", doc.path.display(), e));
                }
            }
        }

        if let Err(e) = registry.save() {
            tracing::error!(error = %e, "failed to save registry during reset");
            fatal.get_or_insert(e);
        }

        tracing::info!(
            documents = report.documents_removed,
            files = report.files_removed,
            failed = fatal.is_some(),
            "knowledge base reset"
        );
        match fatal {
            Some(e) => Err(e),
            None => Ok(report),
        }
    }

    pub async fn query(&self, question: &str, k: Option<usize>) -> RagResult<Answer> {
        self.engine.get_response(question, k).await
    }

    pub async fn chunk_count(&self) -> RagResult<usize> {
        self.store.count().await
    }
}

fn remove_quietly(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(path = %path.display(), error = %e, "failed to remove file");
        }
    }
}

fn unsafe_filename_chars() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^A-Za-z0-9_.-]").expect("filename regex is valid"))
}

/// Reduce a client-supplied filename to a safe ASCII basename.
///
/// Non-ASCII characters are dropped, path separators and whitespace become
/// `_`, anything outside `[A-Za-z0-9_.-]` is removed, and leading/trailing
/// dots and underscores are trimmed. May return an empty string.
pub fn secure_filename(name: &str) -> String {
    let ascii: String = name.chars().filter(|c| c.is_ascii()).collect();
    let spaced = ascii.replace(['/', '\\'], " ");
    let joined = spaced.split_whitespace().collect::<Vec<_>>().join("_");
    let cleaned = unsafe_filename_chars().replace_all(&joined, "");
    cleaned.trim_matches(|c| c == '.' || c == '_').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secure_filename_strips_paths_and_symbols() {
        assert_eq!(secure_filename("My Notes.txt"), "My_Notes.txt");
        assert_eq!(secure_filename("../../etc/passwd"), "etc_passwd");
        assert_eq!(secure_filename("C:\\Users\\me\\report.pdf"), "C_Users_me_report.pdf");
        assert_eq!(secure_filename("résumé (final).md"), "rsum_final.md");
        assert_eq!(secure_filename("..."), "");
    }
}
