//! Knowledge store adapter over a [`VectorIndex`].
//!
//! Owns the single named collection that holds every chunk, and the
//! collection-handle state machine:
//!
//! ```text
//!            ensure_collection()
//!   Stale ───────────────────────▶ Ready(handle)
//!     ▲                                 │
//!     └──── IndexError::StaleCollection ┘
//! ```
//!
//! A stale handle is never papered over with empty results: the adapter
//! reopens (or recreates) the collection and reports
//! [`RagError::KnowledgeBaseReset`] so callers know previously indexed
//! content is gone.

use std::sync::Arc;

use serde_json::json;
use tokio::sync::Mutex;

use crate::error::{RagError, RagResult};
use crate::index::{CollectionHandle, IndexEntry, IndexError, VectorIndex};
use crate::models::{Chunk, RetrievalHit};

enum CollectionState {
    Ready(CollectionHandle),
    Stale,
}

pub struct KnowledgeStore {
    index: Arc<dyn VectorIndex>,
    collection: String,
    state: Mutex<CollectionState>,
}

impl KnowledgeStore {
    pub fn new(index: Arc<dyn VectorIndex>, collection: impl Into<String>) -> Self {
        Self {
            index,
            collection: collection.into(),
            state: Mutex::new(CollectionState::Stale),
        }
    }

    pub fn collection_name(&self) -> &str {
        &self.collection
    }

    /// Return the current handle, opening or creating the collection if needed.
    pub async fn ensure_collection(&self) -> RagResult<CollectionHandle> {
        let mut state = self.state.lock().await;
        if let CollectionState::Ready(handle) = &*state {
            return Ok(handle.clone());
        }
        let handle = self.open_collection().await?;
        *state = CollectionState::Ready(handle.clone());
        Ok(handle)
    }

    async fn open_collection(&self) -> Result<CollectionHandle, IndexError> {
        if let Some(handle) = self.index.get_collection(&self.collection).await? {
            return Ok(handle);
        }
        match self.index.create_collection(&self.collection).await {
            Ok(handle) => {
                tracing::info!(collection = %self.collection, "created collection");
                Ok(handle)
            }
            Err(e) => {
                tracing::warn!(
                    collection = %self.collection,
                    error = %e,
                    "create failed, recreating"
                );
                self.drop_collection().await?;
                self.index.create_collection(&self.collection).await
            }
        }
    }

    async fn drop_collection(&self) -> Result<(), IndexError> {
        match self.index.delete_collection(&self.collection).await {
            Ok(()) | Err(IndexError::CollectionMissing(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Convert an index error, recovering from a stale handle on the way.
    async fn recover(&self, err: IndexError) -> RagError {
        match err {
            IndexError::StaleCollection(name) => {
                tracing::warn!(collection = %name, "collection handle is stale; reopening");
                *self.state.lock().await = CollectionState::Stale;
                if let Err(e) = self.ensure_collection().await {
                    tracing::warn!(error = %e, "failed to reopen collection");
                }
                RagError::KnowledgeBaseReset
            }
            other => other.into(),
        }
    }

    /// Insert chunks in order and return their ids.
    pub async fn add_chunks(
        &self,
        document_id: &str,
        filename: &str,
        chunks: &[Chunk],
    ) -> RagResult<Vec<String>> {
        let entries: Vec<IndexEntry> = chunks
            .iter()
            .map(|c| IndexEntry {
                id: c.id.clone(),
                document: c.text.clone(),
                metadata: json!({
                    "source": filename,
                    "chunk": c.chunk_index,
                    "doc_id": document_id,
                }),
            })
            .collect();

        let handle = self.ensure_collection().await?;
        if let Err(e) = self.index.add(&handle, &entries).await {
            return Err(self.recover(e).await);
        }
        Ok(chunks.iter().map(|c| c.id.clone()).collect())
    }

    /// Nearest chunks to `question`, by increasing distance.
    pub async fn query(&self, question: &str, k: usize) -> RagResult<Vec<RetrievalHit>> {
        let handle = self.ensure_collection().await?;
        let hits = match self.index.query(&handle, question, k).await {
            Ok(hits) => hits,
            Err(e) => return Err(self.recover(e).await),
        };

        Ok(hits
            .into_iter()
            .map(|hit| RetrievalHit {
                source: hit.metadata["source"]
                    .as_str()
                    .unwrap_or("unknown")
                    .to_string(),
                document_id: hit.metadata["doc_id"].as_str().unwrap_or_default().to_string(),
                chunk_index: hit.metadata["chunk"].as_u64().unwrap_or_default() as usize,
                chunk_id: hit.id,
                text: hit.document,
                distance: hit.distance,
            })
            .collect())
    }

    pub async fn delete(&self, chunk_ids: &[String]) -> RagResult<()> {
        if chunk_ids.is_empty() {
            return Ok(());
        }
        let handle = self.ensure_collection().await?;
        if let Err(e) = self.index.delete(&handle, chunk_ids).await {
            return Err(self.recover(e).await);
        }
        Ok(())
    }

    pub async fn count(&self) -> RagResult<usize> {
        let handle = self.ensure_collection().await?;
        match self.index.count(&handle).await {
            Ok(n) => Ok(n),
            Err(e) => Err(self.recover(e).await),
        }
    }

    /// Remove every chunk. Falls back to recreating the collection; always
    /// leaves a ready, empty collection behind.
    pub async fn clear(&self) -> RagResult<()> {
        let handle = self.ensure_collection().await?;
        let cleared = match self.index.ids(&handle).await {
            Ok(ids) if ids.is_empty() => Ok(()),
            Ok(ids) => self.index.delete(&handle, &ids).await,
            Err(e) => Err(e),
        };

        if let Err(e) = cleared {
            tracing::warn!(error = %e, "clearing collection failed; recreating it");
            let mut state = self.state.lock().await;
            *state = CollectionState::Stale;
            self.drop_collection().await?;
            let handle = self.index.create_collection(&self.collection).await?;
            *state = CollectionState::Ready(handle);
        }
        Ok(())
    }
}
