//! Vector index abstraction.
//!
//! The [`VectorIndex`] trait is the seam between the knowledge store and a
//! concrete nearest-neighbor backend. An index stores named collections of
//! text entries, embeds them on insert, and answers similarity queries.
//!
//! Every data operation is addressed through a [`CollectionHandle`]. A handle
//! names a collection *and* identifies one incarnation of it: once the
//! collection is deleted or recreated, operations on the old handle fail with
//! [`IndexError::StaleCollection`] instead of silently acting on (or reading
//! from) the wrong collection.
//!
//! # Backends
//!
//! | Backend | Type | Persistence |
//! |---------|------|-------------|
//! | `sqlite` | [`SqliteIndex`] | SQLite file (`index.path`) |
//! | `memory` | [`MemoryIndex`] | Process lifetime |
//!
//! Both are brute-force cosine stores; neither is an ANN index.

pub mod memory;
pub mod sqlite;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use thiserror::Error;

use crate::config::Config;
use crate::embedding::Embedder;

pub use memory::MemoryIndex;
pub use sqlite::SqliteIndex;

/// Errors reported by a [`VectorIndex`].
#[derive(Error, Debug)]
pub enum IndexError {
    /// The handle refers to a collection that no longer exists in that form.
    #[error("collection '{0}' was deleted or replaced")]
    StaleCollection(String),

    #[error("collection '{0}' does not exist")]
    CollectionMissing(String),

    #[error("collection '{0}' already exists")]
    CollectionExists(String),

    #[error("index backend error: {0}")]
    Backend(String),

    #[error("embedding failed: {0}")]
    Embedding(String),
}

impl From<sqlx::Error> for IndexError {
    fn from(e: sqlx::Error) -> Self {
        IndexError::Backend(e.to_string())
    }
}

/// Identifies one incarnation of a named collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionHandle {
    pub name: String,
    /// Unique per creation; a recreated collection gets a new id.
    pub id: String,
}

/// A text entry to insert. The index computes its embedding.
#[derive(Debug, Clone)]
pub struct IndexEntry {
    pub id: String,
    pub document: String,
    pub metadata: serde_json::Value,
}

/// A query result.
#[derive(Debug, Clone)]
pub struct IndexHit {
    pub id: String,
    pub document: String,
    pub metadata: serde_json::Value,
    /// Cosine distance to the query; smaller is closer.
    pub distance: f64,
}

/// Abstract vector index.
///
/// All operations are async (via `async-trait`). Inserting an id that already
/// exists in the collection replaces the entry.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Look up a collection by name.
    async fn get_collection(&self, name: &str) -> Result<Option<CollectionHandle>, IndexError>;

    /// Create a collection. Fails with [`IndexError::CollectionExists`] if
    /// the name is taken.
    async fn create_collection(&self, name: &str) -> Result<CollectionHandle, IndexError>;

    /// Delete a collection and all its entries.
    async fn delete_collection(&self, name: &str) -> Result<(), IndexError>;

    async fn add(&self, handle: &CollectionHandle, entries: &[IndexEntry])
        -> Result<(), IndexError>;

    /// Return up to `k` entries ordered by ascending distance to `text`.
    async fn query(
        &self,
        handle: &CollectionHandle,
        text: &str,
        k: usize,
    ) -> Result<Vec<IndexHit>, IndexError>;

    /// Delete entries by id. Unknown ids are ignored.
    async fn delete(&self, handle: &CollectionHandle, ids: &[String]) -> Result<(), IndexError>;

    async fn count(&self, handle: &CollectionHandle) -> Result<usize, IndexError>;

    /// All entry ids, in insertion order.
    async fn ids(&self, handle: &CollectionHandle) -> Result<Vec<String>, IndexError>;
}

/// Build the index backend named by `index.backend`.
pub async fn create_index(config: &Config) -> Result<Arc<dyn VectorIndex>> {
    let embedder = Embedder::from_config(&config.embedding)?;
    tracing::info!(
        provider = %config.embedding.provider,
        model = embedder.model_name(),
        dims = embedder.dims(),
        "embedding provider ready"
    );
    match config.index.backend.as_str() {
        "memory" => Ok(Arc::new(MemoryIndex::new(embedder))),
        "sqlite" => Ok(Arc::new(SqliteIndex::open(&config.index.path, embedder).await?)),
        other => anyhow::bail!("Unknown index backend: {}", other),
    }
}

/// Rank `(item, distance)` pairs by ascending distance and keep the best `k`.
pub(crate) fn top_k<T>(mut scored: Vec<(T, f64)>, k: usize) -> Vec<(T, f64)> {
    scored.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(k);
    scored
}
