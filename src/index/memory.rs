//! In-memory [`VectorIndex`] for tests and throwaway instances.
//!
//! Uses `HashMap` and `Vec` behind `std::sync::RwLock` for thread safety.
//! Queries are brute-force cosine distance over every stored vector.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;

use crate::embedding::{cosine_distance, Embedder};

use super::{top_k, CollectionHandle, IndexEntry, IndexError, IndexHit, VectorIndex};

struct StoredEntry {
    id: String,
    document: String,
    metadata: serde_json::Value,
    vector: Vec<f32>,
}

struct MemCollection {
    id: String,
    entries: Vec<StoredEntry>,
}

/// In-memory index; contents live as long as the value.
pub struct MemoryIndex {
    embedder: Embedder,
    collections: RwLock<HashMap<String, MemCollection>>,
}

impl MemoryIndex {
    pub fn new(embedder: Embedder) -> Self {
        Self {
            embedder,
            collections: RwLock::new(HashMap::new()),
        }
    }
}

fn poisoned<T>(_: PoisonError<T>) -> IndexError {
    IndexError::Backend("index lock poisoned".to_string())
}

fn resolve<'a>(
    collections: &'a HashMap<String, MemCollection>,
    handle: &CollectionHandle,
) -> Result<&'a MemCollection, IndexError> {
    match collections.get(&handle.name) {
        Some(c) if c.id == handle.id => Ok(c),
        _ => Err(IndexError::StaleCollection(handle.name.clone())),
    }
}

fn resolve_mut<'a>(
    collections: &'a mut HashMap<String, MemCollection>,
    handle: &CollectionHandle,
) -> Result<&'a mut MemCollection, IndexError> {
    match collections.get_mut(&handle.name) {
        Some(c) if c.id == handle.id => Ok(c),
        _ => Err(IndexError::StaleCollection(handle.name.clone())),
    }
}

#[async_trait]
impl VectorIndex for MemoryIndex {
    async fn get_collection(&self, name: &str) -> Result<Option<CollectionHandle>, IndexError> {
        let collections = self.collections.read().map_err(poisoned)?;
        Ok(collections.get(name).map(|c| CollectionHandle {
            name: name.to_string(),
            id: c.id.clone(),
        }))
    }

    async fn create_collection(&self, name: &str) -> Result<CollectionHandle, IndexError> {
        let mut collections = self.collections.write().map_err(poisoned)?;
        if collections.contains_key(name) {
            return Err(IndexError::CollectionExists(name.to_string()));
        }
        let id = uuid::Uuid::new_v4().to_string();
        collections.insert(
            name.to_string(),
            MemCollection {
                id: id.clone(),
                entries: Vec::new(),
            },
        );
        Ok(CollectionHandle {
            name: name.to_string(),
            id,
        })
    }

    async fn delete_collection(&self, name: &str) -> Result<(), IndexError> {
        let mut collections = self.collections.write().map_err(poisoned)?;
        collections
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| IndexError::CollectionMissing(name.to_string()))
    }

    async fn add(
        &self,
        handle: &CollectionHandle,
        entries: &[IndexEntry],
    ) -> Result<(), IndexError> {
        // Fail fast on a stale handle before paying for embeddings.
        {
            let collections = self.collections.read().map_err(poisoned)?;
            resolve(&collections, handle)?;
        }

        let texts: Vec<String> = entries.iter().map(|e| e.document.clone()).collect();
        let vectors = self
            .embedder
            .embed(&texts)
            .await
            .map_err(|e| IndexError::Embedding(e.to_string()))?;

        let mut collections = self.collections.write().map_err(poisoned)?;
        let collection = resolve_mut(&mut collections, handle)?;
        for (entry, vector) in entries.iter().zip(vectors) {
            collection.entries.retain(|e| e.id != entry.id);
            collection.entries.push(StoredEntry {
                id: entry.id.clone(),
                document: entry.document.clone(),
                metadata: entry.metadata.clone(),
                vector,
            });
        }
        Ok(())
    }

    async fn query(
        &self,
        handle: &CollectionHandle,
        text: &str,
        k: usize,
    ) -> Result<Vec<IndexHit>, IndexError> {
        {
            let collections = self.collections.read().map_err(poisoned)?;
            resolve(&collections, handle)?;
        }

        let query_vec = self
            .embedder
            .embed_query(text)
            .await
            .map_err(|e| IndexError::Embedding(e.to_string()))?;

        let collections = self.collections.read().map_err(poisoned)?;
        let collection = resolve(&collections, handle)?;
        let scored = collection
            .entries
            .iter()
            .map(|e| (e, cosine_distance(&query_vec, &e.vector)))
            .collect();

        Ok(top_k(scored, k)
            .into_iter()
            .map(|(e, distance)| IndexHit {
                id: e.id.clone(),
                document: e.document.clone(),
                metadata: e.metadata.clone(),
                distance,
            })
            .collect())
    }

    async fn delete(&self, handle: &CollectionHandle, ids: &[String]) -> Result<(), IndexError> {
        let mut collections = self.collections.write().map_err(poisoned)?;
        let collection = resolve_mut(&mut collections, handle)?;
        collection.entries.retain(|e| !ids.contains(&e.id));
        Ok(())
    }

    async fn count(&self, handle: &CollectionHandle) -> Result<usize, IndexError> {
        let collections = self.collections.read().map_err(poisoned)?;
        Ok(resolve(&collections, handle)?.entries.len())
    }

    async fn ids(&self, handle: &CollectionHandle) -> Result<Vec<String>, IndexError> {
        let collections = self.collections.read().map_err(poisoned)?;
        Ok(resolve(&collections, handle)?
            .entries
            .iter()
            .map(|e| e.id.clone())
            .collect())
    }
}
