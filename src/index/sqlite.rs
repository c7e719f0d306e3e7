//! SQLite-backed [`VectorIndex`].
//!
//! Entries and their embeddings are stored as rows (`embedding` is a
//! little-endian `f32` BLOB); queries load the collection's vectors and rank
//! them by cosine distance in Rust. Each collection row carries a fresh UUID
//! per creation, which is what makes stale handles detectable across
//! processes sharing the same database file.

use std::path::Path;

use anyhow::Result;
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use sqlx::{Row, SqlitePool};

use crate::db;
use crate::embedding::{blob_to_vec, cosine_distance, vec_to_blob, Embedder};
use crate::migrate;

use super::{top_k, CollectionHandle, IndexEntry, IndexError, IndexHit, VectorIndex};

pub struct SqliteIndex {
    pool: SqlitePool,
    embedder: Embedder,
}

impl SqliteIndex {
    /// Connect to the database at `path` and make sure the schema exists.
    pub async fn open(path: &Path, embedder: Embedder) -> Result<Self> {
        let pool = db::connect(path).await?;
        migrate::run_migrations(&pool).await?;
        Ok(Self { pool, embedder })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn check(&self, handle: &CollectionHandle) -> Result<(), IndexError> {
        let current: Option<String> =
            sqlx::query_scalar("SELECT id FROM collections WHERE name = ?")
                .bind(&handle.name)
                .fetch_optional(&self.pool)
                .await?;
        match current {
            Some(id) if id == handle.id => Ok(()),
            _ => Err(IndexError::StaleCollection(handle.name.clone())),
        }
    }
}

fn hash_text(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[async_trait]
impl VectorIndex for SqliteIndex {
    async fn get_collection(&self, name: &str) -> Result<Option<CollectionHandle>, IndexError> {
        let id: Option<String> = sqlx::query_scalar("SELECT id FROM collections WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(id.map(|id| CollectionHandle {
            name: name.to_string(),
            id,
        }))
    }

    async fn create_collection(&self, name: &str) -> Result<CollectionHandle, IndexError> {
        let id = uuid::Uuid::new_v4().to_string();
        let result = sqlx::query(
            "INSERT INTO collections (name, id, created_at) VALUES (?, ?, ?) ON CONFLICT(name) DO NOTHING",
        )
        .bind(name)
        .bind(&id)
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(IndexError::CollectionExists(name.to_string()));
        }
        Ok(CollectionHandle {
            name: name.to_string(),
            id,
        })
    }

    async fn delete_collection(&self, name: &str) -> Result<(), IndexError> {
        let mut tx = self.pool.begin().await?;
        let id: Option<String> = sqlx::query_scalar("SELECT id FROM collections WHERE name = ?")
            .bind(name)
            .fetch_optional(&mut *tx)
            .await?;
        let id = id.ok_or_else(|| IndexError::CollectionMissing(name.to_string()))?;

        sqlx::query("DELETE FROM entries WHERE collection_id = ?")
            .bind(&id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM collections WHERE name = ?")
            .bind(name)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn add(
        &self,
        handle: &CollectionHandle,
        entries: &[IndexEntry],
    ) -> Result<(), IndexError> {
        self.check(handle).await?;

        let texts: Vec<String> = entries.iter().map(|e| e.document.clone()).collect();
        let vectors = self
            .embedder
            .embed(&texts)
            .await
            .map_err(|e| IndexError::Embedding(e.to_string()))?;

        let mut tx = self.pool.begin().await?;
        let mut seq: i64 =
            sqlx::query_scalar("SELECT COALESCE(MAX(seq), -1) FROM entries WHERE collection_id = ?")
                .bind(&handle.id)
                .fetch_one(&mut *tx)
                .await?;

        for (entry, vector) in entries.iter().zip(vectors.iter()) {
            seq += 1;
            sqlx::query(
                r#"
                INSERT INTO entries (collection_id, id, document, metadata_json, embedding, hash, seq)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(collection_id, id) DO UPDATE SET
                    document = excluded.document,
                    metadata_json = excluded.metadata_json,
                    embedding = excluded.embedding,
                    hash = excluded.hash
                "#,
            )
            .bind(&handle.id)
            .bind(&entry.id)
            .bind(&entry.document)
            .bind(entry.metadata.to_string())
            .bind(vec_to_blob(vector))
            .bind(hash_text(&entry.document))
            .bind(seq)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn query(
        &self,
        handle: &CollectionHandle,
        text: &str,
        k: usize,
    ) -> Result<Vec<IndexHit>, IndexError> {
        self.check(handle).await?;

        let query_vec = self
            .embedder
            .embed_query(text)
            .await
            .map_err(|e| IndexError::Embedding(e.to_string()))?;

        let rows = sqlx::query(
            "SELECT id, document, metadata_json, embedding FROM entries WHERE collection_id = ?",
        )
        .bind(&handle.id)
        .fetch_all(&self.pool)
        .await?;

        let scored = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                let distance = cosine_distance(&query_vec, &blob_to_vec(&blob));
                (row, distance)
            })
            .collect();

        top_k(scored, k)
            .into_iter()
            .map(|(row, distance)| -> Result<IndexHit, IndexError> {
                let metadata_json: String = row.get("metadata_json");
                let metadata = serde_json::from_str(&metadata_json)
                    .map_err(|e| IndexError::Backend(format!("corrupt metadata: {}", e)))?;
                Ok(IndexHit {
                    id: row.get("id"),
                    document: row.get("document"),
                    metadata,
                    distance,
                })
            })
            .collect()
    }

    async fn delete(&self, handle: &CollectionHandle, ids: &[String]) -> Result<(), IndexError> {
        self.check(handle).await?;

        let mut tx = self.pool.begin().await?;
        for id in ids {
            sqlx::query("DELETE FROM entries WHERE collection_id = ? AND id = ?")
                .bind(&handle.id)
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn count(&self, handle: &CollectionHandle) -> Result<usize, IndexError> {
        self.check(handle).await?;
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM entries WHERE collection_id = ?")
            .bind(&handle.id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count as usize)
    }

    async fn ids(&self, handle: &CollectionHandle) -> Result<Vec<String>, IndexError> {
        self.check(handle).await?;
        let ids: Vec<String> =
            sqlx::query_scalar("SELECT id FROM entries WHERE collection_id = ? ORDER BY seq")
                .bind(&handle.id)
                .fetch_all(&self.pool)
                .await?;
        Ok(ids)
    }
}
