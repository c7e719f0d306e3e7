//! Document registry: document id → [`Document`], persisted as JSON.
//!
//! The registry is the source of truth for which documents exist and which
//! chunk ids belong to each. It is written after every mutation: the snapshot
//! goes to a sibling temp file first and is then renamed over the registry
//! file, so a crash mid-write never leaves a truncated registry behind.
//!
//! ```json
//! {
//!   "doc_1718000000000": {
//!     "filename": "notes.txt",
//!     "path": "uploads/doc_1718000000000_notes.txt",
//!     "chunk_ids": ["doc_1718000000000_chunk_0"],
//!     "created_at": "2024-06-10T06:13:20+00:00"
//!   }
//! }
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::{RagError, RagResult};
use crate::models::Document;

#[derive(Debug)]
pub struct Registry {
    path: PathBuf,
    documents: BTreeMap<String, Document>,
}

impl Registry {
    /// Load the registry at `path`. A missing file is an empty registry.
    pub fn load(path: &Path) -> RagResult<Self> {
        let documents = match std::fs::read_to_string(path) {
            Ok(content) => {
                let mut documents: BTreeMap<String, Document> = serde_json::from_str(&content)
                    .map_err(|e| {
                        RagError::Registry(format!("failed to parse {}: {}", path.display(), e))
                    })?;
                for (id, doc) in documents.iter_mut() {
                    doc.id = id.clone();
                }
                documents
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            path: path.to_path_buf(),
            documents,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the snapshot atomically (temp file + rename).
    pub fn save(&self) -> RagResult<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&self.documents)
            .map_err(|e| RagError::Registry(e.to_string()))?;

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&Document> {
        self.documents.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.documents.contains_key(id)
    }

    pub fn insert(&mut self, doc: Document) {
        self.documents.insert(doc.id.clone(), doc);
    }

    pub fn remove(&mut self, id: &str) -> Option<Document> {
        self.documents.remove(id)
    }

    /// Remove and return every document.
    pub fn clear(&mut self) -> Vec<Document> {
        std::mem::take(&mut self.documents).into_values().collect()
    }

    /// Documents in id order, which is upload order for time-derived ids.
    pub fn documents(&self) -> impl Iterator<Item = &Document> {
        self.documents.values()
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Time-derived id `doc_{unix_millis}`, bumped past any id already taken.
    pub fn next_document_id(&self, now_millis: i64) -> String {
        let mut millis = now_millis;
        loop {
            let id = format!("doc_{}", millis);
            if !self.contains(&id) {
                return id;
            }
            millis += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn doc(id: &str, filename: &str) -> Document {
        Document {
            id: id.to_string(),
            filename: filename.to_string(),
            path: PathBuf::from(format!("uploads/{}_{}", id, filename)),
            chunk_ids: vec![format!("{}_chunk_0", id), format!("{}_chunk_1", id)],
            created_at: "2024-06-10T06:13:20+00:00".to_string(),
        }
    }

    #[test]
    fn missing_file_is_empty() {
        let tmp = TempDir::new().unwrap();
        let registry = Registry::load(&tmp.path().join("registry.json")).unwrap();
        assert!(registry.is_empty());
    }

    #[test]
    fn roundtrips_through_disk() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nested").join("registry.json");

        let mut registry = Registry::load(&path).unwrap();
        registry.insert(doc("doc_1", "a.txt"));
        registry.insert(doc("doc_2", "b.md"));
        registry.save().unwrap();

        let reloaded = Registry::load(&path).unwrap();
        assert_eq!(reloaded.len(), 2);
        assert_eq!(reloaded.get("doc_2"), Some(&doc("doc_2", "b.md")));
        assert!(!tmp.path().join("nested").join("registry.json.tmp").exists());

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["doc_1"]["filename"], "a.txt");
        assert!(raw["doc_1"].get("id").is_none());
    }

    #[test]
    fn corrupt_file_is_a_registry_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("registry.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(
            Registry::load(&path).unwrap_err(),
            RagError::Registry(_)
        ));
    }

    #[test]
    fn next_id_skips_taken_ids() {
        let tmp = TempDir::new().unwrap();
        let mut registry = Registry::load(&tmp.path().join("r.json")).unwrap();
        assert_eq!(registry.next_document_id(1000), "doc_1000");
        registry.insert(doc("doc_1000", "a.txt"));
        registry.insert(doc("doc_1001", "b.txt"));
        assert_eq!(registry.next_document_id(1000), "doc_1002");
    }

    #[test]
    fn clear_returns_all_documents() {
        let tmp = TempDir::new().unwrap();
        let mut registry = Registry::load(&tmp.path().join("r.json")).unwrap();
        registry.insert(doc("doc_1", "a.txt"));
        registry.insert(doc("doc_2", "b.txt"));
        let removed = registry.clear();
        assert_eq!(removed.len(), 2);
        assert!(registry.is_empty());
    }
}
