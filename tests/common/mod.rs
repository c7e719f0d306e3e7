#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tempfile::TempDir;

use askdocs::completion::{ChatRequest, ChatResponse, CompletionError, CompletionService, Usage};
use askdocs::config::Config;
use askdocs::embedding::Embedder;
use askdocs::index::{
    CollectionHandle, IndexEntry, IndexError, IndexHit, MemoryIndex, VectorIndex,
};
use askdocs::service::KnowledgeBase;

/// Completion fake that records every request and replies with fixed text.
pub struct ScriptedCompletion {
    reply: String,
    requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedCompletion {
    pub fn new(reply: &str) -> Self {
        Self {
            reply: reply.to_string(),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl CompletionService for ScriptedCompletion {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse, CompletionError> {
        self.requests.lock().unwrap().push(request.clone());
        Ok(ChatResponse {
            content: Some(self.reply.clone()),
            model: request.model.clone(),
            finish_reason: Some("stop".to_string()),
            usage: Some(Usage {
                prompt_tokens: 100,
                completion_tokens: 10,
                total_tokens: 110,
            }),
        })
    }
}

pub struct Harness {
    pub tmp: TempDir,
    pub config: Config,
    pub index: Arc<MemoryIndex>,
    pub completion: Arc<ScriptedCompletion>,
    pub kb: Arc<KnowledgeBase>,
}

pub fn test_config(tmp: &TempDir) -> Config {
    let mut config = Config::rooted_at(tmp.path());
    config.index.backend = "memory".to_string();
    config.completion.model = "test-model".to_string();
    config
}

pub fn harness_with_reply(reply: &str) -> Harness {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp);
    let index = Arc::new(MemoryIndex::new(Embedder::hashing(256)));
    let completion = Arc::new(ScriptedCompletion::new(reply));
    let kb = KnowledgeBase::new(
        &config,
        index.clone() as Arc<dyn VectorIndex>,
        completion.clone() as Arc<dyn CompletionService>,
    )
    .unwrap();
    Harness {
        tmp,
        config,
        index,
        completion,
        kb: Arc::new(kb),
    }
}

pub fn harness() -> Harness {
    harness_with_reply("Cats eat fish. [Source: cats.txt]")
}

pub fn uploaded_files(h: &Harness) -> Vec<String> {
    files_in(&h.config)
}

/// Uploaded files on disk, excluding the registry snapshot.
pub fn files_in(config: &Config) -> Vec<String> {
    match std::fs::read_dir(&config.storage.upload_dir) {
        Ok(entries) => entries
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().to_string())
            .filter(|name| name != "registry.json")
            .collect(),
        Err(_) => Vec::new(),
    }
}

/// Memory index whose destructive operations start failing on demand.
///
/// While failing, `ids`, `delete`, `create_collection` and `delete_collection`
/// return a backend error; reads and inserts keep working.
pub struct FlakyIndex {
    inner: MemoryIndex,
    failing: AtomicBool,
}

impl FlakyIndex {
    pub fn new() -> Self {
        Self {
            inner: MemoryIndex::new(Embedder::hashing(256)),
            failing: AtomicBool::new(false),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), IndexError> {
        if self.failing.load(Ordering::SeqCst) {
            Err(IndexError::Backend("disk I/O error".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl VectorIndex for FlakyIndex {
    async fn get_collection(&self, name: &str) -> Result<Option<CollectionHandle>, IndexError> {
        self.inner.get_collection(name).await
    }

    async fn create_collection(&self, name: &str) -> Result<CollectionHandle, IndexError> {
        self.check()?;
        self.inner.create_collection(name).await
    }

    async fn delete_collection(&self, name: &str) -> Result<(), IndexError> {
        self.check()?;
        self.inner.delete_collection(name).await
    }

    async fn add(
        &self,
        handle: &CollectionHandle,
        entries: &[IndexEntry],
    ) -> Result<(), IndexError> {
        self.inner.add(handle, entries).await
    }

    async fn query(
        &self,
        handle: &CollectionHandle,
        text: &str,
        k: usize,
    ) -> Result<Vec<IndexHit>, IndexError> {
        self.inner.query(handle, text, k).await
    }

    async fn delete(&self, handle: &CollectionHandle, ids: &[String]) -> Result<(), IndexError> {
        self.check()?;
        self.inner.delete(handle, ids).await
    }

    async fn count(&self, handle: &CollectionHandle) -> Result<usize, IndexError> {
        self.inner.count(handle).await
    }

    async fn ids(&self, handle: &CollectionHandle) -> Result<Vec<String>, IndexError> {
        self.check()?;
        self.inner.ids(handle).await
    }
}
