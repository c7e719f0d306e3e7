mod common;

use std::sync::Arc;

use askdocs::error::RagError;
use askdocs::index::VectorIndex;
use askdocs::rag::SYSTEM_PROMPT;
use askdocs::registry::Registry;
use askdocs::service::KnowledgeBase;
use common::{
    files_in, harness, harness_with_reply, test_config, uploaded_files, FlakyIndex,
    ScriptedCompletion,
};
use tempfile::TempDir;

const CATS: &str = "Cats eat fish. Cats sleep most of the day. Cats purr when happy.";
const ROCKETS: &str = "Rockets burn liquid fuel. Rockets reach orbit quickly.";

#[tokio::test]
async fn empty_knowledge_base_never_calls_the_model() {
    let h = harness();
    let err = h.kb.query("What do cats eat?", None).await.unwrap_err();
    assert!(matches!(err, RagError::EmptyKnowledgeBase));
    assert!(h.completion.requests().is_empty());
}

#[tokio::test]
async fn empty_question_is_rejected() {
    let h = harness();
    let err = h.kb.query("   ", None).await.unwrap_err();
    assert!(matches!(err, RagError::InvalidRequest(_)));
}

#[tokio::test]
async fn upload_then_query_returns_grounded_answer() {
    let h = harness();
    let receipt = h.kb.upload("cats.txt", CATS.as_bytes()).await.unwrap();
    assert!(receipt.document_id.starts_with("doc_"));
    assert_eq!(receipt.chunk_ids, vec![format!("{}_chunk_0", receipt.document_id)]);
    assert!(receipt
        .trace
        .iter()
        .any(|e| e.operation == "file_detection"));

    let answer = h.kb.query("What do cats eat?", None).await.unwrap();
    assert_eq!(answer.answer, "Cats eat fish. [Source: cats.txt]");
    assert_eq!(answer.sources, vec!["cats.txt"]);

    let requests = h.completion.requests();
    assert_eq!(requests.len(), 1);
    let request = &requests[0];
    assert_eq!(request.model, "test-model");
    assert_eq!(request.temperature, 0.0);
    assert_eq!(request.messages[0].content, SYSTEM_PROMPT);
    assert_eq!(
        request.messages[1].content,
        format!(
            "Context:\n[Source: cats.txt] {}\n\nQuestion: What do cats eat?\n\nPlease provide an answer based on the context above.",
            CATS
        )
    );

    let systems: Vec<_> = answer.trace.iter().map(|e| e.system).collect();
    assert!(systems.contains(&"VectorIndex"));
    assert!(systems.contains(&"Completion"));
    let completion_response = answer
        .trace
        .iter()
        .rev()
        .find(|e| e.system == "Completion")
        .unwrap();
    assert_eq!(completion_response.data["finish_reason"], "stop");
    assert_eq!(completion_response.data["usage"]["total_tokens"], 110);
}

#[tokio::test]
async fn sentence_chunking_follows_chunk_size() {
    let mut h = harness();
    h.config.chunking.chunk_size = 10;
    let kb = KnowledgeBase::new(&h.config, h.index.clone(), h.completion.clone()).unwrap();

    let receipt = kb
        .upload("three.txt", b"Cats purr softly. Dogs bark loudly! Do birds sing?")
        .await
        .unwrap();
    assert_eq!(receipt.chunk_ids.len(), 3);
    assert_eq!(kb.chunk_count().await.unwrap(), 3);
}

#[tokio::test]
async fn two_documents_yield_two_distinct_sources() {
    let h = harness();
    h.kb.upload("a.txt", b"Cats eat fish.").await.unwrap();
    h.kb.upload("b.md", b"# Cats\n\nCats eat mice.").await.unwrap();

    let answer = h.kb.query("What do cats eat?", Some(2)).await.unwrap();
    let mut sources = answer.sources.clone();
    sources.sort();
    assert_eq!(sources, vec!["a.txt", "b.md"]);
}

#[tokio::test]
async fn sources_are_deduplicated() {
    let h = harness();
    let mut config = h.config.clone();
    config.chunking.chunk_size = 20;
    let kb = KnowledgeBase::new(&config, h.index.clone(), h.completion.clone()).unwrap();
    kb.upload("cats.txt", CATS.as_bytes()).await.unwrap();

    let answer = kb.query("cats", Some(3)).await.unwrap();
    assert_eq!(answer.sources, vec!["cats.txt"]);
}

#[tokio::test]
async fn uploads_in_quick_succession_get_distinct_ids() {
    let h = harness();
    let first = h.kb.upload("cats.txt", CATS.as_bytes()).await.unwrap();
    let second = h.kb.upload("cats.txt", CATS.as_bytes()).await.unwrap();
    assert_ne!(first.document_id, second.document_id);
    assert_eq!(h.kb.list_documents().await.len(), 2);
    assert_eq!(uploaded_files(&h).len(), 2);
}

#[tokio::test]
async fn delete_restores_count_and_removes_file() {
    let h = harness();
    h.kb.upload("rockets.txt", ROCKETS.as_bytes()).await.unwrap();
    let before = h.kb.chunk_count().await.unwrap();

    let receipt = h.kb.upload("cats.txt", CATS.as_bytes()).await.unwrap();
    assert!(h.kb.chunk_count().await.unwrap() > before);

    h.kb.delete_document(&receipt.document_id).await.unwrap();
    assert_eq!(h.kb.chunk_count().await.unwrap(), before);
    assert!(h.kb.document(&receipt.document_id).await.is_none());
    assert_eq!(uploaded_files(&h).len(), 1);
}

#[tokio::test]
async fn delete_unknown_id_leaves_registry_unchanged() {
    let h = harness();
    h.kb.upload("cats.txt", CATS.as_bytes()).await.unwrap();
    let before = h.kb.list_documents().await;

    let err = h.kb.delete_document("doc_does_not_exist").await.unwrap_err();
    assert!(matches!(err, RagError::DocumentNotFound(_)));

    let after = h.kb.list_documents().await;
    assert_eq!(before.len(), after.len());
    assert_eq!(before[0].id, after[0].id);
}

#[tokio::test]
async fn reset_then_query_reports_empty_knowledge_base() {
    let h = harness();
    h.kb.upload("cats.txt", CATS.as_bytes()).await.unwrap();
    h.kb.upload("rockets.txt", ROCKETS.as_bytes()).await.unwrap();

    let report = h.kb.reset().await.unwrap();
    assert_eq!(report.documents_removed, 2);
    assert_eq!(report.files_removed, 2);
    assert!(report.errors.is_empty());
    assert!(uploaded_files(&h).is_empty());
    assert!(h.kb.list_documents().await.is_empty());

    let err = h.kb.query("What do cats eat?", None).await.unwrap_err();
    assert!(matches!(err, RagError::EmptyKnowledgeBase));

    let again = h.kb.reset().await.unwrap();
    assert_eq!(again.documents_removed, 0);
}

#[tokio::test]
async fn reset_removes_files_and_registry_when_index_fails() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp);
    let index = Arc::new(FlakyIndex::new());
    let kb = KnowledgeBase::new(
        &config,
        index.clone(),
        Arc::new(ScriptedCompletion::new("ok")),
    )
    .unwrap();
    kb.upload("cats.txt", CATS.as_bytes()).await.unwrap();
    assert_eq!(files_in(&config).len(), 1);

    index.set_failing(true);
    let err = kb.reset().await.unwrap_err();
    assert!(matches!(err, RagError::BackendUnavailable(_)));

    assert!(files_in(&config).is_empty());
    assert!(kb.list_documents().await.is_empty());
    let on_disk = Registry::load(&config.storage.registry_path()).unwrap();
    assert!(on_disk.is_empty());

    // Once the index recovers, a second reset clears the leftover chunks.
    index.set_failing(false);
    let report = kb.reset().await.unwrap();
    assert_eq!(report.documents_removed, 0);
    assert_eq!(kb.chunk_count().await.unwrap(), 0);
}

#[tokio::test]
async fn unsupported_format_is_rejected_before_saving() {
    let h = harness();
    let err = h.kb.upload("report.docx", b"PK\x03\x04").await.unwrap_err();
    assert!(matches!(err, RagError::UnsupportedFormat(_)));
    assert_eq!(err.code(), "unsupported_format");
    assert!(uploaded_files(&h).is_empty());
}

#[tokio::test]
async fn extraction_failure_removes_saved_file() {
    let h = harness();
    let err = h.kb.upload("broken.pdf", b"definitely not a pdf").await.unwrap_err();
    assert!(matches!(err, RagError::Extraction(_)));
    assert!(uploaded_files(&h).is_empty());
    assert!(h.kb.list_documents().await.is_empty());
}

#[tokio::test]
async fn document_without_text_is_rejected() {
    let h = harness();
    let err = h.kb.upload("blank.txt", b"   \n\n  ").await.unwrap_err();
    assert!(matches!(err, RagError::InvalidRequest(_)));
    assert!(uploaded_files(&h).is_empty());
}

#[tokio::test]
async fn filenames_are_sanitized() {
    let h = harness();
    let receipt = h
        .kb
        .upload("../../secret notes.txt", CATS.as_bytes())
        .await
        .unwrap();
    assert_eq!(receipt.filename, "secret_notes.txt");
    let doc = h.kb.document(&receipt.document_id).await.unwrap();
    assert!(doc.path.starts_with(&h.config.storage.upload_dir));
}

#[tokio::test]
async fn replaced_collection_surfaces_reset_then_recovers() {
    let h = harness();
    h.kb.upload("cats.txt", CATS.as_bytes()).await.unwrap();

    // Another process drops the collection.
    h.index.delete_collection("documents").await.unwrap();

    let err = h.kb.query("What do cats eat?", None).await.unwrap_err();
    assert!(matches!(err, RagError::KnowledgeBaseReset));
    assert_eq!(err.code(), "knowledge_base_reset");

    // The collection was recreated, empty.
    assert!(h.index.get_collection("documents").await.unwrap().is_some());
    let err = h.kb.query("What do cats eat?", None).await.unwrap_err();
    assert!(matches!(err, RagError::EmptyKnowledgeBase));
}

#[tokio::test]
async fn empty_model_output_is_backend_unavailable() {
    let h = harness_with_reply("   ");
    h.kb.upload("cats.txt", CATS.as_bytes()).await.unwrap();
    let err = h.kb.query("What do cats eat?", None).await.unwrap_err();
    assert!(matches!(err, RagError::BackendUnavailable(_)));
}

#[tokio::test]
async fn registry_survives_restart() {
    let h = harness();
    let receipt = h.kb.upload("cats.txt", CATS.as_bytes()).await.unwrap();

    let reopened = KnowledgeBase::new(
        &h.config,
        h.index.clone(),
        Arc::new(ScriptedCompletion::new("ok")),
    )
    .unwrap();
    let docs = reopened.list_documents().await;
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0].id, receipt.document_id);
    assert_eq!(docs[0].filename, "cats.txt");
    assert_eq!(docs[0].chunk_count, receipt.chunk_ids.len());
}

#[tokio::test]
async fn query_k_must_be_positive() {
    let h = harness();
    h.kb.upload("cats.txt", CATS.as_bytes()).await.unwrap();
    let err = h.kb.query("cats", Some(0)).await.unwrap_err();
    assert!(matches!(err, RagError::InvalidRequest(_)));
}
