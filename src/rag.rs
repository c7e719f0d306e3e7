//! Retrieval-augmented answering.
//!
//! [`RagEngine::get_response`] turns a question into a grounded answer:
//!
//! 1. Reject an empty question; short-circuit on an empty knowledge base
//!    (the language model is never called without context).
//! 2. Retrieve the `k` nearest chunks from the [`KnowledgeStore`].
//! 3. Build the context as `[Source: {filename}] {text}` blocks separated by
//!    blank lines, and wrap it in a fixed system prompt that restricts the
//!    model to that context and asks for `[Source: filename]` citations.
//! 4. Call the [`CompletionService`] at temperature 0.
//! 5. Report the distinct source filenames in retrieval order.
//!
//! Every external call is bracketed by request/response trace events.

use std::sync::Arc;

use serde_json::json;

use crate::completion::{ChatMessage, ChatRequest, CompletionService};
use crate::error::{RagError, RagResult};
use crate::models::{Answer, RetrievalHit};
use crate::store::KnowledgeStore;
use crate::trace::{TraceLog, TraceSink};

pub const SYSTEM_PROMPT: &str = "You are a helpful assistant that answers questions based only on the provided context. \
If the context does not contain enough information to answer the question, say so clearly. \
Cite your sources using the format [Source: filename] after each piece of information you use. \
Keep your answers concise and to the point.";

pub struct RagEngine {
    store: Arc<KnowledgeStore>,
    completion: Arc<dyn CompletionService>,
    model: String,
    default_k: usize,
}

impl RagEngine {
    pub fn new(
        store: Arc<KnowledgeStore>,
        completion: Arc<dyn CompletionService>,
        model: impl Into<String>,
        default_k: usize,
    ) -> Self {
        Self {
            store,
            completion,
            model: model.into(),
            default_k,
        }
    }

    pub async fn get_response(&self, question: &str, k: Option<usize>) -> RagResult<Answer> {
        let question = question.trim();
        if question.is_empty() {
            return Err(RagError::InvalidRequest("question must not be empty".into()));
        }
        let k = k.unwrap_or(self.default_k);
        if k == 0 {
            return Err(RagError::InvalidRequest("k must be >= 1".into()));
        }

        let mut trace = TraceLog::new();

        if self.store.count().await? == 0 {
            return Err(RagError::EmptyKnowledgeBase);
        }

        trace.request(
            "VectorIndex",
            "query",
            json!({
                "collection": self.store.collection_name(),
                "query_text": question,
                "n_results": k,
            }),
        );
        let hits = self.store.query(question, k).await?;
        trace.response(
            "VectorIndex",
            "query",
            json!({
                "documents_found": hits.len(),
                "distances": hits.iter().map(|h| h.distance).collect::<Vec<_>>(),
                "sources": hits.iter().map(|h| h.source.as_str()).collect::<Vec<_>>(),
            }),
        );

        let context = build_context(&hits);
        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage::system(SYSTEM_PROMPT),
                ChatMessage::user(build_user_prompt(&context, question)),
            ],
            temperature: 0.0,
        };

        trace.request(
            "Completion",
            "chat_completion",
            json!({
                "provider": self.completion.name(),
                "model": request.model,
                "temperature": request.temperature,
                "context_length": context.len(),
                "question": question,
            }),
        );
        let response = self.completion.complete(&request).await?;
        trace.response(
            "Completion",
            "chat_completion",
            json!({
                "model": response.model,
                "finish_reason": response.finish_reason,
                "usage": response.usage,
            }),
        );

        let answer = response
            .content
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .ok_or_else(|| {
                RagError::BackendUnavailable("completion service returned no text".into())
            })?;

        Ok(Answer {
            answer,
            sources: distinct_sources(&hits),
            trace: trace.into_events(),
        })
    }
}

pub fn build_context(hits: &[RetrievalHit]) -> String {
    hits.iter()
        .map(|h| format!("[Source: {}] {}", h.source, h.text))
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub fn build_user_prompt(context: &str, question: &str) -> String {
    format!(
        "Context:\n{}\n\nQuestion: {}\n\nPlease provide an answer based on the context above.",
        context, question
    )
}

/// Source filenames without duplicates, in order of first appearance.
pub fn distinct_sources(hits: &[RetrievalHit]) -> Vec<String> {
    let mut sources: Vec<String> = Vec::new();
    for hit in hits {
        if !sources.contains(&hit.source) {
            sources.push(hit.source.clone());
        }
    }
    sources
}
