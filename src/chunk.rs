//! Length-bounded text chunker.
//!
//! Splits extracted document text into chunks of at most `chunk_size` bytes.
//! Two granularities exist and must not be mixed, since chunk boundaries of
//! already-indexed content depend on them:
//!
//! - [`split_text`] accumulates *sentences* (text and Markdown documents).
//! - [`split_words`] accumulates *words* (PDF documents, across pages).
//!
//! Both are greedy: a unit is appended to the running buffer unless doing so
//! would exceed the limit, in which case the buffer is closed first. A single
//! unit longer than `chunk_size` is never split; it becomes its own chunk.
//!
//! Each chunk's ID is derived from its document ID and index
//! (`{document_id}_chunk_{index}`), so IDs are deterministic.

use regex::Regex;
use std::sync::OnceLock;

use crate::models::Chunk;

/// Default maximum chunk length in bytes.
pub const DEFAULT_CHUNK_SIZE: usize = 1000;

fn sentence_boundary() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[.!?]\s+").expect("sentence boundary regex is valid"))
}

/// Split text into sentence-like units.
///
/// A boundary is `.`, `!` or `?` followed by whitespace. The punctuation
/// stays with its sentence; the whitespace is dropped.
pub fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    for m in sentence_boundary().find_iter(text) {
        // The punctuation mark is a single ASCII byte.
        sentences.push(&text[start..m.start() + 1]);
        start = m.end();
    }
    sentences.push(&text[start..]);
    sentences
}

/// Split text into sentence-aligned chunks of at most `chunk_size` bytes.
/// Returns an empty vector for empty or whitespace-only input.
pub fn split_text(text: &str, chunk_size: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();

    for sentence in split_sentences(text) {
        if sentence.is_empty() {
            continue;
        }
        if current.len() + sentence.len() > chunk_size {
            flush(&mut chunks, &mut current);
        }
        current.push_str(sentence);
        current.push(' ');
    }
    flush(&mut chunks, &mut current);

    chunks
}

/// Accumulate a word stream into chunks of at most `chunk_size` bytes.
///
/// Used for PDF text, where words from every page feed the same running
/// buffer so chunks may span page boundaries.
pub fn split_words<'a, I>(words: I, chunk_size: usize) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut chunker = WordChunker::new(chunk_size);
    for word in words {
        chunker.push(word);
    }
    chunker.finish()
}

/// Incremental form of [`split_words`], for callers that feed words page by page.
#[derive(Debug)]
pub struct WordChunker {
    chunk_size: usize,
    current: String,
    chunks: Vec<String>,
}

impl WordChunker {
    pub fn new(chunk_size: usize) -> Self {
        Self {
            chunk_size,
            current: String::new(),
            chunks: Vec::new(),
        }
    }

    pub fn push(&mut self, word: &str) {
        if word.is_empty() {
            return;
        }
        if self.current.len() + word.len() + 1 > self.chunk_size {
            flush(&mut self.chunks, &mut self.current);
        }
        self.current.push_str(word);
        self.current.push(' ');
    }

    pub fn finish(mut self) -> Vec<String> {
        flush(&mut self.chunks, &mut self.current);
        self.chunks
    }
}

fn flush(chunks: &mut Vec<String>, current: &mut String) {
    let trimmed = current.trim();
    if !trimmed.is_empty() {
        chunks.push(trimmed.to_string());
    }
    current.clear();
}

/// Deterministic chunk identifier.
pub fn chunk_id(document_id: &str, index: usize) -> String {
    format!("{}_chunk_{}", document_id, index)
}

/// Attach identifiers and sequence indices to chunk texts.
pub fn build_chunks(document_id: &str, texts: &[String]) -> Vec<Chunk> {
    texts
        .iter()
        .enumerate()
        .map(|(index, text)| Chunk {
            id: chunk_id(document_id, index),
            document_id: document_id.to_string(),
            chunk_index: index,
            text: text.clone(),
        })
        .collect()
}

/// Mean chunk length, reported in trace events.
pub fn average_len(chunks: &[String]) -> f64 {
    if chunks.is_empty() {
        return 0.0;
    }
    chunks.iter().map(|c| c.len()).sum::<usize>() as f64 / chunks.len() as f64
}
