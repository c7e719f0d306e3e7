//! Multi-format document normalization (PDF, Markdown, plain text).
//!
//! Every format is first normalized to plain text and then handed to the
//! [`chunk`](crate::chunk) module. PDF keeps its page structure and is chunked
//! word by word; Markdown and plain text are chunked sentence by sentence.
//! Supporting a new format means adding a normalizer here; the chunking stays
//! shared.
//!
//! Markdown is rendered to HTML and all tags are stripped with a simple
//! `<[^<]+?>` pattern. This is lossy for nested or malformed markup (and
//! leaves HTML entities in place); the result is best-effort plain text.

use regex::Regex;
use serde_json::json;
use std::path::Path;
use std::sync::OnceLock;
use thiserror::Error;

use crate::chunk::{average_len, split_text, WordChunker};
use crate::trace::TraceSink;

const SYSTEM: &str = "DocumentProcessor";

/// Extraction error. Extraction never panics; callers abort the upload.
#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("unsupported file type: {0}")]
    UnsupportedFormat(String),

    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("PDF extraction failed: {0}")]
    Pdf(String),

    #[error("{0} is not valid UTF-8 text")]
    Encoding(String),
}

/// Document formats accepted for upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Pdf,
    Markdown,
    PlainText,
}

impl DocumentFormat {
    /// Detects the format from a filename extension (case-insensitive).
    pub fn from_filename(name: &str) -> Result<Self, ExtractError> {
        let extension = match name.rsplit_once('.') {
            Some((_, ext)) => ext.to_lowercase(),
            None => return Err(ExtractError::UnsupportedFormat(name.to_string())),
        };
        match extension.as_str() {
            "pdf" => Ok(DocumentFormat::Pdf),
            "md" => Ok(DocumentFormat::Markdown),
            "txt" => Ok(DocumentFormat::PlainText),
            _ => Err(ExtractError::UnsupportedFormat(extension)),
        }
    }

    pub fn from_path(path: &Path) -> Result<Self, ExtractError> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default();
        Self::from_filename(name)
    }

    pub fn extension(&self) -> &'static str {
        match self {
            DocumentFormat::Pdf => "pdf",
            DocumentFormat::Markdown => "md",
            DocumentFormat::PlainText => "txt",
        }
    }
}

/// Normalize a document on disk and split it into chunk texts.
pub fn process_document(
    path: &Path,
    chunk_size: usize,
    trace: &mut dyn TraceSink,
) -> Result<Vec<String>, ExtractError> {
    let format = DocumentFormat::from_path(path)?;
    trace.info(
        SYSTEM,
        "file_detection",
        json!({
            "file": path.display().to_string(),
            "detected_type": format.extension(),
        }),
    );

    match format {
        DocumentFormat::Pdf => process_pdf(path, chunk_size, trace),
        DocumentFormat::Markdown => process_markdown(path, chunk_size, trace),
        DocumentFormat::PlainText => process_text(path, chunk_size, trace),
    }
}

fn process_pdf(
    path: &Path,
    chunk_size: usize,
    trace: &mut dyn TraceSink,
) -> Result<Vec<String>, ExtractError> {
    let bytes = read_bytes(path)?;
    let pages = extract_pdf_pages(&bytes)?;
    trace.info(
        SYSTEM,
        "pdf_processing",
        json!({ "total_pages": pages.len(), "chunk_size": chunk_size }),
    );

    let mut chunker = WordChunker::new(chunk_size);
    let mut total_words = 0usize;
    for (page_number, page) in pages.iter().enumerate() {
        let mut words_on_page = 0usize;
        for word in page.split_whitespace() {
            chunker.push(word);
            words_on_page += 1;
        }
        total_words += words_on_page;
        trace.info(
            SYSTEM,
            "page_processed",
            json!({ "page_number": page_number + 1, "words_on_page": words_on_page }),
        );
    }

    let chunks = chunker.finish();
    trace.info(
        SYSTEM,
        "pdf_complete",
        json!({
            "total_words": total_words,
            "chunks_created": chunks.len(),
            "average_chunk_size": average_len(&chunks),
        }),
    );
    Ok(chunks)
}

/// Extract text from PDF bytes, one string per page in page order.
pub fn extract_pdf_pages(bytes: &[u8]) -> Result<Vec<String>, ExtractError> {
    pdf_extract::extract_text_from_mem_by_pages(bytes).map_err(|e| ExtractError::Pdf(e.to_string()))
}

fn process_markdown(
    path: &Path,
    chunk_size: usize,
    trace: &mut dyn TraceSink,
) -> Result<Vec<String>, ExtractError> {
    let markdown = read_utf8(path)?;
    trace.info(
        SYSTEM,
        "markdown_processing",
        json!({ "content_length": markdown.len(), "chunk_size": chunk_size }),
    );

    let text = markdown_to_text(&markdown);
    let chunks = split_with_trace(&text, chunk_size, trace);

    trace.info(
        SYSTEM,
        "markdown_complete",
        json!({
            "original_length": markdown.len(),
            "processed_length": text.len(),
            "chunks_created": chunks.len(),
        }),
    );
    Ok(chunks)
}

fn html_tag() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<[^<]+?>").expect("html tag regex is valid"))
}

/// Render Markdown to HTML and strip every tag.
pub fn markdown_to_text(markdown: &str) -> String {
    let parser = pulldown_cmark::Parser::new(markdown);
    let mut html = String::with_capacity(markdown.len() * 3 / 2);
    pulldown_cmark::html::push_html(&mut html, parser);
    html_tag().replace_all(&html, "").into_owned()
}

fn process_text(
    path: &Path,
    chunk_size: usize,
    trace: &mut dyn TraceSink,
) -> Result<Vec<String>, ExtractError> {
    let content = read_utf8(path)?;
    trace.info(
        SYSTEM,
        "text_processing",
        json!({ "content_length": content.len(), "chunk_size": chunk_size }),
    );
    Ok(split_with_trace(&content, chunk_size, trace))
}

fn split_with_trace(text: &str, chunk_size: usize, trace: &mut dyn TraceSink) -> Vec<String> {
    trace.info(
        SYSTEM,
        "text_splitting",
        json!({
            "total_length": text.len(),
            "sentence_count": crate::chunk::split_sentences(text).len(),
            "target_chunk_size": chunk_size,
        }),
    );
    let chunks = split_text(text, chunk_size);
    trace.info(
        SYSTEM,
        "splitting_complete",
        json!({
            "chunks_created": chunks.len(),
            "average_chunk_size": average_len(&chunks),
        }),
    );
    chunks
}

fn read_bytes(path: &Path) -> Result<Vec<u8>, ExtractError> {
    std::fs::read(path).map_err(|source| ExtractError::Read {
        path: path.display().to_string(),
        source,
    })
}

fn read_utf8(path: &Path) -> Result<String, ExtractError> {
    let bytes = read_bytes(path)?;
    String::from_utf8(bytes).map_err(|_| ExtractError::Encoding(path.display().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::TraceLog;
    use tempfile::TempDir;

    #[test]
    fn detects_formats_case_insensitively() {
        assert_eq!(DocumentFormat::from_filename("a.PDF").unwrap(), DocumentFormat::Pdf);
        assert_eq!(DocumentFormat::from_filename("notes.md").unwrap(), DocumentFormat::Markdown);
        assert_eq!(DocumentFormat::from_filename("x.y.txt").unwrap(), DocumentFormat::PlainText);
    }

    #[test]
    fn unsupported_format_returns_error() {
        let err = DocumentFormat::from_filename("report.docx").unwrap_err();
        assert!(matches!(err, ExtractError::UnsupportedFormat(ref e) if e == "docx"));
        assert!(DocumentFormat::from_filename("README").is_err());
    }

    #[test]
    fn invalid_pdf_returns_error() {
        let err = extract_pdf_pages(b"not a pdf").unwrap_err();
        assert!(matches!(err, ExtractError::Pdf(_)));
    }

    #[test]
    fn markdown_tags_are_stripped() {
        let text = markdown_to_text("# Title\n\nSome *emphasis* and `code`.\n\n- item one\n");
        assert!(!text.contains('<'));
        assert!(text.contains("Title"));
        assert!(text.contains("Some emphasis and code."));
        assert!(text.contains("item one"));
    }

    #[test]
    fn plain_text_file_is_chunked_by_sentence() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("notes.txt");
        std::fs::write(&path, "First sentence. Second sentence! Third one?").unwrap();

        let mut trace = TraceLog::new();
        let chunks = process_document(&path, 1000, &mut trace).unwrap();
        assert_eq!(chunks, vec!["First sentence. Second sentence! Third one?"]);

        let mut trace = TraceLog::new();
        let chunks = process_document(&path, 10, &mut trace).unwrap();
        assert_eq!(
            chunks,
            vec!["First sentence.", "Second sentence!", "Third one?"]
        );
        let ops: Vec<_> = trace.events().iter().map(|e| e.operation).collect();
        assert_eq!(
            ops,
            vec![
                "file_detection",
                "text_processing",
                "text_splitting",
                "splitting_complete"
            ]
        );
    }

    #[test]
    fn markdown_file_is_chunked_without_markup() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("guide.md");
        std::fs::write(&path, "# Guide\n\nUse **cargo** to build. Then run it.\n").unwrap();

        let mut trace = TraceLog::new();
        let chunks = process_document(&path, 1000, &mut trace).unwrap();
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].contains("Use cargo to build."));
        assert!(!chunks[0].contains("**"));
        assert!(!chunks[0].contains("<p>"));
        assert_eq!(trace.events().last().unwrap().operation, "markdown_complete");
    }

    #[test]
    fn non_utf8_text_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("bad.txt");
        std::fs::write(&path, [0xff, 0xfe, 0x00, 0x41]).unwrap();
        let err = process_document(&path, 1000, &mut TraceLog::new()).unwrap_err();
        assert!(matches!(err, ExtractError::Encoding(_)));
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let tmp = TempDir::new().unwrap();
        let err =
            process_document(&tmp.path().join("gone.txt"), 1000, &mut TraceLog::new()).unwrap_err();
        assert!(matches!(err, ExtractError::Read { .. }));
    }
}
