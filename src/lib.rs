//! # askdocs
//!
//! A retrieval-augmented question-answering backend.
//!
//! Documents (PDF, Markdown, plain text) are uploaded, normalized to text,
//! split into bounded chunks and stored in a vector index. Questions are
//! answered by retrieving the nearest chunks and asking a language model to
//! answer from that context only, citing the source files.
//!
//! ## Architecture
//!
//! ```text
//! upload ─▶ extract ─▶ chunk ─▶ store ─▶ VectorIndex
//!                                 │        (sqlite / memory)
//!                              registry
//!
//! query ─▶ rag ─▶ store.query ─▶ prompt ─▶ CompletionService
//! ```
//!
//! Both flows are driven by [`service::KnowledgeBase`], which the CLI and
//! the HTTP [`server`] share.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`error`] | Error taxonomy and HTTP mapping |
//! | [`trace`] | Structured per-operation trace events |
//! | [`chunk`] | Sentence- and word-level chunking |
//! | [`extract`] | PDF / Markdown / text normalization |
//! | [`embedding`] | Embedding providers |
//! | [`index`] | Vector index trait and backends |
//! | [`store`] | Knowledge store adapter and collection state |
//! | [`registry`] | Persistent document registry |
//! | [`completion`] | Chat-completion client |
//! | [`rag`] | Retrieval-augmented answering |
//! | [`service`] | Upload / list / delete / reset / query |
//! | [`server`] | HTTP API |
//! | [`db`] | Database connection |
//! | [`migrate`] | Index schema |

pub mod chunk;
pub mod completion;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod index;
pub mod migrate;
pub mod models;
pub mod rag;
pub mod registry;
pub mod server;
pub mod service;
pub mod store;
pub mod trace;
