//! # askdocs CLI
//!
//! The `askdocs` binary manages a document knowledge base and answers
//! questions about it, either directly from the command line or through the
//! HTTP server.
//!
//! ## Usage
//!
//! ```bash
//! askdocs --config ./config/askdocs.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `askdocs serve` | Start the HTTP server |
//! | `askdocs upload <file>` | Extract, chunk and index a PDF, Markdown or text file |
//! | `askdocs list` | List registered documents |
//! | `askdocs delete <id>` | Delete a document and its chunks |
//! | `askdocs query "<question>"` | Ask a question against the indexed documents |
//! | `askdocs reset` | Delete every document, file and chunk |
//!
//! ## Examples
//!
//! ```bash
//! askdocs upload ./handbook.pdf
//! askdocs query "How many vacation days do new hires get?" --k 5
//! askdocs serve --config ./config/askdocs.toml
//! ```

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use askdocs::config::{self, Config, LoggingConfig};
use askdocs::server;
use askdocs::service::KnowledgeBase;

const DEFAULT_CONFIG_PATH: &str = "./config/askdocs.toml";

/// askdocs: ask questions about your documents.
#[derive(Parser)]
#[command(
    name = "askdocs",
    about = "askdocs: retrieval-augmented question answering over your documents",
    version,
    long_about = "askdocs chunks and indexes PDF, Markdown and plain-text documents, then answers \
    questions with a language model grounded in the most relevant chunks, citing its sources."
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/askdocs.toml`; if that file does not exist,
    /// built-in defaults are used.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server on `server.bind`.
    Serve,

    /// Upload and index a document (.pdf, .md or .txt).
    Upload {
        /// Path to the file.
        file: PathBuf,
    },

    /// List registered documents.
    List,

    /// Delete a document by ID.
    Delete {
        /// Document ID (e.g. `doc_1718000000000`).
        id: String,
    },

    /// Ask a question.
    Query {
        question: String,

        /// Number of chunks to retrieve (defaults to `retrieval.top_k`).
        #[arg(long)]
        k: Option<usize>,

        /// Print the operation trace as JSON after the answer.
        #[arg(long)]
        trace: bool,
    },

    /// Delete every document, uploaded file and indexed chunk.
    Reset,
}

fn resolve_config(path: Option<&Path>) -> anyhow::Result<Config> {
    match path {
        Some(path) => config::load_config(path),
        None => {
            let default = Path::new(DEFAULT_CONFIG_PATH);
            if default.exists() {
                config::load_config(default)
            } else {
                Ok(Config::minimal())
            }
        }
    }
}

fn init_logging(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = resolve_config(cli.config.as_deref())?;
    init_logging(&cfg.logging);

    let kb = Arc::new(
        KnowledgeBase::open(&cfg)
            .await
            .context("Failed to initialize knowledge base")?,
    );

    match cli.command {
        Commands::Serve => {
            server::run_server(&cfg, kb).await?;
        }
        Commands::Upload { file } => {
            let filename = file
                .file_name()
                .and_then(|n| n.to_str())
                .ok_or_else(|| anyhow::anyhow!("Invalid file path: {}", file.display()))?
                .to_string();
            let bytes = tokio::fs::read(&file)
                .await
                .with_context(|| format!("Failed to read {}", file.display()))?;

            let receipt = kb.upload(&filename, &bytes).await?;
            println!(
                "Uploaded {} as {} ({} chunks)",
                receipt.filename,
                receipt.document_id,
                receipt.chunk_ids.len()
            );
        }
        Commands::List => {
            let docs = kb.list_documents().await;
            if docs.is_empty() {
                println!("No documents.");
            }
            for doc in docs {
                println!(
                    "{}  {}  {} chunks  {}",
                    doc.id, doc.filename, doc.chunk_count, doc.created_at
                );
            }
        }
        Commands::Delete { id } => {
            kb.delete_document(&id).await?;
            println!("Deleted {}", id);
        }
        Commands::Query { question, k, trace } => {
            let answer = kb.query(&question, k).await?;
            println!("{}", answer.answer);
            if !answer.sources.is_empty() {
                println!();
                println!("Sources: {}", answer.sources.join(", "));
            }
            if trace {
                println!();
                println!("{}", serde_json::to_string_pretty(&answer.trace)?);
            }
        }
        Commands::Reset => {
            let report = kb.reset().await?;
            println!(
                "Reset complete: {} documents, {} files removed",
                report.documents_removed, report.files_removed
            );
            for err in &report.errors {
                println!("  warning: {}", err);
            }
        }
    }

    Ok(())
}
