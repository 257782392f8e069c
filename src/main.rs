//! # Tutor RAG CLI (`tutor`)
//!
//! The `tutor` binary drives the retrieval engine from the command line:
//! database setup, document and knowledge-base ingestion, search,
//! question answering, removal, index maintenance, and the HTTP server.
//!
//! ## Usage
//!
//! ```bash
//! tutor --config ./config/tutor.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `tutor init` | Create the SQLite database and run schema migrations |
//! | `tutor ingest <file> --owner <id>` | Ingest a document for an owner |
//! | `tutor kb add <file> --source <id>` | Add or replace a knowledge-base source |
//! | `tutor docs --owner <id>` | List an owner's documents |
//! | `tutor search "<query>" --owner <id>` | Search an owner's documents |
//! | `tutor ask "<question>" --owner <id>` | Retrieve context and generate an answer |
//! | `tutor remove --owner <id> [--doc <id>]...` | Remove all or named documents |
//! | `tutor index rebuild` | Recreate the vector index tables |
//! | `tutor serve` | Start the HTTP server |
//!
//! Logging goes to stderr and honours `RUST_LOG`; `--verbose` lowers the
//! default level to `debug`.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use tutor_rag::config::{self, Config};
use tutor_rag::engine::Engine;
use tutor_rag::pipeline::AnswerRequest;
use tutor_rag::{db, migrate, server};
use tutor_rag_core::models::OneOrMany;

/// Tutor RAG: document-grounded question answering for learners.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/tutor.example.toml` for a full example.
#[derive(Parser)]
#[command(name = "tutor", version)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/tutor.toml")]
    config: PathBuf,

    /// Log at debug level unless `RUST_LOG` says otherwise.
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Extract, chunk, embed, and store one file for an owner.
    Ingest {
        file: PathBuf,
        #[arg(long)]
        owner: String,
        /// Display name; defaults to the file name.
        #[arg(long)]
        name: Option<String>,
    },

    /// Shared knowledge-base management.
    Kb {
        #[command(subcommand)]
        action: KbAction,
    },

    /// List an owner's documents.
    Docs {
        #[arg(long)]
        owner: String,
    },

    /// Search an owner's documents.
    Search {
        query: String,
        #[arg(long)]
        owner: String,
        /// Restrict to these document ids (repeatable).
        #[arg(long = "doc")]
        docs: Vec<String>,
        #[arg(long)]
        limit: Option<usize>,
        /// Search the knowledge base instead of the owner's documents.
        #[arg(long)]
        kb: bool,
    },

    /// Answer a question from the owner's documents and the knowledge base.
    Ask {
        question: String,
        #[arg(long)]
        owner: String,
        #[arg(long = "doc")]
        docs: Vec<String>,
        /// Also print the fused context.
        #[arg(long)]
        show_context: bool,
    },

    /// Remove every document of an owner, or only the named ones.
    Remove {
        #[arg(long)]
        owner: String,
        #[arg(long = "doc")]
        docs: Vec<String>,
    },

    /// Vector index maintenance.
    Index {
        #[command(subcommand)]
        action: IndexAction,
    },

    /// Start the HTTP server on `[server].bind`.
    Serve,
}

#[derive(Subcommand)]
enum KbAction {
    /// Add a source, replacing any entries it already has.
    Add {
        file: PathBuf,
        #[arg(long)]
        source: String,
        /// Title shown with retrieved passages; defaults to the file name.
        #[arg(long)]
        title: Option<String>,
    },
}

#[derive(Subcommand)]
enum IndexAction {
    /// Drop and repopulate the vector index tables from stored embeddings.
    Rebuild,
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Repeated `--doc` flags: none means "all documents".
fn doc_filter(docs: Vec<String>) -> Option<OneOrMany<String>> {
    if docs.is_empty() {
        None
    } else {
        Some(OneOrMany::Many(docs))
    }
}

fn file_name(path: &std::path::Path) -> Result<String> {
    Ok(path
        .file_name()
        .context("path has no file name")?
        .to_string_lossy()
        .into_owned())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let pool = db::connect(&cfg).await?;
            migrate::run_migrations(&pool).await?;
            println!("Database initialized at {}", cfg.db.path.display());
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        command => run_engine_command(&cfg, command).await?,
    }
    Ok(())
}

async fn run_engine_command(cfg: &Config, command: Commands) -> Result<()> {
    let engine = Engine::from_config(cfg).await?;

    match command {
        Commands::Ingest { file, owner, name } => {
            let bytes = std::fs::read(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let name = match name {
                Some(n) => n,
                None => file_name(&file)?,
            };
            let doc = engine.ingest(&bytes, &owner, &name).await?;
            println!("{}  {} ({} chunks)", doc.id, doc.display_name, doc.chunk_count);
        }
        Commands::Kb {
            action: KbAction::Add { file, source, title },
        } => {
            let bytes = std::fs::read(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let title = match title {
                Some(t) => t,
                None => file_name(&file)?,
            };
            let report = engine.ingest_knowledge(&bytes, &title, &source).await?;
            println!(
                "{}: {} entries stored, {} replaced",
                report.source_id, report.entries, report.replaced
            );
        }
        Commands::Docs { owner } => {
            let docs = engine.list_documents(&owner).await?;
            if docs.is_empty() {
                println!("No documents for {}.", owner);
            }
            for doc in docs {
                println!(
                    "{}  {}  {}  {} chunks",
                    doc.id, doc.display_name, doc.content_type, doc.chunk_count
                );
            }
        }
        Commands::Search {
            query,
            owner,
            docs,
            limit,
            kb,
        } => {
            let outcome = if kb {
                engine.search_knowledge(&query, limit).await?
            } else {
                engine.search(&query, &owner, doc_filter(docs), limit).await?
            };
            if outcome.is_degraded() {
                println!("(index unavailable; results from full scan)");
            }
            if outcome.results.is_empty() {
                println!("No results.");
            }
            for (i, r) in outcome.results.iter().enumerate() {
                let preview: String = r.text.chars().take(160).collect();
                println!("{}. [{:.3}] {}", i + 1, r.score, preview.replace('\n', " "));
            }
        }
        Commands::Ask {
            question,
            owner,
            docs,
            show_context,
        } => {
            let answer = engine
                .answer(AnswerRequest {
                    question,
                    owner_id: owner,
                    doc_filter: doc_filter(docs),
                    history: Vec::new(),
                })
                .await;
            if show_context {
                println!("{}\n---", answer.context.text);
            }
            println!("{}", answer.reply);
        }
        Commands::Remove { owner, docs } => {
            let deleted = engine.remove(&owner, doc_filter(docs)).await?;
            println!(
                "Removed {} documents, {} contents, {} chunks",
                deleted.documents, deleted.contents, deleted.chunks
            );
            if deleted.is_partial() {
                println!("Failed collections: {}", deleted.failed.join(", "));
            }
        }
        Commands::Index {
            action: IndexAction::Rebuild,
        } => {
            let (chunks, entries) = engine.rebuild_index().await?;
            println!("Index rebuilt: {} chunk vectors, {} knowledge vectors", chunks, entries);
        }
        Commands::Init | Commands::Serve => {}
    }
    Ok(())
}
