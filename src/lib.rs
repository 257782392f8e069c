//! # Tutor RAG
//!
//! A retrieval-augmented question-answering engine for learners. Users
//! upload their own documents; questions are answered from those documents
//! first and from a shared knowledge base second, by a generator instructed
//! to teach.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌───────────────┐   ┌────────────────────┐
//! │  Upload  │──▶│ Extract+Chunk │──▶│ SQLite             │
//! │ PDF/DOCX │   │   +Embed      │   │ docs/chunks/vectors│
//! └──────────┘   └───────────────┘   └─────────┬──────────┘
//!                                              │ dual-path search
//!                     ┌────────────────────────┤
//!                     ▼                        ▼
//!               ┌──────────┐  fuse   ┌──────────────────┐
//!               │ KB search│────────▶│ retrieve→generate│
//!               └──────────┘         └──────────────────┘
//! ```
//!
//! Search, chunking, models, and the store traits live in
//! [`tutor_rag_core`]; this crate adds storage, providers, the pipeline,
//! and the CLI and HTTP surfaces.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_store`] | SQLite `Store` and `KnowledgeStore` |
//! | [`timeout`] | Per-call store timeouts |
//! | [`extract`] | Text extraction from uploads |
//! | [`embedding`] | Embedding providers |
//! | [`generation`] | Text-generation providers |
//! | [`ingest`] | Document and knowledge-base ingestion |
//! | [`fusion`] | Context fusion |
//! | [`prompt`] | Prompt assembly |
//! | [`pipeline`] | Retrieve → generate state machine |
//! | [`lifecycle`] | Document removal |
//! | [`engine`] | Facade wiring everything together |
//! | [`server`] | HTTP server |

pub mod config;
pub mod db;
pub mod embedding;
pub mod engine;
pub mod extract;
pub mod fusion;
pub mod generation;
pub mod ingest;
pub mod lifecycle;
pub mod migrate;
pub mod pipeline;
pub mod prompt;
pub mod server;
pub mod sqlite_store;
pub mod timeout;
