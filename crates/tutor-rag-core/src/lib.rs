//! # Tutor RAG Core
//!
//! Runtime-agnostic retrieval logic for Tutor RAG: data models, the
//! overlapping chunker, store traits, the dual-path search algorithm, and
//! the embedding trait.
//!
//! This crate contains no tokio, sqlx, filesystem I/O, or other
//! native-only dependencies. Timeouts, persistence, and provider I/O are
//! layered on by the `tutor-rag` app crate.

pub mod chunk;
pub mod embedding;
pub mod models;
pub mod search;
pub mod store;
