//! Storage abstraction for user documents and the shared knowledge base.
//!
//! [`Store`] covers the three per-owner collections (chunks with their
//! embeddings, raw content, and document metadata). [`KnowledgeStore`]
//! covers the shared knowledge-base collection, which has no owner.
//!
//! Both traits expose two read paths: an index-assisted vector search and a
//! raw scan. The search algorithm in [`crate::search`] decides which one to
//! use. Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use async_trait::async_trait;

use crate::models::{Chunk, DocScope, Document, DocumentContent, KnowledgeEntry};

/// Failure talking to a backing store.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    /// The backend could not be reached.
    #[error("store unavailable: {0}")]
    Unavailable(String),
    /// The vector index is missing or cannot answer queries.
    #[error("vector index unavailable: {0}")]
    IndexUnavailable(String),
    /// The call did not finish within the configured limit.
    #[error("store call timed out after {0} ms")]
    Timeout(u64),
    /// Any other backend error.
    #[error("store error: {0}")]
    Backend(String),
}

/// A chunk returned by the index-assisted path with its similarity score.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub score: f32,
}

/// A knowledge-base entry returned by the index-assisted path.
#[derive(Debug, Clone)]
pub struct ScoredEntry {
    pub entry: KnowledgeEntry,
    pub score: f32,
}

/// Number of records an owner has in each of the three document collections.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CollectionCounts {
    pub chunks: u64,
    pub contents: u64,
    pub documents: u64,
}

impl CollectionCounts {
    pub fn is_empty(&self) -> bool {
        self.chunks == 0 && self.contents == 0 && self.documents == 0
    }
}

/// Per-owner document storage.
///
/// | Method | Collection | Purpose |
/// |--------|------------|---------|
/// | [`insert_chunks`](Store::insert_chunks) | chunks | Write all chunks of a document |
/// | [`put_content`](Store::put_content) | content | Write raw document text |
/// | [`put_metadata`](Store::put_metadata) | metadata | Write the document record |
/// | [`vector_search`](Store::vector_search) | chunks | Index-assisted similarity query |
/// | [`scan_chunks`](Store::scan_chunks) | chunks | Raw read for brute-force scoring |
/// | [`list_documents`](Store::list_documents) | metadata | Read document records |
/// | [`delete_chunks`](Store::delete_chunks) | chunks | Delete chunks and their index rows |
/// | [`delete_content`](Store::delete_content) | content | Delete raw text |
/// | [`delete_metadata`](Store::delete_metadata) | metadata | Delete document records |
///
/// Every read and delete is scoped by `owner_id` and a [`DocScope`].
#[async_trait]
pub trait Store: Send + Sync {
    /// Insert chunks. Either all become visible to search or none do.
    async fn insert_chunks(&self, chunks: &[Chunk]) -> Result<(), StoreError>;

    async fn put_content(&self, content: &DocumentContent) -> Result<(), StoreError>;

    async fn put_metadata(&self, doc: &Document) -> Result<(), StoreError>;

    /// Similarity query through the vector index, best first, at most `limit` hits.
    async fn vector_search(
        &self,
        query_vec: &[f32],
        owner_id: &str,
        scope: &DocScope,
        limit: usize,
    ) -> Result<Vec<ScoredChunk>, StoreError>;

    /// All chunks matching the scope, in insertion order.
    async fn scan_chunks(&self, owner_id: &str, scope: &DocScope)
        -> Result<Vec<Chunk>, StoreError>;

    async fn list_documents(
        &self,
        owner_id: &str,
        scope: &DocScope,
    ) -> Result<Vec<Document>, StoreError>;

    /// Returns the number of chunks deleted.
    async fn delete_chunks(&self, owner_id: &str, scope: &DocScope) -> Result<u64, StoreError>;

    /// Returns the number of content records deleted.
    async fn delete_content(&self, owner_id: &str, scope: &DocScope) -> Result<u64, StoreError>;

    /// Returns the number of metadata records deleted.
    async fn delete_metadata(&self, owner_id: &str, scope: &DocScope)
        -> Result<u64, StoreError>;
}

/// Shared knowledge-base storage.
#[async_trait]
pub trait KnowledgeStore: Send + Sync {
    async fn insert_entries(&self, entries: &[KnowledgeEntry]) -> Result<(), StoreError>;

    /// Similarity query through the knowledge-base index.
    async fn search_entries(
        &self,
        query_vec: &[f32],
        limit: usize,
    ) -> Result<Vec<ScoredEntry>, StoreError>;

    /// All entries, in insertion order.
    async fn scan_entries(&self) -> Result<Vec<KnowledgeEntry>, StoreError>;

    /// Delete every entry of one source. Returns the number deleted.
    async fn delete_source(&self, source_id: &str) -> Result<u64, StoreError>;

    /// Swap every entry of `source_id` for `entries` as one unit: on error
    /// the previous entries are still in place. Returns the number removed.
    async fn replace_source(
        &self,
        source_id: &str,
        entries: &[KnowledgeEntry],
    ) -> Result<u64, StoreError>;
}
