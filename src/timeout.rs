//! Per-call deadlines for store access.
//!
//! [`TimedStore`] wraps any [`Store`] / [`KnowledgeStore`] and bounds every
//! call with `tokio::time::timeout`. An expired call becomes
//! [`StoreError::Timeout`], which the search path treats like any other
//! primary-tier failure and moves on to the scan tier.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use tutor_rag_core::models::{Chunk, DocScope, Document, DocumentContent, KnowledgeEntry};
use tutor_rag_core::store::{KnowledgeStore, ScoredChunk, ScoredEntry, Store, StoreError};

/// Run `fut`, failing with [`StoreError::Timeout`] if it exceeds `limit`.
pub async fn with_timeout<T, F>(limit: Duration, op: &'static str, fut: F) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => {
            let ms = limit.as_millis() as u64;
            warn!(op, timeout_ms = ms, "store call timed out");
            Err(StoreError::Timeout(ms))
        }
    }
}

/// A store whose every call carries a deadline.
pub struct TimedStore<S> {
    inner: S,
    limit: Duration,
}

impl<S> TimedStore<S> {
    pub fn new(inner: S, limit: Duration) -> Self {
        Self { inner, limit }
    }
}

#[async_trait]
impl<S: Store> Store for TimedStore<S> {
    async fn insert_chunks(&self, chunks: &[Chunk]) -> Result<(), StoreError> {
        with_timeout(self.limit, "insert_chunks", self.inner.insert_chunks(chunks)).await
    }

    async fn put_content(&self, content: &DocumentContent) -> Result<(), StoreError> {
        with_timeout(self.limit, "put_content", self.inner.put_content(content)).await
    }

    async fn put_metadata(&self, doc: &Document) -> Result<(), StoreError> {
        with_timeout(self.limit, "put_metadata", self.inner.put_metadata(doc)).await
    }

    async fn vector_search(
        &self,
        query_vec: &[f32],
        owner_id: &str,
        scope: &DocScope,
        limit: usize,
    ) -> Result<Vec<ScoredChunk>, StoreError> {
        with_timeout(
            self.limit,
            "vector_search",
            self.inner.vector_search(query_vec, owner_id, scope, limit),
        )
        .await
    }

    async fn scan_chunks(
        &self,
        owner_id: &str,
        scope: &DocScope,
    ) -> Result<Vec<Chunk>, StoreError> {
        with_timeout(self.limit, "scan_chunks", self.inner.scan_chunks(owner_id, scope)).await
    }

    async fn list_documents(
        &self,
        owner_id: &str,
        scope: &DocScope,
    ) -> Result<Vec<Document>, StoreError> {
        with_timeout(
            self.limit,
            "list_documents",
            self.inner.list_documents(owner_id, scope),
        )
        .await
    }

    async fn delete_chunks(&self, owner_id: &str, scope: &DocScope) -> Result<u64, StoreError> {
        with_timeout(self.limit, "delete_chunks", self.inner.delete_chunks(owner_id, scope)).await
    }

    async fn delete_content(&self, owner_id: &str, scope: &DocScope) -> Result<u64, StoreError> {
        with_timeout(self.limit, "delete_content", self.inner.delete_content(owner_id, scope))
            .await
    }

    async fn delete_metadata(&self, owner_id: &str, scope: &DocScope) -> Result<u64, StoreError> {
        with_timeout(
            self.limit,
            "delete_metadata",
            self.inner.delete_metadata(owner_id, scope),
        )
        .await
    }
}

#[async_trait]
impl<S: KnowledgeStore> KnowledgeStore for TimedStore<S> {
    async fn insert_entries(&self, entries: &[KnowledgeEntry]) -> Result<(), StoreError> {
        with_timeout(self.limit, "insert_entries", self.inner.insert_entries(entries)).await
    }

    async fn search_entries(
        &self,
        query_vec: &[f32],
        limit: usize,
    ) -> Result<Vec<ScoredEntry>, StoreError> {
        with_timeout(
            self.limit,
            "search_entries",
            self.inner.search_entries(query_vec, limit),
        )
        .await
    }

    async fn scan_entries(&self) -> Result<Vec<KnowledgeEntry>, StoreError> {
        with_timeout(self.limit, "scan_entries", self.inner.scan_entries()).await
    }

    async fn delete_source(&self, source_id: &str) -> Result<u64, StoreError> {
        with_timeout(self.limit, "delete_source", self.inner.delete_source(source_id)).await
    }

    /// A replacement cut off by the deadline is dropped mid-transaction and
    /// rolls back, leaving the previous entries.
    async fn replace_source(
        &self,
        source_id: &str,
        entries: &[KnowledgeEntry],
    ) -> Result<u64, StoreError> {
        with_timeout(
            self.limit,
            "replace_source",
            self.inner.replace_source(source_id, entries),
        )
        .await
    }
}
