//! Ingestion pipeline.
//!
//! Turns an upload into searchable chunks:
//!
//! ```text
//! bytes ─▶ extract ─▶ normalize ─▶ chunk ─▶ embed (batched, concurrent) ─▶ store
//! ```
//!
//! # Writes
//!
//! A document spans three collections and is written in the order
//! chunks → content → metadata. Chunks go in as one `insert_chunks` call,
//! which the store applies all-or-nothing. If any write fails, all three
//! collections are swept for the document id: a write that reported an
//! error (a timeout, say) may still have landed. A failed compensation is
//! logged at `error` with the document id so it can be cleaned up with
//! `tutor remove`.
//!
//! Knowledge-base sources are swapped with one
//! [`KnowledgeStore::replace_source`] call, so a failed re-ingest keeps
//! the previous entries.
//!
//! # Embedding
//!
//! Chunk texts are embedded in batches of `batch_size`, with up to
//! `concurrency` batches in flight. `buffered` yields results in
//! submission order, so vectors line up with `chunk_index` regardless of
//! which request finishes first. Every vector is checked against the
//! provider's dimension before anything is written.

use futures::stream::{self, StreamExt, TryStreamExt};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use tutor_rag_core::chunk::{chunk_label, chunk_text, content_hash, normalize_text, ChunkingParams};
use tutor_rag_core::embedding::{check_dims, DimensionMismatch, EmbeddingProvider};
use tutor_rag_core::models::{Chunk, DocScope, Document, DocumentContent, KnowledgeEntry};
use tutor_rag_core::store::{KnowledgeStore, Store, StoreError};

use crate::config::Config;
use crate::extract::{self, ExtractError};

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("document contains no extractable text")]
    Empty,
    #[error("invalid ingest request: {0}")]
    InvalidInput(String),
    #[error(transparent)]
    Extraction(#[from] ExtractError),
    #[error("embedding failed: {0:#}")]
    Embedding(anyhow::Error),
    #[error(transparent)]
    DimensionMismatch(#[from] DimensionMismatch),
    #[error("storage unavailable: {0}")]
    StorageUnavailable(#[from] StoreError),
}

/// Chunking and embedding knobs for one ingestion.
#[derive(Debug, Clone)]
pub struct IngestSettings {
    pub chunking: ChunkingParams,
    pub batch_size: usize,
    pub concurrency: usize,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            chunking: ChunkingParams::default(),
            batch_size: 64,
            concurrency: 4,
        }
    }
}

impl IngestSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            chunking: config.chunking.params(),
            batch_size: config.embedding.batch_size,
            concurrency: config.embedding.concurrency,
        }
    }
}

/// Result of a knowledge-base ingestion.
#[derive(Debug, Clone, serde::Serialize)]
pub struct KnowledgeReport {
    pub source_id: String,
    pub entries: usize,
    /// Entries of the same source that were replaced.
    pub replaced: u64,
}

/// Ingest one uploaded file for `owner_id`. Returns the stored document
/// record; its `id` is the new document id.
pub async fn ingest_document<S, E>(
    store: &S,
    embedder: &E,
    settings: &IngestSettings,
    file_bytes: &[u8],
    owner_id: &str,
    display_name: &str,
) -> Result<Document, IngestError>
where
    S: Store + ?Sized,
    E: EmbeddingProvider + ?Sized,
{
    if owner_id.trim().is_empty() {
        return Err(IngestError::InvalidInput("owner_id is empty".to_string()));
    }
    if display_name.trim().is_empty() {
        return Err(IngestError::InvalidInput("display_name is empty".to_string()));
    }

    let content_type = extract::content_type_for(display_name)?;
    let body = normalize_text(&extract::extract_text(file_bytes, content_type)?);
    let pieces = chunk_text(&body, &settings.chunking);
    if pieces.is_empty() {
        return Err(IngestError::Empty);
    }

    let texts: Vec<String> = pieces.iter().map(|p| p.text.clone()).collect();
    let vectors = embed_texts(embedder, &texts, settings).await?;

    let document_id = Uuid::new_v4().to_string();
    let chunks: Vec<Chunk> = pieces
        .into_iter()
        .zip(vectors)
        .map(|(piece, embedding)| Chunk {
            id: Uuid::new_v4().to_string(),
            document_id: document_id.clone(),
            owner_id: owner_id.to_string(),
            chunk_index: piece.index,
            label: chunk_label(display_name, piece.index),
            hash: content_hash(&piece.text),
            text: piece.text,
            overlap: piece.overlap,
            embedding,
        })
        .collect();

    let document = Document {
        id: document_id.clone(),
        owner_id: owner_id.to_string(),
        display_name: display_name.to_string(),
        content_type: content_type.to_string(),
        chunk_count: chunks.len() as i64,
        created_at: chrono::Utc::now().timestamp(),
    };
    let content = DocumentContent {
        document_id: document_id.clone(),
        owner_id: owner_id.to_string(),
        content_hash: content_hash(&body),
        body,
    };

    write_document(store, &chunks, &content, &document).await?;

    info!(
        owner_id,
        document_id = %document.id,
        chunks = document.chunk_count,
        "document ingested"
    );
    Ok(document)
}

/// Ingest a shared knowledge-base source. Re-ingesting a `source_id`
/// replaces its previous entries. The content type is sniffed from the
/// bytes since titles rarely carry an extension.
pub async fn ingest_knowledge<K, E>(
    kb: &K,
    embedder: &E,
    settings: &IngestSettings,
    file_bytes: &[u8],
    title: &str,
    source_id: &str,
) -> Result<KnowledgeReport, IngestError>
where
    K: KnowledgeStore + ?Sized,
    E: EmbeddingProvider + ?Sized,
{
    if source_id.trim().is_empty() {
        return Err(IngestError::InvalidInput("source_id is empty".to_string()));
    }

    let content_type = extract::sniff_content_type(file_bytes);
    let body = normalize_text(&extract::extract_text(file_bytes, content_type)?);
    let pieces = chunk_text(&body, &settings.chunking);
    if pieces.is_empty() {
        return Err(IngestError::Empty);
    }

    let texts: Vec<String> = pieces.iter().map(|p| p.text.clone()).collect();
    let vectors = embed_texts(embedder, &texts, settings).await?;

    let entries: Vec<KnowledgeEntry> = pieces
        .into_iter()
        .zip(vectors)
        .map(|(piece, embedding)| KnowledgeEntry {
            id: Uuid::new_v4().to_string(),
            source_id: source_id.to_string(),
            title: title.to_string(),
            chunk_index: piece.index,
            text: piece.text,
            embedding,
        })
        .collect();

    let replaced = match kb.replace_source(source_id, &entries).await {
        Ok(replaced) => replaced,
        Err(e) => {
            warn!(source_id, error = %e, "knowledge source not replaced; previous entries kept");
            return Err(e.into());
        }
    };

    info!(source_id, entries = entries.len(), replaced, "knowledge source ingested");
    Ok(KnowledgeReport {
        source_id: source_id.to_string(),
        entries: entries.len(),
        replaced,
    })
}

/// Embed `texts` in order, checking every vector's dimension.
pub async fn embed_texts<E>(
    embedder: &E,
    texts: &[String],
    settings: &IngestSettings,
) -> Result<Vec<Vec<f32>>, IngestError>
where
    E: EmbeddingProvider + ?Sized,
{
    let batches: Vec<&[String]> = texts.chunks(settings.batch_size.max(1)).collect();
    debug!(texts = texts.len(), batches = batches.len(), "embedding chunks");

    let requests: Vec<_> = batches.into_iter().map(|batch| embedder.embed(batch)).collect();
    let per_batch: Vec<Vec<Vec<f32>>> = stream::iter(requests)
        .buffered(settings.concurrency.max(1))
        .try_collect()
        .await
        .map_err(IngestError::Embedding)?;

    let vectors: Vec<Vec<f32>> = per_batch.into_iter().flatten().collect();
    if vectors.len() != texts.len() {
        return Err(IngestError::Embedding(anyhow::anyhow!(
            "provider returned {} vectors for {} texts",
            vectors.len(),
            texts.len()
        )));
    }

    let dims = embedder.dims();
    for vector in &vectors {
        check_dims(vector, dims)?;
    }
    Ok(vectors)
}

async fn write_document<S: Store + ?Sized>(
    store: &S,
    chunks: &[Chunk],
    content: &DocumentContent,
    document: &Document,
) -> Result<(), IngestError> {
    if let Err(e) = store.insert_chunks(chunks).await {
        warn!(document_id = %document.id, error = %e, "chunk write failed");
        roll_back(store, document).await;
        return Err(e.into());
    }

    if let Err(e) = store.put_content(content).await {
        warn!(document_id = %document.id, error = %e, "content write failed");
        roll_back(store, document).await;
        return Err(e.into());
    }

    if let Err(e) = store.put_metadata(document).await {
        warn!(document_id = %document.id, error = %e, "metadata write failed");
        roll_back(store, document).await;
        return Err(e.into());
    }

    Ok(())
}

/// Delete the document from every collection. Each delete is idempotent,
/// so collections that were never written are harmless to sweep.
async fn roll_back<S: Store + ?Sized>(store: &S, document: &Document) {
    let scope = DocScope::single(document.id.clone());
    let owner_id = document.owner_id.as_str();

    if let Err(e) = store.delete_chunks(owner_id, &scope).await {
        error!(owner_id, document_id = %document.id, error = %e, "rollback of chunks failed");
    }
    if let Err(e) = store.delete_content(owner_id, &scope).await {
        error!(owner_id, document_id = %document.id, error = %e, "rollback of content failed");
    }
    if let Err(e) = store.delete_metadata(owner_id, &scope).await {
        error!(owner_id, document_id = %document.id, error = %e, "rollback of metadata failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tutor_rag_core::store::memory::InMemoryStore;
    use tutor_rag_core::store::ScoredChunk;

    /// Embeds text as `[len, index-of-batch-call]`, delaying early batches so
    /// they finish last.
    struct SlowFirstEmbedder {
        calls: AtomicUsize,
        dims: usize,
    }

    impl SlowFirstEmbedder {
        fn new(dims: usize) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                dims,
            }
        }
    }

    #[async_trait]
    impl EmbeddingProvider for SlowFirstEmbedder {
        fn model_name(&self) -> &str {
            "slow-first"
        }
        fn dims(&self) -> usize {
            self.dims
        }
        async fn embed(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(40u64.saturating_sub(call as u64 * 10))).await;
            Ok(texts
                .iter()
                .map(|t| {
                    let mut v = vec![0.0; self.dims];
                    v[0] = t.len() as f32;
                    v
                })
                .collect())
        }
    }

    struct WrongDims;

    #[async_trait]
    impl EmbeddingProvider for WrongDims {
        fn model_name(&self) -> &str {
            "wrong"
        }
        fn dims(&self) -> usize {
            4
        }
        async fn embed(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| vec![1.0, 2.0, 3.0]).collect())
        }
    }

    /// Stores metadata and then reports a timeout, as a write that landed
    /// after its deadline would.
    struct LateMetadataStore(InMemoryStore);

    #[async_trait]
    impl Store for LateMetadataStore {
        async fn insert_chunks(&self, chunks: &[Chunk]) -> Result<(), StoreError> {
            self.0.insert_chunks(chunks).await
        }
        async fn put_content(&self, content: &DocumentContent) -> Result<(), StoreError> {
            self.0.put_content(content).await
        }
        async fn put_metadata(&self, doc: &Document) -> Result<(), StoreError> {
            self.0.put_metadata(doc).await?;
            Err(StoreError::Timeout(1))
        }
        async fn vector_search(
            &self,
            query_vec: &[f32],
            owner_id: &str,
            scope: &DocScope,
            limit: usize,
        ) -> Result<Vec<ScoredChunk>, StoreError> {
            self.0.vector_search(query_vec, owner_id, scope, limit).await
        }
        async fn scan_chunks(
            &self,
            owner_id: &str,
            scope: &DocScope,
        ) -> Result<Vec<Chunk>, StoreError> {
            self.0.scan_chunks(owner_id, scope).await
        }
        async fn list_documents(
            &self,
            owner_id: &str,
            scope: &DocScope,
        ) -> Result<Vec<Document>, StoreError> {
            self.0.list_documents(owner_id, scope).await
        }
        async fn delete_chunks(&self, owner_id: &str, scope: &DocScope) -> Result<u64, StoreError> {
            self.0.delete_chunks(owner_id, scope).await
        }
        async fn delete_content(
            &self,
            owner_id: &str,
            scope: &DocScope,
        ) -> Result<u64, StoreError> {
            self.0.delete_content(owner_id, scope).await
        }
        async fn delete_metadata(
            &self,
            owner_id: &str,
            scope: &DocScope,
        ) -> Result<u64, StoreError> {
            self.0.delete_metadata(owner_id, scope).await
        }
    }

    fn settings() -> IngestSettings {
        IngestSettings {
            chunking: ChunkingParams {
                chunk_size: 200,
                chunk_overlap: 40,
            },
            batch_size: 2,
            concurrency: 4,
        }
    }

    fn lesson(n: usize) -> Vec<u8> {
        (0..n)
            .map(|i| format!("Lesson sentence number {} covers the water cycle in detail.", i))
            .collect::<Vec<_>>()
            .join(" ")
            .into_bytes()
    }

    #[tokio::test]
    async fn test_embedding_order_follows_chunk_index() {
        let store = InMemoryStore::new();
        let embedder = SlowFirstEmbedder::new(3);
        let doc = ingest_document(&store, &embedder, &settings(), &lesson(30), "u1", "water.txt")
            .await
            .unwrap();

        let chunks = store.scan_chunks("u1", &DocScope::AllDocuments).await.unwrap();
        assert_eq!(chunks.len() as i64, doc.chunk_count);
        assert!(doc.chunk_count > 4);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.chunk_index, i as i64);
            assert_eq!(c.embedding[0], c.text.len() as f32);
            assert_eq!(c.label, format!("water_{}", i));
        }
    }

    #[tokio::test]
    async fn test_empty_document_rejected() {
        let store = InMemoryStore::new();
        let err = ingest_document(
            &store,
            &SlowFirstEmbedder::new(3),
            &settings(),
            b" \r\n \n",
            "u1",
            "blank.txt",
        )
        .await
        .unwrap_err();
        assert!(matches!(err, IngestError::Empty));
        assert!(store.counts("u1").is_empty());
    }

    #[tokio::test]
    async fn test_dimension_mismatch_stores_nothing() {
        let store = InMemoryStore::new();
        let err = ingest_document(&store, &WrongDims, &settings(), &lesson(5), "u1", "a.txt")
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::DimensionMismatch(_)));
        assert!(store.counts("u1").is_empty());
    }

    #[tokio::test]
    async fn test_metadata_failure_rolls_back() {
        let store = InMemoryStore::new();
        store.fail_metadata_writes(true);
        let err = ingest_document(
            &store,
            &SlowFirstEmbedder::new(3),
            &settings(),
            &lesson(10),
            "u1",
            "a.txt",
        )
        .await
        .unwrap_err();
        assert!(matches!(err, IngestError::StorageUnavailable(_)));
        assert!(store.counts("u1").is_empty());
        assert_eq!(store.index_len(), 0);
    }

    #[tokio::test]
    async fn test_content_failure_rolls_back_chunks() {
        let store = InMemoryStore::new();
        store.fail_content_writes(true);
        let result = ingest_document(
            &store,
            &SlowFirstEmbedder::new(3),
            &settings(),
            &lesson(10),
            "u1",
            "a.txt",
        )
        .await;
        assert!(result.is_err());
        assert!(store.counts("u1").is_empty());
    }

    #[tokio::test]
    async fn test_unsupported_extension() {
        let store = InMemoryStore::new();
        let err = ingest_document(
            &store,
            &SlowFirstEmbedder::new(3),
            &settings(),
            b"data",
            "u1",
            "sheet.xlsx",
        )
        .await
        .unwrap_err();
        assert!(matches!(
            err,
            IngestError::Extraction(ExtractError::UnsupportedContentType(_))
        ));
    }

    #[tokio::test]
    async fn test_knowledge_reingest_replaces_source() {
        let kb = InMemoryStore::new();
        let embedder = SlowFirstEmbedder::new(3);
        let first = ingest_knowledge(&kb, &embedder, &settings(), &lesson(20), "Water", "kb-water")
            .await
            .unwrap();
        assert_eq!(first.replaced, 0);

        let second = ingest_knowledge(&kb, &embedder, &settings(), &lesson(3), "Water", "kb-water")
            .await
            .unwrap();
        assert_eq!(second.replaced, first.entries as u64);
        assert_eq!(kb.scan_entries().await.unwrap().len(), second.entries);
    }

    #[tokio::test]
    async fn test_late_metadata_write_is_swept() {
        let store = LateMetadataStore(InMemoryStore::new());
        let result = ingest_document(
            &store,
            &SlowFirstEmbedder::new(3),
            &settings(),
            &lesson(10),
            "u1",
            "a.txt",
        )
        .await;
        assert!(matches!(
            result,
            Err(IngestError::StorageUnavailable(StoreError::Timeout(1)))
        ));

        let docs = store
            .list_documents("u1", &DocScope::AllDocuments)
            .await
            .unwrap();
        assert!(docs.is_empty());
        assert!(store.0.counts("u1").is_empty());
        assert_eq!(store.0.index_len(), 0);
    }

    #[tokio::test]
    async fn test_failed_knowledge_reingest_keeps_previous_entries() {
        let kb = InMemoryStore::new();
        let embedder = SlowFirstEmbedder::new(3);
        let first = ingest_knowledge(&kb, &embedder, &settings(), &lesson(20), "Water", "kb-water")
            .await
            .unwrap();

        kb.fail_kb_writes(true);
        let err = ingest_knowledge(&kb, &embedder, &settings(), &lesson(3), "Water", "kb-water")
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::StorageUnavailable(_)));

        let kept = kb.scan_entries().await.unwrap();
        assert_eq!(kept.len(), first.entries);
        assert!(kept.iter().all(|e| e.source_id == "kb-water"));
    }
}
