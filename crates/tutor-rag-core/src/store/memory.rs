//! In-memory [`Store`] and [`KnowledgeStore`] for tests and WASM targets.
//!
//! Collections live in `Vec`s behind `std::sync::RwLock`. The vector
//! "index" is a separate list of `(chunk id, vector)` rows so tests can take
//! it down independently of the chunk collection, which still carries every
//! embedding for the brute-force path.
//!
//! Faults can be injected per collection to exercise degraded paths.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use crate::embedding::cosine_similarity;
use crate::models::{Chunk, DocScope, Document, DocumentContent, KnowledgeEntry};

use super::{CollectionCounts, KnowledgeStore, ScoredChunk, ScoredEntry, Store, StoreError};

struct IndexRow {
    chunk_id: String,
    owner_id: String,
    document_id: String,
    vector: Vec<f32>,
}

#[derive(Default)]
struct Faults {
    offline: AtomicBool,
    index_down: AtomicBool,
    kb_offline: AtomicBool,
    kb_index_down: AtomicBool,
    fail_kb_writes: AtomicBool,
    fail_chunk_writes: AtomicBool,
    fail_content_writes: AtomicBool,
    fail_metadata_writes: AtomicBool,
    fail_content_deletes: AtomicBool,
}

/// In-memory store for tests and WASM environments.
#[derive(Default)]
pub struct InMemoryStore {
    documents: RwLock<Vec<Document>>,
    contents: RwLock<Vec<DocumentContent>>,
    chunks: RwLock<Vec<Chunk>>,
    index: RwLock<Vec<IndexRow>>,
    kb_entries: RwLock<Vec<KnowledgeEntry>>,
    faults: Faults,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every per-owner operation fail with [`StoreError::Unavailable`].
    pub fn set_offline(&self, offline: bool) {
        self.faults.offline.store(offline, Ordering::SeqCst);
    }

    /// Make [`Store::vector_search`] fail while scans keep working.
    pub fn set_index_down(&self, down: bool) {
        self.faults.index_down.store(down, Ordering::SeqCst);
    }

    /// Make every knowledge-base operation fail.
    pub fn set_kb_offline(&self, offline: bool) {
        self.faults.kb_offline.store(offline, Ordering::SeqCst);
    }

    /// Make [`KnowledgeStore::search_entries`] fail while scans keep working.
    pub fn set_kb_index_down(&self, down: bool) {
        self.faults.kb_index_down.store(down, Ordering::SeqCst);
    }

    /// Reject knowledge-base inserts and replacements before they mutate anything.
    pub fn fail_kb_writes(&self, fail: bool) {
        self.faults.fail_kb_writes.store(fail, Ordering::SeqCst);
    }

    pub fn fail_chunk_writes(&self, fail: bool) {
        self.faults.fail_chunk_writes.store(fail, Ordering::SeqCst);
    }

    pub fn fail_content_writes(&self, fail: bool) {
        self.faults.fail_content_writes.store(fail, Ordering::SeqCst);
    }

    pub fn fail_metadata_writes(&self, fail: bool) {
        self.faults.fail_metadata_writes.store(fail, Ordering::SeqCst);
    }

    pub fn fail_content_deletes(&self, fail: bool) {
        self.faults.fail_content_deletes.store(fail, Ordering::SeqCst);
    }

    /// Record counts for one owner across the three document collections.
    pub fn counts(&self, owner_id: &str) -> CollectionCounts {
        let count = |n: usize| n as u64;
        CollectionCounts {
            chunks: self
                .chunks
                .read()
                .map(|c| count(c.iter().filter(|c| c.owner_id == owner_id).count()))
                .unwrap_or(0),
            contents: self
                .contents
                .read()
                .map(|c| count(c.iter().filter(|c| c.owner_id == owner_id).count()))
                .unwrap_or(0),
            documents: self
                .documents
                .read()
                .map(|d| count(d.iter().filter(|d| d.owner_id == owner_id).count()))
                .unwrap_or(0),
        }
    }

    /// Number of rows in the document vector index.
    pub fn index_len(&self) -> usize {
        self.index.read().map(|i| i.len()).unwrap_or(0)
    }

    fn check(&self, flag: &AtomicBool, err: impl FnOnce() -> StoreError) -> Result<(), StoreError> {
        if flag.load(Ordering::SeqCst) {
            Err(err())
        } else {
            Ok(())
        }
    }

    fn check_online(&self) -> Result<(), StoreError> {
        self.check(&self.faults.offline, || {
            StoreError::Unavailable("in-memory store is offline".to_string())
        })
    }

    fn check_kb_online(&self) -> Result<(), StoreError> {
        self.check(&self.faults.kb_offline, || {
            StoreError::Unavailable("knowledge base is offline".to_string())
        })
    }

    fn check_kb_writable(&self) -> Result<(), StoreError> {
        self.check_kb_online()?;
        self.check(&self.faults.fail_kb_writes, || {
            StoreError::Backend("knowledge-base write rejected".to_string())
        })
    }
}

fn read<T>(lock: &RwLock<T>) -> Result<RwLockReadGuard<'_, T>, StoreError> {
    lock.read()
        .map_err(|_| StoreError::Backend("lock poisoned".to_string()))
}

fn write<T>(lock: &RwLock<T>) -> Result<RwLockWriteGuard<'_, T>, StoreError> {
    lock.write()
        .map_err(|_| StoreError::Backend("lock poisoned".to_string()))
}

fn in_scope(owner: &str, doc: &str, owner_id: &str, scope: &DocScope) -> bool {
    owner == owner_id && scope.contains(doc)
}

fn sort_by_score<T>(hits: &mut [(T, f32)]) {
    hits.sort_by(|a, b| b.1.total_cmp(&a.1));
}

#[async_trait]
impl Store for InMemoryStore {
    async fn insert_chunks(&self, chunks: &[Chunk]) -> Result<(), StoreError> {
        self.check_online()?;
        self.check(&self.faults.fail_chunk_writes, || {
            StoreError::Backend("chunk write rejected".to_string())
        })?;

        let mut stored = write(&self.chunks)?;
        let mut index = write(&self.index)?;
        for c in chunks {
            stored.push(c.clone());
            if c.embedding.is_empty() {
                continue;
            }
            index.push(IndexRow {
                chunk_id: c.id.clone(),
                owner_id: c.owner_id.clone(),
                document_id: c.document_id.clone(),
                vector: c.embedding.clone(),
            });
        }
        Ok(())
    }

    async fn put_content(&self, content: &DocumentContent) -> Result<(), StoreError> {
        self.check_online()?;
        self.check(&self.faults.fail_content_writes, || {
            StoreError::Backend("content write rejected".to_string())
        })?;

        let mut stored = write(&self.contents)?;
        stored.retain(|c| {
            !(c.document_id == content.document_id && c.owner_id == content.owner_id)
        });
        stored.push(content.clone());
        Ok(())
    }

    async fn put_metadata(&self, doc: &Document) -> Result<(), StoreError> {
        self.check_online()?;
        self.check(&self.faults.fail_metadata_writes, || {
            StoreError::Backend("metadata write rejected".to_string())
        })?;

        let mut stored = write(&self.documents)?;
        stored.retain(|d| d.id != doc.id);
        stored.push(doc.clone());
        Ok(())
    }

    async fn vector_search(
        &self,
        query_vec: &[f32],
        owner_id: &str,
        scope: &DocScope,
        limit: usize,
    ) -> Result<Vec<ScoredChunk>, StoreError> {
        self.check_online()?;
        self.check(&self.faults.index_down, || {
            StoreError::IndexUnavailable("in-memory index is down".to_string())
        })?;

        let mut hits: Vec<(String, f32)> = read(&self.index)?
            .iter()
            .filter(|row| in_scope(&row.owner_id, &row.document_id, owner_id, scope))
            .map(|row| (row.chunk_id.clone(), cosine_similarity(query_vec, &row.vector)))
            .collect();
        sort_by_score(&mut hits);
        hits.truncate(limit);

        let chunks = read(&self.chunks)?;
        Ok(hits
            .into_iter()
            .filter_map(|(id, score)| {
                chunks.iter().find(|c| c.id == id).map(|c| ScoredChunk {
                    chunk: c.clone(),
                    score,
                })
            })
            .collect())
    }

    async fn scan_chunks(
        &self,
        owner_id: &str,
        scope: &DocScope,
    ) -> Result<Vec<Chunk>, StoreError> {
        self.check_online()?;
        let chunks = read(&self.chunks)?;
        Ok(chunks
            .iter()
            .filter(|c| in_scope(&c.owner_id, &c.document_id, owner_id, scope))
            .cloned()
            .collect())
    }

    async fn list_documents(
        &self,
        owner_id: &str,
        scope: &DocScope,
    ) -> Result<Vec<Document>, StoreError> {
        self.check_online()?;
        let docs = read(&self.documents)?;
        Ok(docs
            .iter()
            .filter(|d| in_scope(&d.owner_id, &d.id, owner_id, scope))
            .cloned()
            .collect())
    }

    async fn delete_chunks(&self, owner_id: &str, scope: &DocScope) -> Result<u64, StoreError> {
        self.check_online()?;
        let mut chunks = write(&self.chunks)?;
        let mut index = write(&self.index)?;
        let before = chunks.len();
        chunks.retain(|c| !in_scope(&c.owner_id, &c.document_id, owner_id, scope));
        index.retain(|row| !in_scope(&row.owner_id, &row.document_id, owner_id, scope));
        Ok((before - chunks.len()) as u64)
    }

    async fn delete_content(&self, owner_id: &str, scope: &DocScope) -> Result<u64, StoreError> {
        self.check_online()?;
        self.check(&self.faults.fail_content_deletes, || {
            StoreError::Backend("content delete rejected".to_string())
        })?;
        let mut contents = write(&self.contents)?;
        let before = contents.len();
        contents.retain(|c| !in_scope(&c.owner_id, &c.document_id, owner_id, scope));
        Ok((before - contents.len()) as u64)
    }

    async fn delete_metadata(&self, owner_id: &str, scope: &DocScope) -> Result<u64, StoreError> {
        self.check_online()?;
        let mut docs = write(&self.documents)?;
        let before = docs.len();
        docs.retain(|d| !in_scope(&d.owner_id, &d.id, owner_id, scope));
        Ok((before - docs.len()) as u64)
    }
}

#[async_trait]
impl KnowledgeStore for InMemoryStore {
    async fn insert_entries(&self, entries: &[KnowledgeEntry]) -> Result<(), StoreError> {
        self.check_kb_writable()?;
        write(&self.kb_entries)?.extend(entries.iter().cloned());
        Ok(())
    }

    async fn search_entries(
        &self,
        query_vec: &[f32],
        limit: usize,
    ) -> Result<Vec<ScoredEntry>, StoreError> {
        self.check_kb_online()?;
        self.check(&self.faults.kb_index_down, || {
            StoreError::IndexUnavailable("knowledge-base index is down".to_string())
        })?;

        let entries = read(&self.kb_entries)?;
        let mut hits: Vec<(&KnowledgeEntry, f32)> = entries
            .iter()
            .map(|e| (e, cosine_similarity(query_vec, &e.embedding)))
            .collect();
        sort_by_score(&mut hits);
        hits.truncate(limit);
        Ok(hits
            .into_iter()
            .map(|(e, score)| ScoredEntry {
                entry: e.clone(),
                score,
            })
            .collect())
    }

    async fn scan_entries(&self) -> Result<Vec<KnowledgeEntry>, StoreError> {
        self.check_kb_online()?;
        Ok(read(&self.kb_entries)?.clone())
    }

    async fn delete_source(&self, source_id: &str) -> Result<u64, StoreError> {
        self.check_kb_online()?;
        let mut entries = write(&self.kb_entries)?;
        let before = entries.len();
        entries.retain(|e| e.source_id != source_id);
        Ok((before - entries.len()) as u64)
    }

    async fn replace_source(
        &self,
        source_id: &str,
        entries: &[KnowledgeEntry],
    ) -> Result<u64, StoreError> {
        self.check_kb_writable()?;
        let mut stored = write(&self.kb_entries)?;
        let before = stored.len();
        stored.retain(|e| e.source_id != source_id);
        let removed = (before - stored.len()) as u64;
        stored.extend(entries.iter().cloned());
        Ok(removed)
    }
}
