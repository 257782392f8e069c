//! Document removal across the three document collections.
//!
//! Chunks, raw content, and metadata are deleted by three independent
//! calls with no enclosing transaction. A failing collection is logged
//! and named in [`DeletedCount::failed`]; the others still run, and the
//! counts of what was actually deleted are returned.

use serde::Serialize;
use tracing::{error, info};

use tutor_rag_core::models::{DocScope, OneOrMany};
use tutor_rag_core::store::{Store, StoreError};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeletedCount {
    pub chunks: u64,
    pub contents: u64,
    pub documents: u64,
    /// Collections whose delete failed.
    pub failed: Vec<&'static str>,
}

impl DeletedCount {
    pub fn total(&self) -> u64 {
        self.chunks + self.contents + self.documents
    }

    pub fn is_partial(&self) -> bool {
        !self.failed.is_empty()
    }
}

/// Remove an owner's documents.
///
/// `None` removes everything the owner has; `Some(ids)` removes only the
/// named documents and an empty list removes nothing. Returns an error
/// only when all three collections failed.
pub async fn remove<S: Store + ?Sized>(
    store: &S,
    owner_id: &str,
    doc_filter: Option<OneOrMany<String>>,
) -> Result<DeletedCount, StoreError> {
    let scope = DocScope::from_filter(doc_filter);
    let mut deleted = DeletedCount::default();
    if scope.selects_nothing() {
        return Ok(deleted);
    }

    let mut last_error = None;

    match store.delete_chunks(owner_id, &scope).await {
        Ok(n) => deleted.chunks = n,
        Err(e) => {
            error!(owner_id, collection = "chunks", error = %e, "delete failed");
            deleted.failed.push("chunks");
            last_error = Some(e);
        }
    }
    match store.delete_content(owner_id, &scope).await {
        Ok(n) => deleted.contents = n,
        Err(e) => {
            error!(owner_id, collection = "contents", error = %e, "delete failed");
            deleted.failed.push("contents");
            last_error = Some(e);
        }
    }
    match store.delete_metadata(owner_id, &scope).await {
        Ok(n) => deleted.documents = n,
        Err(e) => {
            error!(owner_id, collection = "documents", error = %e, "delete failed");
            deleted.failed.push("documents");
            last_error = Some(e);
        }
    }

    if deleted.failed.len() == 3 {
        if let Some(e) = last_error {
            return Err(e);
        }
    }

    info!(
        owner_id,
        chunks = deleted.chunks,
        contents = deleted.contents,
        documents = deleted.documents,
        partial = deleted.is_partial(),
        "documents removed"
    );
    Ok(deleted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tutor_rag_core::models::{Chunk, Document, DocumentContent};
    use tutor_rag_core::store::memory::InMemoryStore;

    async fn seed(store: &InMemoryStore, owner: &str, doc_id: &str, chunks: usize) {
        let rows: Vec<Chunk> = (0..chunks)
            .map(|i| Chunk {
                id: format!("{}-{}", doc_id, i),
                document_id: doc_id.to_string(),
                owner_id: owner.to_string(),
                chunk_index: i as i64,
                text: format!("text {}", i),
                overlap: 0,
                label: format!("{}_{}", doc_id, i),
                hash: String::new(),
                embedding: vec![1.0, 0.0],
            })
            .collect();
        store.insert_chunks(&rows).await.unwrap();
        store
            .put_content(&DocumentContent {
                document_id: doc_id.to_string(),
                owner_id: owner.to_string(),
                body: "body".to_string(),
                content_hash: String::new(),
            })
            .await
            .unwrap();
        store
            .put_metadata(&Document {
                id: doc_id.to_string(),
                owner_id: owner.to_string(),
                display_name: format!("{}.txt", doc_id),
                content_type: "text/plain".to_string(),
                chunk_count: chunks as i64,
                created_at: 0,
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_remove_all_for_owner() {
        let store = InMemoryStore::new();
        seed(&store, "u1", "a", 2).await;
        seed(&store, "u1", "b", 3).await;
        seed(&store, "u2", "c", 1).await;

        let deleted = remove(&store, "u1", None).await.unwrap();
        assert_eq!(deleted.chunks, 5);
        assert_eq!(deleted.contents, 2);
        assert_eq!(deleted.documents, 2);
        assert_eq!(deleted.total(), 9);
        assert!(store.counts("u1").is_empty());
        assert_eq!(store.counts("u2").documents, 1);
    }

    #[tokio::test]
    async fn test_remove_named_document_only() {
        let store = InMemoryStore::new();
        seed(&store, "u1", "a", 2).await;
        seed(&store, "u1", "b", 3).await;

        let deleted = remove(&store, "u1", Some(OneOrMany::One("a".to_string())))
            .await
            .unwrap();
        assert_eq!(deleted.chunks, 2);
        assert_eq!(deleted.documents, 1);
        let left = store.counts("u1");
        assert_eq!(left.chunks, 3);
        assert_eq!(left.documents, 1);
    }

    #[tokio::test]
    async fn test_nothing_matched_is_zero_not_error() {
        let store = InMemoryStore::new();
        seed(&store, "u1", "a", 1).await;

        let deleted = remove(&store, "u1", Some(OneOrMany::One("missing".to_string())))
            .await
            .unwrap();
        assert_eq!(deleted.total(), 0);

        let deleted = remove(&store, "u1", Some(OneOrMany::Many(vec![])))
            .await
            .unwrap();
        assert_eq!(deleted.total(), 0);
        assert_eq!(store.counts("u1").documents, 1);
    }

    #[tokio::test]
    async fn test_one_collection_failure_is_partial_success() {
        let store = InMemoryStore::new();
        seed(&store, "u1", "a", 2).await;
        store.fail_content_deletes(true);

        let deleted = remove(&store, "u1", None).await.unwrap();
        assert_eq!(deleted.chunks, 2);
        assert_eq!(deleted.contents, 0);
        assert_eq!(deleted.documents, 1);
        assert_eq!(deleted.failed, vec!["contents"]);
        assert_eq!(store.counts("u1").contents, 1);
    }

    #[tokio::test]
    async fn test_store_offline_is_an_error() {
        let store = InMemoryStore::new();
        store.set_offline(true);
        assert!(remove(&store, "u1", None).await.is_err());
    }
}
