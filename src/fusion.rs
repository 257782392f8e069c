//! Context fusion: one query fanned out to every retrieval source and
//! merged under a priority policy.
//!
//! 1. Embed the query once.
//! 2. Concurrently run the document search, the knowledge-base search,
//!    and (when the filter names documents) the display-name lookup. Each
//!    branch turns its own failure into an empty value, so one unreachable
//!    source never cancels the others.
//! 3. Build the context text: document passages first under
//!    `CONTENT FROM CURRENT DOCUMENT:`, then knowledge-base passages under
//!    `ADDITIONAL KNOWLEDGE:` only when the document search returned fewer
//!    than `kb_min_document_results` passages.
//! 4. Substitute [`NO_CONTENT_PLACEHOLDER`] when nothing was retrieved.
//!
//! Dropping the returned future cancels every in-flight branch.

use serde::Serialize;
use tracing::{debug, warn};

use tutor_rag_core::embedding::{embed_one, EmbeddingProvider};
use tutor_rag_core::models::{ConversationTurn, DocScope, OneOrMany, RetrievalResult};
use tutor_rag_core::search::{search_documents, search_knowledge, SearchParams, SearchTier};
use tutor_rag_core::store::{KnowledgeStore, Store};

use crate::config::RetrievalConfig;

/// Context text used when no source contributed anything.
pub const NO_CONTENT_PLACEHOLDER: &str = "No relevant content found for this request.";

const DOCUMENT_HEADER: &str = "CURRENT DOCUMENT:";
const DOCUMENT_CONTENT_HEADER: &str = "CONTENT FROM CURRENT DOCUMENT:";
const KNOWLEDGE_HEADER: &str = "ADDITIONAL KNOWLEDGE:";

#[derive(Debug, Clone)]
pub struct FusionSettings {
    pub documents: SearchParams,
    pub knowledge: SearchParams,
    pub kb_min_document_results: usize,
    pub history_window: usize,
}

impl FusionSettings {
    /// `dims` of 0 (embedding disabled) skips the query dimension check.
    pub fn from_config(retrieval: &RetrievalConfig, dims: usize) -> Self {
        let mut documents = retrieval.document_params(retrieval.top_k);
        let mut knowledge = retrieval.knowledge_params(retrieval.kb_top_k);
        if dims > 0 {
            documents = documents.with_dims(dims);
            knowledge = knowledge.with_dims(dims);
        }
        Self {
            documents,
            knowledge,
            kb_min_document_results: retrieval.kb_min_document_results,
            history_window: retrieval.history_window,
        }
    }
}

/// Everything the generator needs for one answer.
#[derive(Debug, Clone, Serialize)]
pub struct AssembledContext {
    pub text: String,
    pub document_name: Option<String>,
    pub history: Vec<ConversationTurn>,
    pub document_results: Vec<RetrievalResult>,
    /// Knowledge-base passages that made it into `text`.
    pub knowledge_results: Vec<RetrievalResult>,
    /// `None` when the document search failed outright.
    pub document_tier: Option<SearchTier>,
}

/// One retrieval request: whose documents, which of them, and the
/// conversation so far.
#[derive(Debug, Clone)]
pub struct FuseRequest<'a> {
    pub query: &'a str,
    pub owner_id: &'a str,
    /// `None` searches every document of the owner.
    pub doc_filter: Option<OneOrMany<String>>,
    pub history: &'a [ConversationTurn],
}

pub async fn fuse<S, K, E>(
    store: &S,
    kb: &K,
    embedder: &E,
    settings: &FusionSettings,
    request: FuseRequest<'_>,
) -> AssembledContext
where
    S: Store + ?Sized,
    K: KnowledgeStore + ?Sized,
    E: EmbeddingProvider + ?Sized,
{
    let FuseRequest {
        query,
        owner_id,
        doc_filter,
        history,
    } = request;
    let scope = DocScope::from_filter(doc_filter);

    let query_vec = match embed_one(embedder, query).await {
        Ok(v) => Some(v),
        Err(e) => {
            warn!(owner_id, error = %e, "query embedding failed; retrieving nothing");
            None
        }
    };

    let documents = async {
        let Some(query_vec) = query_vec.as_deref() else {
            return (Vec::new(), None);
        };
        match search_documents(store, query_vec, owner_id, &scope, &settings.documents).await {
            Ok(outcome) => (outcome.results, Some(outcome.tier)),
            Err(e) => {
                warn!(owner_id, error = %e, "document search failed");
                (Vec::new(), None)
            }
        }
    };

    let knowledge = async {
        match query_vec.as_deref() {
            Some(query_vec) => search_knowledge(kb, query_vec, &settings.knowledge).await.results,
            None => Vec::new(),
        }
    };

    let names = async {
        let Some(ids) = scope.named_ids().filter(|ids| !ids.is_empty()) else {
            return Vec::new();
        };
        match store.list_documents(owner_id, &scope).await {
            Ok(docs) => ids
                .iter()
                .filter_map(|id| docs.iter().find(|d| &d.id == id))
                .map(|d| d.display_name.clone())
                .collect(),
            Err(e) => {
                warn!(owner_id, error = %e, "document name lookup failed");
                Vec::new()
            }
        }
    };

    let ((document_results, document_tier), knowledge_results, names) =
        tokio::join!(documents, knowledge, names);

    let document_name = if names.is_empty() {
        None
    } else {
        Some(names.join(", "))
    };

    let (text, knowledge_used) = build_context_text(
        document_name.as_deref(),
        &document_results,
        &knowledge_results,
        settings.kb_min_document_results,
    );
    let knowledge_results = if knowledge_used {
        knowledge_results
    } else {
        Vec::new()
    };

    debug!(
        owner_id,
        documents = document_results.len(),
        knowledge = knowledge_results.len(),
        "context fused"
    );

    AssembledContext {
        text,
        document_name,
        history: recent_turns(history, settings.history_window),
        document_results,
        knowledge_results,
        document_tier,
    }
}

/// Render the context text. Returns the text and whether knowledge-base
/// passages were included.
pub fn build_context_text(
    document_name: Option<&str>,
    documents: &[RetrievalResult],
    knowledge: &[RetrievalResult],
    kb_min_document_results: usize,
) -> (String, bool) {
    let mut sections: Vec<String> = Vec::new();

    if !documents.is_empty() {
        sections.push(format!(
            "{}\n{}",
            DOCUMENT_CONTENT_HEADER,
            join_passages(documents)
        ));
    }

    let knowledge_used = documents.len() < kb_min_document_results && !knowledge.is_empty();
    if knowledge_used {
        sections.push(format!("{}\n{}", KNOWLEDGE_HEADER, join_passages(knowledge)));
    }

    let body = if sections.is_empty() {
        NO_CONTENT_PLACEHOLDER.to_string()
    } else {
        sections.join("\n\n")
    };

    let text = match document_name {
        Some(name) => format!("{} {}\n\n{}", DOCUMENT_HEADER, name, body),
        None => body,
    };
    (text, knowledge_used)
}

fn join_passages(results: &[RetrievalResult]) -> String {
    results
        .iter()
        .map(|r| r.text.trim())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// The last `window` turns, oldest first.
pub fn recent_turns(history: &[ConversationTurn], window: usize) -> Vec<ConversationTurn> {
    history[history.len().saturating_sub(window)..].to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tutor_rag_core::models::{Chunk, Document, KnowledgeEntry, SourceMetadata};
    use tutor_rag_core::store::memory::InMemoryStore;

    const TOPICS: [&str; 3] = ["photosynthesis", "volcano", "revolution"];

    /// One axis per topic word plus a small constant so no vector is zero.
    struct TopicEmbedder;

    fn topic_vector(text: &str) -> Vec<f32> {
        let lower = text.to_lowercase();
        let mut v: Vec<f32> = TOPICS
            .iter()
            .map(|t| lower.matches(t).count() as f32)
            .collect();
        v.push(0.05);
        v
    }

    #[async_trait]
    impl EmbeddingProvider for TopicEmbedder {
        fn model_name(&self) -> &str {
            "topics"
        }
        fn dims(&self) -> usize {
            TOPICS.len() + 1
        }
        async fn embed(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|t| topic_vector(t)).collect())
        }
    }

    struct BrokenEmbedder;

    #[async_trait]
    impl EmbeddingProvider for BrokenEmbedder {
        fn model_name(&self) -> &str {
            "broken"
        }
        fn dims(&self) -> usize {
            4
        }
        async fn embed(&self, _: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
            anyhow::bail!("embedding service down")
        }
    }

    fn settings() -> FusionSettings {
        FusionSettings::from_config(&RetrievalConfig::default(), TOPICS.len() + 1)
    }

    fn doc_result(text: &str) -> RetrievalResult {
        RetrievalResult {
            text: text.to_string(),
            source: SourceMetadata::Document {
                document_id: "d".to_string(),
                owner_id: "u".to_string(),
                chunk_index: 0,
                label: "d_0".to_string(),
            },
            score: 0.9,
        }
    }

    fn kb_result(text: &str) -> RetrievalResult {
        RetrievalResult {
            text: text.to_string(),
            source: SourceMetadata::Knowledge {
                source_id: "kb".to_string(),
                title: "KB".to_string(),
                chunk_index: 0,
            },
            score: 0.5,
        }
    }

    async fn seed(store: &InMemoryStore, doc_id: &str, name: &str, texts: &[&str]) {
        let chunks: Vec<Chunk> = texts
            .iter()
            .enumerate()
            .map(|(i, t)| Chunk {
                id: format!("{}-{}", doc_id, i),
                document_id: doc_id.to_string(),
                owner_id: "u1".to_string(),
                chunk_index: i as i64,
                text: t.to_string(),
                overlap: 0,
                label: format!("{}_{}", doc_id, i),
                hash: String::new(),
                embedding: topic_vector(t),
            })
            .collect();
        store.insert_chunks(&chunks).await.unwrap();
        store
            .put_metadata(&Document {
                id: doc_id.to_string(),
                owner_id: "u1".to_string(),
                display_name: name.to_string(),
                content_type: "text/plain".to_string(),
                chunk_count: texts.len() as i64,
                created_at: 0,
            })
            .await
            .unwrap();
    }

    async fn seed_kb(store: &InMemoryStore, texts: &[&str]) {
        let entries: Vec<KnowledgeEntry> = texts
            .iter()
            .enumerate()
            .map(|(i, t)| KnowledgeEntry {
                id: format!("kb-{}", i),
                source_id: "kb".to_string(),
                title: "General".to_string(),
                chunk_index: i as i64,
                text: t.to_string(),
                embedding: topic_vector(t),
            })
            .collect();
        store.insert_entries(&entries).await.unwrap();
    }

    #[test]
    fn test_many_document_results_exclude_knowledge() {
        let docs: Vec<_> = (0..5).map(|i| doc_result(&format!("doc {}", i))).collect();
        let kb: Vec<_> = (0..5).map(|i| kb_result(&format!("kb {}", i))).collect();
        let (text, used) = build_context_text(None, &docs, &kb, 3);
        assert!(!used);
        for i in 0..5 {
            assert!(text.contains(&format!("doc {}", i)));
            assert!(!text.contains(&format!("kb {}", i)));
        }
        assert!(!text.contains(KNOWLEDGE_HEADER));
    }

    #[test]
    fn test_sparse_document_results_append_knowledge_after() {
        let docs = vec![doc_result("doc only")];
        let kb: Vec<_> = (0..5).map(|i| kb_result(&format!("kb {}", i))).collect();
        let (text, used) = build_context_text(None, &docs, &kb, 3);
        assert!(used);
        let doc_pos = text.find("doc only").unwrap();
        let kb_pos = text.find("kb 0").unwrap();
        assert!(text.starts_with(DOCUMENT_CONTENT_HEADER));
        assert!(doc_pos < text.find(KNOWLEDGE_HEADER).unwrap());
        assert!(doc_pos < kb_pos);
    }

    #[test]
    fn test_nothing_retrieved_uses_placeholder() {
        let (text, used) = build_context_text(None, &[], &[], 3);
        assert_eq!(text, NO_CONTENT_PLACEHOLDER);
        assert!(!used);
    }

    #[test]
    fn test_document_name_header() {
        let (text, _) = build_context_text(Some("biology.pdf"), &[doc_result("x")], &[], 3);
        assert!(text.starts_with("CURRENT DOCUMENT: biology.pdf\n\n"));
    }

    #[test]
    fn test_recent_turns_bounded() {
        let history: Vec<_> = (0..10)
            .map(|i| ConversationTurn::user(format!("turn {}", i)))
            .collect();
        let recent = recent_turns(&history, 6);
        assert_eq!(recent.len(), 6);
        assert_eq!(recent[0].content, "turn 4");
        assert_eq!(recent_turns(&history[..2], 6).len(), 2);
    }

    #[tokio::test]
    async fn test_no_documents_and_unreachable_kb() {
        let store = InMemoryStore::new();
        store.set_kb_offline(true);
        let ctx = fuse(
            &store,
            &store,
            &TopicEmbedder,
            &settings(),
            FuseRequest {
                query: "Explain photosynthesis",
                owner_id: "nobody",
                doc_filter: None,
                history: &[],
            },
        )
        .await;
        assert_eq!(ctx.text, NO_CONTENT_PLACEHOLDER);
        assert!(ctx.document_results.is_empty());
    }

    #[tokio::test]
    async fn test_fuse_filters_to_named_document() {
        let store = InMemoryStore::new();
        seed(&store, "bio", "biology.txt", &["Photosynthesis in leaves."]).await;
        seed(&store, "geo", "geology.txt", &["Volcano eruptions and photosynthesis."]).await;
        seed_kb(&store, &["Photosynthesis needs sunlight."]).await;

        let ctx = fuse(
            &store,
            &store,
            &TopicEmbedder,
            &settings(),
            FuseRequest {
                query: "What is photosynthesis?",
                owner_id: "u1",
                doc_filter: Some(OneOrMany::One("bio".to_string())),
                history: &[],
            },
        )
        .await;

        assert_eq!(ctx.document_name.as_deref(), Some("biology.txt"));
        assert_eq!(ctx.document_results.len(), 1);
        assert!(ctx.text.contains("Photosynthesis in leaves."));
        assert!(!ctx.text.contains("Volcano"));
        // One document passage is below the threshold, so shared knowledge follows.
        assert!(ctx.text.contains("Photosynthesis needs sunlight."));
        assert_eq!(ctx.knowledge_results.len(), 1);
        assert_eq!(ctx.document_tier, Some(SearchTier::Primary));
    }

    #[tokio::test]
    async fn test_empty_filter_list_searches_no_documents() {
        let store = InMemoryStore::new();
        seed(&store, "bio", "biology.txt", &["Photosynthesis in leaves."]).await;

        let ctx = fuse(
            &store,
            &store,
            &TopicEmbedder,
            &settings(),
            FuseRequest {
                query: "photosynthesis",
                owner_id: "u1",
                doc_filter: Some(OneOrMany::Many(vec![])),
                history: &[],
            },
        )
        .await;
        assert!(ctx.document_results.is_empty());
        assert_eq!(ctx.document_tier, Some(SearchTier::Skipped));
        assert_eq!(ctx.text, NO_CONTENT_PLACEHOLDER);
    }

    #[tokio::test]
    async fn test_document_store_down_keeps_knowledge() {
        let store = InMemoryStore::new();
        seed_kb(&store, &["Revolution history overview."]).await;
        store.set_offline(true);

        let ctx = fuse(
            &store,
            &store,
            &TopicEmbedder,
            &settings(),
            FuseRequest {
                query: "revolution",
                owner_id: "u1",
                doc_filter: None,
                history: &[],
            },
        )
        .await;
        assert_eq!(ctx.document_tier, None);
        assert!(ctx.text.contains("Revolution history overview."));
    }

    #[tokio::test]
    async fn test_embedding_failure_degrades_to_placeholder() {
        let store = InMemoryStore::new();
        seed(&store, "bio", "biology.txt", &["Photosynthesis in leaves."]).await;
        let history = vec![ConversationTurn::user("hi")];

        let ctx = fuse(
            &store,
            &store,
            &BrokenEmbedder,
            &settings(),
            FuseRequest {
                query: "photosynthesis",
                owner_id: "u1",
                doc_filter: None,
                history: &history,
            },
        )
        .await;
        assert_eq!(ctx.text, NO_CONTENT_PLACEHOLDER);
        assert_eq!(ctx.history, history);
    }
}
