//! The engine facade.
//!
//! [`Engine`] wires one store, one knowledge base, an embedding provider,
//! and a generator together and exposes the operations the CLI and the
//! HTTP server call. It is cheap to clone; every handle is an `Arc`.
//!
//! [`Engine::from_config`] builds the production wiring: a SQLite store
//! wrapped in [`TimedStore`] so every store call carries
//! `retrieval.store_timeout_ms`. [`Engine::new`] accepts any store, which
//! is how tests run against [`InMemoryStore`](tutor_rag_core::store::memory::InMemoryStore).

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use tutor_rag_core::embedding::{embed_one, EmbeddingProvider};
use tutor_rag_core::models::{DocScope, Document, OneOrMany};
use tutor_rag_core::search::{search_documents, search_knowledge, SearchError, SearchOutcome};
use tutor_rag_core::store::{CollectionCounts, KnowledgeStore, Store, StoreError};

use crate::config::Config;
use crate::embedding::create_provider;
use crate::fusion::{self, AssembledContext, FuseRequest, FusionSettings};
use crate::generation::{create_generator, Generator};
use crate::ingest::{self, IngestError, IngestSettings, KnowledgeReport};
use crate::lifecycle::{self, DeletedCount};
use crate::pipeline::{Answer, AnswerRequest, Pipeline};
use crate::sqlite_store::SqliteStore;
use crate::timeout::TimedStore;
use crate::{db, migrate};

/// Failure of a query-driven search.
#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("query must not be empty")]
    EmptyQuery,
    #[error("query embedding failed: {0:#}")]
    Embedding(anyhow::Error),
    #[error(transparent)]
    Search(#[from] SearchError),
}

#[derive(Clone)]
pub struct Engine {
    store: Arc<dyn Store>,
    kb: Arc<dyn KnowledgeStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    generator: Arc<dyn Generator>,
    ingest_settings: IngestSettings,
    fusion_settings: FusionSettings,
    sqlite: Option<SqliteStore>,
}

impl Engine {
    pub fn new(
        store: Arc<dyn Store>,
        kb: Arc<dyn KnowledgeStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        generator: Arc<dyn Generator>,
        config: &Config,
    ) -> Self {
        let fusion_settings = FusionSettings::from_config(&config.retrieval, embedder.dims());
        Self {
            store,
            kb,
            embedder,
            generator,
            ingest_settings: IngestSettings::from_config(config),
            fusion_settings,
            sqlite: None,
        }
    }

    /// Connect to the configured database, apply migrations, and build
    /// providers from config.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let embedder = create_provider(&config.embedding)?;
        let generator = create_generator(&config.generation)?;
        Self::from_config_with(config, embedder, generator).await
    }

    /// Like [`Engine::from_config`] with caller-supplied providers.
    pub async fn from_config_with(
        config: &Config,
        embedder: Arc<dyn EmbeddingProvider>,
        generator: Arc<dyn Generator>,
    ) -> Result<Self> {
        let pool = db::connect(config).await?;
        migrate::run_migrations(&pool)
            .await
            .context("Failed to apply schema migrations")?;

        let sqlite = SqliteStore::new(pool);
        let timed = Arc::new(TimedStore::new(
            sqlite.clone(),
            Duration::from_millis(config.retrieval.store_timeout_ms),
        ));

        let mut engine = Self::new(timed.clone(), timed, embedder, generator, config);
        engine.sqlite = Some(sqlite);
        Ok(engine)
    }

    pub async fn ingest(
        &self,
        file_bytes: &[u8],
        owner_id: &str,
        display_name: &str,
    ) -> Result<Document, IngestError> {
        ingest::ingest_document(
            self.store.as_ref(),
            self.embedder.as_ref(),
            &self.ingest_settings,
            file_bytes,
            owner_id,
            display_name,
        )
        .await
    }

    pub async fn ingest_knowledge(
        &self,
        file_bytes: &[u8],
        title: &str,
        source_id: &str,
    ) -> Result<KnowledgeReport, IngestError> {
        ingest::ingest_knowledge(
            self.kb.as_ref(),
            self.embedder.as_ref(),
            &self.ingest_settings,
            file_bytes,
            title,
            source_id,
        )
        .await
    }

    /// Search one owner's documents. `k` overrides `retrieval.top_k`.
    pub async fn search(
        &self,
        query: &str,
        owner_id: &str,
        doc_filter: Option<OneOrMany<String>>,
        k: Option<usize>,
    ) -> Result<SearchOutcome, QueryError> {
        let query_vec = self.embed_query(query).await?;
        let mut params = self.fusion_settings.documents.clone();
        if let Some(k) = k {
            params.k = k;
        }
        let scope = DocScope::from_filter(doc_filter);
        Ok(search_documents(self.store.as_ref(), &query_vec, owner_id, &scope, &params).await?)
    }

    pub async fn search_knowledge(
        &self,
        query: &str,
        k: Option<usize>,
    ) -> Result<SearchOutcome, QueryError> {
        let query_vec = self.embed_query(query).await?;
        let mut params = self.fusion_settings.knowledge.clone();
        if let Some(k) = k {
            params.k = k;
        }
        Ok(search_knowledge(self.kb.as_ref(), &query_vec, &params).await)
    }

    pub async fn fuse(&self, request: FuseRequest<'_>) -> AssembledContext {
        fusion::fuse(
            self.store.as_ref(),
            self.kb.as_ref(),
            self.embedder.as_ref(),
            &self.fusion_settings,
            request,
        )
        .await
    }

    /// Retrieve and generate. Never fails: a generator error becomes the
    /// apology reply.
    pub async fn answer(&self, request: AnswerRequest) -> Answer {
        Pipeline::new(
            self.store.as_ref(),
            self.kb.as_ref(),
            self.embedder.as_ref(),
            self.generator.as_ref(),
            &self.fusion_settings,
        )
        .run(request)
        .await
    }

    pub async fn remove(
        &self,
        owner_id: &str,
        doc_filter: Option<OneOrMany<String>>,
    ) -> Result<DeletedCount, StoreError> {
        lifecycle::remove(self.store.as_ref(), owner_id, doc_filter).await
    }

    pub async fn list_documents(&self, owner_id: &str) -> Result<Vec<Document>, StoreError> {
        self.store
            .list_documents(owner_id, &DocScope::AllDocuments)
            .await
    }

    /// Recreate and repopulate the vector index tables. SQLite only.
    pub async fn rebuild_index(&self) -> Result<(u64, u64)> {
        let sqlite = self
            .sqlite
            .as_ref()
            .context("index rebuild needs the SQLite store")?;
        Ok(sqlite.rebuild_index().await?)
    }

    /// Per-collection record counts for one owner. SQLite only.
    pub async fn counts(&self, owner_id: &str) -> Result<CollectionCounts> {
        let sqlite = self
            .sqlite
            .as_ref()
            .context("collection counts need the SQLite store")?;
        Ok(sqlite.counts(owner_id).await?)
    }

    async fn embed_query(&self, query: &str) -> Result<Vec<f32>, QueryError> {
        if query.trim().is_empty() {
            return Err(QueryError::EmptyQuery);
        }
        embed_one(self.embedder.as_ref(), query)
            .await
            .map_err(QueryError::Embedding)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;
    use crate::generation::DisabledGenerator;
    use crate::pipeline::APOLOGY;
    use async_trait::async_trait;
    use tutor_rag_core::search::SearchTier;
    use tutor_rag_core::store::memory::InMemoryStore;

    struct LetterEmbedder;

    #[async_trait]
    impl EmbeddingProvider for LetterEmbedder {
        fn model_name(&self) -> &str {
            "letters"
        }
        fn dims(&self) -> usize {
            26
        }
        async fn embed(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
            Ok(texts
                .iter()
                .map(|t| {
                    let mut v = vec![0.0; 26];
                    for c in t.to_ascii_lowercase().bytes().filter(u8::is_ascii_lowercase) {
                        v[(c - b'a') as usize] += 1.0;
                    }
                    v
                })
                .collect())
        }
    }

    fn engine(store: Arc<InMemoryStore>) -> Engine {
        let config = parse_config("[db]\npath = \"unused.sqlite\"\n").unwrap();
        Engine::new(
            store.clone(),
            store,
            Arc::new(LetterEmbedder),
            Arc::new(DisabledGenerator),
            &config,
        )
    }

    #[tokio::test]
    async fn test_ingest_search_remove() {
        let store = Arc::new(InMemoryStore::new());
        let engine = engine(store.clone());

        let doc = engine
            .ingest(b"Cells divide by mitosis.", "u1", "cells.txt")
            .await
            .unwrap();
        let outcome = engine.search("mitosis", "u1", None, None).await.unwrap();
        assert_eq!(outcome.tier, SearchTier::Primary);
        assert_eq!(outcome.results.len(), 1);

        let listed = engine.list_documents("u1").await.unwrap();
        assert_eq!(listed, vec![doc]);

        let deleted = engine.remove("u1", None).await.unwrap();
        assert_eq!(deleted.documents, 1);
        let outcome = engine.search("mitosis", "u1", None, None).await.unwrap();
        assert!(outcome.results.is_empty());
    }

    #[tokio::test]
    async fn test_empty_query_rejected() {
        let engine = engine(Arc::new(InMemoryStore::new()));
        assert!(matches!(
            engine.search("  ", "u1", None, None).await,
            Err(QueryError::EmptyQuery)
        ));
    }

    #[tokio::test]
    async fn test_answer_with_disabled_generator_apologises() {
        let engine = engine(Arc::new(InMemoryStore::new()));
        let answer = engine
            .answer(AnswerRequest {
                question: "What is mitosis?".to_string(),
                owner_id: "u1".to_string(),
                doc_filter: None,
                history: Vec::new(),
            })
            .await;
        assert_eq!(answer.reply, APOLOGY);
        assert!(answer.generation_failed);
    }

    #[tokio::test]
    async fn test_sqlite_only_operations_need_sqlite() {
        let engine = engine(Arc::new(InMemoryStore::new()));
        assert!(engine.rebuild_index().await.is_err());
        assert!(engine.counts("u1").await.is_err());
    }
}
