//! Dual-path vector search over user documents and the knowledge base.
//!
//! The search functions operate entirely through the [`Store`] and
//! [`KnowledgeStore`] traits. The caller embeds the query and passes the
//! vector in.
//!
//! # Document search
//!
//! 1. An empty document selection returns nothing without touching the store.
//! 2. **Primary:** ask the store's vector index for `k × oversample`
//!    candidates, rank them, and keep the top `k`.
//! 3. **Fallback:** if the primary call fails and the policy allows it, scan
//!    every chunk in scope, score each stored embedding with cosine
//!    similarity, rank, and keep the top `k`.
//! 4. If both tiers fail, the error is returned.
//!
//! # Knowledge-base search
//!
//! Same primary query shape against the shared collection. Its fallback is
//! a separate policy and is disabled by default: user documents are the
//! material that must survive an index outage, so only they get the
//! brute-force tier unless configuration opts the knowledge base in. On
//! failure the knowledge-base search logs and yields no results.
//!
//! # Ranking
//!
//! Score descending, then `chunk_index` ascending, then document (or
//! source) id ascending. Both tiers use the same ordering, so a scan returns
//! what the index would have returned for the same data.

use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::embedding::{check_dims, cosine_similarity, DimensionMismatch};
use crate::models::{Chunk, DocScope, KnowledgeEntry, RetrievalResult};
use crate::store::{KnowledgeStore, Store, StoreError};

/// What to do when the index-assisted query fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackPolicy {
    /// Scan the collection and score every stored vector.
    BruteForce,
    /// Give up on the collection.
    Disabled,
}

/// Retrieval tuning for one collection.
#[derive(Debug, Clone)]
pub struct SearchParams {
    /// Results to return.
    pub k: usize,
    /// Candidate multiplier for the index query.
    pub oversample: usize,
    pub fallback: FallbackPolicy,
    /// Model dimension the query vector must match, when known.
    pub expected_dims: Option<usize>,
}

impl SearchParams {
    /// Defaults for user documents: oversample ×4, brute-force fallback.
    pub fn documents(k: usize) -> Self {
        Self {
            k,
            oversample: 4,
            fallback: FallbackPolicy::BruteForce,
            expected_dims: None,
        }
    }

    /// Defaults for the knowledge base: oversample ×4, no fallback.
    pub fn knowledge(k: usize) -> Self {
        Self {
            k,
            oversample: 4,
            fallback: FallbackPolicy::Disabled,
            expected_dims: None,
        }
    }

    pub fn with_fallback(mut self, fallback: FallbackPolicy) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn with_dims(mut self, dims: usize) -> Self {
        self.expected_dims = Some(dims);
        self
    }

    /// Number of candidates requested from the index.
    pub fn candidate_limit(&self) -> usize {
        self.k.saturating_mul(self.oversample.max(1))
    }
}

/// Which tier produced a [`SearchOutcome`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchTier {
    /// The index-assisted query answered.
    Primary,
    /// The index failed and the brute-force scan answered.
    Fallback,
    /// Nothing was selected, so no store call was made.
    Skipped,
    /// Every allowed tier failed; results are empty.
    Unavailable,
}

#[derive(Debug, Clone)]
pub struct SearchOutcome {
    pub results: Vec<RetrievalResult>,
    pub tier: SearchTier,
}

impl SearchOutcome {
    fn empty(tier: SearchTier) -> Self {
        Self {
            results: Vec::new(),
            tier,
        }
    }

    /// True when the primary tier failed but results were still produced.
    pub fn is_degraded(&self) -> bool {
        self.tier == SearchTier::Fallback
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error("document search failed: {0}")]
    StoreUnavailable(#[source] StoreError),
    #[error(transparent)]
    DimensionMismatch(#[from] DimensionMismatch),
}

/// Search one owner's documents.
///
/// Returns an error only when the query vector has the wrong dimension or
/// when every allowed tier failed.
pub async fn search_documents<S: Store + ?Sized>(
    store: &S,
    query_vec: &[f32],
    owner_id: &str,
    scope: &DocScope,
    params: &SearchParams,
) -> Result<SearchOutcome, SearchError> {
    if let Some(dims) = params.expected_dims {
        check_dims(query_vec, dims)?;
    }
    if params.k == 0 || scope.selects_nothing() {
        return Ok(SearchOutcome::empty(SearchTier::Skipped));
    }

    let primary = store
        .vector_search(query_vec, owner_id, scope, params.candidate_limit())
        .await;

    let primary_err = match primary {
        Ok(hits) => {
            let mut ranked: Vec<(Chunk, f32)> =
                hits.into_iter().map(|h| (h.chunk, h.score)).collect();
            rank_chunks(&mut ranked);
            ranked.truncate(params.k);
            debug!(owner_id, hits = ranked.len(), "index-assisted search");
            return Ok(SearchOutcome {
                results: ranked
                    .iter()
                    .map(|(c, s)| RetrievalResult::from_chunk(c, *s))
                    .collect(),
                tier: SearchTier::Primary,
            });
        }
        Err(e) => e,
    };

    if params.fallback == FallbackPolicy::Disabled {
        return Err(SearchError::StoreUnavailable(primary_err));
    }

    warn!(owner_id, error = %primary_err, "index search failed, falling back to scan");

    let chunks = store.scan_chunks(owner_id, scope).await.map_err(|e| {
        error!(owner_id, error = %e, "fallback scan failed");
        SearchError::StoreUnavailable(e)
    })?;

    let results = brute_force_chunks(query_vec, chunks, params.k);
    debug!(owner_id, hits = results.len(), "brute-force search");
    Ok(SearchOutcome {
        results,
        tier: SearchTier::Fallback,
    })
}

/// Search the shared knowledge base.
///
/// Never fails: any error is logged and yields an empty outcome with
/// [`SearchTier::Unavailable`].
pub async fn search_knowledge<K: KnowledgeStore + ?Sized>(
    kb: &K,
    query_vec: &[f32],
    params: &SearchParams,
) -> SearchOutcome {
    if let Some(dims) = params.expected_dims {
        if let Err(e) = check_dims(query_vec, dims) {
            warn!(error = %e, "knowledge-base query rejected");
            return SearchOutcome::empty(SearchTier::Unavailable);
        }
    }
    if params.k == 0 {
        return SearchOutcome::empty(SearchTier::Skipped);
    }

    let primary_err = match kb.search_entries(query_vec, params.candidate_limit()).await {
        Ok(hits) => {
            let mut ranked: Vec<(KnowledgeEntry, f32)> =
                hits.into_iter().map(|h| (h.entry, h.score)).collect();
            rank_entries(&mut ranked);
            ranked.truncate(params.k);
            return SearchOutcome {
                results: ranked
                    .iter()
                    .map(|(e, s)| RetrievalResult::from_entry(e, *s))
                    .collect(),
                tier: SearchTier::Primary,
            };
        }
        Err(e) => e,
    };

    match params.fallback {
        FallbackPolicy::Disabled => {
            warn!(error = %primary_err, "knowledge-base search failed, continuing without it");
            SearchOutcome::empty(SearchTier::Unavailable)
        }
        FallbackPolicy::BruteForce => {
            warn!(error = %primary_err, "knowledge-base index failed, falling back to scan");
            match kb.scan_entries().await {
                Ok(entries) => {
                    let mut ranked: Vec<(KnowledgeEntry, f32)> = entries
                        .into_iter()
                        .filter(|e| !e.embedding.is_empty())
                        .map(|e| {
                            let score = cosine_similarity(query_vec, &e.embedding);
                            (e, score)
                        })
                        .collect();
                    rank_entries(&mut ranked);
                    ranked.truncate(params.k);
                    SearchOutcome {
                        results: ranked
                            .iter()
                            .map(|(e, s)| RetrievalResult::from_entry(e, *s))
                            .collect(),
                        tier: SearchTier::Fallback,
                    }
                }
                Err(e) => {
                    warn!(error = %e, "knowledge-base scan failed");
                    SearchOutcome::empty(SearchTier::Unavailable)
                }
            }
        }
    }
}

/// Score every chunk that carries an embedding and keep the best `k`.
pub fn brute_force_chunks(query_vec: &[f32], chunks: Vec<Chunk>, k: usize) -> Vec<RetrievalResult> {
    let mut ranked: Vec<(Chunk, f32)> = chunks
        .into_iter()
        .filter(|c| !c.embedding.is_empty())
        .map(|c| {
            let score = cosine_similarity(query_vec, &c.embedding);
            (c, score)
        })
        .collect();
    rank_chunks(&mut ranked);
    ranked.truncate(k);
    ranked
        .iter()
        .map(|(c, s)| RetrievalResult::from_chunk(c, *s))
        .collect()
}

fn rank_chunks(ranked: &mut [(Chunk, f32)]) {
    ranked.sort_by(|(a, sa), (b, sb)| {
        sb.total_cmp(sa)
            .then(a.chunk_index.cmp(&b.chunk_index))
            .then_with(|| a.document_id.cmp(&b.document_id))
    });
}

fn rank_entries(ranked: &mut [(KnowledgeEntry, f32)]) {
    ranked.sort_by(|(a, sa), (b, sb)| {
        sb.total_cmp(sa)
            .then(a.chunk_index.cmp(&b.chunk_index))
            .then_with(|| a.source_id.cmp(&b.source_id))
    });
}
