//! TOML configuration.
//!
//! ```toml
//! [db]
//! path = "./data/tutor.sqlite"
//!
//! [chunking]
//! chunk_size = 1000
//! chunk_overlap = 200
//!
//! [embedding]
//! provider = "ollama"
//! model = "nomic-embed-text"
//! dims = 768
//!
//! [generation]
//! provider = "ollama"
//! model = "llama3.1"
//!
//! [retrieval]
//! top_k = 5
//! document_fallback = "brute_force"
//! knowledge_fallback = "disabled"
//!
//! [server]
//! bind = "127.0.0.1:7340"
//! ```
//!
//! Every section except `[db]` may be omitted. API keys are read from the
//! environment (`OPENAI_API_KEY`), never from this file.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use tutor_rag_core::chunk::ChunkingParams;
use tutor_rag_core::search::{FallbackPolicy, SearchParams};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

impl ChunkingConfig {
    pub fn params(&self) -> ChunkingParams {
        ChunkingParams {
            chunk_size: self.chunk_size,
            chunk_overlap: self.chunk_overlap,
        }
    }
}

fn default_chunk_size() -> usize {
    1000
}
fn default_chunk_overlap() -> usize {
    200
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            concurrency: default_concurrency(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_concurrency() -> usize {
    4
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_generation_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            url: None,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_generation_timeout_secs(),
        }
    }
}

fn default_temperature() -> f32 {
    0.3
}
fn default_max_tokens() -> u32 {
    1024
}
fn default_generation_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_oversample")]
    pub oversample: usize,
    #[serde(default = "default_top_k")]
    pub kb_top_k: usize,
    /// Knowledge-base results are only appended when the document search
    /// returned fewer results than this.
    #[serde(default = "default_kb_min_document_results")]
    pub kb_min_document_results: usize,
    /// Most recent conversation turns passed to the generator.
    #[serde(default = "default_history_window")]
    pub history_window: usize,
    #[serde(default = "default_store_timeout_ms")]
    pub store_timeout_ms: u64,
    #[serde(default = "default_document_fallback")]
    pub document_fallback: FallbackPolicy,
    // Kept separate from `document_fallback`: shared knowledge ranks below
    // the user's own material, so it does not get the scan tier by default.
    #[serde(default = "default_knowledge_fallback")]
    pub knowledge_fallback: FallbackPolicy,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            oversample: default_oversample(),
            kb_top_k: default_top_k(),
            kb_min_document_results: default_kb_min_document_results(),
            history_window: default_history_window(),
            store_timeout_ms: default_store_timeout_ms(),
            document_fallback: default_document_fallback(),
            knowledge_fallback: default_knowledge_fallback(),
        }
    }
}

impl RetrievalConfig {
    pub fn document_params(&self, k: usize) -> SearchParams {
        SearchParams {
            k,
            oversample: self.oversample,
            fallback: self.document_fallback,
            expected_dims: None,
        }
    }

    pub fn knowledge_params(&self, k: usize) -> SearchParams {
        SearchParams {
            k,
            oversample: self.oversample,
            fallback: self.knowledge_fallback,
            expected_dims: None,
        }
    }
}

fn default_top_k() -> usize {
    5
}
fn default_oversample() -> usize {
    4
}
fn default_kb_min_document_results() -> usize {
    3
}
fn default_history_window() -> usize {
    6
}
fn default_store_timeout_ms() -> u64 {
    5000
}
fn default_document_fallback() -> FallbackPolicy {
    FallbackPolicy::BruteForce
}
fn default_knowledge_fallback() -> FallbackPolicy {
    FallbackPolicy::Disabled
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7340".to_string()
}

/// Parse configuration from TOML text and validate it.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

fn validate(config: &Config) -> Result<()> {
    if config.chunking.chunk_size == 0 {
        anyhow::bail!("chunking.chunk_size must be > 0");
    }
    if config.chunking.chunk_overlap >= config.chunking.chunk_size {
        anyhow::bail!("chunking.chunk_overlap must be < chunking.chunk_size");
    }

    if config.retrieval.top_k == 0 {
        anyhow::bail!("retrieval.top_k must be >= 1");
    }
    if config.retrieval.oversample == 0 {
        anyhow::bail!("retrieval.oversample must be >= 1");
    }
    if config.retrieval.store_timeout_ms == 0 {
        anyhow::bail!("retrieval.store_timeout_ms must be > 0");
    }

    if config.embedding.is_enabled() {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            anyhow::bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() && config.embedding.provider != "local" {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }
    if config.embedding.batch_size == 0 || config.embedding.concurrency == 0 {
        anyhow::bail!("embedding.batch_size and embedding.concurrency must be >= 1");
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" | "local" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, ollama, or local.",
            other
        ),
    }

    match config.generation.provider.as_str() {
        "disabled" => {}
        "openai" | "ollama" => {
            if config.generation.model.is_none() {
                anyhow::bail!(
                    "generation.model must be specified when provider is '{}'",
                    config.generation.provider
                );
            }
        }
        other => anyhow::bail!(
            "Unknown generation provider: '{}'. Must be disabled, openai, or ollama.",
            other
        ),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = parse_config("[db]\npath = \"./data/tutor.sqlite\"\n").unwrap();
        assert_eq!(config.chunking.chunk_size, 1000);
        assert_eq!(config.chunking.chunk_overlap, 200);
        assert_eq!(config.retrieval.top_k, 5);
        assert_eq!(config.retrieval.kb_min_document_results, 3);
        assert_eq!(config.retrieval.history_window, 6);
        assert_eq!(config.retrieval.document_fallback, FallbackPolicy::BruteForce);
        assert_eq!(config.retrieval.knowledge_fallback, FallbackPolicy::Disabled);
        assert_eq!(config.server.bind, "127.0.0.1:7340");
        assert!(!config.embedding.is_enabled());
    }

    #[test]
    fn test_knowledge_fallback_opt_in() {
        let config = parse_config(
            "[db]\npath = \"x.sqlite\"\n[retrieval]\nknowledge_fallback = \"brute_force\"\n",
        )
        .unwrap();
        let params = config.retrieval.knowledge_params(3);
        assert_eq!(params.fallback, FallbackPolicy::BruteForce);
        assert_eq!(params.candidate_limit(), 12);
    }

    #[test]
    fn test_overlap_must_be_smaller_than_size() {
        let err = parse_config(
            "[db]\npath = \"x.sqlite\"\n[chunking]\nchunk_size = 100\nchunk_overlap = 100\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("chunk_overlap"));
    }

    #[test]
    fn test_enabled_embedding_requires_dims() {
        let err = parse_config(
            "[db]\npath = \"x.sqlite\"\n[embedding]\nprovider = \"ollama\"\nmodel = \"nomic-embed-text\"\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("embedding.dims"));
    }

    #[test]
    fn test_unknown_generation_provider() {
        let err = parse_config("[db]\npath = \"x.sqlite\"\n[generation]\nprovider = \"magic\"\n")
            .unwrap_err();
        assert!(err.to_string().contains("Unknown generation provider"));
    }

    #[test]
    fn test_unknown_fallback_policy_rejected() {
        assert!(parse_config(
            "[db]\npath = \"x.sqlite\"\n[retrieval]\ndocument_fallback = \"sometimes\"\n"
        )
        .is_err());
    }
}
