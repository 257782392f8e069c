#![allow(dead_code)]

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tempfile::TempDir;

use tutor_rag::config::{parse_config, Config};
use tutor_rag::engine::Engine;
use tutor_rag::generation::Generator;
use tutor_rag_core::embedding::EmbeddingProvider;
use tutor_rag_core::models::ConversationTurn;

pub const DIMS: usize = 64;

/// Bag-of-words embedder: each lowercase word is hashed (FNV-1a) into one
/// of `DIMS` buckets.
pub struct HashEmbedder;

pub fn hash_vector(text: &str) -> Vec<f32> {
    let mut v = vec![0.0f32; DIMS];
    for word in text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
    {
        let mut h: u64 = 0xcbf29ce484222325;
        for b in word.to_lowercase().bytes() {
            h ^= b as u64;
            h = h.wrapping_mul(0x100000001b3);
        }
        v[(h % DIMS as u64) as usize] += 1.0;
    }
    v
}

#[async_trait]
impl EmbeddingProvider for HashEmbedder {
    fn model_name(&self) -> &str {
        "hash-bow"
    }
    fn dims(&self) -> usize {
        DIMS
    }
    async fn embed(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| hash_vector(t)).collect())
    }
}

/// Replies with a fixed string (or fails) and records every user turn.
pub struct ScriptedGenerator {
    reply: Option<String>,
    pub user_turns: Mutex<Vec<String>>,
}

impl ScriptedGenerator {
    pub fn replying(reply: &str) -> Arc<Self> {
        Arc::new(Self {
            reply: Some(reply.to_string()),
            user_turns: Mutex::new(Vec::new()),
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            reply: None,
            user_turns: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    fn model_name(&self) -> &str {
        "scripted"
    }

    async fn generate(
        &self,
        _system: &str,
        _history: &[ConversationTurn],
        user_turn: &str,
    ) -> anyhow::Result<String> {
        self.user_turns.lock().unwrap().push(user_turn.to_string());
        match &self.reply {
            Some(r) => Ok(r.clone()),
            None => anyhow::bail!("generator offline"),
        }
    }
}

pub fn test_config(root: &Path) -> Config {
    let toml = format!(
        r#"[db]
path = "{}/data/tutor.sqlite"

[retrieval]
top_k = 5
store_timeout_ms = 2000
"#,
        root.display()
    );
    parse_config(&toml).unwrap()
}

/// A SQLite-backed engine in a fresh temporary directory.
pub async fn sqlite_engine(generator: Arc<ScriptedGenerator>) -> (TempDir, Config, Engine) {
    let tmp = TempDir::new().unwrap();
    let config = test_config(tmp.path());
    let engine = Engine::from_config_with(&config, Arc::new(HashEmbedder), generator)
        .await
        .unwrap();
    (tmp, config, engine)
}
