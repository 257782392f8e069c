//! Text-generation backends.
//!
//! A [`Generator`] turns a system instruction, prior conversation turns,
//! and a final user turn into reply text. Backends make exactly one
//! request per call: retrying is the caller's decision, and the answer
//! pipeline turns any failure into a fixed apology instead.
//!
//! | Config Value | Backend |
//! |-------------|---------|
//! | `"disabled"` | [`DisabledGenerator`] |
//! | `"openai"` | [`OpenAIGenerator`] (`/v1/chat/completions`) |
//! | `"ollama"` | [`OllamaGenerator`] (`/api/chat`) |

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use tutor_rag_core::models::ConversationTurn;

use crate::config::GenerationConfig;

#[async_trait]
pub trait Generator: Send + Sync {
    fn model_name(&self) -> &str;

    async fn generate(
        &self,
        system: &str,
        history: &[ConversationTurn],
        user_turn: &str,
    ) -> Result<String>;
}

/// Chat message list in the `{role, content}` shape both APIs accept.
fn chat_messages(
    system: &str,
    history: &[ConversationTurn],
    user_turn: &str,
) -> Vec<serde_json::Value> {
    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(serde_json::json!({ "role": "system", "content": system }));
    for turn in history {
        messages.push(serde_json::json!({ "role": turn.role.as_str(), "content": turn.content }));
    }
    messages.push(serde_json::json!({ "role": "user", "content": user_turn }));
    messages
}

async fn post_once(
    client: &reqwest::Client,
    url: &str,
    bearer: Option<&str>,
    body: &serde_json::Value,
    service: &str,
) -> Result<serde_json::Value> {
    let mut request = client.post(url).json(body);
    if let Some(key) = bearer {
        request = request.bearer_auth(key);
    }
    let response = request
        .send()
        .await
        .map_err(|e| anyhow::anyhow!("{} connection error ({}): {}", service, url, e))?;
    let status = response.status();
    if !status.is_success() {
        let body_text = response.text().await.unwrap_or_default();
        bail!("{} API error {}: {}", service, status, body_text);
    }
    Ok(response.json().await?)
}

fn non_empty(text: Option<&str>, service: &str) -> Result<String> {
    match text {
        Some(t) if !t.trim().is_empty() => Ok(t.to_string()),
        _ => bail!("{} returned an empty completion", service),
    }
}

pub struct DisabledGenerator;

#[async_trait]
impl Generator for DisabledGenerator {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn generate(&self, _: &str, _: &[ConversationTurn], _: &str) -> Result<String> {
        bail!("Generation provider is disabled. Set [generation] provider in config.")
    }
}

/// Chat completions against the OpenAI API (or a compatible server via
/// `generation.url`). Requires `OPENAI_API_KEY`.
pub struct OpenAIGenerator {
    model: String,
    url: String,
    api_key: String,
    temperature: f32,
    max_tokens: u32,
    client: reqwest::Client,
}

impl OpenAIGenerator {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("generation.model required for OpenAI provider"))?;
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;
        let base = config
            .url
            .clone()
            .unwrap_or_else(|| "https://api.openai.com".to_string());
        Ok(Self {
            model,
            url: format!("{}/v1/chat/completions", base.trim_end_matches('/')),
            api_key,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(config.timeout_secs))
                .build()?,
        })
    }
}

#[async_trait]
impl Generator for OpenAIGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(
        &self,
        system: &str,
        history: &[ConversationTurn],
        user_turn: &str,
    ) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": chat_messages(system, history, user_turn),
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
        });
        let json = post_once(&self.client, &self.url, Some(&self.api_key), &body, "OpenAI").await?;
        non_empty(
            json.pointer("/choices/0/message/content")
                .and_then(|c| c.as_str()),
            "OpenAI",
        )
    }
}

/// Chat against a local Ollama instance (default `http://localhost:11434`).
pub struct OllamaGenerator {
    model: String,
    url: String,
    temperature: f32,
    max_tokens: u32,
    client: reqwest::Client,
}

impl OllamaGenerator {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("generation.model required for Ollama provider"))?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "http://localhost:11434".to_string());
        Ok(Self {
            model,
            url: format!("{}/api/chat", url.trim_end_matches('/')),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(config.timeout_secs))
                .build()?,
        })
    }
}

#[async_trait]
impl Generator for OllamaGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(
        &self,
        system: &str,
        history: &[ConversationTurn],
        user_turn: &str,
    ) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": chat_messages(system, history, user_turn),
            "stream": false,
            "options": {
                "temperature": self.temperature,
                "num_predict": self.max_tokens,
            },
        });
        let json = post_once(&self.client, &self.url, None, &body, "Ollama").await?;
        non_empty(
            json.pointer("/message/content").and_then(|c| c.as_str()),
            "Ollama",
        )
    }
}

pub fn create_generator(config: &GenerationConfig) -> Result<Arc<dyn Generator>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledGenerator)),
        "openai" => Ok(Arc::new(OpenAIGenerator::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaGenerator::new(config)?)),
        other => bail!("Unknown generation provider: {}", other),
    }
}
