//! Language-model providers.
//!
//! Implementations of [`folio_core::generation::LanguageModel`]:
//! - **[`OpenAIChat`]**: `POST /v1/chat/completions` (needs `OPENAI_API_KEY`).
//! - **[`OllamaChat`]**: `POST /api/chat` on a local Ollama instance.
//! - **[`ExtractiveModel`]**: offline; answers with the best retrieved passage.

use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;
use folio_core::generation::{LanguageModel, Prompt};

use crate::config::GenerationConfig;
use crate::http;

const OPENAI_DEFAULT_URL: &str = "https://api.openai.com";
const OLLAMA_DEFAULT_URL: &str = "http://localhost:11434";

/// Reply of the extractive model when nothing was retrieved.
pub const NO_PASSAGE_ANSWER: &str = "I don't know: no passage in the indexed documents matches this question.";

pub struct OpenAIChat {
    client: reqwest::Client,
    model: String,
    url: String,
    api_key: String,
    max_retries: u32,
}

impl OpenAIChat {
    pub fn new(config: &GenerationConfig, model: &str) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;
        let base = config.url.as_deref().unwrap_or(OPENAI_DEFAULT_URL);
        Ok(Self {
            client: http::client(config.timeout())?,
            model: model.to_string(),
            url: format!("{}/v1/chat/completions", base.trim_end_matches('/')),
            api_key,
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl LanguageModel for OpenAIChat {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &Prompt, temperature: f32) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": prompt.messages(),
            "temperature": temperature,
        });
        let json = http::post_json(
            &self.client,
            "OpenAI",
            &self.url,
            Some(&self.api_key),
            &body,
            self.max_retries,
        )
        .await?;
        json.pointer("/choices/0/message/content")
            .and_then(|c| c.as_str())
            .map(str::to_string)
            .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing choices[0].message.content"))
    }
}

pub struct OllamaChat {
    client: reqwest::Client,
    model: String,
    url: String,
    max_retries: u32,
}

impl OllamaChat {
    pub fn new(config: &GenerationConfig, model: &str) -> Result<Self> {
        let base = config.url.as_deref().unwrap_or(OLLAMA_DEFAULT_URL);
        Ok(Self {
            client: http::client(config.timeout())?,
            model: model.to_string(),
            url: format!("{}/api/chat", base.trim_end_matches('/')),
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl LanguageModel for OllamaChat {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &Prompt, temperature: f32) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": prompt.messages(),
            "stream": false,
            "options": { "temperature": temperature },
        });
        let json =
            http::post_json(&self.client, "Ollama", &self.url, None, &body, self.max_retries).await?;
        json.pointer("/message/content")
            .and_then(|c| c.as_str())
            .map(str::to_string)
            .ok_or_else(|| anyhow::anyhow!("Invalid Ollama response: missing message.content"))
    }
}

/// Answers with the top-ranked passage, whitespace collapsed.
#[derive(Debug, Default)]
pub struct ExtractiveModel;

#[async_trait]
impl LanguageModel for ExtractiveModel {
    fn model_name(&self) -> &str {
        "extractive"
    }

    async fn generate(&self, prompt: &Prompt, _temperature: f32) -> Result<String> {
        Ok(match prompt.context.first() {
            Some(passage) => passage.split_whitespace().collect::<Vec<_>>().join(" "),
            None => NO_PASSAGE_ANSWER.to_string(),
        })
    }
}

/// Build the model named by `generation.provider`.
pub fn create_model(config: &GenerationConfig) -> Result<Arc<dyn LanguageModel>> {
    create_named_model(config, &config.model)
}

/// Same provider and endpoint as `config`, different model (used for translation).
pub fn create_named_model(config: &GenerationConfig, model: &str) -> Result<Arc<dyn LanguageModel>> {
    match config.provider.as_str() {
        "openai" => Ok(Arc::new(OpenAIChat::new(config, model)?)),
        "ollama" => Ok(Arc::new(OllamaChat::new(config, model)?)),
        "extractive" => Ok(Arc::new(ExtractiveModel)),
        other => bail!("Unknown generation provider: {}", other),
    }
}
