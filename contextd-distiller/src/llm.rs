//! LLM synthesis client contract (spec §4.7.2).
//!
//! Grounded on the teacher's `OpenAIEmbeddingProvider`
//! (`memory-core/src/embeddings/openai/client.rs`): a `reqwest::Client`
//! wrapped in a thin struct, bearer auth, exponential-backoff retry on
//! `429`/5xx, the rest of the error space surfaced immediately.

use async_trait::async_trait;
use contextd_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A chat-completion backend used to synthesize a consolidated memory from
/// a cluster's prompt. Kept minimal — one call in, one string out — since
/// the distiller owns prompt construction and response parsing.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Send `prompt` and return the raw completion text.
    async fn complete(&self, prompt: &str) -> Result<String>;
}

/// Configuration for [`OpenAiCompatibleClient`].
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub timeout: Duration,
    pub max_retries: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: String::new(),
            model: "gpt-4o-mini".to_string(),
            timeout: Duration::from_secs(30),
            max_retries: 3,
        }
    }
}

/// Client for any OpenAI-compatible `/chat/completions` endpoint.
pub struct OpenAiCompatibleClient {
    http: reqwest::Client,
    config: LlmConfig,
}

impl OpenAiCompatibleClient {
    /// Build a client for the given configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if the underlying HTTP client
    /// cannot be constructed.
    pub fn new(config: LlmConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::Configuration(e.to_string()))?;
        Ok(Self { http, config })
    }
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: String,
}

#[async_trait]
impl LlmClient for OpenAiCompatibleClient {
    async fn complete(&self, prompt: &str) -> Result<String> {
        let url = format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'));
        let body = ChatRequest {
            model: &self.config.model,
            messages: vec![ChatMessage { role: "user", content: prompt }],
            temperature: 0.2,
        };

        let mut last_error = None;
        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                let delay = Duration::from_millis(200 * 2u64.pow(attempt - 1));
                tracing::debug!(attempt, ?delay, "retrying LLM synthesis request");
                tokio::time::sleep(delay).await;
            }

            let response = match self
                .http
                .post(&url)
                .bearer_auth(&self.config.api_key)
                .json(&body)
                .send()
                .await
            {
                Ok(resp) => resp,
                Err(e) if e.is_timeout() => {
                    last_error = Some(Error::Timeout(e.to_string()));
                    continue;
                }
                Err(e) => {
                    last_error = Some(Error::Unreachable(e.to_string()));
                    continue;
                }
            };

            let status = response.status();
            if status.as_u16() == 429 || status.is_server_error() {
                let text = response.text().await.unwrap_or_default();
                tracing::warn!(%status, "retryable LLM API error");
                last_error = Some(Error::Unreachable(format!("{status}: {text}")));
                continue;
            }
            if !status.is_success() {
                let text = response.text().await.unwrap_or_default();
                return Err(Error::WriteFailed(format!("LLM API error {status}: {text}")));
            }

            let parsed: ChatResponse = response.json().await.map_err(|e| Error::WriteFailed(e.to_string()))?;
            return parsed
                .choices
                .into_iter()
                .next()
                .map(|c| c.message.content)
                .ok_or_else(|| Error::WriteFailed("LLM response had no choices".into()));
        }

        Err(last_error.unwrap_or_else(|| Error::Unreachable("all LLM retry attempts failed".into())))
    }
}

/// Deterministic mock used in tests and offline/dev environments: echoes a
/// well-formed synthesis block derived from the prompt's first member line.
/// Mirrors `contextd_core::MockEmbeddingProvider`'s role for embeddings.
pub struct MockLlmClient {
    pub response: String,
}

impl MockLlmClient {
    #[must_use]
    pub fn fixed(response: impl Into<String>) -> Self {
        Self { response: response.into() }
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, _prompt: &str) -> Result<String> {
        Ok(self.response.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_returns_fixed_response() {
        let client = MockLlmClient::fixed("TITLE: x\nCONTENT: y\nOUTCOME: success");
        let out = client.complete("anything").await.unwrap();
        assert!(out.contains("TITLE: x"));
    }
}
