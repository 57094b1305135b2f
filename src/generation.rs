//! Generation capability client.
//!
//! [`Generator`] is the seam the answer pipeline depends on;
//! [`GenerationClient`] speaks the chat-completions protocol in blocking
//! and SSE-streaming modes. Provider `openai` targets
//! `https://api.openai.com/v1`; provider `ollama` targets Ollama's
//! OpenAI-compatible endpoint at `http://localhost:11434/v1`. Either can
//! be redirected with a url override.
//!
//! Streaming is push-based: fragments are sent into a channel as they
//! arrive off the wire. A closed channel means the consumer is gone and
//! the stream stops cleanly; a transport or API failure is returned as an
//! [`Error::ExternalService`] after whatever fragments already made it
//! out.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use serde::Deserialize;
use tokio::sync::mpsc;

use crate::config::GenerationConfig;
use crate::error::{Error, Result};

#[async_trait]
pub trait Generator: Send + Sync {
    /// Produce the full completion for `prompt` in one call.
    async fn generate(&self, prompt: &str) -> Result<String>;

    /// Stream completion fragments for `prompt` into `tx` as they are
    /// produced. Returns once the stream is exhausted, the consumer hangs
    /// up, or the capability fails.
    async fn generate_stream(&self, prompt: &str, tx: mpsc::Sender<String>) -> Result<()>;
}

pub struct GenerationClient {
    config: GenerationConfig,
    http: reqwest::Client,
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

#[derive(Deserialize)]
struct ChatStreamResponse {
    choices: Vec<ChatStreamChoice>,
}

#[derive(Deserialize)]
struct ChatStreamChoice {
    delta: ChatDelta,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ChatDelta {
    content: Option<String>,
}

impl GenerationClient {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::ExternalService(e.to_string()))?;

        Ok(Self {
            config: config.clone(),
            http,
        })
    }

    fn base_url(&self) -> &str {
        match self.config.provider.as_str() {
            "ollama" => self.config.url.as_deref().unwrap_or("http://localhost:11434/v1"),
            _ => self.config.url.as_deref().unwrap_or("https://api.openai.com/v1"),
        }
    }

    fn api_key(&self) -> Result<Option<String>> {
        match self.config.provider.as_str() {
            "openai" => std::env::var("OPENAI_API_KEY").map(Some).map_err(|_| {
                Error::Validation("OPENAI_API_KEY environment variable not set".to_string())
            }),
            _ => Ok(None),
        }
    }

    async fn send_chat(&self, prompt: &str, stream: bool) -> Result<reqwest::Response> {
        if !self.config.is_enabled() {
            return Err(Error::ExternalService(
                "generation provider is disabled".to_string(),
            ));
        }
        let model = self.config.model.as_deref().ok_or_else(|| {
            Error::Validation("generation.model is not configured".to_string())
        })?;

        let body = serde_json::json!({
            "model": model,
            "messages": [{ "role": "user", "content": prompt }],
            "temperature": self.config.temperature,
            "max_tokens": self.config.max_tokens,
            "stream": stream,
        });

        let mut req = self
            .http
            .post(format!("{}/chat/completions", self.base_url()))
            .json(&body);
        if let Some(key) = self.api_key()? {
            req = req.bearer_auth(key);
        }

        let response = req
            .send()
            .await
            .map_err(|e| Error::ExternalService(format!("generation request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(Error::ExternalService(format!(
                "generation API error {}: {}",
                status, text
            )));
        }

        Ok(response)
    }
}

#[async_trait]
impl Generator for GenerationClient {
    async fn generate(&self, prompt: &str) -> Result<String> {
        let response = self.send_chat(prompt, false).await?;
        let data: ChatResponse = response
            .json()
            .await
            .map_err(|e| Error::ExternalService(e.to_string()))?;

        Ok(data
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .unwrap_or_default())
    }

    async fn generate_stream(&self, prompt: &str, tx: mpsc::Sender<String>) -> Result<()> {
        let response = self.send_chat(prompt, true).await?;

        let mut stream = response.bytes_stream();
        let mut buffer = String::new();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk
                .map_err(|e| Error::ExternalService(format!("generation stream failed: {}", e)))?;
            buffer.push_str(&String::from_utf8_lossy(&chunk));

            while let Some(pos) = buffer.find('\n') {
                let line = buffer[..pos].trim().to_string();
                buffer.drain(..=pos);

                let Some(data) = line.strip_prefix("data: ") else {
                    continue;
                };
                if data == "[DONE]" {
                    return Ok(());
                }

                let Ok(parsed) = serde_json::from_str::<ChatStreamResponse>(data) else {
                    continue;
                };
                let Some(choice) = parsed.choices.first() else {
                    continue;
                };

                if let Some(content) = &choice.delta.content {
                    if !content.is_empty() && tx.send(content.clone()).await.is_err() {
                        // Consumer hung up; nothing left to do.
                        return Ok(());
                    }
                }
                if choice.finish_reason.is_some() {
                    return Ok(());
                }
            }
        }

        Ok(())
    }
}
