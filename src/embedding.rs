//! Embedding capability client.
//!
//! [`Embedder`] is the seam the rest of the pipeline depends on;
//! [`EmbeddingClient`] is the HTTP implementation, dispatching on the
//! configured provider:
//! - **openai** — `POST {url}/embeddings` with a bearer key from
//!   `OPENAI_API_KEY` (default url `https://api.openai.com/v1`)
//! - **ollama** — `POST {url}/api/embed` (default url
//!   `http://localhost:11434`)
//! - **disabled** — every call fails with a descriptive error
//!
//! Transient failures (HTTP 429, 5xx, network errors) retry with
//! exponential backoff (1s, 2s, 4s, ... capped at 32s); other client
//! errors fail immediately. All failures surface as
//! [`Error::ExternalService`].
//!
//! Also provides the vector utilities used by the passage store:
//! [`vec_to_blob`] / [`blob_to_vec`] for little-endian f32 BLOB storage
//! and [`cosine_similarity`] for ranking.

use std::time::Duration;

use async_trait::async_trait;

use crate::config::EmbeddingConfig;
use crate::error::{Error, Result};

/// Anything that can turn text into vectors. Production code uses
/// [`EmbeddingClient`]; tests inject a deterministic in-process
/// implementation.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a batch of texts, one vector per input, in input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Embed a single query string.
    async fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        let texts = [text.to_string()];
        let vectors = self.embed(&texts).await?;
        vectors
            .into_iter()
            .next()
            .ok_or_else(|| Error::ExternalService("empty embedding response".to_string()))
    }
}

pub struct EmbeddingClient {
    config: EmbeddingConfig,
    http: reqwest::Client,
}

impl EmbeddingClient {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::ExternalService(e.to_string()))?;

        Ok(Self {
            config: config.clone(),
            http,
        })
    }

    fn model(&self) -> Result<&str> {
        self.config
            .model
            .as_deref()
            .ok_or_else(|| Error::Validation("embedding.model is not configured".to_string()))
    }

    /// POST a JSON body, retrying 429/5xx/network errors with exponential
    /// backoff. Other 4xx responses fail immediately.
    async fn post_with_retry(
        &self,
        url: &str,
        bearer: Option<&str>,
        body: &serde_json::Value,
    ) -> Result<serde_json::Value> {
        let mut last_err = None;

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let mut req = self.http.post(url).json(body);
            if let Some(key) = bearer {
                req = req.bearer_auth(key);
            }

            match req.send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return response
                            .json()
                            .await
                            .map_err(|e| Error::ExternalService(e.to_string()));
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    let message =
                        format!("embedding API error {} from {}: {}", status, url, body_text);

                    if status.as_u16() == 429 || status.is_server_error() {
                        last_err = Some(Error::ExternalService(message));
                        continue;
                    }
                    return Err(Error::ExternalService(message));
                }
                Err(e) => {
                    last_err = Some(Error::ExternalService(format!(
                        "embedding request to {} failed: {}",
                        url, e
                    )));
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| {
            Error::ExternalService("embedding failed after retries".to_string())
        }))
    }

    async fn embed_openai(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let api_key = std::env::var("OPENAI_API_KEY").map_err(|_| {
            Error::Validation("OPENAI_API_KEY environment variable not set".to_string())
        })?;

        let base = self
            .config
            .url
            .as_deref()
            .unwrap_or("https://api.openai.com/v1");
        let body = serde_json::json!({
            "model": self.model()?,
            "input": texts,
        });

        let json = self
            .post_with_retry(&format!("{}/embeddings", base), Some(&api_key), &body)
            .await?;

        let data = json
            .get("data")
            .and_then(|d| d.as_array())
            .ok_or_else(|| {
                Error::ExternalService("invalid embedding response: missing data array".to_string())
            })?;

        data.iter()
            .map(|item| {
                item.get("embedding")
                    .and_then(|e| e.as_array())
                    .map(parse_vector)
                    .ok_or_else(|| {
                        Error::ExternalService(
                            "invalid embedding response: missing embedding".to_string(),
                        )
                    })
            })
            .collect()
    }

    async fn embed_ollama(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let base = self
            .config
            .url
            .as_deref()
            .unwrap_or("http://localhost:11434");
        let body = serde_json::json!({
            "model": self.model()?,
            "input": texts,
        });

        let json = self
            .post_with_retry(&format!("{}/api/embed", base), None, &body)
            .await?;

        let embeddings = json
            .get("embeddings")
            .and_then(|e| e.as_array())
            .ok_or_else(|| {
                Error::ExternalService(
                    "invalid embedding response: missing embeddings array".to_string(),
                )
            })?;

        embeddings
            .iter()
            .map(|e| {
                e.as_array().map(parse_vector).ok_or_else(|| {
                    Error::ExternalService(
                        "invalid embedding response: embedding is not an array".to_string(),
                    )
                })
            })
            .collect()
    }
}

fn parse_vector(values: &Vec<serde_json::Value>) -> Vec<f32> {
    values
        .iter()
        .map(|v| v.as_f64().unwrap_or(0.0) as f32)
        .collect()
}

#[async_trait]
impl Embedder for EmbeddingClient {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        match self.config.provider.as_str() {
            "openai" => self.embed_openai(texts).await,
            "ollama" => self.embed_ollama(texts).await,
            "disabled" => Err(Error::ExternalService(
                "embedding provider is disabled".to_string(),
            )),
            other => Err(Error::Validation(format!(
                "unknown embedding provider: {}",
                other
            ))),
        }
    }
}

/// Encode a float vector as a BLOB of little-endian f32 bytes.
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB produced by [`vec_to_blob`] back into a float vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

/// Cosine similarity in `[-1.0, 1.0]`. Returns `0.0` for empty vectors or
/// mismatched lengths.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let (mut dot, mut norm_a, mut norm_b) = (0.0f32, 0.0f32, 0.0f32);
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }
    dot / denom
}
