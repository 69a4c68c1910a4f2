//! Embedding client and vector utilities.
//!
//! [`EmbeddingClient`] turns text into vectors through one of the
//! configured backends:
//! - **`disabled`** — every call fails; indexing still works, vectors stay
//!   NULL until a provider is configured.
//! - **`openai`** — `POST /v1/embeddings` against the OpenAI API (or any
//!   compatible server via `embedding.base_url`).
//! - **`ollama`** — `POST /api/embed` against a local Ollama instance.
//!
//! The [`Embedder`] trait is the seam the orchestrator and search path
//! depend on, so tests can substitute a deterministic embedder.
//!
//! Also provides the vector utilities shared by the store and search:
//! - [`cosine_similarity`] — similarity between two embedding vectors
//! - [`vec_to_blob`] — encode a `Vec<f32>` as little-endian bytes for
//!   SQLite BLOB storage
//! - [`blob_to_vec`] — decode a SQLite BLOB back into a `Vec<f32>`
//!
//! # Retry Strategy
//!
//! The OpenAI and Ollama backends use exponential backoff for transient
//! errors:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::time::Duration;

use crate::config::EmbeddingConfig;
use crate::error::AgentError;

/// Anything that can turn text into vectors.
///
/// Batch order is guaranteed: the i-th output vector belongs to the i-th
/// input text.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// False when no provider is configured; callers skip retrieval
    /// instead of calling [`Embedder::embed_batch`] and failing.
    fn is_enabled(&self) -> bool;

    /// Vector dimensionality, 0 when disabled.
    fn dims(&self) -> usize;

    /// Embed a batch of texts, preserving input order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Embed a single query text.
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let results = self.embed_batch(&[text.to_string()]).await?;
        results
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("Empty embedding response"))
    }
}

/// HTTP-backed embedder dispatching on `embedding.provider`.
pub struct EmbeddingClient {
    config: EmbeddingConfig,
    client: reqwest::Client,
}

impl EmbeddingClient {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            config: config.clone(),
            client,
        })
    }

    /// Call the OpenAI embeddings API with retry/backoff.
    async fn embed_openai(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let api_key = std::env::var(&self.config.api_key_env).map_err(|_| {
            AgentError::EmbeddingUnavailable(format!("{} not set", self.config.api_key_env))
        })?;

        let model = self
            .config
            .model
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required"))?;

        let base = self
            .config
            .base_url
            .as_deref()
            .unwrap_or("https://api.openai.com");
        let url = format!("{}/v1/embeddings", base.trim_end_matches('/'));

        let body = serde_json::json!({
            "model": model,
            "input": texts,
        });

        let mut last_err = None;

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                // Exponential backoff: 1s, 2s, 4s, 8s, ...
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .client
                .post(&url)
                .header("Authorization", format!("Bearer {}", api_key))
                .header("Content-Type", "application/json")
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: serde_json::Value = response.json().await?;
                        return parse_openai_response(&json);
                    }

                    // Rate limited or server error — retry
                    if status.as_u16() == 429 || status.is_server_error() {
                        let body_text = response.text().await.unwrap_or_default();
                        last_err = Some(format!("OpenAI API error {}: {}", status, body_text));
                        continue;
                    }

                    // Client error (not 429) — don't retry
                    let body_text = response.text().await.unwrap_or_default();
                    bail!(AgentError::EmbeddingUnavailable(format!(
                        "OpenAI API error {}: {}",
                        status, body_text
                    )));
                }
                Err(e) => {
                    last_err = Some(e.to_string());
                    continue;
                }
            }
        }

        Err(AgentError::EmbeddingUnavailable(
            last_err.unwrap_or_else(|| "embedding failed after retries".to_string()),
        )
        .into())
    }

    /// Call a local Ollama instance's `/api/embed` endpoint with
    /// retry/backoff.
    async fn embed_ollama(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let model = self
            .config
            .model
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required"))?;

        let base = self
            .config
            .base_url
            .as_deref()
            .unwrap_or("http://localhost:11434");
        let url = format!("{}/api/embed", base.trim_end_matches('/'));

        let body = serde_json::json!({
            "model": model,
            "input": texts,
        });

        let mut last_err = None;

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .client
                .post(&url)
                .header("Content-Type", "application/json")
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: serde_json::Value = response.json().await?;
                        return parse_ollama_response(&json);
                    }

                    if status.as_u16() == 429 || status.is_server_error() {
                        let body_text = response.text().await.unwrap_or_default();
                        last_err = Some(format!("Ollama API error {}: {}", status, body_text));
                        continue;
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    bail!(AgentError::EmbeddingUnavailable(format!(
                        "Ollama API error {}: {}",
                        status, body_text
                    )));
                }
                Err(e) => {
                    last_err = Some(format!(
                        "Ollama connection error (is Ollama running at {}?): {}",
                        base, e
                    ));
                    continue;
                }
            }
        }

        Err(AgentError::EmbeddingUnavailable(
            last_err.unwrap_or_else(|| "Ollama embedding failed after retries".to_string()),
        )
        .into())
    }
}

#[async_trait]
impl Embedder for EmbeddingClient {
    fn is_enabled(&self) -> bool {
        self.config.is_enabled()
    }

    fn dims(&self) -> usize {
        self.config.dims.unwrap_or(0)
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut embeddings = Vec::with_capacity(texts.len());

        for batch in texts.chunks(self.config.batch_size.max(1)) {
            let vectors = match self.config.provider.as_str() {
                "openai" => self.embed_openai(batch).await?,
                "ollama" => self.embed_ollama(batch).await?,
                "disabled" => bail!(AgentError::EmbeddingUnavailable(
                    "embedding provider is disabled".to_string()
                )),
                other => bail!("Unknown embedding provider: {}", other),
            };

            if vectors.len() != batch.len() {
                bail!(AgentError::EmbeddingUnavailable(format!(
                    "provider returned {} vectors for {} inputs",
                    vectors.len(),
                    batch.len()
                )));
            }

            if let Some(expected) = self.config.dims {
                ensure_dims(&vectors, expected)?;
            }

            embeddings.extend(vectors);
        }

        Ok(embeddings)
    }
}

/// Reject vectors whose length differs from the configured dimensionality.
/// Always a configuration or provider bug, so no retry.
fn ensure_dims(vectors: &[Vec<f32>], expected: usize) -> Result<()> {
    for v in vectors {
        if v.len() != expected {
            bail!(AgentError::EmbeddingDimensionMismatch {
                expected,
                got: v.len(),
            });
        }
    }
    Ok(())
}

/// Parse the OpenAI embeddings API response JSON.
///
/// Extracts the `data[].embedding` arrays and returns them in order.
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing data array"))?;

    let mut embeddings = Vec::with_capacity(data.len());

    for item in data {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing embedding"))?;

        let vec: Vec<f32> = embedding
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();

        embeddings.push(vec);
    }

    Ok(embeddings)
}

fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let embeddings = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid Ollama response: missing embeddings array"))?;

    let mut result = Vec::with_capacity(embeddings.len());

    for embedding in embeddings {
        let vec: Vec<f32> = embedding
            .as_array()
            .ok_or_else(|| anyhow::anyhow!("Invalid Ollama response: embedding is not an array"))?
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();
        result.push(vec);
    }

    Ok(result)
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
///
/// Each `f32` is stored as 4 bytes in little-endian order, producing a
/// BLOB of `vec.len() × 4` bytes.
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector. Reverses [`vec_to_blob`].
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`; `0.0` for empty vectors, vectors of
/// different lengths, or zero-norm vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vec_blob_roundtrip() {
        let vec = vec![1.0f32, -2.5, 3.125, 0.0, -0.001];
        let blob = vec_to_blob(&vec);
        assert_eq!(blob.len(), 20);
        assert_eq!(blob_to_vec(&blob), vec);
    }

    #[test]
    fn test_cosine_identical_and_opposite() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);

        let a = vec![1.0, 0.0];
        let b = vec![-1.0, 0.0];
        assert!((cosine_similarity(&a, &b) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_orthogonal() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![0.0, 1.0, 0.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_degenerate_inputs() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
        // Zero-norm vector must not divide by zero.
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 2.0]), 0.0);
    }

    #[test]
    fn test_parse_openai_response_in_order() {
        let json = serde_json::json!({
            "data": [
                {"index": 0, "embedding": [0.1, 0.2]},
                {"index": 1, "embedding": [0.3, 0.4]}
            ],
            "model": "text-embedding-3-small"
        });
        let parsed = parse_openai_response(&json).unwrap();
        assert_eq!(parsed.len(), 2);
        assert!((parsed[0][0] - 0.1).abs() < 1e-6);
        assert!((parsed[1][1] - 0.4).abs() < 1e-6);
    }

    #[test]
    fn test_parse_openai_response_missing_data() {
        let json = serde_json::json!({"object": "list"});
        assert!(parse_openai_response(&json).is_err());
    }

    #[test]
    fn test_parse_ollama_response() {
        let json = serde_json::json!({
            "embeddings": [[1.0, 0.0], [0.0, 1.0]]
        });
        let parsed = parse_ollama_response(&json).unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0], vec![1.0f32, 0.0]);
    }

    #[test]
    fn test_ensure_dims_rejects_mismatch() {
        let vectors = vec![vec![0.1f32, 0.2], vec![0.3, 0.4, 0.5]];
        let err = ensure_dims(&vectors, 2).unwrap_err();
        let agent_err = err.downcast_ref::<AgentError>().unwrap();
        assert_eq!(agent_err.code(), "embedding_dimension_mismatch");
    }

    #[tokio::test]
    async fn test_disabled_provider_errors() {
        let client = EmbeddingClient::new(&EmbeddingConfig::default()).unwrap();
        assert!(!client.is_enabled());

        let err = client
            .embed_batch(&["hello".to_string()])
            .await
            .unwrap_err();
        let agent_err = err.downcast_ref::<AgentError>().unwrap();
        assert_eq!(agent_err.code(), "embedding_unavailable");
    }

    #[tokio::test]
    async fn test_empty_batch_is_a_no_op() {
        let client = EmbeddingClient::new(&EmbeddingConfig::default()).unwrap();
        let out = client.embed_batch(&[]).await.unwrap();
        assert!(out.is_empty());
    }
}
