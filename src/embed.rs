//! Embedder (C4): batched text-to-vector embedding with retry/backoff
//!
//! Mirrors the teacher's `LlmClient::embed` / `OllamaClient` split
//! (`src/llm.rs`): callers depend on the `Embedder` trait, never on
//! `reqwest` directly.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{EmbedError, Result};

const MAX_BATCH_SIZE: usize = 100;
const MAX_RETRY_ATTEMPTS: u32 = 3;
const RETRY_BASE: Duration = Duration::from_secs(1);

/// Contract for turning text into vectors (C4)
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embedding dimension this embedder produces
    fn dimension(&self) -> usize;

    /// Embed a single text
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed a batch of texts. Output length always matches input length;
    /// empty/whitespace-only entries short-circuit to a zero vector without
    /// ever being sent to the remote API.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Real implementation of [`Embedder`] against an OpenAI-compatible batch
/// embeddings endpoint.
pub struct OpenAiEmbedder {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    dimension: usize,
}

impl OpenAiEmbedder {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>, dimension: usize) -> Self {
        Self::with_base_url("https://api.openai.com", api_key, model, dimension)
    }

    pub fn with_base_url(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        dimension: usize,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
            dimension,
        }
    }

    async fn embed_non_empty_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut attempt = 0u32;
        loop {
            let request = EmbeddingRequest {
                input: texts.to_vec(),
                model: self.model.clone(),
            };

            let response = self
                .client
                .post(format!("{}/v1/embeddings", self.base_url))
                .bearer_auth(&self.api_key)
                .json(&request)
                .send()
                .await;

            let response = match response {
                Ok(response) => response,
                Err(err) => {
                    if attempt >= MAX_RETRY_ATTEMPTS {
                        return Err(EmbedError::RetriesExhausted {
                            attempts: attempt,
                            last_error: err.to_string(),
                        }
                        .into());
                    }
                    attempt += 1;
                    backoff_sleep(attempt).await;
                    continue;
                }
            };

            let status = response.status();

            if status.is_success() {
                let parsed: EmbeddingResponse = response
                    .json()
                    .await
                    .map_err(|e| EmbedError::ClientError(e.to_string()))?;
                let vectors: Vec<Vec<f32>> =
                    parsed.data.into_iter().map(|d| d.embedding).collect();
                if vectors.len() != texts.len() {
                    return Err(EmbedError::MisalignedBatch {
                        expected: texts.len(),
                        actual: vectors.len(),
                    }
                    .into());
                }
                return Ok(vectors);
            }

            if status.as_u16() == 429 || status.is_server_error() {
                if attempt >= MAX_RETRY_ATTEMPTS {
                    return Err(EmbedError::RetriesExhausted {
                        attempts: attempt,
                        last_error: format!("status {status}"),
                    }
                    .into());
                }
                attempt += 1;
                backoff_sleep(attempt).await;
                continue;
            }

            let body = response.text().await.unwrap_or_default();
            return Err(EmbedError::ClientError(format!("{status}: {body}")).into());
        }
    }
}

async fn backoff_sleep(attempt: u32) {
    tokio::time::sleep(RETRY_BASE * 2u32.saturating_pow(attempt)).await;
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest {
    input: Vec<String>,
    model: String,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let results = self.embed_batch(std::slice::from_ref(&text.to_string())).await?;
        Ok(results.into_iter().next().unwrap_or_default())
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut results = vec![Vec::new(); texts.len()];
        let mut non_empty_indices = Vec::new();
        let mut non_empty_texts = Vec::new();

        for (i, text) in texts.iter().enumerate() {
            if text.trim().is_empty() {
                results[i] = vec![0.0; self.dimension];
            } else {
                non_empty_indices.push(i);
                non_empty_texts.push(text.clone());
            }
        }

        for batch_indices in non_empty_indices.chunks(MAX_BATCH_SIZE) {
            let offset = non_empty_indices
                .iter()
                .position(|i| i == &batch_indices[0])
                .unwrap();
            let batch_texts = &non_empty_texts[offset..offset + batch_indices.len()];
            let vectors = self.embed_non_empty_batch(batch_texts).await?;
            for (local_idx, global_idx) in batch_indices.iter().enumerate() {
                results[*global_idx] = vectors[local_idx].clone();
            }
        }

        Ok(results)
    }
}

#[cfg(test)]
mockall::mock! {
    pub EmbedderTestDouble {}

    #[async_trait]
    impl Embedder for EmbedderTestDouble {
        fn dimension(&self) -> usize;
        async fn embed(&self, text: &str) -> Result<Vec<f32>>;
        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
    }
}

#[cfg(test)]
pub use MockEmbedderTestDouble as MockEmbedder;
