//! Embedding service client.
//!
//! The service speaks the OpenAI-compatible `/embeddings` protocol. Batch
//! responses are not guaranteed to preserve submission order, so every
//! response is re-sorted by its own `index` field before use.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use pult_core::KnowledgeSettings;

use crate::errors::{KnowledgeError, KnowledgeResult};

/// Hard cap on texts per embedding request, independent of configuration.
pub const EMBEDDING_BATCH_MAX: usize = 100;

/// Seam for the external embedding service. Implementations must return one
/// vector per input, in input order.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed_batch(&self, inputs: &[String]) -> KnowledgeResult<Vec<Vec<f32>>>;
}

/// HTTP client for an OpenAI-compatible embedding endpoint.
#[derive(Debug, Clone)]
pub struct HttpEmbeddingClient {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
    batch_size: usize,
}

impl HttpEmbeddingClient {
    pub fn new(settings: &KnowledgeSettings) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: embeddings_endpoint(&settings.embedding_url),
            api_key: settings.embedding_api_key.clone(),
            model: settings.embedding_model.clone(),
            batch_size: settings.embedding_batch.clamp(1, EMBEDDING_BATCH_MAX),
        }
    }

    async fn embed_one_batch(&self, inputs: &[String]) -> KnowledgeResult<Vec<Vec<f32>>> {
        let body = EmbedRequest {
            model: self.model.clone(),
            input: inputs.to_vec(),
        };

        let mut request = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(KnowledgeError::Embedding(format!(
                "embedding request failed: {status} {text}"
            )));
        }

        let payload: EmbedResponse = response.json().await?;
        let mut data = payload.data;
        if data.len() != inputs.len() {
            return Err(KnowledgeError::Embedding(format!(
                "embedding response returned {} vectors for {} inputs",
                data.len(),
                inputs.len()
            )));
        }

        // batch order is not contractual; the index field is
        data.sort_by_key(|entry| entry.index);
        Ok(data.into_iter().map(|entry| entry.embedding).collect())
    }
}

#[async_trait]
impl EmbeddingProvider for HttpEmbeddingClient {
    async fn embed_batch(&self, inputs: &[String]) -> KnowledgeResult<Vec<Vec<f32>>> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }

        let mut vectors = Vec::with_capacity(inputs.len());
        for batch in inputs.chunks(self.batch_size) {
            vectors.extend(self.embed_one_batch(batch).await?);
        }

        Ok(vectors)
    }
}

fn embeddings_endpoint(base_url: &str) -> String {
    let normalized = base_url.trim_end_matches('/');
    if normalized.ends_with("/embeddings") {
        return normalized.to_string();
    }
    format!("{normalized}/embeddings")
}

#[derive(Debug, Clone, Serialize)]
struct EmbedRequest {
    model: String,
    input: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct EmbedResponse {
    data: Vec<EmbedEntry>,
}

#[derive(Debug, Clone, Deserialize)]
struct EmbedEntry {
    index: usize,
    embedding: Vec<f32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_appends_embeddings_once() {
        assert_eq!(
            embeddings_endpoint("https://api.openai.com/v1"),
            "https://api.openai.com/v1/embeddings"
        );
        assert_eq!(
            embeddings_endpoint("https://api.openai.com/v1/"),
            "https://api.openai.com/v1/embeddings"
        );
        assert_eq!(
            embeddings_endpoint("https://example.com/v1/embeddings"),
            "https://example.com/v1/embeddings"
        );
    }

    #[test]
    fn test_response_is_resorted_by_index() {
        let payload = serde_json::json!({
            "data": [
                {"index": 2, "embedding": [3.0]},
                {"index": 0, "embedding": [1.0]},
                {"index": 1, "embedding": [2.0]},
            ]
        });
        let mut parsed: EmbedResponse = serde_json::from_value(payload).unwrap();
        parsed.data.sort_by_key(|entry| entry.index);
        let flat: Vec<f32> = parsed
            .data
            .into_iter()
            .map(|entry| entry.embedding[0])
            .collect();
        assert_eq!(flat, vec![1.0, 2.0, 3.0]);
    }
}
