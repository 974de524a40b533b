//! Qdrant Cloud Inference embedding client for 768-wide sentence models.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tracing::warn;

use super::{is_retryable_error, retry_backoff, should_retry, EmbeddingProvider};
use crate::embeddings::{EmbeddingConfiguration, EmbeddingDimension, EmbeddingResult};
use crate::error::{Result, RetrievalError};

const PROVIDER: &str = "qdrant";

/// Async embeddings client that talks to Qdrant Cloud Inference endpoints.
#[derive(Clone)]
pub struct QdrantEmbedder {
    client: Client,
    endpoint: String,
    models: Vec<String>,
    max_retries: usize,
    batch_size: usize,
}

impl QdrantEmbedder {
    /// Builds a new Qdrant embeddings client.
    ///
    /// # Arguments
    /// * `api_key` - Value for the `api-key` header (usually from `QDRANT_API_KEY` env var)
    /// * `endpoint` - Full inference endpoint, e.g. `https://cluster-id.cloud.qdrant.io/inference/text`
    /// * `models` - 768-wide models advertised by the cluster (e.g. `sentence-transformers/all-mpnet-base-v2`)
    pub fn new(
        api_key: &str,
        endpoint: &str,
        models: Vec<String>,
        timeout: Duration,
        max_retries: usize,
        batch_size: usize,
    ) -> Result<Self> {
        if api_key.trim().is_empty() {
            return Err(RetrievalError::Configuration(
                "missing Qdrant API key".to_string(),
            ));
        }
        if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
            return Err(RetrievalError::Configuration(
                "Qdrant endpoint must be an http(s) URL".to_string(),
            ));
        }
        if models.iter().all(|model| model.trim().is_empty()) {
            return Err(RetrievalError::Configuration(
                "at least one Qdrant model name is required".to_string(),
            ));
        }
        let mut headers = HeaderMap::new();
        headers.insert(
            "api-key",
            HeaderValue::from_str(api_key.trim())
                .map_err(|_| RetrievalError::Configuration("invalid Qdrant API key".to_string()))?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .map_err(|err| {
                RetrievalError::Configuration(format!("failed to build Qdrant HTTP client: {err}"))
            })?;
        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            models: models
                .into_iter()
                .map(|model| model.trim().to_string())
                .filter(|model| !model.is_empty())
                .collect(),
            max_retries: max_retries.max(1),
            batch_size: batch_size.max(1),
        })
    }

    async fn send(&self, request: &InferenceRequest<'_>) -> Result<InferenceResponse> {
        let mut attempt = 0usize;
        loop {
            match self.client.post(&self.endpoint).json(request).send().await {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        return resp.json().await.map_err(|err| {
                            RetrievalError::provider(
                                PROVIDER,
                                format!("failed to parse inference response: {err}"),
                            )
                        });
                    }
                    let body = resp
                        .text()
                        .await
                        .unwrap_or_else(|_| "<body unavailable>".to_string());
                    if should_retry(status) && attempt + 1 < self.max_retries {
                        attempt += 1;
                        warn!(%status, attempt, "retrying Qdrant inference request");
                        sleep(retry_backoff(attempt)).await;
                        continue;
                    }
                    return Err(RetrievalError::provider(
                        PROVIDER,
                        format!("inference request failed ({status}): {body}"),
                    ));
                }
                Err(err) => {
                    if is_retryable_error(&err) && attempt + 1 < self.max_retries {
                        attempt += 1;
                        warn!(error = %err, attempt, "retrying Qdrant inference request");
                        sleep(retry_backoff(attempt)).await;
                        continue;
                    }
                    return Err(RetrievalError::provider(PROVIDER, err.to_string()));
                }
            }
        }
    }
}

#[async_trait]
impl EmbeddingProvider for QdrantEmbedder {
    fn name(&self) -> &str {
        PROVIDER
    }

    fn supports(&self, model: &str, dimension: EmbeddingDimension) -> bool {
        dimension == EmbeddingDimension::D768 && self.models.iter().any(|known| known == model)
    }

    fn batch_size(&self) -> usize {
        self.batch_size
    }

    async fn embed_batch(
        &self,
        inputs: &[String],
        configuration: &EmbeddingConfiguration,
    ) -> Result<Vec<EmbeddingResult>> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }
        if inputs.len() > self.batch_size {
            return Err(RetrievalError::Configuration(format!(
                "batch of {} exceeds configured max {}",
                inputs.len(),
                self.batch_size
            )));
        }
        let request = InferenceRequest {
            model: &configuration.model,
            inputs,
        };
        let payload = self.send(&request).await?;
        let vectors = payload.into_embeddings(inputs.len())?;
        let generated_at = Utc::now();
        // Inference responses carry no token accounting.
        Ok(inputs
            .iter()
            .zip(vectors)
            .map(|(text, vector)| EmbeddingResult {
                vector,
                model: configuration.model.clone(),
                provider: PROVIDER.to_string(),
                dimension: configuration.dimension,
                prompt_tokens: 0,
                total_tokens: 0,
                embedded_text: text.clone(),
                generated_at,
            })
            .collect())
    }
}

#[derive(Serialize)]
struct InferenceRequest<'a> {
    model: &'a str,
    #[serde(rename = "input")]
    inputs: &'a [String],
}

#[derive(Debug, Deserialize)]
struct InferenceResponse {
    #[serde(default)]
    data: Vec<InferenceData>,
    #[serde(default)]
    embeddings: Vec<Vec<f32>>,
}

impl InferenceResponse {
    /// `data` entries must carry an index whenever more than one input was
    /// sent; the bare `embeddings` array is positional by protocol.
    fn into_embeddings(self, expected_len: usize) -> Result<Vec<Vec<f32>>> {
        if !self.data.is_empty() {
            if self.data.len() != expected_len {
                return Err(RetrievalError::EmbeddingOrder(format!(
                    "Qdrant returned {} embeddings for {} inputs",
                    self.data.len(),
                    expected_len
                )));
            }
            if expected_len > 1 && self.data.iter().any(|d| d.index.is_none()) {
                return Err(RetrievalError::EmbeddingOrder(
                    "Qdrant response entries lack indices; cannot pair with inputs".to_string(),
                ));
            }
            let mut data = self.data;
            data.sort_by_key(|d| d.index.unwrap_or(0));
            for (position, entry) in data.iter().enumerate() {
                if entry.index.unwrap_or(0) != position {
                    return Err(RetrievalError::EmbeddingOrder(format!(
                        "Qdrant response indices are not a permutation of 0..{expected_len}"
                    )));
                }
            }
            return Ok(data.into_iter().map(|d| d.embedding).collect());
        }
        if !self.embeddings.is_empty() {
            if self.embeddings.len() != expected_len {
                return Err(RetrievalError::EmbeddingOrder(format!(
                    "Qdrant returned {} embeddings for {} inputs",
                    self.embeddings.len(),
                    expected_len
                )));
            }
            return Ok(self.embeddings);
        }
        Err(RetrievalError::provider(
            PROVIDER,
            "response missing embedding payloads",
        ))
    }
}

#[derive(Debug, Deserialize)]
struct InferenceData {
    embedding: Vec<f32>,
    #[serde(default)]
    index: Option<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(raw: &str) -> InferenceResponse {
        serde_json::from_str(raw).unwrap()
    }

    #[test]
    fn unindexed_batches_are_rejected() {
        let payload = parse(r#"{"data":[{"embedding":[1.0]},{"embedding":[2.0]}]}"#);
        assert!(matches!(
            payload.into_embeddings(2),
            Err(RetrievalError::EmbeddingOrder(_))
        ));
    }

    #[test]
    fn single_unindexed_entry_is_fine() {
        let payload = parse(r#"{"data":[{"embedding":[1.0]}]}"#);
        assert_eq!(payload.into_embeddings(1).unwrap(), vec![vec![1.0]]);
    }

    #[test]
    fn indexed_entries_are_reordered() {
        let payload = parse(r#"{"data":[{"embedding":[2.0],"index":1},{"embedding":[1.0],"index":0}]}"#);
        assert_eq!(payload.into_embeddings(2).unwrap(), vec![vec![1.0], vec![2.0]]);
    }

    #[test]
    fn empty_payload_is_a_provider_error() {
        let payload = parse("{}");
        assert!(matches!(
            payload.into_embeddings(1),
            Err(RetrievalError::EmbeddingProvider { .. })
        ));
    }

    #[test]
    fn only_serves_768() {
        let embedder = QdrantEmbedder::new(
            "key",
            "https://cluster.cloud.qdrant.io/inference/text",
            vec!["sentence-transformers/all-mpnet-base-v2".to_string()],
            Duration::from_secs(1),
            1,
            16,
        )
        .unwrap();
        assert!(embedder.supports("sentence-transformers/all-mpnet-base-v2", EmbeddingDimension::D768));
        assert!(!embedder.supports("sentence-transformers/all-mpnet-base-v2", EmbeddingDimension::D1536));
    }
}
