//! OpenAI-based embedding client implementation.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tracing::warn;

use super::{apportion_tokens, is_retryable_error, retry_backoff, should_retry, EmbeddingProvider};
use crate::embeddings::{EmbeddingConfiguration, EmbeddingDimension, EmbeddingResult};
use crate::error::{Result, RetrievalError};

/// Models that accept the `dimensions` parameter at both supported widths.
pub const OPENAI_MODELS: &[&str] = &["text-embedding-3-small", "text-embedding-3-large"];

const PROVIDER: &str = "openai";

/// Async embeddings client that talks to OpenAI-compatible endpoints.
#[derive(Clone)]
pub struct OpenAiEmbedder {
    client: Client,
    endpoint: String,
    max_retries: usize,
    batch_size: usize,
}

impl OpenAiEmbedder {
    /// Builds a new OpenAI embeddings client.
    pub fn new(
        api_key: &str,
        base_url: &str,
        timeout: Duration,
        max_retries: usize,
        batch_size: usize,
    ) -> Result<Self> {
        if api_key.trim().is_empty() {
            return Err(RetrievalError::Configuration(
                "missing OpenAI API key".to_string(),
            ));
        }
        let mut headers = HeaderMap::new();
        let auth = format!("Bearer {}", api_key.trim());
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&auth)
                .map_err(|_| RetrievalError::Configuration("invalid OpenAI API key".to_string()))?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .map_err(|err| {
                RetrievalError::Configuration(format!("failed to build OpenAI HTTP client: {err}"))
            })?;
        let endpoint = format!("{}/embeddings", base_url.trim_end_matches('/'));
        Ok(Self {
            client,
            endpoint,
            max_retries: max_retries.max(1),
            batch_size: batch_size.max(1),
        })
    }

    async fn send(&self, request: &EmbeddingRequest<'_>) -> Result<EmbeddingResponse> {
        let mut attempt = 0usize;
        loop {
            match self.client.post(&self.endpoint).json(request).send().await {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        return resp.json().await.map_err(|err| {
                            RetrievalError::provider(
                                PROVIDER,
                                format!("failed to parse embedding response: {err}"),
                            )
                        });
                    }
                    let body = resp
                        .text()
                        .await
                        .unwrap_or_else(|_| "<body unavailable>".to_string());
                    if should_retry(status) && attempt + 1 < self.max_retries {
                        attempt += 1;
                        warn!(%status, attempt, "retrying OpenAI embeddings request");
                        sleep(retry_backoff(attempt)).await;
                        continue;
                    }
                    return Err(RetrievalError::provider(
                        PROVIDER,
                        format!("embeddings request failed ({status}): {body}"),
                    ));
                }
                Err(err) => {
                    if is_retryable_error(&err) && attempt + 1 < self.max_retries {
                        attempt += 1;
                        warn!(error = %err, attempt, "retrying OpenAI embeddings request");
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
impl EmbeddingProvider for OpenAiEmbedder {
    fn name(&self) -> &str {
        PROVIDER
    }

    fn supports(&self, model: &str, _dimension: EmbeddingDimension) -> bool {
        OPENAI_MODELS.contains(&model)
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
        let request = EmbeddingRequest {
            model: &configuration.model,
            input: inputs,
            dimensions: configuration.dimension.width(),
        };
        let parsed = self.send(&request).await?;
        let vectors = ordered_embeddings(parsed.data, inputs.len())?;
        let usage = parsed.usage.unwrap_or_default();
        let prompt_shares = apportion_tokens(usage.prompt_tokens, inputs);
        let total_shares = apportion_tokens(usage.total_tokens, inputs);
        let model = parsed.model.unwrap_or_else(|| configuration.model.clone());
        let generated_at = Utc::now();
        Ok(inputs
            .iter()
            .zip(vectors)
            .enumerate()
            .map(|(position, (text, vector))| EmbeddingResult {
                vector,
                model: model.clone(),
                provider: PROVIDER.to_string(),
                dimension: configuration.dimension,
                prompt_tokens: prompt_shares[position],
                total_tokens: total_shares[position],
                embedded_text: text.clone(),
                generated_at,
            })
            .collect())
    }
}

/// Orders entries by their `index` and rejects anything that is not exactly
/// one entry per input position.
fn ordered_embeddings(mut data: Vec<EmbeddingData>, expected: usize) -> Result<Vec<Vec<f32>>> {
    if data.len() != expected {
        return Err(RetrievalError::EmbeddingOrder(format!(
            "OpenAI returned {} embeddings for {} inputs",
            data.len(),
            expected
        )));
    }
    data.sort_by_key(|entry| entry.index);
    for (position, entry) in data.iter().enumerate() {
        if entry.index != position {
            return Err(RetrievalError::EmbeddingOrder(format!(
                "OpenAI response indices are not a permutation of 0..{expected}"
            )));
        }
    }
    Ok(data.into_iter().map(|entry| entry.embedding).collect())
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
    dimensions: usize,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    usage: Option<EmbeddingUsageBody>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

#[derive(Debug, Default, Deserialize)]
struct EmbeddingUsageBody {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    total_tokens: u32,
}
