//! Concrete embedding providers and the router that picks between them.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;

use crate::embeddings::{EmbeddingConfiguration, EmbeddingDimension, EmbeddingResult};
use crate::error::Result;

pub mod openai;
pub mod qdrant;
pub mod router;

pub use router::ProviderRouter;

/// One embedding backend.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Provider label recorded in usage metadata.
    fn name(&self) -> &str;

    /// Whether this provider can serve `model` at `dimension`.
    fn supports(&self, model: &str, dimension: EmbeddingDimension) -> bool;

    /// Maximum inputs per request.
    fn batch_size(&self) -> usize;

    /// Embeds at most `batch_size` inputs, preserving order.
    async fn embed_batch(
        &self,
        inputs: &[String],
        configuration: &EmbeddingConfiguration,
    ) -> Result<Vec<EmbeddingResult>>;
}

pub(crate) fn should_retry(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

pub(crate) fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_body() || err.is_request()
}

pub(crate) fn retry_backoff(attempt: usize) -> Duration {
    let capped = attempt.min(5) as u32;
    Duration::from_millis(500 * (1 << capped))
}

/// Splits a batch-level token count across inputs by length. The shares
/// always sum to `total`; the last input absorbs rounding.
pub(crate) fn apportion_tokens(total: u32, inputs: &[String]) -> Vec<u32> {
    if inputs.is_empty() {
        return Vec::new();
    }
    let lengths: Vec<u64> = inputs
        .iter()
        .map(|input| input.chars().count().max(1) as u64)
        .collect();
    let sum: u64 = lengths.iter().sum();
    let mut shares: Vec<u32> = lengths
        .iter()
        .map(|len| (u64::from(total) * len / sum) as u32)
        .collect();
    let assigned: u32 = shares.iter().sum();
    if let Some(last) = shares.last_mut() {
        *last += total - assigned;
    }
    shares
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apportioned_tokens_sum_to_total() {
        let inputs = vec!["sql".to_string(), "data visualisation".to_string(), "r".to_string()];
        let shares = apportion_tokens(11, &inputs);
        assert_eq!(shares.len(), 3);
        assert_eq!(shares.iter().sum::<u32>(), 11);
        assert!(shares[1] >= shares[0]);
    }

    #[test]
    fn backoff_is_capped() {
        assert_eq!(retry_backoff(1), Duration::from_millis(1000));
        assert_eq!(retry_backoff(9), retry_backoff(5));
    }
}
