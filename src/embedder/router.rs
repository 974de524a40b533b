//! Routes (model, dimension) pairs to providers and caches results by text.

use std::num::NonZeroUsize;
use std::sync::Arc;

use async_trait::async_trait;
use lru::LruCache;
use tokio::sync::Mutex;
use tracing::debug;

use super::EmbeddingProvider;
use crate::embeddings::{
    zip_positional, EmbeddingConfiguration, EmbeddingDimension, EmbeddingResult, EmbeddingRole,
    EmbeddingRouter,
};
use crate::error::{Result, RetrievalError};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    model: String,
    dimension: EmbeddingDimension,
    text: String,
}

/// Collapses whitespace and lowercases, so trivially different spellings of
/// one skill share a cache slot.
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Embedding router over a fixed provider list.
pub struct ProviderRouter {
    providers: Vec<Arc<dyn EmbeddingProvider>>,
    cache: Option<Mutex<LruCache<CacheKey, EmbeddingResult>>>,
}

impl ProviderRouter {
    /// Router with a cache of `cache_size` entries (0 disables caching).
    pub fn new(providers: Vec<Arc<dyn EmbeddingProvider>>, cache_size: usize) -> Self {
        Self {
            providers,
            cache: NonZeroUsize::new(cache_size).map(|capacity| Mutex::new(LruCache::new(capacity))),
        }
    }

    /// Provider serving `configuration`, or a configuration error.
    pub fn resolve(&self, configuration: &EmbeddingConfiguration) -> Result<Arc<dyn EmbeddingProvider>> {
        self.providers
            .iter()
            .find(|provider| provider.supports(&configuration.model, configuration.dimension))
            .cloned()
            .ok_or_else(|| {
                RetrievalError::Configuration(format!(
                    "no embedding provider serves model {} at dimension {}",
                    configuration.model, configuration.dimension
                ))
            })
    }

    fn key(configuration: &EmbeddingConfiguration, text: &str) -> CacheKey {
        CacheKey {
            model: configuration.model.clone(),
            dimension: configuration.dimension,
            text: normalize_text(text),
        }
    }
}

#[async_trait]
impl EmbeddingRouter for ProviderRouter {
    async fn embed_many(
        &self,
        texts: &[String],
        configuration: &EmbeddingConfiguration,
        role: EmbeddingRole,
    ) -> Result<Vec<EmbeddingResult>> {
        let provider = self.resolve(configuration)?;
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut slots: Vec<Option<EmbeddingResult>> = vec![None; texts.len()];
        if let Some(cache) = &self.cache {
            let mut guard = cache.lock().await;
            for (slot, text) in slots.iter_mut().zip(texts) {
                if let Some(hit) = guard.get(&Self::key(configuration, text)) {
                    *slot = Some(EmbeddingResult {
                        embedded_text: text.clone(),
                        prompt_tokens: 0,
                        total_tokens: 0,
                        ..hit.clone()
                    });
                }
            }
        }

        let missing: Vec<usize> = slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_none())
            .map(|(position, _)| position)
            .collect();
        debug!(
            provider = provider.name(),
            model = %configuration.model,
            dimension = %configuration.dimension,
            ?role,
            requested = texts.len(),
            cached = texts.len() - missing.len(),
            "embedding skills"
        );

        for chunk in missing.chunks(provider.batch_size().max(1)) {
            let inputs: Vec<String> = chunk.iter().map(|&position| texts[position].clone()).collect();
            let results = provider.embed_batch(&inputs, configuration).await?;
            let pairs = zip_positional(&inputs, results, configuration)?;
            if let Some(cache) = &self.cache {
                let mut guard = cache.lock().await;
                for (text, result) in &pairs {
                    guard.put(Self::key(configuration, text), result.clone());
                }
            }
            for (&position, (_, result)) in chunk.iter().zip(pairs) {
                slots[position] = Some(result);
            }
        }

        slots
            .into_iter()
            .enumerate()
            .map(|(position, slot)| {
                slot.ok_or_else(|| {
                    RetrievalError::EmbeddingOrder(format!("no embedding produced for position {position}"))
                })
            })
            .collect()
    }
}
