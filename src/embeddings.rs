//! Embedding contracts consumed by the retriever.

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, RetrievalError};

/// Supported embedding widths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "usize", into = "usize")]
pub enum EmbeddingDimension {
    /// 768 floats.
    D768,
    /// 1536 floats.
    D1536,
}

impl EmbeddingDimension {
    /// Number of floats in a vector of this width.
    pub fn width(self) -> usize {
        match self {
            Self::D768 => 768,
            Self::D1536 => 1536,
        }
    }
}

impl TryFrom<usize> for EmbeddingDimension {
    type Error = RetrievalError;

    fn try_from(value: usize) -> Result<Self> {
        match value {
            768 => Ok(Self::D768),
            1536 => Ok(Self::D1536),
            other => Err(RetrievalError::Configuration(format!(
                "unsupported embedding dimension {other}; expected 768 or 1536"
            ))),
        }
    }
}

impl From<EmbeddingDimension> for usize {
    fn from(value: EmbeddingDimension) -> Self {
        value.width()
    }
}

impl fmt::Display for EmbeddingDimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.width())
    }
}

/// Whether the text is a search query or a stored document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingRole {
    /// Skill text embedded at request time.
    #[default]
    Query,
    /// Catalogue text embedded at ingest time.
    Document,
}

/// Model and width the caller wants skills embedded with.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbeddingConfiguration {
    /// Provider model identifier.
    pub model: String,
    /// Requested vector width.
    pub dimension: EmbeddingDimension,
}

impl EmbeddingConfiguration {
    /// Configuration for `model` at `dimension`.
    pub fn new(model: impl Into<String>, dimension: EmbeddingDimension) -> Self {
        Self {
            model: model.into(),
            dimension,
        }
    }
}

/// One embedded text plus provider accounting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbeddingResult {
    /// Model embedding vector.
    pub vector: Vec<f32>,
    /// Model that produced the vector.
    pub model: String,
    /// Provider that served the request.
    pub provider: String,
    /// Width of `vector`.
    pub dimension: EmbeddingDimension,
    /// Prompt tokens billed for this input.
    pub prompt_tokens: u32,
    /// Total tokens billed for this input.
    pub total_tokens: u32,
    /// Text that was embedded.
    pub embedded_text: String,
    /// When the vector was produced.
    pub generated_at: DateTime<Utc>,
}

/// Usage line for a single skill.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkillEmbeddingUsage {
    /// Skill text.
    pub skill: String,
    /// Model used.
    pub model: String,
    /// Provider used.
    pub provider: String,
    /// Vector width.
    pub dimension: EmbeddingDimension,
    /// Prompt tokens; 0 on a cache hit.
    pub prompt_tokens: u32,
    /// Total tokens; 0 on a cache hit.
    pub total_tokens: u32,
    /// When the vector was produced.
    pub generated_at: DateTime<Utc>,
}

/// Per-skill and aggregate token accounting for one request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbeddingUsage {
    /// One line per skill, in request order.
    pub by_skill: Vec<SkillEmbeddingUsage>,
    /// Sum of `prompt_tokens`.
    pub total_prompt_tokens: u64,
    /// Sum of `total_tokens`.
    pub total_tokens: u64,
}

impl EmbeddingUsage {
    /// Builds the usage report from positionally paired results.
    pub fn from_pairs<'a, I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a EmbeddingResult)>,
    {
        let mut usage = Self::default();
        for (skill, result) in pairs {
            usage.total_prompt_tokens += u64::from(result.prompt_tokens);
            usage.total_tokens += u64::from(result.total_tokens);
            usage.by_skill.push(SkillEmbeddingUsage {
                skill: skill.to_string(),
                model: result.model.clone(),
                provider: result.provider.clone(),
                dimension: result.dimension,
                prompt_tokens: result.prompt_tokens,
                total_tokens: result.total_tokens,
                generated_at: result.generated_at,
            });
        }
        usage
    }
}

/// Turns texts into vectors.
///
/// The returned list must have the same length and order as `texts`; callers
/// pair results with inputs by position.
#[async_trait]
pub trait EmbeddingRouter: Send + Sync {
    /// Embeds `texts` with the provider serving `configuration`.
    async fn embed_many(
        &self,
        texts: &[String],
        configuration: &EmbeddingConfiguration,
        role: EmbeddingRole,
    ) -> Result<Vec<EmbeddingResult>>;
}

/// Pairs each text with its result, rejecting any response that cannot be
/// matched by position.
pub fn zip_positional(
    texts: &[String],
    results: Vec<EmbeddingResult>,
    configuration: &EmbeddingConfiguration,
) -> Result<Vec<(String, EmbeddingResult)>> {
    if results.len() != texts.len() {
        return Err(RetrievalError::EmbeddingOrder(format!(
            "received {} embeddings for {} texts",
            results.len(),
            texts.len()
        )));
    }
    let expected = configuration.dimension.width();
    let mut pairs = Vec::with_capacity(texts.len());
    for (position, (text, result)) in texts.iter().zip(results).enumerate() {
        if result.embedded_text != *text {
            return Err(RetrievalError::EmbeddingOrder(format!(
                "position {position} embedded {:?} but {:?} was requested",
                result.embedded_text, text
            )));
        }
        if result.vector.len() != expected {
            return Err(RetrievalError::EmbeddingDimension {
                text: text.clone(),
                expected,
                actual: result.vector.len(),
            });
        }
        pairs.push((text.clone(), result));
    }
    Ok(pairs)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(text: &str, width: usize, tokens: u32) -> EmbeddingResult {
        EmbeddingResult {
            vector: vec![0.0; width],
            model: "text-embedding-3-small".into(),
            provider: "openai".into(),
            dimension: EmbeddingDimension::D768,
            prompt_tokens: tokens,
            total_tokens: tokens,
            embedded_text: text.into(),
            generated_at: Utc::now(),
        }
    }

    fn config() -> EmbeddingConfiguration {
        EmbeddingConfiguration::new("text-embedding-3-small", EmbeddingDimension::D768)
    }

    #[test]
    fn rejects_unsupported_dimension() {
        let err = EmbeddingDimension::try_from(512).unwrap_err();
        assert!(matches!(err, RetrievalError::Configuration(_)));
        let parsed: EmbeddingDimension = serde_json::from_str("1536").unwrap();
        assert_eq!(parsed, EmbeddingDimension::D1536);
        assert!(serde_json::from_str::<EmbeddingDimension>("1024").is_err());
    }

    #[test]
    fn zip_keeps_input_order() {
        let texts = vec!["sql".to_string(), "statistics".to_string()];
        let results = vec![result("sql", 768, 1), result("statistics", 768, 2)];
        let pairs = zip_positional(&texts, results, &config()).unwrap();
        assert_eq!(pairs[0].0, "sql");
        assert_eq!(pairs[1].1.embedded_text, "statistics");
    }

    #[test]
    fn zip_rejects_swapped_results() {
        let texts = vec!["sql".to_string(), "statistics".to_string()];
        let results = vec![result("statistics", 768, 1), result("sql", 768, 2)];
        let err = zip_positional(&texts, results, &config()).unwrap_err();
        assert!(matches!(err, RetrievalError::EmbeddingOrder(_)));
    }

    #[test]
    fn zip_rejects_short_response() {
        let texts = vec!["sql".to_string(), "statistics".to_string()];
        let err = zip_positional(&texts, vec![result("sql", 768, 1)], &config()).unwrap_err();
        assert!(matches!(err, RetrievalError::EmbeddingOrder(_)));
    }

    #[test]
    fn zip_rejects_wrong_width() {
        let texts = vec!["sql".to_string()];
        let err = zip_positional(&texts, vec![result("sql", 1536, 1)], &config()).unwrap_err();
        assert!(matches!(
            err,
            RetrievalError::EmbeddingDimension {
                expected: 768,
                actual: 1536,
                ..
            }
        ));
    }

    #[test]
    fn usage_sums_tokens() {
        let a = result("sql", 768, 3);
        let b = result("statistics", 768, 4);
        let usage = EmbeddingUsage::from_pairs([("sql", &a), ("statistics", &b)]);
        assert_eq!(usage.total_prompt_tokens, 7);
        assert_eq!(usage.by_skill.len(), 2);
        assert_eq!(usage.by_skill[1].skill, "statistics");
    }
}
