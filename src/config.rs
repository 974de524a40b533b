//! Command-line/env configuration shared by the binaries.

use std::sync::Arc;
use std::time::Duration;

use clap::{Args, ValueEnum};

use crate::embedder::openai::OpenAiEmbedder;
use crate::embedder::qdrant::QdrantEmbedder;
use crate::embedder::{EmbeddingProvider, ProviderRouter};
use crate::embeddings::{EmbeddingConfiguration, EmbeddingDimension};
use crate::error::{Result, RetrievalError};
use crate::llm::{AnthropicJudge, LlmJudge, OpenAiJudge};
use crate::orchestrator::RetrievalOrchestrator;
use crate::ranking::SearchLimits;
use crate::relevance::{RelevanceFilter, RelevanceSettings};
use crate::store::{LearningOutcomeStore, PgStore};
use crate::vector_store::CatalogTables;

/// Postgres connection settings.
#[derive(Args, Debug, Clone)]
pub struct DatabaseArgs {
    /// Postgres connection string (postgres://...).
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: String,

    /// Schema holding the course catalogue tables.
    #[arg(long, env = "SKILLMATCH_SCHEMA", default_value = "public")]
    pub schema: String,
}

impl DatabaseArgs {
    /// Connects to the catalogue in the configured schema.
    pub async fn connect(&self) -> Result<PgStore> {
        let tables = CatalogTables::in_schema(&self.schema)?;
        PgStore::connect(&self.database_url, tables).await
    }
}

/// Embedding providers plus the default model used when a request names none.
#[derive(Args, Debug, Clone)]
pub struct EmbeddingArgs {
    /// OpenAI API key; enables the OpenAI embedding provider.
    #[arg(long, env = "OPENAI_API_KEY")]
    pub openai_api_key: Option<String>,

    /// Base URL for OpenAI-compatible endpoints.
    #[arg(
        long,
        env = "SKILLMATCH_OPENAI_BASE",
        default_value = "https://api.openai.com/v1"
    )]
    pub openai_base_url: String,

    /// Qdrant Cloud Inference endpoint; enables the Qdrant provider.
    #[arg(long, env = "QDRANT_INFERENCE_URL")]
    pub qdrant_endpoint: Option<String>,

    /// Qdrant API key.
    #[arg(long, env = "QDRANT_API_KEY")]
    pub qdrant_api_key: Option<String>,

    /// Comma-separated 768-wide models served by the Qdrant endpoint.
    #[arg(
        long,
        env = "SKILLMATCH_QDRANT_MODELS",
        value_delimiter = ',',
        default_value = "sentence-transformers/all-mpnet-base-v2"
    )]
    pub qdrant_models: Vec<String>,

    /// Embedding model used when the caller does not pick one.
    #[arg(
        long,
        env = "SKILLMATCH_EMBEDDING_MODEL",
        default_value = "text-embedding-3-small"
    )]
    pub embedding_model: String,

    /// Embedding width used when the caller does not pick one (768 or 1536).
    #[arg(long, env = "SKILLMATCH_EMBEDDING_DIMENSION", default_value_t = 768)]
    pub embedding_dimension: usize,

    /// Max inputs per embedding request.
    #[arg(long, env = "SKILLMATCH_EMBEDDING_BATCH", default_value_t = 32)]
    pub batch_size: usize,

    /// Seconds before embedding requests time out.
    #[arg(long, env = "SKILLMATCH_EMBEDDING_TIMEOUT_SECS", default_value_t = 30)]
    pub embedding_timeout_secs: u64,

    /// Retry attempts for transient embedding errors.
    #[arg(long, env = "SKILLMATCH_EMBEDDING_MAX_RETRIES", default_value_t = 5)]
    pub max_retries: usize,

    /// Max cached skill embeddings kept in-memory (0 disables caching).
    #[arg(long, default_value_t = 1024)]
    pub embedding_cache_size: usize,
}

impl EmbeddingArgs {
    /// Model and width used when a request names none.
    pub fn default_configuration(&self) -> Result<EmbeddingConfiguration> {
        let dimension = EmbeddingDimension::try_from(self.embedding_dimension)?;
        Ok(EmbeddingConfiguration::new(self.embedding_model.clone(), dimension))
    }

    /// Router over every provider that has credentials.
    pub fn build_router(&self) -> Result<ProviderRouter> {
        let timeout = Duration::from_secs(self.embedding_timeout_secs.max(1));
        let mut providers: Vec<Arc<dyn EmbeddingProvider>> = Vec::new();
        if let Some(key) = self.openai_api_key.as_deref() {
            providers.push(Arc::new(OpenAiEmbedder::new(
                key,
                &self.openai_base_url,
                timeout,
                self.max_retries,
                self.batch_size,
            )?));
        }
        if let Some(endpoint) = self.qdrant_endpoint.as_deref() {
            let key = self.qdrant_api_key.as_deref().ok_or_else(|| {
                RetrievalError::Configuration(
                    "QDRANT_API_KEY must be set when a Qdrant endpoint is configured".to_string(),
                )
            })?;
            providers.push(Arc::new(QdrantEmbedder::new(
                key,
                endpoint,
                self.qdrant_models.clone(),
                timeout,
                self.max_retries,
                self.batch_size,
            )?));
        }
        if providers.is_empty() {
            return Err(RetrievalError::Configuration(
                "no embedding provider configured; set OPENAI_API_KEY or QDRANT_INFERENCE_URL"
                    .to_string(),
            ));
        }
        Ok(ProviderRouter::new(providers, self.embedding_cache_size))
    }
}

/// LLM vendor backing the relevance filter.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum JudgeProvider {
    /// OpenAI chat completions.
    Openai,
    /// Anthropic messages.
    Anthropic,
}

/// Relevance judge settings. The filter is unavailable unless a provider is set.
#[derive(Args, Debug, Clone)]
pub struct JudgeArgs {
    /// Judge vendor (openai or anthropic).
    #[arg(long, env = "SKILLMATCH_JUDGE_PROVIDER", value_enum)]
    pub judge_provider: Option<JudgeProvider>,

    /// OpenAI chat model used as judge.
    #[arg(long, env = "SKILLMATCH_JUDGE_OPENAI_MODEL", default_value = "gpt-4o-mini")]
    pub judge_openai_model: String,

    /// Anthropic API key (required when --judge-provider anthropic).
    #[arg(long, env = "ANTHROPIC_API_KEY")]
    pub anthropic_api_key: Option<String>,

    /// Anthropic model identifier.
    #[arg(
        long,
        env = "SKILLMATCH_ANTHROPIC_MODEL",
        default_value = "claude-3-5-haiku-latest"
    )]
    pub anthropic_model: String,

    /// Anthropic API base URL.
    #[arg(
        long,
        env = "SKILLMATCH_ANTHROPIC_BASE",
        default_value = "https://api.anthropic.com"
    )]
    pub anthropic_base_url: String,

    /// Seconds before a judge call is abandoned.
    #[arg(long, env = "SKILLMATCH_JUDGE_TIMEOUT_SECS", default_value_t = 20)]
    pub judge_timeout_secs: u64,

    /// Maximum concurrent judge calls per request.
    #[arg(long, env = "SKILLMATCH_JUDGE_MAX_IN_FLIGHT", default_value_t = 4)]
    pub judge_max_in_flight: usize,
}

impl JudgeArgs {
    /// Timeout and concurrency for judge calls.
    pub fn relevance_settings(&self) -> RelevanceSettings {
        RelevanceSettings {
            timeout: Duration::from_secs(self.judge_timeout_secs.max(1)),
            max_in_flight: self.judge_max_in_flight.max(1),
        }
    }

    /// Relevance filter for the configured provider, if any. The OpenAI judge
    /// shares the embedding key and base URL.
    pub fn build_relevance(&self, embedding: &EmbeddingArgs) -> Result<Option<RelevanceFilter>> {
        let settings = self.relevance_settings();
        // The HTTP client deadline sits just past the filter's own timeout.
        let http_timeout = settings.timeout + Duration::from_secs(1);
        let judge: Arc<dyn LlmJudge> = match self.judge_provider {
            None => return Ok(None),
            Some(JudgeProvider::Openai) => {
                let key = embedding.openai_api_key.clone().ok_or_else(|| {
                    RetrievalError::Configuration(
                        "OPENAI_API_KEY must be set for the OpenAI judge".to_string(),
                    )
                })?;
                Arc::new(OpenAiJudge::new(
                    key,
                    self.judge_openai_model.clone(),
                    &embedding.openai_base_url,
                    http_timeout,
                )?)
            }
            Some(JudgeProvider::Anthropic) => {
                let key = self.anthropic_api_key.clone().ok_or_else(|| {
                    RetrievalError::Configuration(
                        "ANTHROPIC_API_KEY must be set for the Anthropic judge".to_string(),
                    )
                })?;
                Arc::new(AnthropicJudge::new(
                    key,
                    self.anthropic_model.clone(),
                    &self.anthropic_base_url,
                    http_timeout,
                )?)
            }
        };
        Ok(Some(RelevanceFilter::new(judge, settings)))
    }
}

/// Request defaults and caps.
#[derive(Args, Debug, Clone)]
pub struct RetrievalArgs {
    /// Minimum similarity when the request does not override it.
    #[arg(long, env = "SKILLMATCH_DEFAULT_THRESHOLD", default_value_t = 0.75)]
    pub default_threshold: f64,

    /// Ranked vectors kept per skill when the request does not override it.
    #[arg(long, env = "SKILLMATCH_DEFAULT_TOP_N", default_value_t = 10)]
    pub default_top_n: usize,

    /// Maximum topN allowed per request.
    #[arg(long, env = "SKILLMATCH_MAX_TOP_N", default_value_t = 50)]
    pub max_top_n: usize,
}

impl RetrievalArgs {
    /// Validated default threshold and topN.
    pub fn limits(&self) -> Result<SearchLimits> {
        SearchLimits::new(self.default_threshold, self.default_top_n)
    }
}

/// Wires the router, optional judge and store into an orchestrator.
pub fn build_orchestrator(
    store: Arc<dyn LearningOutcomeStore>,
    embedding: &EmbeddingArgs,
    judge: &JudgeArgs,
    retrieval: &RetrievalArgs,
) -> Result<RetrievalOrchestrator> {
    let router = Arc::new(embedding.build_router()?);
    let relevance = judge.build_relevance(embedding)?;
    Ok(RetrievalOrchestrator::new(router, store, relevance)
        .with_defaults(retrieval.limits()?)
        .with_max_top_n(retrieval.max_top_n))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser, Debug)]
    struct TestCli {
        #[command(flatten)]
        embedding: EmbeddingArgs,
        #[command(flatten)]
        judge: JudgeArgs,
        #[command(flatten)]
        retrieval: RetrievalArgs,
    }

    fn parse(extra: &[&str]) -> TestCli {
        let mut args = vec!["test"];
        args.extend_from_slice(extra);
        TestCli::try_parse_from(args).unwrap()
    }

    #[test]
    fn explicit_embedding_defaults_parse() {
        let cli = parse(&[
            "--embedding-model",
            "text-embedding-3-large",
            "--embedding-dimension",
            "1536",
        ]);
        let configuration = cli.embedding.default_configuration().unwrap();
        assert_eq!(configuration.model, "text-embedding-3-large");
        assert_eq!(configuration.dimension, EmbeddingDimension::D1536);
    }

    #[test]
    fn unsupported_default_dimension_is_rejected() {
        let cli = parse(&["--embedding-dimension", "512"]);
        assert!(matches!(
            cli.embedding.default_configuration(),
            Err(RetrievalError::Configuration(_))
        ));
    }

    #[test]
    fn qdrant_models_split_on_commas() {
        let cli = parse(&["--qdrant-models", "a/one,b/two"]);
        assert_eq!(cli.embedding.qdrant_models, vec!["a/one", "b/two"]);
    }

    #[test]
    fn out_of_range_threshold_fails_validation() {
        let cli = parse(&["--default-threshold", "1.5"]);
        assert!(cli.retrieval.limits().is_err());
    }

    #[test]
    fn judge_settings_are_floored() {
        let cli = parse(&["--judge-timeout-secs", "0", "--judge-max-in-flight", "0"]);
        let settings = cli.judge.relevance_settings();
        assert_eq!(settings.timeout, Duration::from_secs(1));
        assert_eq!(settings.max_in_flight, 1);
    }

    #[test]
    fn anthropic_judge_requires_a_key() {
        let cli = parse(&["--judge-provider", "anthropic", "--anthropic-api-key", ""]);
        let err = cli.judge.build_relevance(&cli.embedding).err().unwrap();
        assert!(matches!(err, RetrievalError::Configuration(_)));
    }
}
