//! LLM judge providers returning schema-constrained JSON objects.

use async_trait::async_trait;

use crate::error::Result;

mod anthropic;
mod openai;

pub use anthropic::AnthropicJudge;
pub use openai::OpenAiJudge;

/// Request envelope shared by the various providers.
pub struct JudgeRequest<'a> {
    /// Instructions sent as the system message.
    pub system_prompt: &'a str,
    /// User message carrying the skill and candidate outcomes.
    pub prompt: &'a str,
    /// Identifier for the schema, used as the tool/format name.
    pub schema_name: &'a str,
    /// JSON Schema the response object must satisfy.
    pub schema: &'a serde_json::Value,
}

/// Trait implemented by concrete LLM providers.
#[async_trait]
pub trait LlmJudge: Send + Sync {
    /// Model identifier, for logging.
    fn model(&self) -> &str;

    /// Returns one JSON object conforming to `request.schema`.
    async fn generate_object(&self, request: &JudgeRequest<'_>) -> Result<serde_json::Value>;
}
