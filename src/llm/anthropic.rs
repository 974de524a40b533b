//! Anthropic messages judge using a forced tool call.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{JudgeRequest, LlmJudge};
use crate::error::{Result, RetrievalError};

const MAX_TOKENS: usize = 2048;

/// Forces a single tool call whose input schema is the requested object
/// schema, then returns that tool input.
pub struct AnthropicJudge {
    api_key: String,
    model: String,
    endpoint: String,
    client: Client,
}

impl AnthropicJudge {
    /// Builds a client for `model`; fails on a blank key.
    pub fn new(api_key: String, model: String, base_url: &str, timeout: Duration) -> Result<Self> {
        if api_key.trim().is_empty() {
            return Err(RetrievalError::Configuration(
                "ANTHROPIC_API_KEY must be set for the Anthropic judge".to_string(),
            ));
        }
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| {
                RetrievalError::Configuration(format!("failed to build Anthropic HTTP client: {err}"))
            })?;
        Ok(Self {
            api_key,
            model,
            endpoint: format!("{}/v1/messages", base_url.trim_end_matches('/')),
            client,
        })
    }
}

#[async_trait]
impl LlmJudge for AnthropicJudge {
    fn model(&self) -> &str {
        &self.model
    }

    async fn generate_object(&self, request: &JudgeRequest<'_>) -> Result<serde_json::Value> {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-api-key",
            HeaderValue::from_str(self.api_key.trim())
                .map_err(|_| RetrievalError::Configuration("invalid Anthropic API key".to_string()))?,
        );
        headers.insert("anthropic-version", HeaderValue::from_static("2023-06-01"));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let body = AnthropicRequest {
            model: &self.model,
            max_tokens: MAX_TOKENS,
            temperature: 0.0,
            system: request.system_prompt,
            messages: vec![AnthropicMessage {
                role: "user",
                content: vec![AnthropicContentBlock {
                    kind: "text",
                    text: request.prompt,
                }],
            }],
            tools: vec![AnthropicTool {
                name: request.schema_name,
                description: "Record one relevance decision per listed item.",
                input_schema: request.schema,
            }],
            tool_choice: ToolChoice {
                kind: "tool",
                name: request.schema_name,
            },
        };
        let resp = self
            .client
            .post(&self.endpoint)
            .headers(headers)
            .json(&body)
            .send()
            .await
            .map_err(|err| RetrievalError::Judge(format!("failed to call Anthropic messages API: {err}")))?;
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp
                .text()
                .await
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            return Err(RetrievalError::Judge(format!("Anthropic returned {status}: {text}")));
        }
        let parsed: AnthropicResponse = resp
            .json()
            .await
            .map_err(|err| RetrievalError::Judge(format!("failed to parse Anthropic response: {err}")))?;
        parsed
            .content
            .into_iter()
            .find_map(|block| match block {
                AnthropicResponseBlock::ToolUse { input } => Some(input),
                _ => None,
            })
            .ok_or_else(|| RetrievalError::Judge("Anthropic response missing tool_use block".to_string()))
    }
}

#[derive(Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    max_tokens: usize,
    temperature: f32,
    system: &'a str,
    messages: Vec<AnthropicMessage<'a>>,
    tools: Vec<AnthropicTool<'a>>,
    tool_choice: ToolChoice<'a>,
}

#[derive(Serialize)]
struct AnthropicMessage<'a> {
    role: &'a str,
    content: Vec<AnthropicContentBlock<'a>>,
}

#[derive(Serialize)]
struct AnthropicContentBlock<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    text: &'a str,
}

#[derive(Serialize)]
struct AnthropicTool<'a> {
    name: &'a str,
    description: &'a str,
    input_schema: &'a serde_json::Value,
}

#[derive(Serialize)]
struct ToolChoice<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    name: &'a str,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicResponseBlock>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicResponseBlock {
    ToolUse {
        input: serde_json::Value,
    },
    #[serde(other)]
    Other,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn picks_tool_input_from_mixed_blocks() {
        let raw = r#"{"content":[{"type":"text","text":"ok"},{"type":"tool_use","id":"t1","name":"x","input":{"learning_outcomes":[]}}]}"#;
        let parsed: AnthropicResponse = serde_json::from_str(raw).unwrap();
        let input = parsed.content.into_iter().find_map(|block| match block {
            AnthropicResponseBlock::ToolUse { input } => Some(input),
            _ => None,
        });
        assert_eq!(input.unwrap()["learning_outcomes"], serde_json::json!([]));
    }
}
