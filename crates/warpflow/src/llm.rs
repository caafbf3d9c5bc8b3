//! LLM client seam
//!
//! Provider SDKs stay outside the engine: a model is an opaque
//! text-in/text-out call with usage metadata. The `llm` node and the
//! discovery reranker both go through [`LlmClient`].

use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Token usage reported by a provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LlmUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// A completed model call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmResponse {
    pub text: String,
    pub model: String,
    pub usage: LlmUsage,
}

/// One model call as recorded in a trace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmCallRecord {
    pub model: String,
    pub prompt: String,
    pub response: String,
    pub usage: LlmUsage,
    pub duration_ms: u64,
}

/// Opaque text-in/text-out model client.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<LlmResponse>;

    fn model_name(&self) -> &str;
}

/// Deterministic test double. Replies with a fixed string, or echoes the
/// prompt when constructed with `MockLlm::echo()`.
#[derive(Debug, Clone)]
pub struct MockLlm {
    reply: Option<String>,
}

impl MockLlm {
    pub fn new(reply: impl Into<String>) -> Self {
        Self {
            reply: Some(reply.into()),
        }
    }

    pub fn echo() -> Self {
        Self { reply: None }
    }
}

#[async_trait]
impl LlmClient for MockLlm {
    async fn complete(&self, prompt: &str) -> Result<LlmResponse> {
        let text = self
            .reply
            .clone()
            .unwrap_or_else(|| format!("echo: {prompt}"));
        Ok(LlmResponse {
            usage: LlmUsage {
                input_tokens: prompt.split_whitespace().count() as u64,
                output_tokens: text.split_whitespace().count() as u64,
            },
            text,
            model: "mock".to_string(),
        })
    }

    fn model_name(&self) -> &str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_fixed_reply() {
        let llm = MockLlm::new("done");
        let response = llm.complete("summarize this").await.unwrap();
        assert_eq!(response.text, "done");
        assert_eq!(response.model, "mock");
        assert_eq!(response.usage.input_tokens, 2);
    }

    #[tokio::test]
    async fn test_mock_echo() {
        let llm = MockLlm::echo();
        let response = llm.complete("hi").await.unwrap();
        assert_eq!(response.text, "echo: hi");
    }
}
