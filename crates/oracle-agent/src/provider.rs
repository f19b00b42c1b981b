//! Provider clients.
//!
//! A [`Provider`] wraps exactly one remote model behind a single
//! prompt-in, text-out call.  It makes one outbound request per invocation
//! and never retries; retry policy belongs to the orchestrator.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::ProviderError;
use crate::llm::{ChatRequest, LlmClient};

/// System prompt sent with every tool call unless the configuration
/// overrides it.
pub const DEFAULT_TOOL_SYSTEM_PROMPT: &str = "You are a careful expert assistant. \
Answer the question accurately and concisely. \
Explain any specialised terms you use. \
State how certain you are of your answer. \
Cite up to 3 references that support it.";

/// A single LLM backend that can answer a prompt.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Short label used in logs (e.g. `"anthropic/claude-3-7-sonnet-latest"`).
    fn name(&self) -> &str;

    /// Send `prompt` to the backend and return its full answer.
    async fn invoke(&self, prompt: &str) -> Result<String, ProviderError>;
}

/// A [`Provider`] backed by an [`LlmClient`].
#[derive(Debug, Clone)]
pub struct ModelProvider {
    label: String,
    client: LlmClient,
    model: String,
    system_prompt: String,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
    timeout: Duration,
}

impl ModelProvider {
    /// Wrap `client`, answering with `model` under a bounded `timeout`.
    pub fn new(client: LlmClient, model: impl Into<String>, timeout: Duration) -> Self {
        let model = model.into();
        Self {
            label: format!("{}/{}", client.provider().as_str(), model),
            client,
            model,
            system_prompt: DEFAULT_TOOL_SYSTEM_PROMPT.to_owned(),
            temperature: None,
            max_tokens: None,
            timeout,
        }
    }

    /// Builder: replace the system prompt.
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    /// Builder: set sampling parameters.
    pub fn with_sampling(mut self, temperature: Option<f32>, max_tokens: Option<u32>) -> Self {
        self.temperature = temperature;
        self.max_tokens = max_tokens;
        self
    }

    /// The model this provider asks.
    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl Provider for ModelProvider {
    fn name(&self) -> &str {
        &self.label
    }

    async fn invoke(&self, prompt: &str) -> Result<String, ProviderError> {
        let request = ChatRequest::single_turn(&self.system_prompt, prompt)
            .with_model(&self.model)
            .with_temperature(self.temperature)
            .with_max_tokens(self.max_tokens);

        match tokio::time::timeout(self.timeout, self.client.complete(&request)).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::timeout(format!(
                "{} gave no answer within {:?}",
                self.label, self.timeout
            ))),
        }
    }
}
