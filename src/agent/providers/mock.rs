//! Mock Model Provider
//!
//! A scripted provider for tests and offline runs. Responses cycle in order and every
//! prompt is recorded so tests can assert on what the caller sent.

use crate::agent::model::{
    GenerationConfig, ModelProvider, ModelResponse, ProviderKind, ProviderMetadata, TextStream,
    TokenUsage,
};
use anyhow::{anyhow, Result};
use async_stream::stream;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// One prompt as seen by the mock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedPrompt {
    pub system_prompt: String,
    pub prompt: String,
}

/// Mock provider that returns predefined responses
#[derive(Debug, Clone)]
pub struct MockProvider {
    /// Canned responses to cycle through
    responses: Vec<String>,
    /// Current response index
    current_index: Arc<Mutex<usize>>,
    /// Every prompt received, in order
    prompts: Arc<Mutex<Vec<RecordedPrompt>>>,
    /// Model name to report
    model_name: String,
    /// Fail every call with this message
    failure: Option<String>,
    /// Artificial latency per call
    delay: Option<Duration>,
    kind: ProviderKind,
}

impl MockProvider {
    /// Create a new mock provider with a single response
    pub fn new(response: impl Into<String>) -> Self {
        Self::with_responses(vec![response.into()])
    }

    /// Create a new mock provider with multiple responses
    pub fn with_responses(responses: Vec<String>) -> Self {
        Self {
            responses,
            current_index: Arc::new(Mutex::new(0)),
            prompts: Arc::new(Mutex::new(Vec::new())),
            model_name: "mock-model".to_string(),
            failure: None,
            delay: None,
            kind: ProviderKind::Mock,
        }
    }

    /// A provider whose every call fails with `message`
    pub fn failing(message: impl Into<String>) -> Self {
        let mut provider = Self::with_responses(Vec::new());
        provider.failure = Some(message.into());
        provider
    }

    /// Set the model name
    pub fn with_model_name(mut self, model_name: impl Into<String>) -> Self {
        self.model_name = model_name.into();
        self
    }

    /// Sleep for `delay` before answering
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Report a different provider kind, for multi-provider wiring tests
    pub fn reporting_as(mut self, kind: ProviderKind) -> Self {
        self.kind = kind;
        self
    }

    /// Prompts received so far
    pub fn prompts(&self) -> Vec<RecordedPrompt> {
        self.prompts
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    pub fn call_count(&self) -> usize {
        self.prompts.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    async fn next_response(&self, system_prompt: &str, prompt: &str) -> Result<String> {
        self.prompts
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(RecordedPrompt {
                system_prompt: system_prompt.to_string(),
                prompt: prompt.to_string(),
            });

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(message) = &self.failure {
            return Err(anyhow!("{}", message));
        }
        if self.responses.is_empty() {
            return Err(anyhow!("mock provider has no scripted responses"));
        }

        let mut index = self.current_index.lock().unwrap_or_else(|p| p.into_inner());
        let response = self.responses[*index % self.responses.len()].clone();
        *index += 1;
        Ok(response)
    }
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new("This is a mock response from the test provider.")
    }
}

#[async_trait]
impl ModelProvider for MockProvider {
    async fn generate(
        &self,
        system_prompt: &str,
        prompt: &str,
        _config: &GenerationConfig,
    ) -> Result<ModelResponse> {
        let raw = self.next_response(system_prompt, prompt).await?;
        let prompt_tokens = prompt.split_whitespace().count() as u32;
        let mut response = ModelResponse::from_raw(&raw, self.model_name.clone());
        let completion_tokens = response.content.split_whitespace().count() as u32;
        response.usage = Some(TokenUsage {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        });
        response.finish_reason = Some("stop".to_string());
        Ok(response)
    }

    async fn stream(
        &self,
        system_prompt: &str,
        prompt: &str,
        _config: &GenerationConfig,
    ) -> Result<TextStream> {
        let content = self.next_response(system_prompt, prompt).await?;
        let words: Vec<String> = content.split_whitespace().map(|s| s.to_string()).collect();

        let stream = stream! {
            for word in words {
                yield Ok(format!("{} ", word));
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        };

        Ok(Box::pin(stream))
    }

    fn metadata(&self) -> ProviderMetadata {
        ProviderMetadata {
            name: "Mock Provider".to_string(),
            supported_models: vec!["mock-model".to_string()],
            supports_streaming: true,
        }
    }

    fn kind(&self) -> ProviderKind {
        self.kind
    }
}
