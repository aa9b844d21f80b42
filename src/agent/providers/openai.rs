//! OpenAI Model Provider
//!
//! Integration with OpenAI's API (and OpenAI-compatible endpoints) using the async-openai crate.

use crate::agent::model::{
    GenerationConfig, ModelProvider, ModelResponse, ProviderKind, ProviderMetadata, TextStream,
    TokenUsage,
};
use anyhow::{anyhow, Result};
use async_openai::{
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequest,
        CreateChatCompletionRequestArgs,
    },
    Client,
};
use async_stream::stream;
use async_trait::async_trait;
use tracing::debug;

pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4.1-mini";

/// OpenAI provider that wraps the async-openai crate
#[derive(Debug, Clone)]
pub struct OpenAIProvider {
    /// The async-openai client
    client: Client<OpenAIConfig>,
    /// Default model to use (e.g., "gpt-4.1", "gpt-4.1-mini")
    model: String,
    /// Kind reported to callers; OpenAI-compatible backends reuse this client
    kind: ProviderKind,
}

impl OpenAIProvider {
    /// Create a new OpenAI provider with the default configuration
    ///
    /// This will use the OPENAI_API_KEY environment variable for authentication
    /// and default to the "gpt-4.1-mini" model.
    pub fn new() -> Self {
        Self::with_config(OpenAIConfig::new())
    }

    /// Create a new OpenAI provider with a custom API key
    pub fn with_api_key(api_key: impl Into<String>) -> Self {
        Self::with_config(OpenAIConfig::new().with_api_key(api_key))
    }

    /// Create a new OpenAI provider with a custom configuration
    pub fn with_config(config: OpenAIConfig) -> Self {
        Self {
            client: Client::with_config(config),
            model: DEFAULT_OPENAI_MODEL.to_string(),
            kind: ProviderKind::OpenAI,
        }
    }

    /// Set the model to use
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub(crate) fn with_kind(mut self, kind: ProviderKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Build the messages for the chat completion request
    fn build_messages(
        &self,
        system_prompt: &str,
        prompt: &str,
    ) -> Result<Vec<ChatCompletionRequestMessage>> {
        let mut messages = Vec::new();

        if !system_prompt.trim().is_empty() {
            let system_message = ChatCompletionRequestSystemMessageArgs::default()
                .content(system_prompt)
                .build()
                .map_err(|e| anyhow!("Failed to build system message: {}", e))?;
            messages.push(ChatCompletionRequestMessage::System(system_message));
        }

        let user_message = ChatCompletionRequestUserMessageArgs::default()
            .content(prompt)
            .build()
            .map_err(|e| anyhow!("Failed to build user message: {}", e))?;
        messages.push(ChatCompletionRequestMessage::User(user_message));

        Ok(messages)
    }

    fn build_request(
        &self,
        system_prompt: &str,
        prompt: &str,
        config: &GenerationConfig,
        stream: bool,
    ) -> Result<CreateChatCompletionRequest> {
        let messages = self.build_messages(system_prompt, prompt)?;

        let mut request_builder = CreateChatCompletionRequestArgs::default();
        request_builder.model(&self.model).messages(messages);
        if stream {
            request_builder.stream(true);
        }
        if let Some(temp) = config.temperature {
            request_builder.temperature(temp);
        }
        if let Some(max_tokens) = config.max_tokens {
            request_builder.max_completion_tokens(max_tokens);
        }
        if let Some(top_p) = config.top_p {
            request_builder.top_p(top_p);
        }
        if let Some(stop) = &config.stop_sequences {
            request_builder.stop(stop.clone());
        }

        request_builder
            .build()
            .map_err(|e| anyhow!("Failed to build request: {}", e))
    }
}

impl Default for OpenAIProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ModelProvider for OpenAIProvider {
    async fn generate(
        &self,
        system_prompt: &str,
        prompt: &str,
        config: &GenerationConfig,
    ) -> Result<ModelResponse> {
        let request = self.build_request(system_prompt, prompt, config, false)?;
        debug!("{} chat completion with model {}", self.kind.as_str(), self.model);

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e| anyhow!("{} API error: {}", self.kind.as_str(), e))?;

        let choice = response
            .choices
            .first()
            .ok_or_else(|| anyhow!("No response choices returned"))?;

        let raw = choice
            .message
            .content
            .clone()
            .ok_or_else(|| anyhow!("No content in response"))?;

        let mut model_response = ModelResponse::from_raw(&raw, response.model.clone());
        model_response.usage = response.usage.map(|u| TokenUsage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        });
        model_response.finish_reason = choice.finish_reason.as_ref().map(|r| format!("{:?}", r));
        Ok(model_response)
    }

    async fn stream(
        &self,
        system_prompt: &str,
        prompt: &str,
        config: &GenerationConfig,
    ) -> Result<TextStream> {
        let request = self.build_request(system_prompt, prompt, config, true)?;

        let mut response_stream = self
            .client
            .chat()
            .create_stream(request)
            .await
            .map_err(|e| anyhow!("{} streaming API error: {}", self.kind.as_str(), e))?;

        let stream = stream! {
            use futures::StreamExt;

            while let Some(result) = response_stream.next().await {
                match result {
                    Ok(response) => {
                        if let Some(choice) = response.choices.first() {
                            if let Some(content) = &choice.delta.content {
                                yield Ok(content.clone());
                            }
                        }
                    }
                    Err(e) => {
                        yield Err(anyhow!("Stream error: {}", e));
                        break;
                    }
                }
            }
        };

        Ok(Box::pin(stream))
    }

    fn metadata(&self) -> ProviderMetadata {
        ProviderMetadata {
            name: "OpenAI".to_string(),
            supported_models: vec![
                "gpt-4.1".to_string(),
                "gpt-4.1-mini".to_string(),
                "gpt-4o".to_string(),
                "gpt-4o-mini".to_string(),
            ],
            supports_streaming: true,
        }
    }

    fn kind(&self) -> ProviderKind {
        self.kind
    }
}
