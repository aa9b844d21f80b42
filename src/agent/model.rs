//! Model Provider Abstraction Layer
//!
//! This module defines the chat-completion capability the agent loop and the RAG service
//! depend on. Each backend (OpenAI, Anthropic, Grok, the mock) implements [`ModelProvider`];
//! callers select one through [`ProviderKind`].

use anyhow::Result;
use async_trait::async_trait;
use futures::Stream;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::sync::LazyLock;

/// Incremental text fragments from a streaming completion.
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Configuration for model generation requests
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Sampling temperature (0.0 - 2.0)
    pub temperature: Option<f32>,
    /// Maximum tokens to generate
    pub max_tokens: Option<u32>,
    /// Stop sequences
    pub stop_sequences: Option<Vec<String>>,
    /// Top-p sampling
    pub top_p: Option<f32>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            temperature: Some(0.7),
            max_tokens: Some(2048),
            stop_sequences: None,
            top_p: Some(1.0),
        }
    }
}

static THINK_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<think>([\s\S]*?)</think>").expect("valid think pattern"));

/// Parse thinking/reasoning tokens from model response
///
/// Extracts content between `<think>` and `</think>` tags as reasoning,
/// and returns the content after the last `</think>` as the main response.
///
/// # Example
/// ```
/// use ondevice_ai::agent::model::parse_thinking_tokens;
///
/// let response = "<think>Let me consider this...</think>Here's my answer.";
/// let (reasoning, content) = parse_thinking_tokens(response);
/// assert_eq!(reasoning, Some("Let me consider this...".to_string()));
/// assert_eq!(content, "Here's my answer.");
/// ```
pub fn parse_thinking_tokens(response: &str) -> (Option<String>, String) {
    let reasoning = THINK_PATTERN
        .captures(response)
        .and_then(|captures| captures.get(1))
        .map(|m| m.as_str().trim().to_string());

    let content = match response.rfind("</think>") {
        Some(end_idx) => response[end_idx + "</think>".len()..].trim().to_string(),
        None => response.to_string(),
    };

    (reasoning, content)
}

/// Response from a model generation request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelResponse {
    /// Generated content (with thinking tokens removed if present)
    pub content: String,
    /// Model used for generation
    pub model: String,
    /// Token usage statistics
    pub usage: Option<TokenUsage>,
    /// Finish reason
    pub finish_reason: Option<String>,
    /// Reasoning/thinking content extracted from <think> tags (if present)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
}

impl ModelResponse {
    /// Build a response from raw model text, splitting off any `<think>` block.
    pub fn from_raw(raw: &str, model: impl Into<String>) -> Self {
        let (reasoning, content) = parse_thinking_tokens(raw);
        Self {
            content,
            model: model.into(),
            usage: None,
            finish_reason: None,
            reasoning,
        }
    }
}

/// Token usage statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Provider metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderMetadata {
    /// Provider name
    pub name: String,
    /// Supported models
    pub supported_models: Vec<String>,
    /// Supports streaming
    pub supports_streaming: bool,
}

/// Types of model providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Mock,
    OpenAI,
    Anthropic,
    Grok,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 4] = [
        ProviderKind::Mock,
        ProviderKind::OpenAI,
        ProviderKind::Anthropic,
        ProviderKind::Grok,
    ];

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "mock" => Some(ProviderKind::Mock),
            "openai" => Some(ProviderKind::OpenAI),
            "anthropic" => Some(ProviderKind::Anthropic),
            "grok" | "xai" => Some(ProviderKind::Grok),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Mock => "mock",
            ProviderKind::OpenAI => "openai",
            ProviderKind::Anthropic => "anthropic",
            ProviderKind::Grok => "grok",
        }
    }
}

/// Core trait that all model providers must implement
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Complete `prompt` under `system_prompt`
    async fn generate(
        &self,
        system_prompt: &str,
        prompt: &str,
        config: &GenerationConfig,
    ) -> Result<ModelResponse>;

    /// Stream the completion of `prompt` as text fragments
    async fn stream(
        &self,
        system_prompt: &str,
        prompt: &str,
        config: &GenerationConfig,
    ) -> Result<TextStream>;

    /// Get provider metadata
    fn metadata(&self) -> ProviderMetadata;

    /// Get the provider kind
    fn kind(&self) -> ProviderKind;
}
