//! Provider Factory
//!
//! Creates model providers and the embeddings client from configuration.

use crate::agent::model::{GenerationConfig, ModelProvider, ProviderKind};
use crate::agent::providers::{
    grok_provider, AnthropicProvider, MockProvider, OpenAIProvider, RetryPolicy, RetryingProvider,
};
use crate::config::{EmbeddingsConfig, ModelConfig, RetryConfig, DEFAULT_HASH_DIMENSIONS};
use crate::embeddings::{EmbeddingsClient, OpenAIEmbeddingsService};
use anyhow::{anyhow, Context, Result};
use async_openai::config::OpenAIConfig;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Create a model provider from configuration, wrapped in the configured retry policy
pub fn create_provider(config: &ModelConfig, retry: &RetryConfig) -> Result<Arc<dyn ModelProvider>> {
    let kind = ProviderKind::from_str(&config.provider)
        .ok_or_else(|| anyhow!("Unknown provider: {}", config.provider))?;
    create_provider_for(
        kind,
        config.model_name.as_deref(),
        config.api_key_source.as_deref(),
        retry,
    )
}

/// Create a provider of a specific kind
pub fn create_provider_for(
    kind: ProviderKind,
    model_name: Option<&str>,
    api_key_source: Option<&str>,
    retry: &RetryConfig,
) -> Result<Arc<dyn ModelProvider>> {
    let provider: Arc<dyn ModelProvider> = match kind {
        ProviderKind::Mock => {
            // The mock never fails transiently, so it skips the retry wrapper.
            let provider = match model_name {
                Some(model_name) => MockProvider::default().with_model_name(model_name),
                None => MockProvider::default(),
            };
            return Ok(Arc::new(provider));
        }
        ProviderKind::OpenAI => {
            let api_key = api_key_for(api_key_source, "OPENAI_API_KEY")?;
            let mut provider = OpenAIProvider::with_api_key(api_key);
            if let Some(model_name) = model_name {
                provider = provider.with_model(model_name);
            }
            Arc::new(provider)
        }
        ProviderKind::Anthropic => {
            let api_key = api_key_for(api_key_source, "ANTHROPIC_API_KEY")?;
            let mut provider = AnthropicProvider::new(api_key);
            if let Some(model_name) = model_name {
                provider = provider.with_model(model_name);
            }
            Arc::new(provider)
        }
        ProviderKind::Grok => {
            let api_key = api_key_for(api_key_source, "XAI_API_KEY")?;
            Arc::new(grok_provider(api_key, model_name))
        }
    };

    debug!("Created {} provider", kind.as_str());
    Ok(Arc::new(RetryingProvider::new(provider, retry_policy(retry))))
}

pub fn retry_policy(config: &RetryConfig) -> RetryPolicy {
    RetryPolicy {
        max_attempts: config.max_attempts.max(1),
        initial_backoff: Duration::from_millis(config.initial_backoff_ms),
        max_backoff: Duration::from_millis(config.max_backoff_ms),
    }
}

/// Sampling settings derived from the model section
pub fn generation_config(config: &ModelConfig) -> GenerationConfig {
    GenerationConfig {
        temperature: Some(config.temperature),
        max_tokens: config.max_tokens.or(GenerationConfig::default().max_tokens),
        ..GenerationConfig::default()
    }
}

/// Create the embeddings client described by the `[embeddings]` section
pub fn create_embeddings_client(config: &EmbeddingsConfig) -> Result<EmbeddingsClient> {
    match config.provider.to_lowercase().as_str() {
        "hash" => Ok(EmbeddingsClient::hashing(
            config.dimensions.unwrap_or(DEFAULT_HASH_DIMENSIONS),
        )),
        "openai" => {
            let api_key = api_key_for(config.api_key_source.as_deref(), "OPENAI_API_KEY")?;
            let mut service =
                OpenAIEmbeddingsService::with_config(OpenAIConfig::new().with_api_key(api_key));
            if let Some(dimensions) = config.dimensions {
                let dimensions = u32::try_from(dimensions)
                    .context("embedding dimensions do not fit in u32")?;
                service = service.with_dimensions(dimensions);
            }
            Ok(EmbeddingsClient::with_service(
                config.model.clone(),
                Arc::new(service),
            ))
        }
        other => Err(anyhow!("Unknown embeddings provider: {}", other)),
    }
}

fn api_key_for(source: Option<&str>, default_env: &str) -> Result<String> {
    match source {
        Some(source) => resolve_api_key(source),
        None => load_api_key_from_env(default_env),
    }
}

/// Resolve API key from a source string
///
/// Supports the following formats:
/// - `env:VAR_NAME` - Load from environment variable
/// - `file:PATH` - Load from file
/// - Any other string - Use as-is (direct API key)
pub fn resolve_api_key(source: &str) -> Result<String> {
    if let Some(env_var) = source.strip_prefix("env:") {
        load_api_key_from_env(env_var)
    } else if let Some(path) = source.strip_prefix("file:") {
        load_api_key_from_file(path)
    } else {
        Ok(source.to_string())
    }
}

/// Load API key from environment variable
pub fn load_api_key_from_env(env_var: &str) -> Result<String> {
    std::env::var(env_var).context(format!("Environment variable {} not set", env_var))
}

/// Load API key from file
pub fn load_api_key_from_file(path: &str) -> Result<String> {
    let expanded_path = match path.strip_prefix("~/") {
        Some(stripped) => match directories::BaseDirs::new() {
            Some(base) => base.home_dir().join(stripped),
            None => std::path::PathBuf::from(path),
        },
        None => std::path::PathBuf::from(path),
    };

    std::fs::read_to_string(&expanded_path)
        .context(format!("Failed to read API key from file: {}", path))
        .map(|s| s.trim().to_string())
}
