//! Grok (xAI) Model Provider
//!
//! xAI exposes an OpenAI-compatible chat API, so this reuses [`OpenAIProvider`] with a
//! different base URL.

use crate::agent::model::ProviderKind;
use crate::agent::providers::OpenAIProvider;
use async_openai::config::OpenAIConfig;

pub const GROK_API_BASE: &str = "https://api.x.ai/v1";
pub const DEFAULT_GROK_MODEL: &str = "grok-3-mini";

pub fn grok_provider(api_key: impl Into<String>, model: Option<&str>) -> OpenAIProvider {
    let config = OpenAIConfig::new()
        .with_api_base(GROK_API_BASE)
        .with_api_key(api_key);
    OpenAIProvider::with_config(config)
        .with_model(model.unwrap_or(DEFAULT_GROK_MODEL))
        .with_kind(ProviderKind::Grok)
}
