pub mod app_config;

// Re-export common types for convenience
pub use app_config::{
    AgentSettings, AppConfig, DatabaseConfig, EmbeddingsConfig, LoggingConfig, ModelConfig,
    ProviderEndpoint, RagConfig, RetryConfig, DEFAULT_HASH_DIMENSIONS,
};
