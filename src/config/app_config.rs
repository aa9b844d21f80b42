//! Application-level configuration
//!
//! Defines the top-level configuration: storage, completion backends, embeddings, agent
//! loop bounds, retrieval settings, retry policy, permission rules, and logging.

use crate::agent::model::ProviderKind;
use crate::permissions::PermissionPolicy;
use anyhow::{Context, Result};
use directories::BaseDirs;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// Embedded default configuration file
const DEFAULT_CONFIG: &str = include_str!("../../ondevice-ai.config.toml");

/// Configuration file name
const CONFIG_FILE_NAME: &str = "ondevice-ai.config.toml";

/// Top-level application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Completion backend used by the agent
    #[serde(default)]
    pub model: ModelConfig,
    /// Embedder used by semantic memory
    #[serde(default)]
    pub embeddings: EmbeddingsConfig,
    /// Reasoning loop bounds
    #[serde(default)]
    pub agent: AgentSettings,
    /// Retrieval-augmented answering
    #[serde(default)]
    pub rag: RagConfig,
    /// Retry policy for completion calls
    #[serde(default)]
    pub retry: RetryConfig,
    /// Permission rules for gated tools
    #[serde(default)]
    pub permissions: PermissionPolicy,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from file or create a default configuration
    pub fn load() -> Result<Self> {
        // Try to load from ondevice-ai.config.toml in current directory
        if let Ok(content) = std::fs::read_to_string(CONFIG_FILE_NAME) {
            return toml::from_str(&content)
                .map_err(|e| anyhow::anyhow!("Failed to parse {}: {}", CONFIG_FILE_NAME, e));
        }

        // Try to load from ~/.ondevice-ai/ondevice-ai.config.toml
        if let Some(base_dirs) = BaseDirs::new() {
            let home_config = base_dirs
                .home_dir()
                .join(".ondevice-ai")
                .join(CONFIG_FILE_NAME);
            if let Ok(content) = std::fs::read_to_string(&home_config) {
                return toml::from_str(&content).map_err(|e| {
                    anyhow::anyhow!("Failed to parse {}: {}", home_config.display(), e)
                });
            }
        }

        // Try to load from environment variable CONFIG_PATH
        if let Ok(config_path) = std::env::var("CONFIG_PATH") {
            if let Ok(content) = std::fs::read_to_string(&config_path) {
                return toml::from_str(&content)
                    .map_err(|e| anyhow::anyhow!("Failed to parse {}: {}", config_path, e));
            }
        }

        // No config file found - create one from embedded default
        eprintln!(
            "No configuration file found. Creating {} with default settings...",
            CONFIG_FILE_NAME
        );
        if let Err(e) = std::fs::write(CONFIG_FILE_NAME, DEFAULT_CONFIG) {
            eprintln!("Warning: Could not create {}: {}", CONFIG_FILE_NAME, e);
            eprintln!("Continuing with default configuration in memory.");
        }

        Self::embedded_default()
    }

    /// The configuration shipped inside the binary
    pub fn embedded_default() -> Result<Self> {
        toml::from_str(DEFAULT_CONFIG)
            .map_err(|e| anyhow::anyhow!("Failed to parse embedded default config: {}", e))
    }

    /// Load configuration from a specific file path
    /// If the file doesn't exist, creates it with default settings
    pub fn load_from_file(path: &std::path::Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content).map_err(|e| {
                anyhow::anyhow!("Failed to parse config file {}: {}", path.display(), e)
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                eprintln!(
                    "Configuration file not found at {}. Creating with default settings...",
                    path.display()
                );

                if let Some(parent) = path.parent() {
                    if !parent.as_os_str().is_empty() {
                        std::fs::create_dir_all(parent)
                            .context(format!("Failed to create directory {}", parent.display()))?;
                    }
                }

                std::fs::write(path, DEFAULT_CONFIG).context(format!(
                    "Failed to create config file at {}",
                    path.display()
                ))?;

                Self::embedded_default()
            }
            Err(e) => Err(anyhow::anyhow!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            )),
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.model.provider.is_empty() {
            return Err(anyhow::anyhow!("Model provider cannot be empty"));
        }
        if ProviderKind::from_str(&self.model.provider).is_none() {
            return Err(anyhow::anyhow!(
                "Invalid model provider: {}",
                self.model.provider
            ));
        }

        if let Some(preferred) = &self.rag.preferred_provider {
            if ProviderKind::from_str(preferred).is_none() {
                return Err(anyhow::anyhow!("Invalid RAG provider: {}", preferred));
            }
        }
        for name in self.rag.providers.keys() {
            if ProviderKind::from_str(name).is_none() {
                return Err(anyhow::anyhow!("Invalid RAG provider table: {}", name));
            }
        }

        if self.model.temperature < 0.0 || self.model.temperature > 2.0 {
            return Err(anyhow::anyhow!(
                "Temperature must be between 0.0 and 2.0, got {}",
                self.model.temperature
            ));
        }

        match self.embeddings.provider.to_lowercase().as_str() {
            "openai" | "hash" => {}
            other => return Err(anyhow::anyhow!("Invalid embeddings provider: {}", other)),
        }
        if self.embeddings.dimensions == Some(0) {
            return Err(anyhow::anyhow!("Embedding dimensions must be greater than 0"));
        }

        if self.agent.max_iterations == 0 {
            return Err(anyhow::anyhow!("agent.max_iterations must be at least 1"));
        }
        if self.agent.timeout_ms == 0 {
            return Err(anyhow::anyhow!("agent.timeout_ms must be greater than 0"));
        }
        if self.retry.max_attempts == 0 {
            return Err(anyhow::anyhow!("retry.max_attempts must be at least 1"));
        }

        match self.logging.level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => return Err(anyhow::anyhow!("Invalid log level: {}", self.logging.level)),
        }

        Ok(())
    }

    /// Apply environment variable overrides to the configuration
    pub fn apply_env_overrides(&mut self) {
        fn var(name: &str) -> Option<String> {
            std::env::var(name).ok().filter(|v| !v.trim().is_empty())
        }

        if let Some(provider) = var("ONDEVICE_PROVIDER") {
            self.model.provider = provider;
        }
        if let Some(model_name) = var("ONDEVICE_MODEL") {
            self.model.model_name = Some(model_name);
        }
        if let Some(api_key_source) = var("ONDEVICE_API_KEY_SOURCE") {
            self.model.api_key_source = Some(api_key_source);
        }
        if let Some(temp) = var("ONDEVICE_TEMPERATURE").and_then(|v| v.parse::<f32>().ok()) {
            self.model.temperature = temp;
        }
        if let Some(level) = var("ONDEVICE_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(db_path) = var("ONDEVICE_DB_PATH") {
            self.database.path = PathBuf::from(db_path);
        }
        if let Some(max) = var("ONDEVICE_MAX_ITERATIONS").and_then(|v| v.parse::<usize>().ok()) {
            self.agent.max_iterations = max;
        }
        if let Some(timeout) = var("ONDEVICE_TIMEOUT_MS").and_then(|v| v.parse::<u64>().ok()) {
            self.agent.timeout_ms = timeout;
        }
    }

    /// Provider the RAG service starts with
    pub fn preferred_rag_provider(&self) -> Option<ProviderKind> {
        let name = self
            .rag
            .preferred_provider
            .as_deref()
            .unwrap_or(&self.model.provider);
        ProviderKind::from_str(name)
    }

    /// Get a summary of the configuration
    pub fn summary(&self) -> String {
        let mut summary = String::new();
        summary.push_str("Configuration loaded:\n");
        summary.push_str(&format!("Database: {}\n", self.database.path.display()));
        summary.push_str(&format!("Model Provider: {}\n", self.model.provider));
        if let Some(model) = &self.model.model_name {
            summary.push_str(&format!("Model Name: {}\n", model));
        }
        summary.push_str(&format!("Temperature: {}\n", self.model.temperature));
        summary.push_str(&format!(
            "Embeddings: {} ({})\n",
            self.embeddings.provider, self.embeddings.model
        ));
        summary.push_str(&format!(
            "Agent: max {} iterations, {} ms timeout, {} parse retries\n",
            self.agent.max_iterations, self.agent.timeout_ms, self.agent.retry_attempts
        ));
        summary.push_str(&format!(
            "RAG: {} context snippets, {} extra providers\n",
            self.rag.context_count,
            self.rag.providers.len()
        ));
        summary.push_str(&format!("Permission Rules: {}\n", self.permissions.rule_count()));
        summary.push_str(&format!("Logging Level: {}\n", self.logging.level));
        summary
    }
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the database file
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("~/.ondevice-ai/memory.duckdb"),
        }
    }
}

/// Model provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Provider name ("openai", "anthropic", "grok", "mock")
    pub provider: String,
    /// Model name to use (e.g., "gpt-4.1-mini", "claude-3-5-haiku-latest")
    #[serde(default)]
    pub model_name: Option<String>,
    /// API key source: `env:VAR`, `file:PATH`, or the key itself
    #[serde(default)]
    pub api_key_source: Option<String>,
    /// Default temperature for model completions (0.0 to 2.0)
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Completion length cap
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

fn default_temperature() -> f32 {
    0.7
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: "mock".to_string(),
            model_name: None,
            api_key_source: None,
            temperature: default_temperature(),
            max_tokens: None,
        }
    }
}

/// Embeddings configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingsConfig {
    /// "openai" or "hash" (offline feature hashing)
    #[serde(default = "default_embeddings_provider")]
    pub provider: String,
    #[serde(default = "default_embeddings_model")]
    pub model: String,
    /// Vector length; required by "hash", optional shortening for "openai"
    #[serde(default)]
    pub dimensions: Option<usize>,
    #[serde(default)]
    pub api_key_source: Option<String>,
}

fn default_embeddings_provider() -> String {
    "hash".to_string()
}

fn default_embeddings_model() -> String {
    "text-embedding-3-small".to_string()
}

pub const DEFAULT_HASH_DIMENSIONS: usize = 256;

impl Default for EmbeddingsConfig {
    fn default() -> Self {
        Self {
            provider: default_embeddings_provider(),
            model: default_embeddings_model(),
            dimensions: None,
            api_key_source: None,
        }
    }
}

/// Agent loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSettings {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Regenerations allowed per iteration when the reply cannot be parsed
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    /// Preamble placed before the tool catalog in the system prompt
    #[serde(default)]
    pub system_prompt: Option<String>,
}

fn default_max_iterations() -> usize {
    5
}

fn default_timeout_ms() -> u64 {
    45_000
}

fn default_retry_attempts() -> u32 {
    2
}

impl AgentSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            timeout_ms: default_timeout_ms(),
            retry_attempts: default_retry_attempts(),
            system_prompt: None,
        }
    }
}

/// Retrieval-augmented answering configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagConfig {
    #[serde(default = "default_context_count")]
    pub context_count: usize,
    /// Defaults to `model.provider`
    #[serde(default)]
    pub preferred_provider: Option<String>,
    /// Additional completion backends keyed by provider name
    #[serde(default)]
    pub providers: HashMap<String, ProviderEndpoint>,
}

fn default_context_count() -> usize {
    3
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            context_count: default_context_count(),
            preferred_provider: None,
            providers: HashMap::new(),
        }
    }
}

/// Per-provider model and credentials for the RAG service
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderEndpoint {
    #[serde(default)]
    pub model_name: Option<String>,
    #[serde(default)]
    pub api_key_source: Option<String>,
}

/// Retry policy for transient completion failures
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    500
}

fn default_max_backoff_ms() -> u64 {
    8000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}
