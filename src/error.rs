//! Error taxonomy for the memory, retrieval, tool and parsing layers.
//!
//! External capabilities (embeddings, model providers, storage) report `anyhow::Error`;
//! the services wrap those into the typed errors below so callers can tell caller mistakes
//! apart from upstream failures.

use crate::agent::model::ProviderKind;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("input text must not be empty")]
    EmptyInput,

    #[error("embedding dimension mismatch: store expects {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("metadata value for '{0}' must be a scalar or string")]
    InvalidMetadata(String),

    #[error("embedding request failed: {0:#}")]
    Embedding(anyhow::Error),

    #[error("memory storage error: {0:#}")]
    Storage(anyhow::Error),
}

#[derive(Debug, Error)]
pub enum RagError {
    #[error("query must not be empty")]
    EmptyInput,

    #[error("generation failed: {0:#}")]
    Generation(anyhow::Error),

    #[error("no completion backend configured for provider '{}'", .0.as_str())]
    ProviderUnavailable(ProviderKind),
}

/// Failure reported by a tool invocation. Always converted into an observation by the agent.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ToolError {
    pub message: String,
}

impl ToolError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<MemoryError> for ToolError {
    fn from(err: MemoryError) -> Self {
        ToolError::new(err.to_string())
    }
}

/// Why a model reply could not be read as a structured agent reply.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("model reply was empty")]
    Empty,

    #[error("no structured reply found in model output")]
    NoStructuredContent,

    #[error("structured reply had no thought, action or final answer")]
    MissingContent,
}
