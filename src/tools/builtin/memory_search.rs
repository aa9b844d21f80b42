use crate::error::ToolError;
use crate::memory::MemoryService;
use crate::tools::Tool;
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;

const DEFAULT_RESULTS: usize = 3;
const MAX_RESULTS: usize = 10;

/// Semantic lookup over the user's stored memories
pub struct MemorySearchTool {
    memory: Arc<MemoryService>,
}

#[derive(Debug, Deserialize)]
struct SearchArgs {
    query: String,
    #[serde(default)]
    k: Option<usize>,
}

impl MemorySearchTool {
    pub fn new(memory: Arc<MemoryService>) -> Self {
        Self { memory }
    }

    /// Accepts either a bare query or `{"query": "...", "k": 3}`.
    fn parse_args(input: &str) -> SearchArgs {
        serde_json::from_str::<SearchArgs>(input).unwrap_or_else(|_| SearchArgs {
            query: input.trim().trim_matches('"').to_string(),
            k: None,
        })
    }
}

#[async_trait]
impl Tool for MemorySearchTool {
    fn name(&self) -> &str {
        "memory_search"
    }

    fn description(&self) -> &str {
        "Search the user's saved memories by meaning. Input: the search text, or {\"query\": \"...\", \"k\": 3}."
    }

    async fn invoke(&self, input: &str) -> Result<String, ToolError> {
        let args = Self::parse_args(input);
        let k = args.k.unwrap_or(DEFAULT_RESULTS).clamp(1, MAX_RESULTS);

        let hits = self.memory.query_scored(&args.query, k).await?;
        if hits.is_empty() {
            return Ok("No relevant memories found.".to_string());
        }

        Ok(hits
            .iter()
            .enumerate()
            .map(|(idx, hit)| format!("{}. ({:.2}) {}", idx + 1, hit.score, hit.record.content))
            .collect::<Vec<_>>()
            .join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::EmbeddingsClient;

    fn memory() -> Arc<MemoryService> {
        Arc::new(MemoryService::in_memory(EmbeddingsClient::hashing(128)))
    }

    #[tokio::test]
    async fn reports_ranked_hits_with_scores() {
        let memory = memory();
        memory
            .add_memory("The user's favorite language is TypeScript", None)
            .await
            .unwrap();
        let tool = MemorySearchTool::new(memory);

        let output = tool
            .invoke(r#"{"query": "favorite language", "k": 1}"#)
            .await
            .unwrap();

        assert!(output.starts_with("1. ("));
        assert!(output.contains("TypeScript"));
    }

    #[tokio::test]
    async fn empty_store_is_not_an_error() {
        let tool = MemorySearchTool::new(memory());
        let output = tool.invoke("anything").await.unwrap();
        assert_eq!(output, "No relevant memories found.");
    }

    #[tokio::test]
    async fn blank_query_fails() {
        let tool = MemorySearchTool::new(memory());
        let err = tool.invoke("  ").await.unwrap_err();
        assert!(err.message.contains("empty"));
    }
}
