use crate::error::ToolError;
use crate::memory::MemoryService;
use crate::tools::Tool;
use crate::types::Metadata;
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;

/// Saves a fact for later recall
pub struct MemoryStoreTool {
    memory: Arc<MemoryService>,
}

#[derive(Debug, Deserialize)]
struct StoreArgs {
    #[serde(alias = "content")]
    text: String,
    #[serde(default)]
    metadata: Option<Metadata>,
}

impl MemoryStoreTool {
    pub fn new(memory: Arc<MemoryService>) -> Self {
        Self { memory }
    }
}

#[async_trait]
impl Tool for MemoryStoreTool {
    fn name(&self) -> &str {
        "memory_store"
    }

    fn description(&self) -> &str {
        "Save a fact about the user for later. Input: the text to remember, or {\"text\": \"...\"}."
    }

    async fn invoke(&self, input: &str) -> Result<String, ToolError> {
        let args = serde_json::from_str::<StoreArgs>(input).unwrap_or_else(|_| StoreArgs {
            text: input.trim().to_string(),
            metadata: None,
        });

        let mut metadata = args.metadata.unwrap_or_default();
        metadata
            .entry("source".to_string())
            .or_insert_with(|| serde_json::Value::String("agent".to_string()));

        let id = self.memory.add_memory(&args.text, Some(metadata)).await?;
        Ok(format!("Stored memory #{}", id))
    }
}
