use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Identifier assigned to a memory record on insert.
pub type MemoryId = i64;

/// Free-form metadata attached to a memory. Values are expected to be scalars or strings.
pub type Metadata = BTreeMap<String, serde_json::Value>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub id: MemoryId,
    pub content: String,
    pub embedding: Vec<f32>,
    #[serde(default)]
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
}

/// A memory paired with its cosine similarity to a query vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredMemory {
    pub record: MemoryRecord,
    pub score: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolLogEntry {
    pub id: i64,
    pub run_id: String,
    pub tool_name: String,
    pub argument: String,
    pub observation: String,
    pub success: bool,
    pub created_at: DateTime<Utc>,
}

/// Returns the key of the first metadata value that is not a scalar or string.
pub fn first_non_scalar_key(metadata: &Metadata) -> Option<&str> {
    metadata
        .iter()
        .find(|(_, value)| value.is_array() || value.is_object())
        .map(|(key, _)| key.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn scalar_metadata_is_accepted() {
        let mut metadata = Metadata::new();
        metadata.insert("source".to_string(), json!("chat"));
        metadata.insert("pinned".to_string(), json!(true));
        metadata.insert("weight".to_string(), json!(0.5));
        metadata.insert("cleared".to_string(), json!(null));

        assert_eq!(first_non_scalar_key(&metadata), None);
    }

    #[test]
    fn nested_metadata_is_reported() {
        let mut metadata = Metadata::new();
        metadata.insert("a".to_string(), json!("ok"));
        metadata.insert("tags".to_string(), json!(["x", "y"]));

        assert_eq!(first_non_scalar_key(&metadata), Some("tags"));
    }
}
