//! Persistent k-nearest-neighbour store over embedded text records.
//!
//! Records live in DuckDB through [`Persistence`]; ranking is an exact cosine scan done in
//! process. The first insert fixes the store's dimensionality and every later insert and
//! query must match it.

use anyhow::Result;
use chrono::Utc;
use std::cmp::Ordering;
use std::sync::{Mutex, RwLock};
use tracing::{debug, info};

use crate::error::MemoryError;
use crate::persistence::Persistence;
use crate::types::{first_non_scalar_key, MemoryId, MemoryRecord, Metadata, ScoredMemory};

pub struct VectorStore {
    persistence: Persistence,
    dimension: RwLock<Option<usize>>,
    // Serializes the dimension check with the insert that may establish it.
    write_guard: Mutex<()>,
}

impl VectorStore {
    pub fn new(persistence: Persistence) -> Result<Self, MemoryError> {
        let dimension = persistence
            .embedding_dimension()
            .map_err(MemoryError::Storage)?;
        debug!("Vector store opened with dimension {:?}", dimension);
        Ok(Self {
            persistence,
            dimension: RwLock::new(dimension),
            write_guard: Mutex::new(()),
        })
    }

    /// Store backed by an in-memory database.
    pub fn in_memory() -> Result<Self, MemoryError> {
        let persistence = Persistence::in_memory().map_err(MemoryError::Storage)?;
        Self::new(persistence)
    }

    pub fn persistence(&self) -> &Persistence {
        &self.persistence
    }

    /// The established dimensionality, or `None` before the first insert.
    pub fn dimension(&self) -> Option<usize> {
        *self.dimension.read().unwrap_or_else(|p| p.into_inner())
    }

    pub fn add(
        &self,
        content: &str,
        embedding: &[f32],
        metadata: &Metadata,
    ) -> Result<MemoryId, MemoryError> {
        if content.trim().is_empty() {
            return Err(MemoryError::EmptyInput);
        }
        if embedding.is_empty() {
            return Err(MemoryError::DimensionMismatch {
                expected: self.dimension().unwrap_or(0),
                actual: 0,
            });
        }
        if let Some(key) = first_non_scalar_key(metadata) {
            return Err(MemoryError::InvalidMetadata(key.to_string()));
        }

        let _guard = self.write_guard.lock().unwrap_or_else(|p| p.into_inner());

        let id = match self.dimension() {
            Some(expected) if expected != embedding.len() => {
                return Err(MemoryError::DimensionMismatch {
                    expected,
                    actual: embedding.len(),
                });
            }
            Some(_) => self
                .persistence
                .insert_memory(content, embedding, metadata, Utc::now())
                .map_err(MemoryError::Storage)?,
            None => {
                let id = self
                    .persistence
                    .insert_first_memory(content, embedding, metadata, Utc::now())
                    .map_err(MemoryError::Storage)?;
                *self.dimension.write().unwrap_or_else(|p| p.into_inner()) =
                    Some(embedding.len());
                info!("Vector store dimension established at {}", embedding.len());
                id
            }
        };
        debug!("Stored memory {} ({} chars)", id, content.len());
        Ok(id)
    }

    /// Up to `k` records ranked by descending cosine similarity to `query`.
    ///
    /// Ties go to the most recent record. Records with a zero-norm embedding never rank.
    pub fn query(&self, query: &[f32], k: usize) -> Result<Vec<ScoredMemory>, MemoryError> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let Some(expected) = self.dimension() else {
            return Ok(Vec::new());
        };
        if query.len() != expected {
            return Err(MemoryError::DimensionMismatch {
                expected,
                actual: query.len(),
            });
        }

        let query_norm = norm(query);
        if query_norm == 0.0 {
            debug!("Zero-norm query vector; nothing can rank");
            return Ok(Vec::new());
        }

        let records = self
            .persistence
            .all_memories()
            .map_err(MemoryError::Storage)?;

        let mut scored: Vec<ScoredMemory> = records
            .into_iter()
            .filter_map(|record| {
                let record_norm = norm(&record.embedding);
                if record_norm == 0.0 || record.embedding.len() != query.len() {
                    return None;
                }
                let score = dot(query, &record.embedding) / (query_norm * record_norm);
                Some(ScoredMemory { record, score })
            })
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| b.record.id.cmp(&a.record.id))
        });
        scored.truncate(k);
        Ok(scored)
    }

    pub fn get(&self, id: MemoryId) -> Result<Option<MemoryRecord>, MemoryError> {
        self.persistence.get_memory(id).map_err(MemoryError::Storage)
    }

    /// Returns `true` when a record existed and was removed.
    pub fn delete(&self, id: MemoryId) -> Result<bool, MemoryError> {
        let removed = self
            .persistence
            .delete_memory(id)
            .map_err(MemoryError::Storage)?;
        if removed {
            debug!("Deleted memory {}", id);
        }
        Ok(removed)
    }

    pub fn list(&self, limit: usize, offset: usize) -> Result<Vec<MemoryRecord>, MemoryError> {
        self.persistence
            .list_memories(limit, offset)
            .map_err(MemoryError::Storage)
    }

    pub fn count(&self) -> Result<u64, MemoryError> {
        self.persistence
            .count_memories()
            .map_err(MemoryError::Storage)
    }
}

/// Cosine similarity of two vectors; 0.0 when either has zero norm or the lengths differ.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let denom = norm(a) * norm(b);
    if denom == 0.0 {
        0.0
    } else {
        dot(a, b) / denom
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store() -> VectorStore {
        VectorStore::in_memory().unwrap()
    }

    #[test]
    fn failed_first_insert_does_not_fix_dimension() {
        let store = store();
        store
            .persistence()
            .conn()
            .execute_batch("DROP TABLE memories;")
            .unwrap();

        assert!(matches!(
            store.add("lost", &[1.0, 0.0], &Metadata::new()),
            Err(MemoryError::Storage(_))
        ));
        assert_eq!(store.dimension(), None);
        assert_eq!(store.persistence().embedding_dimension().unwrap(), None);
    }

    #[test]
    fn query_ranks_by_cosine_similarity() {
        let store = store();
        store.add("east", &[1.0, 0.0], &Metadata::new()).unwrap();
        store.add("north", &[0.0, 1.0], &Metadata::new()).unwrap();
        store.add("north-east", &[1.0, 1.0], &Metadata::new()).unwrap();

        let results = store.query(&[0.9, 0.1], 3).unwrap();

        let order: Vec<&str> = results.iter().map(|r| r.record.content.as_str()).collect();
        assert_eq!(order, vec!["east", "north-east", "north"]);
        assert!(results[0].score > results[1].score);
    }

    #[test]
    fn zero_k_and_empty_store_return_nothing() {
        let store = store();
        assert!(store.query(&[1.0, 0.0], 3).unwrap().is_empty());

        store.add("east", &[1.0, 0.0], &Metadata::new()).unwrap();
        assert!(store.query(&[1.0, 0.0], 0).unwrap().is_empty());
    }

    #[test]
    fn first_insert_fixes_dimension() {
        let store = store();
        assert_eq!(store.dimension(), None);
        store.add("a", &[1.0, 2.0, 3.0], &Metadata::new()).unwrap();
        assert_eq!(store.dimension(), Some(3));

        let err = store.add("b", &[1.0, 2.0], &Metadata::new()).unwrap_err();
        assert!(matches!(
            err,
            MemoryError::DimensionMismatch {
                expected: 3,
                actual: 2
            }
        ));

        let err = store.query(&[1.0], 1).unwrap_err();
        assert!(matches!(err, MemoryError::DimensionMismatch { .. }));
    }

    #[test]
    fn scaling_does_not_change_scores() {
        let store = store();
        store.add("a", &[0.3, 0.4, 0.5], &Metadata::new()).unwrap();

        let base = store.query(&[1.0, 2.0, 3.0], 1).unwrap()[0].score;
        let scaled = store.query(&[2.0, 4.0, 6.0], 1).unwrap()[0].score;

        assert!((base - scaled).abs() < 1e-6);
        assert!(
            (cosine_similarity(&[1.0, 2.0], &[3.0, 4.0])
                - cosine_similarity(&[2.0, 4.0], &[3.0, 4.0]))
            .abs()
                < 1e-6
        );
    }

    #[test]
    fn ties_prefer_most_recent() {
        let store = store();
        let older = store.add("older", &[1.0, 0.0], &Metadata::new()).unwrap();
        let newer = store.add("newer", &[2.0, 0.0], &Metadata::new()).unwrap();

        let results = store.query(&[1.0, 0.0], 2).unwrap();

        assert_eq!(results[0].record.id, newer);
        assert_eq!(results[1].record.id, older);
    }

    #[test]
    fn zero_norm_records_are_excluded() {
        let store = store();
        store.add("degenerate", &[0.0, 0.0], &Metadata::new()).unwrap();
        store.add("real", &[0.0, 1.0], &Metadata::new()).unwrap();

        let results = store.query(&[0.0, 1.0], 5).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].record.content, "real");

        assert!(store.query(&[0.0, 0.0], 5).unwrap().is_empty());
    }

    #[test]
    fn duplicate_adds_get_distinct_ids() {
        let store = store();
        let first = store.add("same", &[1.0, 1.0], &Metadata::new()).unwrap();
        let second = store.add("same", &[1.0, 1.0], &Metadata::new()).unwrap();
        assert_ne!(first, second);

        assert!(store.delete(first).unwrap());
        assert!(!store.delete(first).unwrap());
        assert!(store.get(second).unwrap().is_some());
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn nested_metadata_is_rejected() {
        let store = store();
        let mut metadata = Metadata::new();
        metadata.insert("tags".to_string(), json!({"a": 1}));

        let err = store.add("x", &[1.0], &metadata).unwrap_err();
        assert!(matches!(err, MemoryError::InvalidMetadata(key) if key == "tags"));
        assert_eq!(store.count().unwrap(), 0);
    }
}
