pub mod vector_store;

use std::path::PathBuf;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::embeddings::EmbeddingsClient;
use crate::error::MemoryError;
use crate::persistence::Persistence;
use crate::types::{first_non_scalar_key, MemoryId, MemoryRecord, Metadata, ScoredMemory};

pub use vector_store::{cosine_similarity, VectorStore};

/// Default number of results returned by [`MemoryService::query_memory`].
pub const DEFAULT_QUERY_K: usize = 5;

enum StoreSource {
    Path(PathBuf),
    InMemory,
    Provided,
}

/// Semantic memory facade: embeds text and delegates storage and ranking to a [`VectorStore`].
///
/// The store is opened on first use. Concurrent first callers share a single
/// initialization; later calls go straight to the store.
pub struct MemoryService {
    source: StoreSource,
    store: OnceCell<VectorStore>,
    embeddings: EmbeddingsClient,
}

impl MemoryService {
    /// Service over a DuckDB file that is opened lazily.
    pub fn open(path: impl Into<PathBuf>, embeddings: EmbeddingsClient) -> Self {
        Self {
            source: StoreSource::Path(path.into()),
            store: OnceCell::new(),
            embeddings,
        }
    }

    /// Service over an ephemeral in-memory database.
    pub fn in_memory(embeddings: EmbeddingsClient) -> Self {
        Self {
            source: StoreSource::InMemory,
            store: OnceCell::new(),
            embeddings,
        }
    }

    /// Service over an already-open store.
    pub fn with_store(store: VectorStore, embeddings: EmbeddingsClient) -> Self {
        Self {
            source: StoreSource::Provided,
            store: OnceCell::new_with(Some(store)),
            embeddings,
        }
    }

    pub fn embeddings(&self) -> &EmbeddingsClient {
        &self.embeddings
    }

    pub fn is_initialized(&self) -> bool {
        self.store.initialized()
    }

    /// The underlying store, opening it if this is the first call.
    pub async fn store(&self) -> Result<&VectorStore, MemoryError> {
        self.store
            .get_or_try_init(|| async {
                let persistence = match &self.source {
                    StoreSource::Path(path) => {
                        info!("Opening memory store at {}", path.display());
                        Persistence::new(path)
                    }
                    StoreSource::InMemory => {
                        info!("Opening in-memory memory store");
                        Persistence::in_memory()
                    }
                    StoreSource::Provided => {
                        return Err(MemoryError::Storage(anyhow::anyhow!(
                            "memory store was not provided"
                        )))
                    }
                }
                .map_err(MemoryError::Storage)?;
                VectorStore::new(persistence)
            })
            .await
    }

    /// Embed and store `text`, returning the new record's id.
    pub async fn add_memory(
        &self,
        text: &str,
        metadata: Option<Metadata>,
    ) -> Result<MemoryId, MemoryError> {
        if text.trim().is_empty() {
            return Err(MemoryError::EmptyInput);
        }
        let metadata = metadata.unwrap_or_default();
        if let Some(key) = first_non_scalar_key(&metadata) {
            return Err(MemoryError::InvalidMetadata(key.to_string()));
        }

        let store = self.store().await?;
        let embedding = self
            .embeddings
            .embed(text)
            .await
            .map_err(MemoryError::Embedding)?;
        store.add(text, &embedding, &metadata)
    }

    /// Embed and store several texts with one embeddings request.
    pub async fn add_memories<T>(&self, texts: &[T]) -> Result<Vec<MemoryId>, MemoryError>
    where
        T: AsRef<str>,
    {
        let texts: Vec<&str> = texts.iter().map(AsRef::as_ref).collect();
        if texts.is_empty() || texts.iter().any(|t| t.trim().is_empty()) {
            return Err(MemoryError::EmptyInput);
        }

        let store = self.store().await?;
        let embeddings = self
            .embeddings
            .embed_batch(&texts)
            .await
            .map_err(MemoryError::Embedding)?;

        let metadata = Metadata::new();
        let mut ids = Vec::with_capacity(texts.len());
        for (text, embedding) in texts.iter().zip(&embeddings) {
            ids.push(store.add(text, embedding, &metadata)?);
        }
        info!("Stored {} memories in one batch", ids.len());
        Ok(ids)
    }

    /// Contents of the `k` memories most similar to `query`, best first.
    pub async fn query_memory(&self, query: &str, k: usize) -> Result<Vec<String>, MemoryError> {
        let scored = self.query_scored(query, k).await?;
        Ok(scored.into_iter().map(|hit| hit.record.content).collect())
    }

    pub async fn query_scored(
        &self,
        query: &str,
        k: usize,
    ) -> Result<Vec<ScoredMemory>, MemoryError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(MemoryError::EmptyInput);
        }

        let store = self.store().await?;
        if k == 0 || store.dimension().is_none() {
            return Ok(Vec::new());
        }

        let embedding = self
            .embeddings
            .embed(query)
            .await
            .map_err(MemoryError::Embedding)?;
        let hits = store.query(&embedding, k)?;
        debug!("Recall for '{}' returned {} hits", query, hits.len());
        Ok(hits)
    }

    /// Newest-first page of stored memories.
    pub async fn get_all_memories(
        &self,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<MemoryRecord>, MemoryError> {
        self.store().await?.list(limit, offset)
    }

    pub async fn get_memory(&self, id: MemoryId) -> Result<Option<MemoryRecord>, MemoryError> {
        self.store().await?.get(id)
    }

    pub async fn delete_memory(&self, id: MemoryId) -> Result<bool, MemoryError> {
        self.store().await?.delete(id)
    }

    pub async fn get_memory_count(&self) -> Result<u64, MemoryError> {
        self.store().await?.count()
    }
}
