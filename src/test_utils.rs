use std::sync::{Arc, Mutex, OnceLock};

use crate::agent::providers::MockProvider;
use crate::embeddings::EmbeddingsClient;
use crate::memory::MemoryService;
use crate::persistence::Persistence;

/// Dimensionality used by the hashing embedder in tests
pub const TEST_EMBEDDING_DIMENSIONS: usize = 128;

/// Global test utilities
///
/// Provides a process-wide mutex to serialize tests that mutate process-wide
/// state (like environment variables). Use this to avoid flaky tests when
/// `cargo test` runs tests in parallel.
pub fn env_lock() -> &'static Mutex<()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(()))
}

pub fn create_test_db() -> Persistence {
    Persistence::in_memory().expect("in-memory DuckDB should open")
}

/// In-memory memory service over the deterministic hashing embedder
pub fn hashing_memory() -> Arc<MemoryService> {
    Arc::new(MemoryService::in_memory(EmbeddingsClient::hashing(
        TEST_EMBEDDING_DIMENSIONS,
    )))
}

/// Mock provider that replays `responses` in order, cycling when exhausted
pub fn scripted_provider<I, S>(responses: I) -> MockProvider
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    MockProvider::with_responses(responses.into_iter().map(Into::into).collect())
}
