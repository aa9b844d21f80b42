use anyhow::{anyhow, Context, Result};
use async_openai::{
    config::OpenAIConfig, types::CreateEmbeddingRequestArgs, Client as OpenAIClient,
};
use async_trait::async_trait;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Trait that describes an embeddings-capable service.
#[async_trait]
pub trait EmbeddingsService: Send + Sync + 'static {
    /// Generate embeddings for the provided inputs using the given model name.
    async fn create_embeddings(&self, model: &str, inputs: Vec<String>) -> Result<Vec<Vec<f32>>>;
}

/// Client that wraps an embeddings service and keeps track of the model name.
#[derive(Clone)]
pub struct EmbeddingsClient {
    model: String,
    service: Arc<dyn EmbeddingsService>,
}

impl EmbeddingsClient {
    /// Create a client that uses the default OpenAI configuration (OPENAI_API_KEY).
    pub fn new(model: impl Into<String>) -> Self {
        Self::with_service(
            model,
            Arc::new(OpenAIEmbeddingsService::new()) as Arc<dyn EmbeddingsService>,
        )
    }

    /// Create a client that uses the provided API key.
    pub fn with_api_key(model: impl Into<String>, api_key: impl Into<String>) -> Self {
        let service = OpenAIEmbeddingsService::with_api_key(api_key);
        Self::with_service(model, Arc::new(service))
    }

    /// Create a client around a custom embeddings service implementation.
    pub fn with_service(model: impl Into<String>, service: Arc<dyn EmbeddingsService>) -> Self {
        Self {
            model: model.into(),
            service,
        }
    }

    /// Offline client backed by [`HashEmbeddingsService`].
    pub fn hashing(dimensions: usize) -> Self {
        Self::with_service("hash", Arc::new(HashEmbeddingsService::new(dimensions)))
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Ask the underlying service for embeddings for a batch of inputs.
    ///
    /// The service must return exactly one vector per input.
    pub async fn embed_batch<T>(&self, inputs: &[T]) -> Result<Vec<Vec<f32>>>
    where
        T: AsRef<str>,
    {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }

        let sanitized_inputs = inputs
            .iter()
            .map(|input| sanitize_embedding_input(input.as_ref()))
            .collect::<Vec<_>>();

        let embeddings = self
            .service
            .create_embeddings(&self.model, sanitized_inputs)
            .await?;

        if embeddings.len() != inputs.len() {
            return Err(anyhow!(
                "embeddings service returned {} vectors for {} inputs",
                embeddings.len(),
                inputs.len()
            ));
        }

        Ok(embeddings)
    }

    /// Ask the underlying service for an embedding for a single input.
    pub async fn embed(&self, input: &str) -> Result<Vec<f32>> {
        let inputs = [input];
        let mut embeddings = self.embed_batch(&inputs).await?;
        embeddings
            .pop()
            .filter(|embedding| !embedding.is_empty())
            .ok_or_else(|| anyhow!("embeddings service returned an empty vector"))
    }
}

/// Collapse runs of whitespace and cap the payload size.
fn sanitize_embedding_input(input: &str) -> String {
    const MAX_CHARS: usize = 8192;
    let collapsed = input.split_whitespace().collect::<Vec<_>>().join(" ");

    match collapsed.char_indices().nth(MAX_CHARS) {
        Some((cut, _)) => collapsed[..cut].to_string(),
        None => collapsed,
    }
}


/// Default service implementation that uses the async-openai client.
#[derive(Clone)]
pub struct OpenAIEmbeddingsService {
    client: OpenAIClient<OpenAIConfig>,
    dimensions: Option<u32>,
}

impl OpenAIEmbeddingsService {
    /// Create a service with the default OpenAI configuration.
    pub fn new() -> Self {
        Self {
            client: OpenAIClient::new(),
            dimensions: None,
        }
    }

    /// Create a service backed by a specific API key.
    pub fn with_api_key(api_key: impl Into<String>) -> Self {
        let config = OpenAIConfig::new().with_api_key(api_key);
        Self::with_config(config)
    }

    /// Create a service with a custom OpenAI configuration.
    pub fn with_config(config: OpenAIConfig) -> Self {
        Self {
            client: OpenAIClient::with_config(config),
            dimensions: None,
        }
    }

    /// Request shortened vectors from models that support it.
    pub fn with_dimensions(mut self, dimensions: u32) -> Self {
        self.dimensions = Some(dimensions);
        self
    }
}

impl Default for OpenAIEmbeddingsService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EmbeddingsService for OpenAIEmbeddingsService {
    async fn create_embeddings(&self, model: &str, inputs: Vec<String>) -> Result<Vec<Vec<f32>>> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }

        let mut builder = CreateEmbeddingRequestArgs::default();
        builder.model(model).input(inputs);
        if let Some(dimensions) = self.dimensions {
            builder.dimensions(dimensions);
        }
        let request = builder
            .build()
            .context("Failed to build embedding request")?;

        let response = self
            .client
            .embeddings()
            .create(request)
            .await
            .context("OpenAI embeddings request failed")?;

        let mut data = response.data;
        data.sort_by_key(|item| item.index);
        let embeddings = data
            .into_iter()
            .map(|item| item.embedding)
            .collect::<Vec<_>>();

        if embeddings.is_empty() {
            Err(anyhow!("OpenAI embeddings response was empty"))
        } else {
            Ok(embeddings)
        }
    }
}

/// Deterministic, offline embedder based on feature hashing of lowercase word tokens.
///
/// Texts that share words land close together, which is enough for local development and
/// for tests that need stable similarity orderings without a network round trip.
#[derive(Debug, Clone)]
pub struct HashEmbeddingsService {
    dimensions: usize,
}

impl HashEmbeddingsService {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimensions];
        for token in tokenize(text) {
            let mut hasher = DefaultHasher::new();
            token.hash(&mut hasher);
            let hash = hasher.finish();
            let bucket = (hash % self.dimensions as u64) as usize;
            // The top bit picks a sign so unrelated tokens tend to cancel instead of pile up.
            let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for value in &mut vector {
                *value /= norm;
            }
        }
        vector
    }
}

fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(|token| token.to_lowercase())
}

#[async_trait]
impl EmbeddingsService for HashEmbeddingsService {
    async fn create_embeddings(&self, _model: &str, inputs: Vec<String>) -> Result<Vec<Vec<f32>>> {
        Ok(inputs.iter().map(|input| self.embed_text(input)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::vector_store::cosine_similarity;

    #[derive(Clone)]
    struct DummyService {
        embeddings: Vec<Vec<f32>>,
        fail: bool,
    }

    impl DummyService {
        fn ok_single(embedding: Vec<f32>) -> Self {
            Self {
                embeddings: vec![embedding],
                fail: false,
            }
        }

        fn ok_batch(embeddings: Vec<Vec<f32>>) -> Self {
            Self {
                embeddings,
                fail: false,
            }
        }

        fn err() -> Self {
            Self {
                embeddings: Vec::new(),
                fail: true,
            }
        }
    }

    #[async_trait]
    impl EmbeddingsService for DummyService {
        async fn create_embeddings(
            &self,
            _model: &str,
            _inputs: Vec<String>,
        ) -> Result<Vec<Vec<f32>>> {
            if self.fail {
                return Err(anyhow!("boom"));
            }

            Ok(self.embeddings.clone())
        }
    }

    #[tokio::test]
    async fn embed_returns_the_service_embedding() {
        let embedding = vec![0.1, 0.2];
        let service = Arc::new(DummyService::ok_single(embedding.clone()));
        let client = EmbeddingsClient::with_service("model", service);

        let result = client.embed("input").await.unwrap();

        assert_eq!(result, embedding);
    }

    #[tokio::test]
    async fn embed_propagates_errors() {
        let service = Arc::new(DummyService::err());
        let client = EmbeddingsClient::with_service("model", service);

        let result = client.embed("input").await;

        assert!(result.is_err());
    }

    #[tokio::test]
    async fn embed_rejects_empty_vectors() {
        let service = Arc::new(DummyService::ok_single(Vec::new()));
        let client = EmbeddingsClient::with_service("model", service);

        assert!(client.embed("input").await.is_err());
    }

    #[tokio::test]
    async fn embed_batch_returns_all_embeddings() {
        let service = Arc::new(DummyService::ok_batch(vec![vec![0.1, 0.2], vec![0.3, 0.4]]));
        let client = EmbeddingsClient::with_service("model", service);

        let inputs = ["first", "second"];
        let result = client.embed_batch(&inputs).await.unwrap();

        assert_eq!(result.len(), 2);
        assert_eq!(result[0], vec![0.1, 0.2]);
        assert_eq!(result[1], vec![0.3, 0.4]);
    }

    #[tokio::test]
    async fn embed_batch_rejects_count_mismatch() {
        let service = Arc::new(DummyService::ok_single(vec![0.1, 0.2]));
        let client = EmbeddingsClient::with_service("model", service);

        let result = client.embed_batch(&["first", "second"]).await;

        assert!(result.is_err());
    }

    #[test]
    fn hashing_is_deterministic_and_normalized() {
        let service = HashEmbeddingsService::new(64);
        let a = service.embed_text("The user's favorite language is TypeScript");
        let b = service.embed_text("The user's favorite language is TypeScript");

        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        let norm = a.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn hashing_ranks_shared_words_higher() {
        let service = HashEmbeddingsService::new(256);
        let stored = service.embed_text("The user's favorite language is TypeScript");
        let unrelated = service.embed_text("Dentist appointment moved to Friday afternoon");
        let query = service.embed_text("What language does the user like?");

        assert!(cosine_similarity(&query, &stored) > cosine_similarity(&query, &unrelated));
    }

    #[test]
    fn hashing_blank_text_is_zero_vector() {
        let service = HashEmbeddingsService::new(8);
        assert!(service.embed_text("  ...  ").iter().all(|v| *v == 0.0));
    }
}
