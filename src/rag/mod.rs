//! Retrieval-augmented answering.
//!
//! Retrieval is best effort: when the memory store cannot be queried the answer is still
//! generated, just without context. Only a failing completion backend is an error.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::{Arc, RwLock};

use futures::{Stream, StreamExt};
use tracing::{debug, info, warn};

use crate::agent::model::{GenerationConfig, ModelProvider, ProviderKind};
use crate::error::RagError;
use crate::memory::MemoryService;

pub const DEFAULT_CONTEXT_COUNT: usize = 3;

const DEFAULT_INSTRUCTIONS: &str = "You are a helpful assistant with access to the user's saved memories.";

/// Fragments of a streamed answer
pub type RagStream = Pin<Box<dyn Stream<Item = Result<String, RagError>> + Send>>;

pub struct RagService {
    memory: Arc<MemoryService>,
    providers: HashMap<ProviderKind, Arc<dyn ModelProvider>>,
    preferred: RwLock<ProviderKind>,
    context_count: usize,
    generation: GenerationConfig,
}

impl RagService {
    pub fn new(memory: Arc<MemoryService>, preferred: ProviderKind) -> Self {
        Self {
            memory,
            providers: HashMap::new(),
            preferred: RwLock::new(preferred),
            context_count: DEFAULT_CONTEXT_COUNT,
            generation: GenerationConfig::default(),
        }
    }

    /// Register the completion backend used when `kind` is preferred
    pub fn with_provider(mut self, kind: ProviderKind, provider: Arc<dyn ModelProvider>) -> Self {
        self.providers.insert(kind, provider);
        self
    }

    pub fn with_context_count(mut self, context_count: usize) -> Self {
        self.context_count = context_count;
        self
    }

    pub fn with_generation(mut self, generation: GenerationConfig) -> Self {
        self.generation = generation;
        self
    }

    pub fn preferred_provider(&self) -> ProviderKind {
        *self.preferred.read().unwrap_or_else(|p| p.into_inner())
    }

    /// Switch backends for subsequent calls. Nothing else changes.
    pub fn set_preferred_provider(&self, kind: ProviderKind) {
        *self.preferred.write().unwrap_or_else(|p| p.into_inner()) = kind;
        info!("RAG provider set to {}", kind.as_str());
    }

    /// Kinds with a registered backend
    pub fn available_providers(&self) -> Vec<ProviderKind> {
        ProviderKind::ALL
            .into_iter()
            .filter(|kind| self.providers.contains_key(kind))
            .collect()
    }

    pub async fn answer_with_rag(&self, query: &str) -> Result<String, RagError> {
        self.answer_with_context(query, self.context_count).await
    }

    /// Answer grounded in up to `context_count` retrieved memories
    pub async fn answer_with_context(
        &self,
        query: &str,
        context_count: usize,
    ) -> Result<String, RagError> {
        let query = validate_query(query)?;
        let provider = self.provider()?;
        let context = self.retrieve(query, context_count).await;
        let system_prompt = build_system_prompt(DEFAULT_INSTRUCTIONS, &context);
        self.complete(provider.as_ref(), &system_prompt, query).await
    }

    /// Same pipeline with a caller-supplied system prompt; `use_context = false` skips retrieval.
    pub async fn answer_with_custom_prompt(
        &self,
        query: &str,
        system_prompt: &str,
        use_context: bool,
    ) -> Result<String, RagError> {
        let query = validate_query(query)?;
        let provider = self.provider()?;
        let system_prompt = if use_context {
            let context = self.retrieve(query, self.context_count).await;
            build_system_prompt(system_prompt, &context)
        } else {
            system_prompt.to_string()
        };
        self.complete(provider.as_ref(), &system_prompt, query).await
    }

    /// Stream the grounded answer. Dropping the stream abandons the request.
    pub async fn stream_with_rag(&self, query: &str) -> Result<RagStream, RagError> {
        let query = validate_query(query)?;
        let provider = self.provider()?;
        let context = self.retrieve(query, self.context_count).await;
        let system_prompt = build_system_prompt(DEFAULT_INSTRUCTIONS, &context);

        let stream = provider
            .stream(&system_prompt, query, &self.generation)
            .await
            .map_err(RagError::Generation)?;
        Ok(Box::pin(stream.map(|chunk| chunk.map_err(RagError::Generation))))
    }

    fn provider(&self) -> Result<Arc<dyn ModelProvider>, RagError> {
        let kind = self.preferred_provider();
        self.providers
            .get(&kind)
            .cloned()
            .ok_or(RagError::ProviderUnavailable(kind))
    }

    async fn retrieve(&self, query: &str, context_count: usize) -> Vec<String> {
        if context_count == 0 {
            return Vec::new();
        }
        match self.memory.query_memory(query, context_count).await {
            Ok(snippets) => {
                debug!("Retrieved {} context snippet(s)", snippets.len());
                snippets
            }
            Err(err) => {
                warn!("Retrieval failed, answering without context: {}", err);
                Vec::new()
            }
        }
    }

    async fn complete(
        &self,
        provider: &dyn ModelProvider,
        system_prompt: &str,
        query: &str,
    ) -> Result<String, RagError> {
        let response = provider
            .generate(system_prompt, query, &self.generation)
            .await
            .map_err(RagError::Generation)?;
        Ok(response.content)
    }
}

fn validate_query(query: &str) -> Result<&str, RagError> {
    let query = query.trim();
    if query.is_empty() {
        return Err(RagError::EmptyInput);
    }
    Ok(query)
}

/// Instructions followed by numbered context snippets, when there are any
pub fn build_system_prompt(instructions: &str, context: &[String]) -> String {
    let mut prompt = instructions.trim().to_string();
    if context.is_empty() {
        prompt.push_str(
            "\n\nNo saved context matched this question. Answer from general knowledge, and say so when you do not know something about the user rather than guessing.",
        );
        return prompt;
    }

    prompt.push_str("\n\nRelevant context from memory:\n");
    for (index, snippet) in context.iter().enumerate() {
        prompt.push_str(&format!("[{}] {}\n", index + 1, snippet));
    }
    prompt.push_str(
        "\nUse this context when it is relevant to the question. If it is not enough to answer, say so explicitly instead of making up facts.",
    );
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::providers::MockProvider;
    use crate::embeddings::EmbeddingsClient;

    fn memory() -> Arc<MemoryService> {
        Arc::new(MemoryService::in_memory(EmbeddingsClient::hashing(64)))
    }

    #[tokio::test]
    async fn empty_store_still_answers() {
        let provider = MockProvider::new("I don't have anything saved about that.");
        let rag = RagService::new(memory(), ProviderKind::Mock)
            .with_provider(ProviderKind::Mock, Arc::new(provider.clone()));

        let answer = rag.answer_with_rag("What do I like?").await.unwrap();

        assert_eq!(answer, "I don't have anything saved about that.");
        assert!(provider.prompts()[0]
            .system_prompt
            .contains("No saved context"));
    }

    #[tokio::test]
    async fn retrieved_snippets_reach_the_prompt() {
        let memory = memory();
        memory
            .add_memory("The user's favorite color is green", None)
            .await
            .unwrap();
        let provider = MockProvider::new("Green.");
        let rag = RagService::new(memory, ProviderKind::Mock)
            .with_provider(ProviderKind::Mock, Arc::new(provider.clone()));

        rag.answer_with_rag("favorite color").await.unwrap();

        let prompt = &provider.prompts()[0];
        assert!(prompt.system_prompt.contains("[1] The user's favorite color is green"));
        assert_eq!(prompt.prompt, "favorite color");
    }

    #[tokio::test]
    async fn custom_prompt_without_context_skips_retrieval() {
        let memory = memory();
        memory.add_memory("secret fact", None).await.unwrap();
        let provider = MockProvider::new("ok");
        let rag = RagService::new(memory, ProviderKind::Mock)
            .with_provider(ProviderKind::Mock, Arc::new(provider.clone()));

        rag.answer_with_custom_prompt("secret fact?", "Be terse.", false)
            .await
            .unwrap();

        assert_eq!(provider.prompts()[0].system_prompt, "Be terse.");
    }

    #[tokio::test]
    async fn generation_failure_is_an_error() {
        let rag = RagService::new(memory(), ProviderKind::Mock)
            .with_provider(ProviderKind::Mock, Arc::new(MockProvider::failing("503")));

        let err = rag.answer_with_rag("hello").await.unwrap_err();
        assert!(matches!(err, RagError::Generation(_)));
    }

    #[tokio::test]
    async fn switching_providers_changes_the_backend() {
        let openai = MockProvider::new("from openai").reporting_as(ProviderKind::OpenAI);
        let grok = MockProvider::new("from grok").reporting_as(ProviderKind::Grok);
        let rag = RagService::new(memory(), ProviderKind::OpenAI)
            .with_provider(ProviderKind::OpenAI, Arc::new(openai))
            .with_provider(ProviderKind::Grok, Arc::new(grok));

        assert_eq!(rag.answer_with_rag("hi").await.unwrap(), "from openai");
        rag.set_preferred_provider(ProviderKind::Grok);
        assert_eq!(rag.answer_with_rag("hi").await.unwrap(), "from grok");

        rag.set_preferred_provider(ProviderKind::Anthropic);
        let err = rag.answer_with_rag("hi").await.unwrap_err();
        assert!(matches!(
            err,
            RagError::ProviderUnavailable(ProviderKind::Anthropic)
        ));
    }

    #[tokio::test]
    async fn empty_query_is_rejected() {
        let rag = RagService::new(memory(), ProviderKind::Mock)
            .with_provider(ProviderKind::Mock, Arc::new(MockProvider::default()));
        assert!(matches!(
            rag.answer_with_rag("   ").await,
            Err(RagError::EmptyInput)
        ));
    }

    #[tokio::test]
    async fn streaming_yields_fragments() {
        let rag = RagService::new(memory(), ProviderKind::Mock)
            .with_provider(ProviderKind::Mock, Arc::new(MockProvider::new("one two three")));

        let mut stream = rag.stream_with_rag("count").await.unwrap();
        let mut text = String::new();
        while let Some(fragment) = stream.next().await {
            text.push_str(&fragment.unwrap());
        }
        assert_eq!(text.trim(), "one two three");
    }
}
