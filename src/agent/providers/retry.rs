//! Bounded retry with exponential backoff around any [`ModelProvider`].

use crate::agent::model::{
    GenerationConfig, ModelProvider, ModelResponse, ProviderKind, ProviderMetadata, TextStream,
};
use anyhow::Result;
use async_trait::async_trait;
use rand::Rng;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one. Never less than 1.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_millis(8000),
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay before retry number `retry` (1-based), without jitter.
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }

    /// Backoff plus up to 25% random jitter.
    fn jittered_backoff(&self, retry: u32) -> Duration {
        let base = self.backoff(retry);
        let jitter = rand::thread_rng().gen_range(0.0..=0.25);
        base.mul_f64(1.0 + jitter)
    }

    async fn run<T, F, Fut>(&self, label: &str, mut attempt: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut tries = 1;
        loop {
            match attempt().await {
                Ok(value) => return Ok(value),
                Err(err) if tries < max_attempts => {
                    let delay = self.jittered_backoff(tries);
                    warn!(
                        "{} attempt {}/{} failed: {:#}; retrying in {:?}",
                        label, tries, max_attempts, err, delay
                    );
                    tokio::time::sleep(delay).await;
                    tries += 1;
                }
                Err(err) => {
                    return Err(err.context(format!("{} failed after {} attempts", label, tries)))
                }
            }
        }
    }
}

/// Wraps a provider and retries failed calls according to a [`RetryPolicy`].
///
/// Streams are retried only while being established; once fragments flow, errors pass
/// through to the consumer.
pub struct RetryingProvider {
    inner: Arc<dyn ModelProvider>,
    policy: RetryPolicy,
}

impl RetryingProvider {
    pub fn new(inner: Arc<dyn ModelProvider>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }
}

#[async_trait]
impl ModelProvider for RetryingProvider {
    async fn generate(
        &self,
        system_prompt: &str,
        prompt: &str,
        config: &GenerationConfig,
    ) -> Result<ModelResponse> {
        let label = format!("{} completion", self.inner.kind().as_str());
        self.policy
            .run(&label, || self.inner.generate(system_prompt, prompt, config))
            .await
    }

    async fn stream(
        &self,
        system_prompt: &str,
        prompt: &str,
        config: &GenerationConfig,
    ) -> Result<TextStream> {
        let label = format!("{} stream", self.inner.kind().as_str());
        self.policy
            .run(&label, || self.inner.stream(system_prompt, prompt, config))
            .await
    }

    fn metadata(&self) -> ProviderMetadata {
        self.inner.metadata()
    }

    fn kind(&self) -> ProviderKind {
        self.inner.kind()
    }
}
