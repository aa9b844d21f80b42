//! Application wiring.
//!
//! Every long-lived service is built here once and handed out by reference. Nothing in the
//! crate reaches for process-wide state.

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use tracing::{debug, info, warn};

use crate::agent::factory::{
    create_embeddings_client, create_provider, create_provider_for, generation_config,
};
use crate::agent::model::{ModelProvider, ProviderKind};
use crate::agent::{AgentConfig, AgentExecutor};
use crate::config::AppConfig;
use crate::memory::MemoryService;
use crate::permissions::{PermissionPolicy, PermissionSnapshot};
use crate::rag::RagService;
use crate::tools::builtin::{CalendarBackend, InMemoryCalendar};
use crate::tools::ToolRegistry;

pub struct Application {
    pub config: AppConfig,
    pub memory: Arc<MemoryService>,
    pub rag: RagService,
    pub registry: ToolRegistry,
    pub permissions: PermissionPolicy,
    provider: Arc<dyn ModelProvider>,
}

impl Application {
    /// Build from config with a process-local calendar
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let calendar: Arc<dyn CalendarBackend> = Arc::new(InMemoryCalendar::new());
        Self::with_calendar(config, Some(calendar))
    }

    /// Build from config, exposing calendar tools only when the host supplies a backend
    pub fn with_calendar(
        config: &AppConfig,
        calendar: Option<Arc<dyn CalendarBackend>>,
    ) -> Result<Self> {
        config.validate().context("validating configuration")?;

        let embeddings = create_embeddings_client(&config.embeddings)
            .context("creating embeddings client")?;
        let memory = Arc::new(MemoryService::open(&config.database.path, embeddings));

        let provider = create_provider(&config.model, &config.retry)
            .context("creating model provider")?;
        let rag = build_rag(config, memory.clone(), provider.clone())?;

        let registry = ToolRegistry::with_builtin_tools(memory.clone(), calendar);
        info!(
            "Application ready: provider={}, tools={}",
            config.model.provider,
            registry.len()
        );

        Ok(Self {
            config: config.clone(),
            memory,
            rag,
            registry,
            permissions: config.permissions.clone(),
            provider,
        })
    }

    pub fn provider(&self) -> Arc<dyn ModelProvider> {
        self.provider.clone()
    }

    /// Executor resolved against the configured permission policy
    pub async fn executor(&self) -> Result<AgentExecutor> {
        self.executor_with(&self.permissions).await
    }

    /// Executor resolved against a caller-supplied permission snapshot
    pub async fn executor_with(
        &self,
        permissions: &dyn PermissionSnapshot,
    ) -> Result<AgentExecutor> {
        let store = self.memory.store().await?;
        let config =
            AgentConfig::from_settings(&self.config.agent, generation_config(&self.config.model));
        Ok(
            AgentExecutor::new(self.provider.clone(), &self.registry, permissions, config)
                .with_tool_log(store.persistence().clone()),
        )
    }
}

/// RAG service with one backend per configured provider kind
fn build_rag(
    config: &AppConfig,
    memory: Arc<MemoryService>,
    model_provider: Arc<dyn ModelProvider>,
) -> Result<RagService> {
    let model_kind = ProviderKind::from_str(&config.model.provider)
        .ok_or_else(|| anyhow!("Unknown provider: {}", config.model.provider))?;
    let preferred = config.preferred_rag_provider().unwrap_or(model_kind);

    let mut rag = RagService::new(memory, preferred)
        .with_context_count(config.rag.context_count)
        .with_generation(generation_config(&config.model))
        .with_provider(model_kind, model_provider);

    for (name, endpoint) in &config.rag.providers {
        let Some(kind) = ProviderKind::from_str(name) else {
            continue;
        };
        if kind == model_kind {
            continue;
        }
        match create_provider_for(
            kind,
            endpoint.model_name.as_deref(),
            endpoint.api_key_source.as_deref(),
            &config.retry,
        ) {
            Ok(provider) => {
                debug!("RAG backend registered for {}", kind.as_str());
                rag = rag.with_provider(kind, provider);
            }
            Err(err) => warn!("Skipping RAG provider {}: {:#}", kind.as_str(), err),
        }
    }

    Ok(rag)
}
