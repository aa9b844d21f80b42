//! The reasoning loop.
//!
//! Each iteration asks the model for one structured reply, then either finishes with its
//! final answer or runs the single requested tool and feeds the observation back into the
//! next prompt. Every way a run can end is reported through [`AgentResult`]; `run` itself
//! never fails.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::agent::model::{GenerationConfig, ModelProvider, TokenUsage};
use crate::agent::output::{AgentAction, AgentResult, AgentStep, RunOutcome};
use crate::agent::parser::{evaluate_reply, AgentReply, ParseOutcome};
use crate::config::AgentSettings;
use crate::permissions::PermissionSnapshot;
use crate::persistence::Persistence;
use crate::tools::{ToolRegistry, ToolSet};

const DEFAULT_PREAMBLE: &str =
    "You are a helpful on-device assistant. Think step by step and use tools when they help.";

/// Bounds and prompt settings for one executor
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub max_iterations: usize,
    /// Checked before each iteration starts
    pub timeout: Duration,
    /// Regenerations per iteration when the reply cannot be parsed
    pub retry_attempts: u32,
    pub generation: GenerationConfig,
    pub system_prompt: Option<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: 5,
            timeout: Duration::from_millis(45_000),
            retry_attempts: 2,
            generation: GenerationConfig::default(),
            system_prompt: None,
        }
    }
}

impl AgentConfig {
    pub fn from_settings(settings: &AgentSettings, generation: GenerationConfig) -> Self {
        Self {
            max_iterations: settings.max_iterations,
            timeout: settings.timeout(),
            retry_attempts: settings.retry_attempts,
            generation,
            system_prompt: settings.system_prompt.clone(),
        }
    }
}

/// ReAct executor bound to one provider and one resolved tool set
pub struct AgentExecutor {
    provider: Arc<dyn ModelProvider>,
    tools: ToolSet,
    config: AgentConfig,
    tool_log: Option<Persistence>,
}

/// Accumulates the trace while a run is in flight
struct RunState {
    run_id: String,
    started: Instant,
    steps: Vec<AgentStep>,
    usage: Option<TokenUsage>,
}

impl RunState {
    fn add_usage(&mut self, usage: Option<&TokenUsage>) {
        let Some(usage) = usage else { return };
        let total = self.usage.get_or_insert_with(TokenUsage::default);
        total.prompt_tokens += usage.prompt_tokens;
        total.completion_tokens += usage.completion_tokens;
        total.total_tokens += usage.total_tokens;
    }

    /// Most recent non-empty thought
    fn last_thought(&self) -> Option<&str> {
        self.steps
            .iter()
            .rev()
            .map(|step| step.thought.trim())
            .find(|thought| !thought.is_empty())
    }

    fn finish(self, outcome: RunOutcome, final_answer: String) -> AgentResult {
        let elapsed_ms = self.started.elapsed().as_millis() as u64;
        info!(
            "Run {} finished: {} after {} step(s) in {}ms",
            self.run_id,
            outcome.as_str(),
            self.steps.len(),
            elapsed_ms
        );
        AgentResult {
            success: outcome == RunOutcome::Completed,
            final_answer,
            steps: self.steps,
            outcome,
            run_id: self.run_id,
            elapsed_ms,
            token_usage: self.usage,
        }
    }
}

impl AgentExecutor {
    /// Resolve the registry against `permissions` once; the tool set is fixed afterwards.
    pub fn new(
        provider: Arc<dyn ModelProvider>,
        registry: &ToolRegistry,
        permissions: &dyn PermissionSnapshot,
        config: AgentConfig,
    ) -> Self {
        let tools = registry.resolve(permissions);
        debug!(
            "AgentExecutor created with tools [{}]",
            tools.names().join(", ")
        );
        Self {
            provider,
            tools,
            config,
            tool_log: None,
        }
    }

    /// Record every tool invocation in the `tool_log` table
    pub fn with_tool_log(mut self, persistence: Persistence) -> Self {
        self.tool_log = Some(persistence);
        self
    }

    pub fn tools(&self) -> &ToolSet {
        &self.tools
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub async fn run(&self, query: &str) -> AgentResult {
        self.run_with_cancellation(query, CancellationToken::new())
            .await
    }

    /// Like [`run`](Self::run), but gives up on in-flight model and tool calls once `cancel` fires.
    pub async fn run_with_cancellation(
        &self,
        query: &str,
        cancel: CancellationToken,
    ) -> AgentResult {
        let mut state = RunState {
            run_id: uuid::Uuid::new_v4().to_string(),
            started: Instant::now(),
            steps: Vec::new(),
            usage: None,
        };
        info!(
            "Run {} started with {} tool(s), max {} iteration(s)",
            state.run_id,
            self.tools.len(),
            self.config.max_iterations
        );

        let system_prompt = self.system_prompt();

        for iteration in 1..=self.config.max_iterations {
            if cancel.is_cancelled() {
                return state.finish(RunOutcome::Cancelled, cancelled_answer());
            }
            if state.started.elapsed() >= self.config.timeout {
                let answer = self.timed_out_answer(&state);
                warn!("Run {} timed out before iteration {}", state.run_id, iteration);
                return state.finish(RunOutcome::TimedOut, answer);
            }

            debug!("Run {} iteration {}", state.run_id, iteration);
            let prompt = build_transcript(query, &state.steps);

            let reply = match self
                .next_reply(&system_prompt, &prompt, iteration, &mut state, &cancel)
                .await
            {
                Ok(reply) => reply,
                Err(ended) => return ended,
            };

            if let Some(answer) = reply.final_answer {
                state.steps.push(AgentStep {
                    iteration,
                    thought: reply.thought,
                    action: None,
                    observation: None,
                });
                return state.finish(RunOutcome::Completed, answer);
            }

            let Some(action) = reply.action else {
                // Thought only; keep reasoning.
                state.steps.push(AgentStep {
                    iteration,
                    thought: reply.thought,
                    action: None,
                    observation: None,
                });
                continue;
            };

            let observation = tokio::select! {
                _ = cancel.cancelled() => None,
                observation = self.dispatch(&state.run_id, &action) => Some(observation),
            };
            let cancelled = observation.is_none();
            state.steps.push(AgentStep {
                iteration,
                thought: reply.thought,
                action: Some(action),
                observation: Some(observation.unwrap_or_else(|| "Cancelled".to_string())),
            });
            if cancelled {
                return state.finish(RunOutcome::Cancelled, cancelled_answer());
            }
        }

        let answer = match state.last_thought() {
            Some(thought) => thought.to_string(),
            None => format!(
                "I was unable to complete the request within {} step(s).",
                self.config.max_iterations
            ),
        };
        state.finish(RunOutcome::MaxIterations, answer)
    }

    /// Ask the model for one parseable reply, regenerating on parse failure.
    ///
    /// `Err` carries the finished result when the run cannot continue.
    async fn next_reply(
        &self,
        system_prompt: &str,
        prompt: &str,
        iteration: usize,
        state: &mut RunState,
        cancel: &CancellationToken,
    ) -> Result<AgentReply, AgentResult> {
        let mut retries_used = 0;
        loop {
            let response = tokio::select! {
                _ = cancel.cancelled() => None,
                response = self.provider.generate(system_prompt, prompt, &self.config.generation) => Some(response),
            };
            let response = match response {
                None => {
                    let ended = take_state(state);
                    return Err(ended.finish(RunOutcome::Cancelled, cancelled_answer()));
                }
                Some(Err(err)) => {
                    warn!("Run {} completion failed: {:#}", state.run_id, err);
                    state.steps.push(AgentStep {
                        iteration,
                        thought: String::new(),
                        action: None,
                        observation: Some(format!("Completion failed: {:#}", err)),
                    });
                    let ended = take_state(state);
                    return Err(ended.finish(
                        RunOutcome::CompletionFailed,
                        "Sorry, I couldn't reach the language model to answer that.".to_string(),
                    ));
                }
                Some(Ok(response)) => response,
            };
            state.add_usage(response.usage.as_ref());

            match evaluate_reply(&response.content, retries_used, self.config.retry_attempts) {
                ParseOutcome::Parsed(reply) => return Ok(reply),
                ParseOutcome::NeedsRetry(error) => {
                    retries_used += 1;
                    warn!(
                        "Run {} iteration {}: {} (regenerating, attempt {}/{})",
                        state.run_id, iteration, error, retries_used, self.config.retry_attempts
                    );
                }
                ParseOutcome::Fallback { raw, error } => {
                    warn!(
                        "Run {} iteration {}: {}; using raw reply as the answer",
                        state.run_id, iteration, error
                    );
                    state.steps.push(AgentStep {
                        iteration,
                        thought: String::new(),
                        action: None,
                        observation: Some(format!("Unparseable reply: {}", error)),
                    });
                    let answer = if raw.is_empty() {
                        "Sorry, I couldn't produce an answer to that.".to_string()
                    } else {
                        raw
                    };
                    let ended = take_state(state);
                    return Err(ended.finish(RunOutcome::ParseFailure, answer));
                }
            }
        }
    }

    /// Run the requested tool and turn any outcome into an observation
    async fn dispatch(&self, run_id: &str, action: &AgentAction) -> String {
        let Some(tool) = self.tools.get(&action.tool) else {
            warn!("Run {} requested unknown tool '{}'", run_id, action.tool);
            let available = if self.tools.is_empty() {
                "none".to_string()
            } else {
                self.tools.names().join(", ")
            };
            let observation = format!(
                "Tool '{}' not found. Available tools: {}",
                action.tool, available
            );
            self.log_tool(run_id, action, &observation, false);
            return observation;
        };

        info!("Run {} invoking tool '{}'", run_id, action.tool);
        let (observation, success) = match tool.invoke(&action.input).await {
            Ok(output) => (output, true),
            Err(err) => {
                warn!("Tool '{}' failed: {}", action.tool, err);
                (format!("Tool '{}' failed: {}", action.tool, err), false)
            }
        };
        self.log_tool(run_id, action, &observation, success);
        observation
    }

    fn log_tool(&self, run_id: &str, action: &AgentAction, observation: &str, success: bool) {
        if let Some(persistence) = &self.tool_log {
            if let Err(err) =
                persistence.log_tool(run_id, &action.tool, &action.input, observation, success)
            {
                warn!("Failed to log tool execution: {:#}", err);
            }
        }
    }

    fn system_prompt(&self) -> String {
        let mut prompt = String::new();
        prompt.push_str(
            self.config
                .system_prompt
                .as_deref()
                .unwrap_or(DEFAULT_PREAMBLE),
        );
        prompt.push_str("\n\n");

        if self.tools.is_empty() {
            prompt.push_str("No tools are available. Answer directly.\n\n");
        } else {
            prompt.push_str("Available tools:\n");
            prompt.push_str(&self.tools.describe());
            prompt.push_str("\n\n");
        }

        prompt.push_str("Respond with exactly one JSON object and nothing else.\n");
        prompt.push_str("To use a tool:\n");
        prompt.push_str(
            "{\"thought\": \"what you are thinking\", \"action\": {\"tool\": \"tool_name\", \"input\": \"argument\"}}\n",
        );
        prompt.push_str("When you can answer the user:\n");
        prompt.push_str(
            "{\"thought\": \"what you are thinking\", \"final_answer\": \"your answer\"}\n",
        );
        prompt.push_str(
            "Call at most one tool per reply. If an observation shows an error, adjust instead of repeating the same call.",
        );
        prompt
    }

    fn timed_out_answer(&self, state: &RunState) -> String {
        let notice = format!(
            "(Stopped after reaching the {}ms time limit.)",
            self.config.timeout.as_millis()
        );
        match state.last_thought() {
            Some(thought) => format!("{}\n\n{}", thought, notice),
            None => format!("I ran out of time before finishing. {}", notice),
        }
    }
}

fn take_state(state: &mut RunState) -> RunState {
    RunState {
        run_id: state.run_id.clone(),
        started: state.started,
        steps: std::mem::take(&mut state.steps),
        usage: state.usage.take(),
    }
}

fn cancelled_answer() -> String {
    "The request was cancelled.".to_string()
}

/// The user question followed by every prior step, serialized for the next completion
fn build_transcript(query: &str, steps: &[AgentStep]) -> String {
    let mut prompt = format!("Question: {}\n", query.trim());
    if steps.is_empty() {
        return prompt;
    }

    prompt.push_str("\nPrevious steps:\n");
    for step in steps {
        prompt.push_str(&format!("Step {}\n", step.iteration));
        if !step.thought.is_empty() {
            prompt.push_str(&format!("Thought: {}\n", step.thought));
        }
        if let Some(action) = &step.action {
            prompt.push_str(&format!("Action: {}\n", action.tool));
            prompt.push_str(&format!("Action Input: {}\n", action.input));
        }
        if let Some(observation) = &step.observation {
            prompt.push_str(&format!("Observation: {}\n", observation));
        }
    }
    prompt.push_str("\nContinue with the next JSON reply.\n");
    prompt
}
