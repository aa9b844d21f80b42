//! Shared agent output data types used by the reasoning loop and CLI

use crate::agent::model::TokenUsage;
use serde::{Deserialize, Serialize};

/// Tool invocation requested by the model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentAction {
    /// Name of the tool, matched exactly against the available set
    pub tool: String,
    /// Raw argument passed to the tool
    pub input: String,
}

/// One iteration of the reasoning loop
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentStep {
    /// 1-based iteration index
    pub iteration: usize,
    pub thought: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<AgentAction>,
    /// Tool output, or a description of why the tool could not run
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observation: Option<String>,
}

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    /// The model produced a final answer
    Completed,
    /// The iteration cap was reached first
    MaxIterations,
    /// The wall-clock budget ran out between iterations
    TimedOut,
    /// The model's reply could not be parsed even after retries
    ParseFailure,
    /// The completion backend failed
    CompletionFailed,
    /// The caller cancelled the run
    Cancelled,
}

impl RunOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunOutcome::Completed => "completed",
            RunOutcome::MaxIterations => "max_iterations",
            RunOutcome::TimedOut => "timed_out",
            RunOutcome::ParseFailure => "parse_failure",
            RunOutcome::CompletionFailed => "completion_failed",
            RunOutcome::Cancelled => "cancelled",
        }
    }
}

/// Result of a single `run()` call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentResult {
    pub success: bool,
    /// Always populated, even when the run degraded
    pub final_answer: String,
    pub steps: Vec<AgentStep>,
    pub outcome: RunOutcome,
    /// Unique identifier for correlating this run with logs and the tool log
    pub run_id: String,
    pub elapsed_ms: u64,
    /// Summed usage across every completion in the run, when the backend reports it
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_usage: Option<TokenUsage>,
}

impl AgentResult {
    /// Actions taken during the run, in order
    pub fn actions(&self) -> impl Iterator<Item = &AgentAction> {
        self.steps.iter().filter_map(|step| step.action.as_ref())
    }
}
