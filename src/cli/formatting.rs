//! Plain-text rendering for CLI output

use crate::agent::output::AgentResult;
use crate::types::{MemoryRecord, ScoredMemory};

const PREVIEW_CHARS: usize = 80;

pub fn render_help() -> String {
    [
        "Commands:",
        "  <text>                 ask the agent",
        "  /trace <text>          ask the agent and show every step",
        "  /rag <text>            answer from saved memories",
        "  /provider <name>       switch the RAG backend (openai, anthropic, grok, mock)",
        "  /remember <text>       save a memory",
        "  /recall <text>         show the closest memories",
        "  /memories [n] [skip]   list memories, newest first",
        "  /forget <id>           delete a memory",
        "  /count                 number of saved memories",
        "  /config                show the effective configuration",
        "  /quit                  leave",
    ]
    .join("\n")
}

/// The final answer, optionally followed by the step trace and run stats
pub fn render_agent_result(result: &AgentResult, trace: bool) -> String {
    let mut out = result.final_answer.clone();
    if !trace {
        return out;
    }

    out.push_str("\n\n");
    for step in &result.steps {
        out.push_str(&format!("Step {}\n", step.iteration));
        if !step.thought.is_empty() {
            out.push_str(&format!("  Thought: {}\n", step.thought));
        }
        if let Some(action) = &step.action {
            out.push_str(&format!("  Action: {}({})\n", action.tool, action.input));
        }
        if let Some(observation) = &step.observation {
            out.push_str(&format!("  Observation: {}\n", preview(observation)));
        }
    }
    out.push_str(&format!(
        "Outcome: {} in {}ms",
        result.outcome.as_str(),
        result.elapsed_ms
    ));
    if let Some(usage) = &result.token_usage {
        out.push_str(&format!(
            "\nTokens: P {} C {} T {}",
            usage.prompt_tokens, usage.completion_tokens, usage.total_tokens
        ));
    }
    out
}

pub fn render_recall(hits: &[ScoredMemory]) -> String {
    if hits.is_empty() {
        return "No matching memories.".to_string();
    }
    hits.iter()
        .map(|hit| {
            format!(
                "#{} ({:.3}) {}",
                hit.record.id,
                hit.score,
                preview(&hit.record.content)
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn render_memories(records: &[MemoryRecord]) -> String {
    if records.is_empty() {
        return "No memories stored.".to_string();
    }
    records
        .iter()
        .map(|record| {
            format!(
                "#{} [{}] {}",
                record.id,
                record.created_at.format("%Y-%m-%d %H:%M"),
                preview(&record.content)
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn preview(content: &str) -> String {
    let trimmed = content.trim();
    let mut preview: String = trimmed.chars().take(PREVIEW_CHARS).collect();
    if trimmed.chars().count() > PREVIEW_CHARS {
        preview.push_str("...");
    }
    preview
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::model::TokenUsage;
    use crate::agent::output::{AgentAction, AgentStep, RunOutcome};

    fn result() -> AgentResult {
        AgentResult {
            success: true,
            final_answer: "It is noon.".to_string(),
            steps: vec![
                AgentStep {
                    iteration: 1,
                    thought: "check the clock".to_string(),
                    action: Some(AgentAction {
                        tool: "current_time".to_string(),
                        input: "utc".to_string(),
                    }),
                    observation: Some("12:00".to_string()),
                },
                AgentStep {
                    iteration: 2,
                    thought: "done".to_string(),
                    action: None,
                    observation: None,
                },
            ],
            outcome: RunOutcome::Completed,
            run_id: "run".to_string(),
            elapsed_ms: 12,
            token_usage: Some(TokenUsage {
                prompt_tokens: 4,
                completion_tokens: 6,
                total_tokens: 10,
            }),
        }
    }

    #[test]
    fn answer_only_without_trace() {
        assert_eq!(render_agent_result(&result(), false), "It is noon.");
    }

    #[test]
    fn trace_lists_steps_and_tokens() {
        let rendered = render_agent_result(&result(), true);
        assert!(rendered.contains("Action: current_time(utc)"));
        assert!(rendered.contains("Outcome: completed in 12ms"));
        assert!(rendered.ends_with("Tokens: P 4 C 6 T 10"));
    }

    #[test]
    fn previews_are_truncated() {
        let long = "x".repeat(200);
        assert_eq!(preview(&long).len(), PREVIEW_CHARS + 3);
        assert_eq!(preview("  short "), "short");
    }
}
