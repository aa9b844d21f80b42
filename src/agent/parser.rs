//! Structured-reply parsing for the reasoning loop.
//!
//! The model is asked for a JSON object with a thought plus either an action or a final
//! answer. Real replies drift: prose around the object, code fences, `<think>` blocks,
//! alternate key names, or the classic `Thought:` / `Action:` line format. The parser
//! accepts all of those and reports anything else as a [`ParseError`].

use crate::agent::model::parse_thinking_tokens;
use crate::agent::output::AgentAction;
use crate::error::ParseError;
use regex::Regex;
use serde_json::{Map, Value};
use std::sync::LazyLock;

/// What the model said in one turn.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AgentReply {
    pub thought: String,
    pub action: Option<AgentAction>,
    pub final_answer: Option<String>,
}

/// Result of feeding one raw reply through the parse state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseOutcome {
    Parsed(AgentReply),
    /// Unparseable, but the iteration still has regenerations left
    NeedsRetry(ParseError),
    /// Out of regenerations; the raw text becomes the answer
    Fallback { raw: String, error: ParseError },
}

/// Classify a reply given how many regenerations this iteration has already used.
pub fn evaluate_reply(raw: &str, retries_used: u32, retry_attempts: u32) -> ParseOutcome {
    match parse_reply(raw) {
        Ok(reply) => ParseOutcome::Parsed(reply),
        Err(error) if retries_used < retry_attempts => ParseOutcome::NeedsRetry(error),
        Err(error) => ParseOutcome::Fallback {
            raw: parse_thinking_tokens(raw).1.trim().to_string(),
            error,
        },
    }
}

pub fn parse_reply(raw: &str) -> Result<AgentReply, ParseError> {
    let (reasoning, content) = parse_thinking_tokens(raw);
    let content = content.trim();
    if content.is_empty() {
        return Err(ParseError::Empty);
    }

    let mut saw_json = false;
    for object in json_objects(content) {
        saw_json = true;
        if let Some(mut reply) = reply_from_json(&object) {
            if reply.thought.is_empty() {
                reply.thought = reasoning.clone().unwrap_or_default();
            }
            return Ok(reply);
        }
    }

    if let Some(mut reply) = reply_from_labels(content) {
        if reply.thought.is_empty() {
            reply.thought = reasoning.unwrap_or_default();
        }
        return Ok(reply);
    }

    if saw_json {
        Err(ParseError::MissingContent)
    } else {
        Err(ParseError::NoStructuredContent)
    }
}

/// Every top-level JSON object embedded in `text`, in order of appearance.
fn json_objects(text: &str) -> Vec<Map<String, Value>> {
    let mut found = Vec::new();
    let mut search_from = 0;

    while let Some(offset) = text[search_from..].find('{') {
        let start = search_from + offset;
        match balanced_object_end(&text[start..]) {
            Some(len) => {
                let candidate = &text[start..start + len];
                if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(candidate) {
                    found.push(map);
                    search_from = start + len;
                    continue;
                }
                search_from = start + 1;
            }
            None => search_from = start + 1,
        }
    }
    found
}

/// Byte length of the brace-balanced object at the start of `text`, honouring JSON strings.
fn balanced_object_end(text: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (idx, ch) in text.char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(idx + 1);
                }
            }
            _ => {}
        }
    }
    None
}

fn first_key<'a>(map: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|key| map.get(*key))
        .find(|value| !value.is_null())
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.trim().to_string(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn is_final_marker(tool: &str) -> bool {
    let normalized = tool.trim().to_lowercase().replace(['_', '-'], " ");
    normalized == "final answer" || normalized == "finish"
}

fn reply_from_json(map: &Map<String, Value>) -> Option<AgentReply> {
    let thought = first_key(map, &["thought", "reasoning", "thinking"])
        .map(value_text)
        .unwrap_or_default();

    let mut final_answer = first_key(map, &["final_answer", "finalAnswer", "answer"])
        .map(value_text)
        .filter(|answer| !answer.is_empty());

    let top_level_input = first_key(map, &["action_input", "actionInput", "input"]);
    let action_value = first_key(map, &["action"]).or_else(|| {
        first_key(map, &["actions"])
            .and_then(Value::as_array)
            .and_then(|actions| actions.first())
    });

    let mut action = action_value.and_then(|value| match value {
        Value::Object(inner) => {
            let tool = first_key(inner, &["tool", "name", "tool_name"]).map(value_text)?;
            let input = first_key(inner, &["input", "argument", "args", "arguments", "action_input"])
                .or(top_level_input)
                .map(value_text)
                .unwrap_or_default();
            Some(AgentAction { tool, input })
        }
        Value::String(tool) => Some(AgentAction {
            tool: tool.trim().to_string(),
            input: top_level_input.map(value_text).unwrap_or_default(),
        }),
        _ => None,
    });
    action = action.filter(|a| !a.tool.is_empty());

    if let Some(candidate) = &action {
        if is_final_marker(&candidate.tool) {
            if final_answer.is_none() && !candidate.input.is_empty() {
                final_answer = Some(candidate.input.clone());
            }
            action = None;
        }
    }

    if thought.is_empty() && action.is_none() && final_answer.is_none() {
        return None;
    }
    Some(AgentReply {
        thought,
        action,
        final_answer,
    })
}

static LABEL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(thought|action input|action|final answer)\s*:\s*(.*)$")
        .expect("valid label pattern")
});

static CALL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*([A-Za-z_][A-Za-z0-9_\-]*)\s*[\(\[](.*)[\)\]]\s*$").expect("valid call pattern")
});

#[derive(Clone, Copy, PartialEq, Eq)]
enum Label {
    Thought,
    Action,
    ActionInput,
    FinalAnswer,
}

/// `Thought:` / `Action:` / `Action Input:` / `Final Answer:` line format.
fn reply_from_labels(text: &str) -> Option<AgentReply> {
    let mut thought = String::new();
    let mut tool: Option<String> = None;
    let mut input: Option<String> = None;
    let mut final_answer: Option<String> = None;
    let mut current: Option<Label> = None;

    for line in text.lines() {
        if let Some(captures) = LABEL_PATTERN.captures(line) {
            let label = match captures[1].to_lowercase().as_str() {
                "thought" => Label::Thought,
                "action" => Label::Action,
                "action input" => Label::ActionInput,
                _ => Label::FinalAnswer,
            };
            let value = captures[2].trim().to_string();
            match label {
                // Only the first action in a reply is honoured.
                Label::Action if tool.is_some() => {
                    current = None;
                    continue;
                }
                Label::ActionInput if input.is_some() => {
                    current = None;
                    continue;
                }
                _ => {}
            }
            append(label, &value, &mut thought, &mut tool, &mut input, &mut final_answer);
            current = Some(label);
        } else if let Some(label) = current {
            if label != Label::Action {
                append(label, line.trim(), &mut thought, &mut tool, &mut input, &mut final_answer);
            }
        }
    }

    let mut action = tool.filter(|t| !t.is_empty()).map(|tool| {
        let input = input.clone().unwrap_or_default();
        match CALL_PATTERN.captures(&tool) {
            Some(call) if input.is_empty() => AgentAction {
                tool: call[1].to_string(),
                input: call[2].trim().trim_matches('"').to_string(),
            },
            _ => AgentAction {
                tool: tool.trim_matches('`').to_string(),
                input,
            },
        }
    });

    if let Some(candidate) = &action {
        if is_final_marker(&candidate.tool) {
            if final_answer.is_none() && !candidate.input.is_empty() {
                final_answer = Some(candidate.input.clone());
            }
            action = None;
        }
    }

    let final_answer = final_answer
        .map(|a| a.trim().to_string())
        .filter(|a| !a.is_empty());
    let thought = thought.trim().to_string();
    if thought.is_empty() && action.is_none() && final_answer.is_none() {
        return None;
    }
    Some(AgentReply {
        thought,
        action,
        final_answer,
    })
}

fn append(
    label: Label,
    value: &str,
    thought: &mut String,
    tool: &mut Option<String>,
    input: &mut Option<String>,
    final_answer: &mut Option<String>,
) {
    let target = match label {
        Label::Thought => {
            if !thought.is_empty() && !value.is_empty() {
                thought.push('\n');
            }
            thought.push_str(value);
            return;
        }
        Label::Action => tool,
        Label::ActionInput => input,
        Label::FinalAnswer => final_answer,
    };
    match target {
        Some(existing) if !value.is_empty() => {
            existing.push('\n');
            existing.push_str(value);
        }
        Some(_) => {}
        None => *target = Some(value.to_string()),
    }
}
