//! Anthropic Model Provider
//!
//! Talks to the Anthropic Messages API over reqwest, including server-sent-event streaming.

use crate::agent::model::{
    GenerationConfig, ModelProvider, ModelResponse, ProviderKind, ProviderMetadata, TextStream,
    TokenUsage,
};
use anyhow::{anyhow, Context, Result};
use async_stream::stream;
use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_ANTHROPIC_MODEL: &str = "claude-3-5-haiku-latest";
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
// The Messages API requires max_tokens on every request.
const FALLBACK_MAX_TOKENS: u32 = 1024;

#[derive(Debug, Clone)]
pub struct AnthropicProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    model: String,
    content: Vec<ContentBlock>,
    stop_reason: Option<String>,
    usage: Option<MessagesUsage>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MessagesUsage {
    input_tokens: u32,
    output_tokens: u32,
}

impl AnthropicProvider {
    pub fn new(api_key: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(15))
            .build()
            .unwrap_or_default();
        Self {
            client,
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_ANTHROPIC_MODEL.to_string(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Point the provider at a proxy or test server.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn build_payload(
        &self,
        system_prompt: &str,
        prompt: &str,
        config: &GenerationConfig,
        stream: bool,
    ) -> Value {
        let mut payload = json!({
            "model": self.model,
            "max_tokens": config.max_tokens.unwrap_or(FALLBACK_MAX_TOKENS),
            "messages": [{ "role": "user", "content": prompt }],
        });
        if !system_prompt.trim().is_empty() {
            payload["system"] = json!(system_prompt);
        }
        if let Some(temp) = config.temperature {
            // Anthropic caps temperature at 1.0.
            payload["temperature"] = json!(temp.clamp(0.0, 1.0));
        }
        if let Some(p) = config.top_p {
            payload["top_p"] = json!(p);
        }
        if let Some(stop) = &config.stop_sequences {
            payload["stop_sequences"] = json!(stop);
        }
        if stream {
            payload["stream"] = json!(true);
        }
        payload
    }

    async fn send(&self, payload: &Value) -> Result<reqwest::Response> {
        let response = self
            .client
            .post(&self.base_url)
            .header("content-type", "application/json")
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(payload)
            .send()
            .await
            .context("Anthropic request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("Anthropic API error {}: {}", status, body));
        }
        Ok(response)
    }
}

/// Splits an SSE byte stream into complete lines, decoding only once a line is whole
/// so multi-byte characters split across network chunks survive.
#[derive(Debug, Default)]
struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(newline) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=newline).collect();
            let text = String::from_utf8_lossy(&line[..newline]);
            lines.push(text.trim_end_matches('\r').to_string());
        }
        lines
    }
}

/// Text carried by one SSE `data:` payload, if any.
fn parse_stream_event(data: &str) -> Result<Option<String>> {
    let event: Value = serde_json::from_str(data).context("invalid Anthropic stream event")?;
    match event.get("type").and_then(Value::as_str) {
        Some("content_block_delta") => Ok(event
            .pointer("/delta/text")
            .and_then(Value::as_str)
            .map(str::to_string)),
        Some("error") => {
            let message = event
                .pointer("/error/message")
                .and_then(Value::as_str)
                .unwrap_or("unknown stream error");
            Err(anyhow!("Anthropic stream error: {}", message))
        }
        _ => Ok(None),
    }
}

#[async_trait]
impl ModelProvider for AnthropicProvider {
    async fn generate(
        &self,
        system_prompt: &str,
        prompt: &str,
        config: &GenerationConfig,
    ) -> Result<ModelResponse> {
        let payload = self.build_payload(system_prompt, prompt, config, false);
        debug!("anthropic messages request with model {}", self.model);

        let body: MessagesResponse = self
            .send(&payload)
            .await?
            .json()
            .await
            .context("decoding Anthropic response")?;

        let raw = body
            .content
            .iter()
            .filter(|block| block.kind == "text")
            .filter_map(|block| block.text.as_deref())
            .collect::<Vec<_>>()
            .join("");
        if raw.is_empty() {
            return Err(anyhow!("No text content in Anthropic response"));
        }

        let mut response = ModelResponse::from_raw(&raw, body.model);
        response.finish_reason = body.stop_reason;
        response.usage = body.usage.map(|u| TokenUsage {
            prompt_tokens: u.input_tokens,
            completion_tokens: u.output_tokens,
            total_tokens: u.input_tokens + u.output_tokens,
        });
        Ok(response)
    }

    async fn stream(
        &self,
        system_prompt: &str,
        prompt: &str,
        config: &GenerationConfig,
    ) -> Result<TextStream> {
        let payload = self.build_payload(system_prompt, prompt, config, true);
        let mut bytes = self.send(&payload).await?.bytes_stream();

        let stream = stream! {
            let mut lines = LineBuffer::default();
            'chunks: while let Some(chunk) = bytes.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        yield Err(anyhow!("Stream error: {}", e));
                        break;
                    }
                };
                for line in lines.push(&chunk) {
                    let Some(data) = line.strip_prefix("data:") else {
                        continue;
                    };
                    match parse_stream_event(data.trim()) {
                        Ok(Some(text)) => yield Ok(text),
                        Ok(None) => {}
                        Err(e) => {
                            yield Err(e);
                            break 'chunks;
                        }
                    }
                }
            }
        };

        Ok(Box::pin(stream))
    }

    fn metadata(&self) -> ProviderMetadata {
        ProviderMetadata {
            name: "Anthropic".to_string(),
            supported_models: vec![
                "claude-3-5-haiku-latest".to_string(),
                "claude-3-5-sonnet-latest".to_string(),
                "claude-3-7-sonnet-latest".to_string(),
            ],
            supports_streaming: true,
        }
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Anthropic
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_carries_system_and_limits() {
        let provider = AnthropicProvider::new("key").with_model("claude-test");
        let config = GenerationConfig {
            temperature: Some(1.5),
            max_tokens: None,
            stop_sequences: None,
            top_p: None,
        };

        let payload = provider.build_payload("be terse", "hello", &config, true);

        assert_eq!(payload["model"], "claude-test");
        assert_eq!(payload["system"], "be terse");
        assert_eq!(payload["max_tokens"], FALLBACK_MAX_TOKENS);
        assert_eq!(payload["temperature"], 1.0);
        assert_eq!(payload["stream"], true);
        assert_eq!(payload["messages"][0]["content"], "hello");
    }

    #[test]
    fn blank_system_prompt_is_omitted() {
        let provider = AnthropicProvider::new("key");
        let payload = provider.build_payload("", "hello", &GenerationConfig::default(), false);
        assert!(payload.get("system").is_none());
        assert!(payload.get("stream").is_none());
    }

    #[test]
    fn stream_events_yield_text_deltas_only() {
        let delta = r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hi"}}"#;
        assert_eq!(parse_stream_event(delta).unwrap(), Some("Hi".to_string()));

        let ping = r#"{"type":"ping"}"#;
        assert_eq!(parse_stream_event(ping).unwrap(), None);

        let error = r#"{"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#;
        assert!(parse_stream_event(error)
            .unwrap_err()
            .to_string()
            .contains("Overloaded"));
    }

    #[test]
    fn characters_split_across_chunks_are_reassembled() {
        let line = "data: caf\u{e9}\r\n".as_bytes();
        let split = line.iter().position(|b| *b == 0xC3).unwrap() + 1;

        let mut buffer = LineBuffer::default();
        assert!(buffer.push(&line[..split]).is_empty());
        assert_eq!(buffer.push(&line[split..]), vec!["data: caf\u{e9}".to_string()]);
        assert!(buffer.pending.is_empty());
    }
}
