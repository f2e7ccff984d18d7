//! HTTP/SDK-backed [`Backend`] adapter (spec §4.E), grounded in
//! `OpenAiCompatProvider`: an OpenAI-compatible streaming chat completion
//! endpoint, `data:` SSE framing, tool-call deltas folded into
//! `ToolUse`/`ToolResult` events, `[DONE]` closing the stream.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use pocketpaw_domain::{BackendInfo, Error, Result, SessionKey, Turn};
use serde_json::{json, Value};

use crate::backend::Backend;
use crate::event::{AgentEvent, AgentEventStream};
use crate::sse::sse_event_stream;

#[derive(Debug, Clone)]
pub struct HttpBackendConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
}

pub struct HttpBackend {
    client: reqwest::Client,
    config: HttpBackendConfig,
    info: BackendInfo,
    cancelled: Arc<AtomicBool>,
}

impl HttpBackend {
    pub fn new(client: reqwest::Client, config: HttpBackendConfig, info: BackendInfo) -> Self {
        Self { client, config, info, cancelled: Arc::new(AtomicBool::new(false)) }
    }

    fn chat_completions_url(&self) -> String {
        format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'))
    }

    fn request_body(&self, message: &str, system_prompt: Option<&str>, history: &[Turn], stream: bool) -> Value {
        let mut messages = Vec::new();
        if let Some(sp) = system_prompt {
            messages.push(json!({ "role": "system", "content": sp }));
        }
        for turn in history {
            messages.push(json!({ "role": role_name(&turn.role), "content": turn.content }));
        }
        messages.push(json!({ "role": "user", "content": message }));

        json!({
            "model": self.config.model,
            "messages": messages,
            "stream": stream,
        })
    }

    fn auth(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }
}

fn role_name(role: &pocketpaw_domain::model::Role) -> &'static str {
    use pocketpaw_domain::model::Role;
    match role {
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::System => "system",
    }
}

/// Parses one `data:` payload from an OpenAI-compatible streaming chat
/// completion into zero or more [`AgentEvent`]s.
fn parse_chat_chunk(data: &str) -> Vec<AgentEvent> {
    if data == "[DONE]" {
        return vec![AgentEvent::done()];
    }

    let value: Value = match serde_json::from_str(data) {
        Ok(v) => v,
        Err(_) => return Vec::new(),
    };

    let choice = match value.get("choices").and_then(|c| c.get(0)) {
        Some(c) => c,
        None => return Vec::new(),
    };

    let delta = choice.get("delta").unwrap_or(&Value::Null);

    let mut events = Vec::new();

    if let Some(content) = delta.get("content").and_then(Value::as_str) {
        if !content.is_empty() {
            events.push(AgentEvent::message(content));
        }
    }

    if let Some(tool_calls) = delta.get("tool_calls").and_then(Value::as_array) {
        for call in tool_calls {
            let name = call
                .get("function")
                .and_then(|f| f.get("name"))
                .and_then(Value::as_str)
                .unwrap_or("tool");
            events.push(AgentEvent::tool_use(name));
            if let Some(args) = call.get("function").and_then(|f| f.get("arguments")).and_then(Value::as_str) {
                events.push(AgentEvent::tool_result(args));
            }
        }
    }

    if let Some(usage) = value.get("usage") {
        let mut metadata = serde_json::Map::new();
        metadata.insert("usage".into(), usage.clone());
        events.push(AgentEvent::token_usage(metadata));
    }

    if choice.get("finish_reason").and_then(Value::as_str).is_some() {
        events.push(AgentEvent::done());
    }

    events
}

#[async_trait]
impl Backend for HttpBackend {
    async fn run(
        &self,
        message: &str,
        system_prompt: Option<&str>,
        history: &[Turn],
        _session_key: Option<&SessionKey>,
    ) -> Result<AgentEventStream> {
        self.cancelled.store(false, Ordering::SeqCst);

        let body = self.request_body(message, system_prompt, history, true);
        let response = self
            .auth(self.client.post(self.chat_completions_url()).json(&body))
            .send()
            .await
            .map_err(|e| Error::Backend { backend: self.info.name.clone(), message: e.to_string() })?;

        let is_sse = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|ct| ct.starts_with("text/event-stream"))
            .unwrap_or(false);

        if !is_sse {
            // Server ignored `stream: true`; fall back to one non-streaming
            // read-the-whole-body call per spec.
            let value: Value = response
                .json()
                .await
                .map_err(|e| Error::Backend { backend: self.info.name.clone(), message: e.to_string() })?;
            let content = value
                .get("choices")
                .and_then(|c| c.get(0))
                .and_then(|c| c.get("message"))
                .and_then(|m| m.get("content"))
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let stream = async_stream::stream! {
                yield AgentEvent::message(content);
                yield AgentEvent::done();
            };
            return Ok(Box::pin(stream));
        }

        let cancelled = self.cancelled.clone();
        let stream = sse_event_stream(response, move |data| {
            if cancelled.load(Ordering::SeqCst) {
                return vec![AgentEvent::done()];
            }
            parse_chat_chunk(data)
        });

        Ok(stream)
    }

    fn stop(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    fn info(&self) -> &BackendInfo {
        &self.info
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_content_delta_into_message() {
        let chunk = r#"{"choices":[{"delta":{"content":"Hi"}}]}"#;
        let events = parse_chat_chunk(chunk);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].content(), "Hi");
    }

    #[test]
    fn done_sentinel_becomes_terminal_event() {
        let events = parse_chat_chunk("[DONE]");
        assert_eq!(events.len(), 1);
        assert!(events[0].is_terminal());
    }

    #[test]
    fn finish_reason_appends_done() {
        let chunk = r#"{"choices":[{"delta":{},"finish_reason":"stop"}]}"#;
        let events = parse_chat_chunk(chunk);
        assert!(events.last().unwrap().is_terminal());
    }

    #[test]
    fn tool_call_delta_becomes_tool_use_and_result() {
        let chunk = r#"{"choices":[{"delta":{"tool_calls":[{"function":{"name":"search","arguments":"{\"q\":\"rust\"}"}}]}}]}"#;
        let events = parse_chat_chunk(chunk);
        assert!(matches!(events[0], AgentEvent::ToolUse { .. }));
        assert!(matches!(events[1], AgentEvent::ToolResult { .. }));
    }

    #[test]
    fn malformed_chunk_yields_no_events() {
        assert!(parse_chat_chunk("not json").is_empty());
    }
}
