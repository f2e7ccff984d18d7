//! The Agent Event Protocol (spec §4.D). Mirrors
//! `sa_domain::stream::StreamEvent`'s tagged-enum shape, generalised to the
//! seven event types the spec names instead of the teacher's
//! token/tool-call/done/error vocabulary.

use futures_core::Stream;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::pin::Pin;

pub type AgentEventStream = Pin<Box<dyn Stream<Item = AgentEvent> + Send + 'static>>;

fn empty_metadata() -> Map<String, Value> {
    Map::new()
}

/// A well-formed backend stream emits zero or more non-terminal events
/// followed by exactly one terminal event (`Done`, or `Error` immediately
/// followed by `Done`). `metadata` is untyped so unknown keys never fail
/// deserialization -- consumers tolerate extra fields by construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// Additive text delta. Concatenation in arrival order yields the
    /// final assistant text for the turn.
    Message {
        content: String,
        #[serde(default = "empty_metadata")]
        metadata: Map<String, Value>,
    },
    Thinking {
        content: String,
        #[serde(default = "empty_metadata")]
        metadata: Map<String, Value>,
    },
    ToolUse {
        content: String,
        #[serde(default = "empty_metadata")]
        metadata: Map<String, Value>,
    },
    ToolResult {
        content: String,
        #[serde(default = "empty_metadata")]
        metadata: Map<String, Value>,
    },
    Error {
        content: String,
        #[serde(default = "empty_metadata")]
        metadata: Map<String, Value>,
    },
    TokenUsage {
        content: String,
        #[serde(default = "empty_metadata")]
        metadata: Map<String, Value>,
    },
    Done {
        content: String,
        #[serde(default = "empty_metadata")]
        metadata: Map<String, Value>,
    },
}

impl AgentEvent {
    pub fn message(content: impl Into<String>) -> Self {
        Self::Message { content: content.into(), metadata: empty_metadata() }
    }

    pub fn tool_use(name: &str) -> Self {
        let mut metadata = Map::new();
        metadata.insert("name".into(), Value::String(name.to_string()));
        Self::ToolUse { content: String::new(), metadata }
    }

    pub fn tool_result(content: impl Into<String>) -> Self {
        Self::ToolResult { content: content.into(), metadata: empty_metadata() }
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self::Error { content: content.into(), metadata: empty_metadata() }
    }

    pub fn token_usage(metadata: Map<String, Value>) -> Self {
        Self::TokenUsage { content: String::new(), metadata }
    }

    pub fn done() -> Self {
        Self::Done { content: String::new(), metadata: empty_metadata() }
    }

    pub fn content(&self) -> &str {
        match self {
            AgentEvent::Message { content, .. }
            | AgentEvent::Thinking { content, .. }
            | AgentEvent::ToolUse { content, .. }
            | AgentEvent::ToolResult { content, .. }
            | AgentEvent::Error { content, .. }
            | AgentEvent::TokenUsage { content, .. }
            | AgentEvent::Done { content, .. } => content,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, AgentEvent::Done { .. })
    }
}

/// Truncates anything after the first terminal event -- grounds the spec
/// §7 invariant that "a backend that emits an `error` after `done` has the
/// extra event ignored".
pub fn take_until_done(events: Vec<AgentEvent>) -> Vec<AgentEvent> {
    let mut out = Vec::with_capacity(events.len());
    for ev in events {
        let terminal = ev.is_terminal();
        out.push(ev);
        if terminal {
            break;
        }
    }
    out
}

/// Concatenates all `Message` deltas in arrival order -- the assistant
/// turn's content per spec's cross-cutting invariant (§8).
pub fn concat_message_content(events: &[AgentEvent]) -> String {
    events
        .iter()
        .filter_map(|e| match e {
            AgentEvent::Message { content, .. } => Some(content.as_str()),
            _ => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_until_done_drops_trailing_events() {
        let events = vec![
            AgentEvent::message("hi"),
            AgentEvent::done(),
            AgentEvent::error("should be ignored"),
        ];
        let out = take_until_done(events);
        assert_eq!(out.len(), 2);
        assert!(out[1].is_terminal());
    }

    #[test]
    fn concat_message_content_ignores_non_message_events() {
        let events = vec![
            AgentEvent::message("Hello "),
            AgentEvent::tool_use("shell"),
            AgentEvent::message("world!"),
            AgentEvent::done(),
        ];
        assert_eq!(concat_message_content(&events), "Hello world!");
    }

    #[test]
    fn unknown_metadata_keys_deserialize_without_error() {
        let json = serde_json::json!({
            "type": "message",
            "content": "hi",
            "metadata": {"unexpected_key": 42, "another": "value"}
        });
        let ev: AgentEvent = serde_json::from_value(json).unwrap();
        assert_eq!(ev.content(), "hi");
    }
}
