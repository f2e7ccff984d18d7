//! Table-driven NDJSON → [`AgentEvent`] translation (spec §4.E, Design
//! Notes: "a table-driven translator rather than a switch ladder"). Each
//! backend ships its own [`NdjsonTranslator`] built from a small table of
//! `(type, item.type) -> fn` entries; new backends are cheap to add by
//! constructing a new table, not by extending a shared match arm.

use crate::event::AgentEvent;
use serde_json::Value;
use std::collections::HashMap;

/// Substrings that mark a line as a transient, suppressible error (spec
/// Design Notes, preserved verbatim rather than reinterpreted as a bug).
/// Kept as a `const` so extending the list is a one-line change.
pub const TRANSIENT_MARKERS: &[&str] = &["Reconnecting", "Falling back"];

pub fn is_transient(text: &str) -> bool {
    TRANSIENT_MARKERS.iter().any(|m| text.contains(m))
}

type TranslateFn = fn(&Value) -> Vec<AgentEvent>;

/// Key is `(ndjson "type", item."type" if present)`.
#[derive(Clone)]
pub struct NdjsonTranslator {
    table: HashMap<(&'static str, Option<&'static str>), TranslateFn>,
}

impl NdjsonTranslator {
    pub fn new() -> Self {
        Self { table: HashMap::new() }
    }

    pub fn register(&mut self, ty: &'static str, item_ty: Option<&'static str>, f: TranslateFn) -> &mut Self {
        self.table.insert((ty, item_ty), f);
        self
    }

    /// Parses one NDJSON line into zero or more [`AgentEvent`]s. Lines that
    /// match no table entry produce no events (unknown/irrelevant NDJSON
    /// types are ignored rather than surfaced as errors). Transient error
    /// lines (per [`TRANSIENT_MARKERS`]) are silently dropped before the
    /// table lookup even runs.
    pub fn translate_line(&self, line: &str) -> Vec<AgentEvent> {
        let value: Value = match serde_json::from_str(line) {
            Ok(v) => v,
            Err(_) => return Vec::new(),
        };
        self.translate(&value)
    }

    pub fn translate(&self, value: &Value) -> Vec<AgentEvent> {
        let ty = match value.get("type").and_then(Value::as_str) {
            Some(t) => t,
            None => return Vec::new(),
        };

        if ty == "error" {
            let message = value
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or_default();
            if is_transient(message) {
                return Vec::new();
            }
        }

        let item_ty = value
            .get("item")
            .and_then(|i| i.get("type"))
            .and_then(Value::as_str);

        if let Some(f) = self.table.get(&(ty, item_ty)) {
            return f(value);
        }
        // Fall back to a type-only match (no item discriminator registered).
        if let Some(f) = self.table.get(&(ty, None)) {
            return f(value);
        }
        Vec::new()
    }
}

impl Default for NdjsonTranslator {
    fn default() -> Self {
        Self::new()
    }
}

/// The Codex-like mapping table from spec §4.E. Gemini/Qwen adapters reuse
/// this shape (see `gemini_translator`/`qwen_translator`) since no richer
/// reference material distinguishes their NDJSON surfaces in the retrieved
/// pack; only the wire field names differ where documented.
pub fn codex_translator() -> NdjsonTranslator {
    let mut t = NdjsonTranslator::new();

    t.register("turn.completed", None, |v| {
        let usage = v.get("usage").cloned().unwrap_or(Value::Null);
        let mut metadata = serde_json::Map::new();
        metadata.insert("usage".into(), usage);
        vec![AgentEvent::token_usage(metadata)]
    });

    t.register("turn.failed", None, |v| {
        let message = v
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(Value::as_str)
            .unwrap_or("turn failed")
            .to_string();
        vec![AgentEvent::error(message)]
    });

    t.register("item.started", Some("command_execution"), |_v| {
        vec![AgentEvent::tool_use("shell")]
    });

    t.register("item.started", Some("file_change"), |_v| {
        vec![AgentEvent::tool_use("file_edit")]
    });

    t.register("item.completed", Some("agent_message"), |v| {
        let text = v
            .get("item")
            .and_then(|i| i.get("text"))
            .and_then(Value::as_str)
            .unwrap_or_default();
        vec![AgentEvent::message(text)]
    });

    t.register("item.completed", Some("reasoning"), |v| {
        let text = v
            .get("item")
            .and_then(|i| i.get("text"))
            .and_then(Value::as_str)
            .unwrap_or_default();
        vec![AgentEvent::Thinking {
            content: text.to_string(),
            metadata: serde_json::Map::new(),
        }]
    });

    t.register("error", None, |v| {
        let message = v.get("message").and_then(Value::as_str).unwrap_or("error").to_string();
        vec![AgentEvent::error(message)]
    });

    t
}

/// Gemini's native NDJSON stream uses `candidates[].content.parts[].text`
/// for message deltas and a final `usageMetadata` block for usage,
/// layered onto the same `item.completed`/`turn.completed` envelope so the
/// rest of the pipeline (transient suppression, table dispatch) is shared.
pub fn gemini_translator() -> NdjsonTranslator {
    let mut t = codex_translator();
    t.register("item.completed", Some("agent_message"), |v| {
        if let Some(text) = v
            .get("item")
            .and_then(|i| i.get("candidates"))
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("content"))
            .and_then(|c| c.get("parts"))
            .and_then(|p| p.get(0))
            .and_then(|p| p.get("text"))
            .and_then(Value::as_str)
        {
            return vec![AgentEvent::message(text)];
        }
        let text = v
            .get("item")
            .and_then(|i| i.get("text"))
            .and_then(Value::as_str)
            .unwrap_or_default();
        vec![AgentEvent::message(text)]
    });
    t
}

/// Qwen's CLI emits the same envelope as Codex; kept as a distinct
/// constructor so it can diverge without touching the Codex table.
pub fn qwen_translator() -> NdjsonTranslator {
    codex_translator()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_message_becomes_message_event() {
        let t = codex_translator();
        let line = r#"{"type":"item.completed","item":{"type":"agent_message","text":"Hello "}}"#;
        let events = t.translate_line(line);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].content(), "Hello ");
    }

    #[test]
    fn command_execution_started_becomes_tool_use_shell() {
        let t = codex_translator();
        let line = r#"{"type":"item.started","item":{"type":"command_execution"}}"#;
        let events = t.translate_line(line);
        assert!(matches!(events[0], AgentEvent::ToolUse { .. }));
    }

    #[test]
    fn turn_failed_becomes_error() {
        let t = codex_translator();
        let line = r#"{"type":"turn.failed","error":{"message":"boom"}}"#;
        let events = t.translate_line(line);
        assert_eq!(events[0].content(), "boom");
    }

    #[test]
    fn transient_error_is_dropped() {
        let t = codex_translator();
        let line = r#"{"type":"error","message":"Reconnecting to upstream..."}"#;
        let events = t.translate_line(line);
        assert!(events.is_empty());
    }

    #[test]
    fn falling_back_is_also_transient() {
        assert!(is_transient("Falling back to secondary provider"));
        assert!(!is_transient("fatal: unrecoverable"));
    }

    #[test]
    fn unknown_type_yields_no_events() {
        let t = codex_translator();
        let line = r#"{"type":"something.unknown"}"#;
        assert!(t.translate_line(line).is_empty());
    }

    #[test]
    fn malformed_json_yields_no_events_not_a_panic() {
        let t = codex_translator();
        assert!(t.translate_line("not json").is_empty());
    }
}
