//! The `codex`/`qwen`/`gemini` sub-backends. Each wraps the same
//! subprocess CLI adapters `pocketpaw-backends` already built for the
//! Agent Loop (spec §4.E) -- a one-shot chat completion here is just "run
//! the adapter to `Done`, concatenate the `Message` deltas" (spec §8's
//! own invariant for what an assistant turn's content is), wrapped in an
//! OpenAI-compatible response envelope. `status()` reads the provider's
//! on-disk credentials file the same way `pocketpaw-plugins::oauth` does,
//! since that's the only place the login state lives -- PocketPaw and
//! this plugin are separate processes, so there's no shared state to
//! reach into instead.

use async_trait::async_trait;
use chrono::Utc;
use futures_util::StreamExt;
use serde_json::{json, Value};
use std::path::PathBuf;

use pocketpaw_backends::event::AgentEvent;
use pocketpaw_backends::{codex_translator, gemini_translator, qwen_translator, Backend, SubprocessBackend, SubprocessBackendConfig};
use pocketpaw_domain::BackendInfo;
use pocketpaw_rotator::{BackendKind, ProviderStatus};

use crate::sub_backend::{ModelEntry, SubBackend};

pub struct OAuthCliBackend {
    kind: BackendKind,
    backend: SubprocessBackend,
    default_model: String,
}

fn credentials_path(kind: BackendKind) -> Option<PathBuf> {
    let home = dirs::home_dir()?;
    Some(match kind {
        BackendKind::Codex => home.join(".codex").join("auth.json"),
        BackendKind::Qwen => home.join(".qwen").join("oauth_creds.json"),
        BackendKind::Gemini => home.join(".gemini").join("oauth_creds.json"),
        _ => return None,
    })
}

impl OAuthCliBackend {
    pub fn new(kind: BackendKind, program: &str, default_model: String) -> Self {
        let mut config = SubprocessBackendConfig::new(program);
        config.model = Some(default_model.clone());
        let info = BackendInfo::new(program);
        let translator = match kind {
            BackendKind::Codex => codex_translator(),
            BackendKind::Qwen => qwen_translator(),
            BackendKind::Gemini => gemini_translator(),
            _ => unreachable!("OAuthCliBackend only constructed for codex/qwen/gemini"),
        };
        Self { kind, backend: SubprocessBackend::new(config, info, translator), default_model }
    }
}

#[async_trait]
impl SubBackend for OAuthCliBackend {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    /// `oauth: true`; `logged_in` mirrors spec §4.J's lazy check --
    /// credentials file present, holds a non-empty `access_token`, and
    /// (when the file carries one) its `expiry_date` hasn't passed.
    async fn status(&self) -> ProviderStatus {
        let Some(path) = credentials_path(self.kind) else {
            return ProviderStatus { oauth: true, logged_in: false };
        };
        let Ok(raw) = tokio::fs::read_to_string(&path).await else {
            return ProviderStatus { oauth: true, logged_in: false };
        };
        let Ok(value) = serde_json::from_str::<Value>(&raw) else {
            return ProviderStatus { oauth: true, logged_in: false };
        };
        let has_token = value
            .get("access_token")
            .and_then(Value::as_str)
            .map(|s| !s.is_empty())
            .unwrap_or(false);
        let not_expired = match value.get("expiry_date").and_then(Value::as_i64) {
            Some(ms) => ms > Utc::now().timestamp_millis(),
            None => true,
        };
        ProviderStatus { oauth: true, logged_in: has_token && not_expired }
    }

    async fn models(&self) -> Vec<ModelEntry> {
        vec![ModelEntry { id: self.default_model.clone(), owned_by: self.kind_name().into(), created: 0 }]
    }

    async fn chat(&self, request: &Value) -> anyhow::Result<Value> {
        let message = last_user_message(request)?;
        let mut stream = self.backend.run(&message, None, &[], None).await?;

        let mut content = String::new();
        let mut saw_error: Option<String> = None;
        while let Some(event) = stream.next().await {
            match event {
                AgentEvent::Message { content: delta, .. } => content.push_str(&delta),
                AgentEvent::Error { content: msg, .. } => saw_error = Some(msg),
                AgentEvent::Done { .. } => break,
                _ => {}
            }
        }

        if let Some(err) = saw_error {
            anyhow::bail!("{} adapter error: {err}", self.kind_name());
        }

        let model = request
            .get("model")
            .and_then(Value::as_str)
            .unwrap_or(&self.default_model)
            .to_string();

        Ok(json!({
            "id": format!("chatcmpl-{}", uuid::Uuid::new_v4()),
            "object": "chat.completion",
            "created": Utc::now().timestamp(),
            "model": model,
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": content},
                "finish_reason": "stop",
            }],
        }))
    }
}

impl OAuthCliBackend {
    fn kind_name(&self) -> &'static str {
        match self.kind {
            BackendKind::Codex => "codex",
            BackendKind::Qwen => "qwen",
            BackendKind::Gemini => "gemini",
            _ => "oauth-cli",
        }
    }
}

/// Pulls the last `role: user` message's text out of an OpenAI-style
/// `messages` array -- the subprocess adapters take a single message
/// string, not the full array, per spec §4.E's `run(message, ...)` shape.
fn last_user_message(request: &Value) -> anyhow::Result<String> {
    let messages = request
        .get("messages")
        .and_then(Value::as_array)
        .ok_or_else(|| anyhow::anyhow!("request missing `messages` array"))?;

    messages
        .iter()
        .rev()
        .find(|m| m.get("role").and_then(Value::as_str) == Some("user"))
        .and_then(|m| m.get("content").and_then(Value::as_str))
        .map(str::to_string)
        .ok_or_else(|| anyhow::anyhow!("no user message found in request"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_user_message_picks_the_most_recent_user_turn() {
        let request = json!({
            "messages": [
                {"role": "user", "content": "first"},
                {"role": "assistant", "content": "reply"},
                {"role": "user", "content": "second"},
            ]
        });
        assert_eq!(last_user_message(&request).unwrap(), "second");
    }

    #[test]
    fn last_user_message_errors_without_a_user_turn() {
        let request = json!({"messages": [{"role": "system", "content": "be nice"}]});
        assert!(last_user_message(&request).is_err());
    }

    #[test]
    fn last_user_message_errors_without_a_messages_array() {
        assert!(last_user_message(&json!({})).is_err());
    }

    #[test]
    fn credentials_path_is_none_for_non_oauth_kinds() {
        assert!(credentials_path(BackendKind::G4f).is_none());
    }
}
