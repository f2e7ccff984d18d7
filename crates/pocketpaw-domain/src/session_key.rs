//! Session key: the ordered pair `(channel, chat_id)` that all memory and
//! routing state is keyed by.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionKey {
    pub channel: String,
    pub chat_id: String,
}

impl SessionKey {
    pub fn new(channel: impl Into<String>, chat_id: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            chat_id: chat_id.into(),
        }
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.channel, self.chat_id)
    }
}

/// Normalises a free-form `"channel:chat_id"` or bare `"chat_id"` string into
/// the canonical pair. Bare ids default to the `cli` channel. The channel is
/// lower-cased; chat ids are left verbatim since they may be case-sensitive
/// identifiers (usernames, snowflakes).
pub fn resolve_session_key(raw: &str) -> SessionKey {
    let raw = raw.trim();
    match raw.split_once(':') {
        Some((channel, chat_id)) if !channel.is_empty() && !chat_id.is_empty() => {
            SessionKey::new(channel.to_ascii_lowercase(), chat_id)
        }
        _ => SessionKey::new("cli", raw),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_id_defaults_to_cli_channel() {
        let k = resolve_session_key("42");
        assert_eq!(k, SessionKey::new("cli", "42"));
    }

    #[test]
    fn channel_prefixed_id_splits_on_first_colon() {
        let k = resolve_session_key("telegram:123:thread");
        assert_eq!(k, SessionKey::new("telegram", "123:thread"));
    }

    #[test]
    fn channel_is_lowercased() {
        let k = resolve_session_key("Telegram:123");
        assert_eq!(k.channel, "telegram");
    }

    #[test]
    fn resolving_is_idempotent() {
        for raw in ["42", "telegram:123", "Discord:abc:def"] {
            let once = resolve_session_key(raw);
            let twice = resolve_session_key(&once.to_string());
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn empty_segment_falls_back_to_cli() {
        let k = resolve_session_key(":onlychatid");
        assert_eq!(k, SessionKey::new("cli", ":onlychatid"));
    }
}
