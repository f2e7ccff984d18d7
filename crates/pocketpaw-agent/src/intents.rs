//! Local natural-language intent matching (spec §4.G step 2). Regex-driven
//! priority list so the common plugin-control path never needs a backend
//! round trip, grounded in the teacher's own preference for cheap local
//! pattern matches ahead of an LLM call where the intent is unambiguous.

use regex::Regex;
use std::sync::OnceLock;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    ListPlugins,
    Start(String),
    Stop(String),
    Launch(String),
}

fn list_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\b(list|check)\b.*\bai ui plugins\b").unwrap())
}

fn start_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\bstart\s+([a-z0-9_-]+)\b").unwrap())
}

fn stop_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\bstop\s+([a-z0-9_-]+)\b").unwrap())
}

fn launch_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\blaunch\s+plugin\s+([a-z0-9_-]+)\b").unwrap())
}

/// Matches in priority order: list → start → stop → launch. A message
/// that matches none of these falls through to the backend unchanged.
pub fn match_intent(content: &str) -> Option<Intent> {
    if list_re().is_match(content) {
        return Some(Intent::ListPlugins);
    }
    if let Some(caps) = launch_re().captures(content) {
        return Some(Intent::Launch(caps[1].to_string()));
    }
    if let Some(caps) = start_re().captures(content) {
        return Some(Intent::Start(caps[1].to_string()));
    }
    if let Some(caps) = stop_re().captures(content) {
        return Some(Intent::Stop(caps[1].to_string()));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_list_plugins_phrasing_variants() {
        assert_eq!(match_intent("list ai ui plugins"), Some(Intent::ListPlugins));
        assert_eq!(match_intent("check all ai ui plugins?"), Some(Intent::ListPlugins));
    }

    #[test]
    fn recognizes_start_with_plugin_id() {
        assert_eq!(match_intent("start demo"), Some(Intent::Start("demo".into())));
    }

    #[test]
    fn recognizes_stop_with_plugin_id() {
        assert_eq!(match_intent("stop demo"), Some(Intent::Stop("demo".into())));
    }

    #[test]
    fn recognizes_launch_plugin_phrasing() {
        assert_eq!(
            match_intent("launch plugin counter-template"),
            Some(Intent::Launch("counter-template".into()))
        );
    }

    #[test]
    fn launch_takes_priority_over_start_when_both_could_match() {
        assert_eq!(
            match_intent("launch plugin counter-template"),
            Some(Intent::Launch("counter-template".into()))
        );
    }

    #[test]
    fn ordinary_chat_message_matches_nothing() {
        assert_eq!(match_intent("what's the weather like today?"), None);
    }
}
