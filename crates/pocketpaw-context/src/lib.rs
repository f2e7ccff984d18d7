//! Pure system-prompt assembly (spec §4.C). Grounded in
//! `sa_contextpack::builder::ContextPackBuilder::build`'s fixed-order
//! section assembly and least-recent truncation, generalised from
//! "workspace files" to PocketPaw's identity/capabilities/facts/time.

use chrono::{DateTime, Utc};
use pocketpaw_domain::BackendInfo;

/// Long-term fact entries, ordered most-recent-first. Truncation drops
/// from the tail (the least recent facts), per spec §4.C.
#[derive(Debug, Clone)]
pub struct Fact {
    pub text: String,
}

/// Assembles the system prompt in the fixed order spec §4.C mandates:
/// identity block, capability list, long-term facts (bounded by
/// `facts_max_chars`, truncating least-recent first), current time.
///
/// Pure function of its inputs: no I/O, no clock reads beyond the `now`
/// parameter the caller supplies.
pub fn build_system_prompt(
    identity: &str,
    backend: Option<&BackendInfo>,
    facts: &[Fact],
    facts_max_chars: usize,
    now: DateTime<Utc>,
) -> String {
    let mut out = String::new();

    out.push_str(identity.trim());
    out.push_str("\n\n");

    if let Some(info) = backend {
        out.push_str("## Capabilities\n");
        out.push_str(&format!("- backend: {}\n", info.name));
        if info.capabilities.tools {
            out.push_str("- tool use supported\n");
        }
        if info.capabilities.streaming {
            out.push_str("- streaming supported\n");
        }
        if !info.builtin_tools.is_empty() {
            out.push_str(&format!("- builtin tools: {}\n", info.builtin_tools.join(", ")));
        }
        out.push('\n');
    }

    let facts_block = render_facts(facts, facts_max_chars);
    if !facts_block.is_empty() {
        out.push_str("## Known facts\n");
        out.push_str(&facts_block);
        out.push('\n');
    }

    out.push_str(&format!("Current time: {}\n", now.to_rfc3339()));

    out
}

/// Renders facts most-recent-first, dropping least-recent entries once the
/// `max_chars` budget is exceeded.
fn render_facts(facts: &[Fact], max_chars: usize) -> String {
    let mut out = String::new();
    for fact in facts {
        let line = format!("- {}\n", fact.text);
        if out.len() + line.len() > max_chars {
            break;
        }
        out.push_str(&line);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pocketpaw_domain::capability::LlmCapabilities;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn assembles_sections_in_fixed_order() {
        let mut info = BackendInfo::new("codex");
        info.capabilities = LlmCapabilities { tools: true, streaming: true, json_mode: false };
        let facts = vec![Fact { text: "likes dark mode".into() }];
        let prompt = build_system_prompt("I am PocketPaw.", Some(&info), &facts, 4000, now());

        let identity_pos = prompt.find("I am PocketPaw").unwrap();
        let cap_pos = prompt.find("## Capabilities").unwrap();
        let facts_pos = prompt.find("## Known facts").unwrap();
        let time_pos = prompt.find("Current time:").unwrap();
        assert!(identity_pos < cap_pos);
        assert!(cap_pos < facts_pos);
        assert!(facts_pos < time_pos);
    }

    #[test]
    fn truncates_least_recent_facts_first() {
        let facts: Vec<Fact> = (0..5)
            .map(|i| Fact { text: format!("fact-{i}") })
            .collect();
        // Budget only large enough for the first entry or two.
        let prompt = build_system_prompt("id", None, &facts, 12, now());
        assert!(prompt.contains("fact-0"));
        assert!(!prompt.contains("fact-4"));
    }

    #[test]
    fn is_pure_same_inputs_same_output() {
        let facts = vec![Fact { text: "x".into() }];
        let a = build_system_prompt("id", None, &facts, 100, now());
        let b = build_system_prompt("id", None, &facts, 100, now());
        assert_eq!(a, b);
    }

    #[test]
    fn no_backend_omits_capability_section() {
        let prompt = build_system_prompt("id", None, &[], 100, now());
        assert!(!prompt.contains("## Capabilities"));
    }
}
