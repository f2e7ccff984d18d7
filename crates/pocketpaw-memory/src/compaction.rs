//! Pure compaction policy (spec §4.B): when raw history exceeds
//! `2 * max_turns`, the oldest half collapses into one synthetic assistant
//! `Turn` tagged `compaction: true`. Grounded in the shape of
//! `sa_gateway::runtime::compact::split_for_compaction`, with the LLM
//! summarization step dropped — this layer is pure and synchronous per
//! spec §4.C's framing of the surrounding components, so the "summary" is
//! a deterministic digest rather than a model call.

use pocketpaw_domain::model::{CompactionMeta, Role, Turn};

/// Returns the compacted view of `history` capped around `max_turns`.
/// Idempotent: compacting an already-compacted view is a no-op beyond
/// re-applying the same cap, because the synthetic marker (if present) is
/// recognized and never re-folded.
pub fn compact(history: &[Turn], max_turns: usize) -> Vec<Turn> {
    if max_turns == 0 {
        return Vec::new();
    }

    let (marker, active) = split_existing_marker(history);

    if active.len() <= 2 * max_turns {
        let kept = tail(active, max_turns);
        return match marker {
            Some(m) => prepend(m, kept),
            None => kept.to_vec(),
        };
    }

    let half = active.len() / 2;
    let (to_fold, recent) = active.split_at(half);

    let turns_compacted = marker.as_ref().map(|m| m.compaction.as_ref().unwrap().turns_compacted).unwrap_or(0)
        + to_fold.len();
    let summary = summarize(marker.as_ref(), to_fold);
    let new_marker = Turn {
        role: Role::Assistant,
        content: summary,
        created_at: to_fold
            .last()
            .map(|t| t.created_at)
            .or_else(|| marker.as_ref().map(|m| m.created_at))
            .unwrap_or_else(chrono::Utc::now),
        compaction: Some(CompactionMeta { turns_compacted }),
    };

    let kept_recent = tail(recent, max_turns);
    let mut out = Vec::with_capacity(1 + kept_recent.len());
    out.push(new_marker);
    out.extend_from_slice(kept_recent);
    out
}

fn split_existing_marker(history: &[Turn]) -> (Option<Turn>, &[Turn]) {
    match history.first() {
        Some(t) if t.compaction.is_some() => (Some(t.clone()), &history[1..]),
        _ => (None, history),
    }
}

fn tail(turns: &[Turn], max_turns: usize) -> &[Turn] {
    if turns.len() <= max_turns {
        turns
    } else {
        &turns[turns.len() - max_turns..]
    }
}

fn prepend(marker: Turn, rest: &[Turn]) -> Vec<Turn> {
    let mut out = Vec::with_capacity(1 + rest.len());
    out.push(marker);
    out.extend_from_slice(rest);
    out
}

/// Deterministic, non-LLM digest of the folded turns: a one-line summary
/// per role count plus the first line of the earliest folded turn, so the
/// marker stays informative without a model round-trip.
fn summarize(prior_marker: Option<&Turn>, folded: &[Turn]) -> String {
    let users = folded.iter().filter(|t| t.role == Role::User).count();
    let assistants = folded.iter().filter(|t| t.role == Role::Assistant).count();
    let opener = folded
        .first()
        .map(|t| first_line(&t.content))
        .unwrap_or_default();

    let mut s = String::new();
    if let Some(m) = prior_marker {
        s.push_str(&m.content);
        s.push(' ');
    }
    s.push_str(&format!(
        "[compacted {users} user / {assistants} assistant turn(s) starting with: {opener}]"
    ));
    s
}

fn first_line(s: &str) -> String {
    let line = s.lines().next().unwrap_or("");
    if line.len() > 120 {
        format!("{}…", &line[..120])
    } else {
        line.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn turns(n: usize) -> Vec<Turn> {
        let base = Utc::now();
        (0..n)
            .map(|i| {
                let role = if i % 2 == 0 { Role::User } else { Role::Assistant };
                Turn::new(role, format!("msg {i}"), base + Duration::seconds(i as i64))
            })
            .collect()
    }

    #[test]
    fn below_threshold_returns_all() {
        let h = turns(4);
        let out = compact(&h, 10);
        assert_eq!(out.len(), 4);
    }

    #[test]
    fn between_n_and_2n_just_truncates() {
        let h = turns(15);
        let out = compact(&h, 10);
        assert_eq!(out.len(), 10);
        assert_eq!(out[0].content, "msg 5");
    }

    #[test]
    fn above_2n_folds_oldest_half() {
        let h = turns(25); // > 2*10
        let out = compact(&h, 10);
        assert!(out[0].compaction.is_some());
        assert_eq!(out[0].compaction.as_ref().unwrap().turns_compacted, 12);
        // recent half (13 turns) capped at max_turns=10
        assert_eq!(out.len(), 1 + 10);
    }

    #[test]
    fn compaction_is_idempotent() {
        let h = turns(25);
        let once = compact(&h, 10);
        let twice = compact(&once, 10);
        assert_eq!(once.len(), twice.len());
        assert_eq!(once[0].content, twice[0].content);
        for (a, b) in once.iter().zip(twice.iter()) {
            assert_eq!(a.content, b.content);
        }
    }

    #[test]
    fn compaction_never_reorders_user_turns() {
        let h = turns(25);
        let out = compact(&h, 10);
        let user_contents: Vec<&str> = h
            .iter()
            .filter(|t| t.role == Role::User)
            .map(|t| t.content.as_str())
            .collect();
        let out_user_contents: Vec<&str> = out
            .iter()
            .filter(|t| t.role == Role::User && t.compaction.is_none())
            .map(|t| t.content.as_str())
            .collect();
        // The retained (uncompacted) user turns must appear in the same
        // relative order as in the original history.
        let mut idx = 0;
        for c in &out_user_contents {
            let pos = user_contents[idx..].iter().position(|u| u == c).unwrap();
            idx += pos + 1;
        }
    }
}
