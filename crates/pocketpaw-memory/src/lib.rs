//! Append-only conversation log keyed by [`SessionKey`], with compacted
//! retrieval. Grounded in the teacher's `sa_sessions::store::SessionStore`
//! (file-backed table keyed by a string) and `sa_gateway::runtime::compact`
//! (fold-oldest-half summarisation), generalised to PocketPaw's
//! `(channel, chat_id)` key and `Turn` history instead of token counters.

pub mod compaction;
pub mod store;

pub use compaction::compact;
pub use store::MemoryStore;

use pocketpaw_domain::SessionKey;
use std::path::PathBuf;

/// The on-disk file a given session's turn history is stored under.
/// Exposed so callers (and tests) can reason about layout without
/// reaching into `MemoryStore`'s internals.
pub fn session_file(dir: &std::path::Path, key: &SessionKey) -> PathBuf {
    // Channel/chat_id may contain characters that aren't filesystem-safe
    // (":" is already excluded from our own Display format, but raw chat
    // ids from channel adapters are not under our control) — percent-escape
    // anything that isn't alphanumeric, `-`, or `_`.
    fn escape(s: &str) -> String {
        s.chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect()
    }
    dir.join(format!("{}__{}.json", escape(&key.channel), escape(&key.chat_id)))
}
