//! File-backed, session-keyed turn log.
//!
//! One JSON file per session under the configured directory (grounded in
//! `sa_sessions::store::SessionStore`'s single `sessions.json`, split per
//! session here since PocketPaw's unit of persistence is the whole turn
//! history rather than a small counters struct). Writes are batched: a
//! dirty flag is set on `add_to_session` and an interval task (spawned by
//! the caller via [`MemoryStore::spawn_flush_task`]) persists every dirty
//! session, matching the "durable within 5s" budget from spec §4.B without
//! an fsync on every turn.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::RwLock;
use pocketpaw_domain::model::Turn;
use pocketpaw_domain::{resolve_session_key, Error, Result, SessionKey};

use crate::{compact, session_file};

pub struct MemoryStore {
    dir: PathBuf,
    sessions: RwLock<HashMap<SessionKey, Vec<Turn>>>,
    dirty: RwLock<HashSet<SessionKey>>,
}

impl MemoryStore {
    /// Open (creating if absent) the store directory. Existing session
    /// files are loaded lazily on first access, not eagerly at startup --
    /// a fresh install has an empty directory and nothing to scan.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            sessions: RwLock::new(HashMap::new()),
            dirty: RwLock::new(HashSet::new()),
        })
    }

    pub fn resolve_session_key(&self, raw: &str) -> SessionKey {
        resolve_session_key(raw)
    }

    /// Appends `turn` to the session's history. Enforces the `created_at`
    /// monotonicity invariant (spec §3 Turn) by rejecting turns that are
    /// older than the last recorded turn rather than silently reordering.
    pub fn add_to_session(&self, key: &SessionKey, turn: Turn) -> Result<()> {
        self.ensure_loaded(key);
        let mut sessions = self.sessions.write();
        let history = sessions.entry(key.clone()).or_default();
        if let Some(last) = history.last() {
            if turn.created_at < last.created_at {
                return Err(Error::Other(format!(
                    "turn created_at {} precedes last turn {} for session {key}",
                    turn.created_at, last.created_at
                )));
            }
        }
        history.push(turn);
        drop(sessions);
        self.dirty.write().insert(key.clone());
        Ok(())
    }

    /// The compacted view described in spec §4.B, computed over the raw
    /// (uncompacted) stored history every call -- compaction never mutates
    /// what's on disk, which is what makes it idempotent by construction.
    pub fn get_compacted_history(&self, key: &SessionKey, max_turns: usize) -> Vec<Turn> {
        self.ensure_loaded(key);
        let sessions = self.sessions.read();
        let history = sessions.get(key).map(|v| v.as_slice()).unwrap_or(&[]);
        compact(history, max_turns)
    }

    /// Raw (uncompacted) history, for callers that need the literal log
    /// (e.g. computing the assistant-turn-equals-concatenated-deltas
    /// invariant in tests).
    pub fn raw_history(&self, key: &SessionKey) -> Vec<Turn> {
        self.ensure_loaded(key);
        self.sessions
            .read()
            .get(key)
            .cloned()
            .unwrap_or_default()
    }

    /// Flush every dirty session to disk. Safe to call repeatedly; clears
    /// the dirty set only for the sessions it successfully wrote.
    pub fn flush(&self) -> Result<()> {
        let pending: Vec<SessionKey> = self.dirty.read().iter().cloned().collect();
        for key in &pending {
            let history = self.sessions.read().get(key).cloned().unwrap_or_default();
            let path = session_file(&self.dir, key);
            let json = serde_json::to_vec_pretty(&history)?;
            std::fs::write(&path, json)?;
        }
        let mut dirty = self.dirty.write();
        for key in &pending {
            dirty.remove(key);
        }
        Ok(())
    }

    /// Spawn a background task that flushes dirty sessions on an interval.
    /// Mirrors the teacher's periodic `sessions.flush()` task in
    /// `main.rs`'s boot sequence.
    pub fn spawn_flush_task(self: Arc<Self>, interval: std::time::Duration) {
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(interval);
            loop {
                tick.tick().await;
                if let Err(e) = self.flush() {
                    tracing::warn!(error = %e, "memory store flush failed");
                }
            }
        });
    }

    fn ensure_loaded(&self, key: &SessionKey) {
        if self.sessions.read().contains_key(key) {
            return;
        }
        let path = session_file(&self.dir, key);
        let loaded: Vec<Turn> = std::fs::read(&path)
            .ok()
            .and_then(|bytes| serde_json::from_slice(&bytes).ok())
            .unwrap_or_default();
        self.sessions.write().entry(key.clone()).or_insert(loaded);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use pocketpaw_domain::model::Role;

    fn key() -> SessionKey {
        SessionKey::new("cli", "1")
    }

    #[test]
    fn add_then_retrieve_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryStore::new(dir.path()).unwrap();
        let now = Utc::now();
        store
            .add_to_session(&key(), Turn::new(Role::User, "hi", now))
            .unwrap();
        store
            .add_to_session(&key(), Turn::new(Role::Assistant, "hello", now + Duration::seconds(1)))
            .unwrap();
        let history = store.raw_history(&key());
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].content, "hi");
    }

    #[test]
    fn out_of_order_turn_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryStore::new(dir.path()).unwrap();
        let now = Utc::now();
        store
            .add_to_session(&key(), Turn::new(Role::User, "second", now))
            .unwrap();
        let err = store.add_to_session(&key(), Turn::new(Role::User, "first", now - Duration::seconds(5)));
        assert!(err.is_err());
    }

    #[test]
    fn flush_then_reload_survives_process_restart() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = MemoryStore::new(dir.path()).unwrap();
            store
                .add_to_session(&key(), Turn::new(Role::User, "persisted", Utc::now()))
                .unwrap();
            store.flush().unwrap();
        }
        let store2 = MemoryStore::new(dir.path()).unwrap();
        let history = store2.raw_history(&key());
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].content, "persisted");
    }

    #[test]
    fn resolve_session_key_is_idempotent_through_the_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryStore::new(dir.path()).unwrap();
        let once = store.resolve_session_key("telegram:42");
        let twice = store.resolve_session_key(&once.to_string());
        assert_eq!(once, twice);
    }
}
