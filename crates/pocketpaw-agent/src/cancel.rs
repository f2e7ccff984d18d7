//! Per-session turn cancellation (spec §4.G). Grounded in `cancel.rs`'s
//! group-cascade cancel map, collapsed to a single-key cancel since
//! PocketPaw has no parent/child turn concept (Open Question decision,
//! recorded in DESIGN.md).

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use pocketpaw_domain::SessionKey;
use tokio::sync::Notify;

#[derive(Default)]
pub struct CancelMap {
    tokens: RwLock<HashMap<SessionKey, Arc<Notify>>>,
}

impl CancelMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a fresh cancellation token for the start of a new turn,
    /// replacing any stale token a previous (already-finished) turn for the
    /// same key left behind.
    pub fn register(&self, key: &SessionKey) -> Arc<Notify> {
        let token = Arc::new(Notify::new());
        self.tokens.write().insert(key.clone(), token.clone());
        token
    }

    /// Signals cancellation for `key`'s in-flight turn, if any. A cancel
    /// request for a key with no in-flight turn is a no-op.
    pub fn cancel(&self, key: &SessionKey) {
        if let Some(token) = self.tokens.read().get(key) {
            token.notify_waiters();
        }
    }

    /// Clears the token once the turn it belongs to has finished, so a
    /// stray late cancel doesn't affect the next turn on the same key.
    pub fn clear(&self, key: &SessionKey) {
        self.tokens.write().remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cancel_wakes_the_registered_waiter() {
        let map = CancelMap::new();
        let key = SessionKey::new("cli", "1");
        let token = map.register(&key);

        let waited = tokio::spawn(async move {
            token.notified().await;
        });
        map.cancel(&key);
        waited.await.unwrap();
    }

    #[test]
    fn cancel_on_unknown_key_is_a_no_op() {
        let map = CancelMap::new();
        map.cancel(&SessionKey::new("cli", "never-started"));
    }

    #[test]
    fn clear_removes_the_stale_token() {
        let map = CancelMap::new();
        let key = SessionKey::new("cli", "1");
        map.register(&key);
        map.clear(&key);
        assert!(map.tokens.read().get(&key).is_none());
    }
}
