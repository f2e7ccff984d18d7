//! Per-session turn serialization (spec §4.G), grounded verbatim in the
//! teacher's `session_lock.rs`: a lazily-populated map of per-key mutexes
//! so turns on the same session run one at a time while independent
//! sessions proceed concurrently on their own spawned tasks.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use pocketpaw_domain::SessionKey;
use tokio::sync::Mutex as AsyncMutex;

#[derive(Default)]
pub struct SessionLockMap {
    locks: RwLock<HashMap<SessionKey, Arc<AsyncMutex<()>>>>,
}

impl SessionLockMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the lock for `key`, creating it on first use. The map never
    /// shrinks -- a long-running process accumulates one entry per distinct
    /// session it has ever seen, which is bounded by real conversation
    /// count rather than a cause for concern at PocketPaw's scale.
    pub fn lock_for(&self, key: &SessionKey) -> Arc<AsyncMutex<()>> {
        if let Some(lock) = self.locks.read().get(key) {
            return lock.clone();
        }
        self.locks.write().entry(key.clone()).or_insert_with(|| Arc::new(AsyncMutex::new(()))).clone()
    }
}
