//! Time-bounded boolean cache for access checks.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

use crate::store::UserId;

/// Per-user cache of check results with a fixed TTL.
///
/// Concurrent lookups for the same user racing a refill may both miss
/// and both consult the backing store; that duplicate work is bounded
/// and harmless, so no single-flight guard is attempted.
#[derive(Debug)]
pub struct TtlCache {
    ttl: Duration,
    entries: Mutex<HashMap<UserId, (bool, Instant)>>,
}

impl TtlCache {
    /// Creates a cache whose entries expire after `ttl`.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the cached value for `user_id` if it is still fresh.
    pub async fn get(&self, user_id: UserId) -> Option<bool> {
        let entries = self.entries.lock().await;
        entries
            .get(&user_id)
            .filter(|(_, expires)| *expires > Instant::now())
            .map(|(value, _)| *value)
    }

    /// Stores a value for `user_id`, starting a fresh TTL window.
    pub async fn put(&self, user_id: UserId, value: bool) {
        let mut entries = self.entries.lock().await;
        entries.insert(user_id, (value, Instant::now() + self.ttl));
    }

    /// Drops the entry for `user_id` so the next check hits the store.
    pub async fn invalidate(&self, user_id: UserId) {
        let mut entries = self.entries.lock().await;
        entries.remove(&user_id);
    }
}
