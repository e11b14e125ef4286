//! Injectable per-key cooldown gate.
//!
//! A TTL map, not a lock: two triggers racing past the boundary may both
//! run, which the consolidation phases tolerate (deletions by id are
//! no-ops on retry).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Default)]
pub struct CooldownGate {
    inner: Arc<Mutex<HashMap<String, Instant>>>,
}

impl CooldownGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true when the key is cold and records a fresh run start;
    /// false while the key is still within `ttl` of the previous start.
    pub fn try_begin(&self, key: &str, ttl: Duration) -> bool {
        let mut map = self
            .inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let now = Instant::now();
        match map.get(key) {
            Some(last) if now.duration_since(*last) < ttl => false,
            _ => {
                map.insert(key.to_string(), now);
                true
            }
        }
    }

    /// Forget a key so the next `try_begin` passes immediately.
    pub fn reset(&self, key: &str) {
        let mut map = self
            .inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        map.remove(key);
    }
}
