//! Counter cache used for the single-flight sync guard.

use crate::error::StorageResult;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// A shared cache of integer counters.
pub trait Cache: Send + Sync {
    /// Atomically adds `delta` to `key` and returns the new value.
    ///
    /// A missing or expired key starts at zero. `expiry` applies only when
    /// the key is created.
    fn increment(&self, key: &str, delta: i64, expiry: Option<Duration>) -> StorageResult<i64>;

    /// Returns the current value, or `None` if absent or expired.
    fn get(&self, key: &str) -> StorageResult<Option<i64>>;

    /// Removes `key`, so the next increment starts again from zero.
    fn release(&self, key: &str) -> StorageResult<()>;
}

#[derive(Debug)]
struct Entry {
    value: i64,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| now < at)
    }
}

/// In-process [`Cache`].
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Cache for MemoryCache {
    fn increment(&self, key: &str, delta: i64, expiry: Option<Duration>) -> StorageResult<i64> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let entry = entries
            .entry(key.to_string())
            .and_modify(|e| {
                if !e.is_live(now) {
                    e.value = 0;
                    e.expires_at = expiry.map(|ttl| now + ttl);
                }
            })
            .or_insert_with(|| Entry {
                value: 0,
                expires_at: expiry.map(|ttl| now + ttl),
            });
        entry.value += delta;
        Ok(entry.value)
    }

    fn get(&self, key: &str) -> StorageResult<Option<i64>> {
        let now = Instant::now();
        Ok(self
            .entries
            .lock()
            .get(key)
            .filter(|e| e.is_live(now))
            .map(|e| e.value))
    }

    fn release(&self, key: &str) -> StorageResult<()> {
        self.entries.lock().remove(key);
        Ok(())
    }
}
