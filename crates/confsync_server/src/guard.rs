//! Single-flight guard for sync runs.

use confsync_storage::{Cache, StorageResult};
use std::time::Duration;
use tracing::{debug, error};

/// Cache key of the sync guard counter.
pub const SYNC_GUARD_KEY: &str = "sync-manifest";

/// Holds the sync guard for the duration of one sync run.
///
/// The guard is released when dropped, on every exit path.
#[must_use = "the guard is released as soon as it is dropped"]
pub struct SyncGuard<'a> {
    cache: &'a dyn Cache,
    key: &'a str,
}

impl<'a> SyncGuard<'a> {
    /// Tries to take the guard.
    ///
    /// Returns `None` if another run holds it. A losing caller leaves the
    /// counter alone; only the holder releases it.
    pub fn acquire(cache: &'a dyn Cache, key: &'a str, ttl: Duration) -> StorageResult<Option<Self>> {
        let value = cache.increment(key, 1, Some(ttl))?;
        if value > 1 {
            debug!(key, value, "sync guard busy");
            return Ok(None);
        }
        Ok(Some(Self { cache, key }))
    }
}

impl Drop for SyncGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.cache.release(self.key) {
            error!(key = self.key, error = %e, "failed to release sync guard");
        }
    }
}
