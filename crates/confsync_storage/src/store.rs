//! Store and transaction traits.

use crate::error::{StorageError, StorageResult};
use chrono::{DateTime, Utc};
use confsync_protocol::{ChangeSet, EventData, UserPush};
use std::collections::BTreeSet;

/// Read-write view of the store inside a transaction.
///
/// Writes made through a transaction become visible to other readers only
/// after the enclosing closure returns `Ok`. Reads take `&mut self`: the
/// transaction records what it read and checks it again at commit.
pub trait Transaction {
    /// Returns the canonical event data, or an empty value if none is stored.
    fn latest_event_data(&mut self) -> StorageResult<EventData>;

    /// Replaces the canonical event data.
    fn store_event_data(&mut self, data: EventData) -> StorageResult<()>;

    /// Appends a change set to the audit log.
    fn store_changes(&mut self, changes: &ChangeSet) -> StorageResult<()>;

    /// Returns a user's push info; unknown users get a disabled default.
    fn user_push_info(&mut self, uid: &str) -> StorageResult<UserPush>;

    /// Replaces a user's push info.
    fn store_user_push_info(&mut self, uid: &str, info: UserPush) -> StorageResult<()>;

    /// Returns the keys of sessions already notified by the clock.
    fn next_sessions(&mut self) -> StorageResult<BTreeSet<String>>;

    /// Replaces the "already notified" marker.
    fn store_next_sessions(&mut self, keys: BTreeSet<String>) -> StorageResult<()>;
}

/// Transactional storage for the sync pipeline.
///
/// # Invariants
///
/// - A transaction either commits all of its writes or none of them
/// - A transaction whose reads were overwritten by a concurrent commit fails
///   with [`StorageError::Conflict`] and writes nothing
/// - A running transaction never blocks other transactions or readers
pub trait Store: Send + Sync {
    /// Runs `f` inside a transaction.
    ///
    /// Writes are committed only if `f` returns `Ok`. Any error returned by
    /// `f` aborts the transaction and is passed through unchanged; a commit
    /// conflict is converted into `E`.
    fn run_in_transaction<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut dyn Transaction) -> Result<T, E>,
        E: From<StorageError>;

    /// Returns the canonical event data outside any transaction.
    fn latest_event_data(&self) -> StorageResult<EventData>;

    /// Returns a user's push info outside any transaction.
    fn user_push_info(&self, uid: &str) -> StorageResult<UserPush>;

    /// Lists IDs of users with push enabled, in ascending order.
    fn users_with_push(&self) -> StorageResult<Vec<String>>;

    /// Returns audit records stamped strictly after `since`, oldest first.
    fn changes_since(&self, since: DateTime<Utc>) -> StorageResult<Vec<ChangeSet>>;
}
