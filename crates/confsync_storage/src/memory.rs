//! In-memory store.

use crate::error::{StorageError, StorageResult};
use crate::store::{Store, Transaction};
use chrono::{DateTime, Utc};
use confsync_protocol::{ChangeSet, EventData, UserPush};
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// A record that transactions read and overwrite as a unit.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum Key {
    EventData,
    User(String),
    NextSessions,
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::EventData => f.write_str("event data"),
            Key::User(uid) => write!(f, "user {uid}"),
            Key::NextSessions => f.write_str("next sessions"),
        }
    }
}

#[derive(Debug, Default)]
struct State {
    event_data: EventData,
    changes: Vec<ChangeSet>,
    users: BTreeMap<String, UserPush>,
    next_sessions: BTreeSet<String>,
    versions: BTreeMap<Key, u64>,
}

impl State {
    fn version(&self, key: &Key) -> u64 {
        self.versions.get(key).copied().unwrap_or(0)
    }

    fn bump(&mut self, key: Key) {
        *self.versions.entry(key).or_insert(0) += 1;
    }
}

/// An in-memory [`Store`].
///
/// Suitable for tests and for single-process deployments that rebuild their
/// state from the upstream manifest on start.
///
/// # Thread Safety
///
/// Transactions are optimistic. The closure runs without holding any lock:
/// every record it reads is remembered with its version, and writes are
/// buffered. At commit the versions are checked under the state lock; if a
/// concurrent transaction committed one of the records first, the commit
/// fails with [`StorageError::Conflict`] and nothing is written. Records the
/// transaction never read are overwritten blindly, and the audit log is
/// append-only, so it never conflicts.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<State>,
    fail_writes: AtomicBool,
    writes: AtomicU64,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store seeded with event data.
    #[must_use]
    pub fn with_event_data(data: EventData) -> Self {
        let store = Self::new();
        store.state.write().event_data = data;
        store
    }

    /// Seeds a user's push info without going through a transaction.
    pub fn put_user(&self, uid: impl Into<String>, info: UserPush) {
        let uid = uid.into();
        let mut state = self.state.write();
        state.users.insert(uid.clone(), info);
        state.bump(Key::User(uid));
    }

    /// Makes every subsequent write fail with [`StorageError::Unavailable`].
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of individual committed writes.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    /// Returns all audit records, oldest first.
    pub fn changes(&self) -> Vec<ChangeSet> {
        self.state.read().changes.clone()
    }

    /// Returns the current "already notified" marker.
    pub fn next_sessions(&self) -> BTreeSet<String> {
        self.state.read().next_sessions.clone()
    }

    fn commit(&self, txn: MemoryTransaction<'_>) -> StorageResult<()> {
        let mut state = self.state.write();
        if let Some((key, _)) = txn.reads.iter().find(|(key, seen)| state.version(key) != **seen) {
            return Err(StorageError::Conflict(key.to_string()));
        }

        let MemoryTransaction {
            mut event_data,
            mut users,
            mut next_sessions,
            changes,
            dirty,
            writes,
            ..
        } = txn;
        for key in dirty {
            match &key {
                Key::EventData => {
                    if let Some(data) = event_data.take() {
                        state.event_data = data;
                    }
                }
                Key::User(uid) => {
                    if let Some(info) = users.remove(uid) {
                        state.users.insert(uid.clone(), info);
                    }
                }
                Key::NextSessions => {
                    if let Some(keys) = next_sessions.take() {
                        state.next_sessions = keys;
                    }
                }
            }
            state.bump(key);
        }
        state.changes.extend(changes);
        self.writes.fetch_add(writes, Ordering::SeqCst);
        Ok(())
    }
}

/// Buffered view of a [`MemoryStore`].
///
/// Reads are cached so that repeated reads inside one transaction agree with
/// each other and with the transaction's own writes.
struct MemoryTransaction<'a> {
    store: &'a MemoryStore,
    reads: BTreeMap<Key, u64>,
    dirty: BTreeSet<Key>,
    event_data: Option<EventData>,
    users: BTreeMap<String, UserPush>,
    next_sessions: Option<BTreeSet<String>>,
    changes: Vec<ChangeSet>,
    writes: u64,
    fail_writes: bool,
}

impl<'a> MemoryTransaction<'a> {
    fn new(store: &'a MemoryStore) -> Self {
        Self {
            store,
            reads: BTreeMap::new(),
            dirty: BTreeSet::new(),
            event_data: None,
            users: BTreeMap::new(),
            next_sessions: None,
            changes: Vec::new(),
            writes: 0,
            fail_writes: store.fail_writes.load(Ordering::SeqCst),
        }
    }

    /// Loads a record from the committed state and remembers its version.
    fn load<T>(&mut self, key: Key, get: impl FnOnce(&State) -> T) -> T {
        let state = self.store.state.read();
        let version = state.version(&key);
        let value = get(&*state);
        drop(state);
        self.reads.entry(key).or_insert(version);
        value
    }

    fn write(&mut self, key: Option<Key>) -> StorageResult<()> {
        if self.fail_writes {
            return Err(StorageError::Unavailable("writes disabled".into()));
        }
        self.writes += 1;
        if let Some(key) = key {
            self.dirty.insert(key);
        }
        Ok(())
    }
}

impl Transaction for MemoryTransaction<'_> {
    fn latest_event_data(&mut self) -> StorageResult<EventData> {
        if let Some(data) = &self.event_data {
            return Ok(data.clone());
        }
        let data = self.load(Key::EventData, |s| s.event_data.clone());
        self.event_data = Some(data.clone());
        Ok(data)
    }

    fn store_event_data(&mut self, data: EventData) -> StorageResult<()> {
        self.write(Some(Key::EventData))?;
        self.event_data = Some(data);
        Ok(())
    }

    fn store_changes(&mut self, changes: &ChangeSet) -> StorageResult<()> {
        self.write(None)?;
        self.changes.push(changes.clone());
        Ok(())
    }

    fn user_push_info(&mut self, uid: &str) -> StorageResult<UserPush> {
        if let Some(info) = self.users.get(uid) {
            return Ok(info.clone());
        }
        let info = self.load(Key::User(uid.to_string()), |s| {
            s.users.get(uid).cloned().unwrap_or_default()
        });
        self.users.insert(uid.to_string(), info.clone());
        Ok(info)
    }

    fn store_user_push_info(&mut self, uid: &str, info: UserPush) -> StorageResult<()> {
        self.write(Some(Key::User(uid.to_string())))?;
        self.users.insert(uid.to_string(), info);
        Ok(())
    }

    fn next_sessions(&mut self) -> StorageResult<BTreeSet<String>> {
        if let Some(keys) = &self.next_sessions {
            return Ok(keys.clone());
        }
        let keys = self.load(Key::NextSessions, |s| s.next_sessions.clone());
        self.next_sessions = Some(keys.clone());
        Ok(keys)
    }

    fn store_next_sessions(&mut self, keys: BTreeSet<String>) -> StorageResult<()> {
        self.write(Some(Key::NextSessions))?;
        self.next_sessions = Some(keys);
        Ok(())
    }
}

impl Store for MemoryStore {
    fn run_in_transaction<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut dyn Transaction) -> Result<T, E>,
        E: From<StorageError>,
    {
        let mut txn = MemoryTransaction::new(self);
        let value = f(&mut txn)?;
        if txn.writes > 0 {
            self.commit(txn)?;
        }
        Ok(value)
    }

    fn latest_event_data(&self) -> StorageResult<EventData> {
        Ok(self.state.read().event_data.clone())
    }

    fn user_push_info(&self, uid: &str) -> StorageResult<UserPush> {
        Ok(self.state.read().users.get(uid).cloned().unwrap_or_default())
    }

    fn users_with_push(&self) -> StorageResult<Vec<String>> {
        Ok(self
            .state
            .read()
            .users
            .iter()
            .filter(|(_, info)| info.enabled)
            .map(|(uid, _)| uid.clone())
            .collect())
    }

    fn changes_since(&self, since: DateTime<Utc>) -> StorageResult<Vec<ChangeSet>> {
        Ok(self
            .state
            .read()
            .changes
            .iter()
            .filter(|c| c.updated > since)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use confsync_protocol::Session;

    fn sample_data() -> EventData {
        let start = Utc.with_ymd_and_hms(2016, 5, 18, 10, 0, 0).unwrap();
        let mut data = EventData::default();
        data.insert_session(Session::new("s1", "Keynote", start, start + chrono::Duration::hours(1)));
        data
    }

    #[test]
    fn memory_new_is_empty() {
        let store = MemoryStore::new();
        assert!(store.latest_event_data().unwrap().is_empty());
        assert!(store.users_with_push().unwrap().is_empty());
        assert_eq!(store.write_count(), 0);
    }

    #[test]
    fn committed_writes_are_visible() {
        let store = MemoryStore::new();
        store
            .run_in_transaction(|txn| {
                txn.store_event_data(sample_data())?;
                Ok::<_, StorageError>(())
            })
            .unwrap();

        assert_eq!(store.latest_event_data().unwrap(), sample_data());
        assert_eq!(store.write_count(), 1);
    }

    #[test]
    fn failed_closure_rolls_back() {
        let store = MemoryStore::new();
        let result: Result<(), StorageError> = store.run_in_transaction(|txn| {
            txn.store_event_data(sample_data())?;
            Err(StorageError::Unavailable("boom".into()))
        });

        assert!(result.is_err());
        assert!(store.latest_event_data().unwrap().is_empty());
        assert_eq!(store.write_count(), 0);
    }

    #[test]
    fn reads_inside_transaction_see_own_writes() {
        let store = MemoryStore::new();
        store
            .run_in_transaction(|txn| {
                txn.store_event_data(sample_data())?;
                assert_eq!(txn.latest_event_data()?.sessions.len(), 1);
                Ok::<_, StorageError>(())
            })
            .unwrap();
    }

    #[test]
    fn fail_writes_aborts() {
        let store = MemoryStore::new();
        store.set_fail_writes(true);
        let result = store.run_in_transaction(|txn| txn.store_changes(&ChangeSet::new(Utc::now())));
        assert!(matches!(result, Err(StorageError::Unavailable(_))));
        assert!(store.changes().is_empty());
    }

    #[test]
    fn unknown_user_is_disabled() {
        let store = MemoryStore::new();
        assert_eq!(store.user_push_info("nobody").unwrap(), UserPush::default());
    }

    #[test]
    fn users_with_push_filters_disabled() {
        let store = MemoryStore::new();
        store.put_user("b", UserPush::enabled_with(["e"]));
        store.put_user("a", UserPush::enabled_with(["e"]));
        store.put_user("c", UserPush::default());
        assert_eq!(store.users_with_push().unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn changes_since_is_exclusive() {
        let t0 = Utc.with_ymd_and_hms(2016, 5, 18, 9, 0, 0).unwrap();
        let t1 = t0 + chrono::Duration::minutes(1);
        let store = MemoryStore::new();
        store
            .run_in_transaction(|txn| {
                txn.store_changes(&ChangeSet::new(t0))?;
                txn.store_changes(&ChangeSet::new(t1))
            })
            .unwrap();

        let since = store.changes_since(t0).unwrap();
        assert_eq!(since.len(), 1);
        assert_eq!(since[0].updated, t1);
    }

    #[test]
    fn stale_read_conflicts_at_commit() {
        let store = MemoryStore::new();
        store.put_user("u1", UserPush::enabled_with(["e1"]));

        let result = store.run_in_transaction(|txn| {
            let mut info = txn.user_push_info("u1")?;
            // another writer commits the same user in the meantime
            store.run_in_transaction(|other| {
                other.store_user_push_info("u1", UserPush::enabled_with(["e2"]))
            })?;
            info.endpoints.push("e3".into());
            txn.store_user_push_info("u1", info)
        });

        assert!(matches!(result, Err(StorageError::Conflict(ref key)) if key == "user u1"));
        assert_eq!(store.user_push_info("u1").unwrap().endpoints, vec!["e2"]);
        assert_eq!(store.write_count(), 1);
    }

    #[test]
    fn disjoint_transactions_both_commit() {
        let store = MemoryStore::new();
        store
            .run_in_transaction(|txn| {
                let _ = txn.latest_event_data()?;
                store.run_in_transaction(|other| {
                    let info = other.user_push_info("u1")?;
                    other.store_user_push_info("u1", UserPush { enabled: true, ..info })
                })?;
                txn.store_event_data(sample_data())?;
                txn.store_changes(&ChangeSet::new(Utc::now()))
            })
            .unwrap();

        assert_eq!(store.latest_event_data().unwrap(), sample_data());
        assert!(store.user_push_info("u1").unwrap().enabled);
        assert_eq!(store.changes().len(), 1);
    }

    #[test]
    fn blind_write_does_not_conflict() {
        let store = MemoryStore::new();
        store
            .run_in_transaction(|txn| {
                store.run_in_transaction(|other| other.store_next_sessions(BTreeSet::from(["a:start".to_string()])))?;
                txn.store_next_sessions(BTreeSet::from(["b:start".to_string()]))
            })
            .unwrap();
        assert_eq!(store.next_sessions(), BTreeSet::from(["b:start".to_string()]));
    }
}
