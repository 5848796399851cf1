//! End-to-end tests of the sync and notification pipeline.

use chrono::{DateTime, Utc};
use confsync_protocol::{EventData, PushOutcome, Task, UpdateKind, UserPush};
use confsync_server::{
    Caller, Collaborators, DeliveryError, ManifestSource, MemoryBookmarks, MemoryTaskQueue,
    MockPushTransport, PushServer, ServerConfig, ServerResult, SyncOutcome, TaskQueue,
    DEFAULT_LEGACY_PUSH_ENDPOINT, SYNC_GUARD_KEY,
};
use confsync_storage::{Cache, MemoryCache, MemoryStore, Store};
use confsync_testkit::prelude::*;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

/// Blocks every fetch until the test lets it through.
struct GatedManifest {
    data: EventData,
    entered: Mutex<mpsc::SyncSender<()>>,
    release: Mutex<mpsc::Receiver<()>>,
}

impl ManifestSource for GatedManifest {
    fn fetch(&self, _url: &str, _since: Option<DateTime<Utc>>) -> ServerResult<Option<EventData>> {
        self.entered.lock().unwrap().send(()).expect("test gone");
        self.release.lock().unwrap().recv().expect("test gone");
        Ok(Some(self.data.clone()))
    }
}

struct GatedServer {
    server: Arc<PushServer<MemoryStore>>,
    store: Arc<MemoryStore>,
    cache: Arc<MemoryCache>,
    queue: Arc<MemoryTaskQueue>,
    entered: mpsc::Receiver<()>,
    release: mpsc::Sender<()>,
}

fn gated_server() -> GatedServer {
    let (entered_tx, entered_rx) = mpsc::sync_channel(1);
    let (release_tx, release_rx) = mpsc::channel();
    let store = Arc::new(MemoryStore::new());
    let cache = Arc::new(MemoryCache::new());
    let queue = Arc::new(MemoryTaskQueue::new());
    let server = Arc::new(PushServer::new(
        ServerConfig::default(),
        Arc::clone(&store),
        Collaborators {
            cache: cache.clone(),
            manifest: Arc::new(GatedManifest {
                data: sample_event_data(),
                entered: Mutex::new(entered_tx),
                release: Mutex::new(release_rx),
            }),
            push: Arc::new(MockPushTransport::new()),
            queue: queue.clone(),
            bookmarks: Arc::new(MemoryBookmarks::new()),
        },
    ));
    GatedServer {
        server,
        store,
        cache,
        queue,
        entered: entered_rx,
        release: release_tx,
    }
}

#[test]
fn concurrent_syncs_run_once() {
    let gated = gated_server();
    let first = {
        let server = Arc::clone(&gated.server);
        thread::spawn(move || server.sync(&Caller::cron(), None))
    };
    // The first sync is now inside its fetch, holding the guard.
    gated.entered.recv().expect("first sync never fetched");

    let second = gated
        .server
        .sync(&Caller::task_queue("sync", 1), None)
        .expect("second sync");
    assert_eq!(second, SyncOutcome::Busy);
    assert_eq!(gated.store.write_count(), 0);

    gated.release.send(()).expect("first sync gone");
    let first = first.join().expect("first sync panicked").expect("first sync");
    assert!(matches!(first, SyncOutcome::Synced(_)));
    assert_eq!(gated.store.changes().len(), 1);
    assert_eq!(gated.queue.len(), 1);
    assert_eq!(gated.cache.get(SYNC_GUARD_KEY).expect("cache"), None);
}

#[test]
fn user_ping_runs_while_sync_is_fetching() {
    let gated = gated_server();
    gated.store.put_user(
        "u1",
        UserPush {
            enabled: true,
            subscribers: vec!["reg-a".into()],
            endpoints: vec![],
        },
    );
    let sync = {
        let server = Arc::clone(&gated.server);
        thread::spawn(move || server.sync(&Caller::cron(), None))
    };
    gated.entered.recv().expect("sync never fetched");

    let (done_tx, done_rx) = mpsc::channel();
    let ping = {
        let server = Arc::clone(&gated.server);
        thread::spawn(move || {
            let task = Task::PingUser {
                uid: "u1".into(),
                sessions: vec![],
                all: true,
            };
            let response = server.handle(task, &Caller::task_queue("ping-user", 1));
            done_tx.send(response).expect("test gone");
        })
    };

    // The sync is still parked inside its fetch.
    let response = done_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("user ping blocked behind the sync");
    assert!(response.is_success());
    ping.join().expect("user ping panicked");
    assert_eq!(
        gated.store.user_push_info("u1").expect("read").endpoints,
        vec![format!("{DEFAULT_LEGACY_PUSH_ENDPOINT}/reg-a")]
    );

    gated.release.send(()).expect("sync gone");
    let outcome = sync.join().expect("sync panicked").expect("sync");
    assert!(matches!(outcome, SyncOutcome::Synced(_)));
    assert_eq!(gated.store.changes().len(), 1);
}

#[test]
fn guard_is_released_after_failed_sync() {
    let harness = TestHarness::new();
    harness.manifest.set_data(sample_event_data());
    harness.store.set_fail_writes(true);

    let response = harness.run(Task::Sync { if_modified_since: None }, 1);
    assert_eq!(response.status, 500);
    assert_eq!(harness.cache.get(SYNC_GUARD_KEY).expect("cache"), None);
    assert!(harness.store.latest_event_data().expect("read").is_empty());

    harness.store.set_fail_writes(false);
    assert!(matches!(harness.sync(&Caller::cron()), SyncOutcome::Synced(_)));
}

#[test]
fn subscriber_migration_is_idempotent() {
    let harness = TestHarness::new();
    harness.store.put_user(
        "u1",
        UserPush {
            enabled: true,
            subscribers: vec!["reg-a".into(), "reg-b".into()],
            endpoints: vec!["https://push.example/x".into()],
        },
    );
    let ping = Task::PingUser {
        uid: "u1".into(),
        sessions: vec![],
        all: true,
    };

    assert!(harness.run(ping.clone(), 1).is_success());
    let first = harness.store.user_push_info("u1").expect("read");
    assert!(first.subscribers.is_empty());

    assert!(harness.run(ping, 1).is_success());
    let second = harness.store.user_push_info("u1").expect("read");
    assert_eq!(first, second);
    assert_eq!(
        second.endpoints,
        vec![
            "https://push.example/x".to_string(),
            format!("{DEFAULT_LEGACY_PUSH_ENDPOINT}/reg-a"),
            format!("{DEFAULT_LEGACY_PUSH_ENDPOINT}/reg-b"),
        ]
    );
}

#[test]
fn removed_endpoint_gets_no_follow_up() {
    for retry in [false, true] {
        let harness = TestHarness::new();
        harness.store.put_user("u1", UserPush::enabled_with(["e1", "e2"]));
        let outcome = PushOutcome {
            remove: true,
            retry,
            after: Duration::from_secs(10),
        };
        harness.push.push_reply("e1", Err(DeliveryError::Rejected(outcome)));

        let task = Task::PingDevice {
            uid: "u1".into(),
            endpoint: "e1".into(),
        };
        assert!(harness.run(task, 1).is_success());
        assert_eq!(harness.store.user_push_info("u1").expect("read").endpoints, vec!["e2"]);
        assert!(harness.queue.is_empty());
    }
}

#[test]
fn exhausted_retry_budget_does_no_work() {
    let harness = TestHarness::new();
    harness.store.put_user("u1", UserPush::enabled_with(["e1"]));
    harness.manifest.set_data(sample_event_data());
    let tasks = [
        Task::Sync { if_modified_since: None },
        Task::NotifySubscribers {
            sessions: vec!["s1".into()],
            all: true,
        },
        Task::PingUser {
            uid: "u1".into(),
            sessions: vec![],
            all: true,
        },
        Task::PingDevice {
            uid: "u1".into(),
            endpoint: "e1".into(),
        },
    ];

    for task in tasks {
        // Twelfth execution: retry count 11.
        assert!(harness.run(task, 12).is_success());
    }
    assert_eq!(harness.queue.schedule_attempts(), 0);
    assert!(harness.manifest.requests().is_empty());
    assert!(harness.push.sent().is_empty());
    assert_eq!(harness.store.write_count(), 0);
}

#[test]
fn clock_ticks_in_the_same_minute_notify_once() {
    let harness = TestHarness::new();
    harness.store.put_user("u1", UserPush::enabled_with(["e1"]));
    harness.bookmarks.set("u1", ["talk"]);
    harness.manifest.set_data(
        EventDataBuilder::new()
            .session("talk", "Talk", 65, 45)
            .session("later", "Later", 240, 45)
            .build(),
    );
    harness.sync(&Caller::cron());
    harness.drain();
    let changes_after_sync = harness.store.changes().len();
    let sent_after_sync = harness.push.sent().len();

    let now = at_minute(60);
    let first = harness.tick(now).expect("first tick announces");
    assert_eq!(first.session_ids(), vec!["talk"]);
    assert!(first.has_update(UpdateKind::Start));
    harness.drain();

    assert!(harness.tick(now + chrono::Duration::seconds(30)).is_none());
    harness.drain();

    assert_eq!(harness.store.changes().len(), changes_after_sync + 1);
    assert_eq!(harness.push.sent().len(), sent_after_sync + 1);
}

#[test]
fn clock_rejects_retried_untrusted_calls() {
    let harness = TestHarness::new();
    harness
        .store
        .run_in_transaction(|txn| {
            txn.store_event_data(EventDataBuilder::new().session("talk", "Talk", 5, 30).build())
        })
        .expect("seed");

    assert!(harness.run(Task::Clock, 2).is_success());
    assert!(harness.store.next_sessions().is_empty());
}

#[test]
fn transient_delivery_failure_is_retried_later() {
    let harness = TestHarness::new();
    harness.store.put_user("u1", UserPush::enabled_with(["e1"]));
    harness.push.push_reply(
        "e1",
        Err(DeliveryError::Rejected(PushOutcome::retry_after(Duration::from_secs(30)))),
    );

    harness
        .queue
        .schedule(
            Task::PingUser {
                uid: "u1".into(),
                sessions: vec![],
                all: true,
            },
            Duration::ZERO,
        )
        .expect("schedule");
    let report = harness.drain();

    let pings: Vec<_> = report.named("ping-device").collect();
    assert_eq!(pings.len(), 2);
    assert_eq!(pings[1].delay, Duration::from_secs(30));
    assert_eq!(harness.push.sent(), vec!["e1", "e1"]);
}

#[test]
fn failed_reschedule_is_redelivered_by_the_queue() {
    let harness = TestHarness::new();
    harness.store.put_user("u1", UserPush::enabled_with(["e1"]));
    harness
        .push
        .push_reply("e1", Err(DeliveryError::Rejected(PushOutcome::retry_after(Duration::ZERO))));
    harness
        .queue
        .schedule(
            Task::PingDevice {
                uid: "u1".into(),
                endpoint: "e1".into(),
            },
            Duration::ZERO,
        )
        .expect("schedule");
    harness.queue.fail_next(1);

    let report = harness.drain();
    let statuses: Vec<_> = report.executions.iter().map(|e| (e.execution_count, e.status)).collect();
    assert_eq!(statuses, vec![(1, 500), (2, 200)]);
    assert_eq!(harness.push.sent(), vec!["e1", "e1"]);
}

#[test]
fn debug_injection_reaches_every_subscriber() {
    let harness = TestHarness::new();
    harness.store.put_user("u1", UserPush::enabled_with(["e1"]));
    harness.store.put_user("u2", UserPush::enabled_with(["e2"]));
    let survey = EventDataBuilder::new().session("talk", "Talk", 0, 30).build().sessions["talk"]
        .with_update(UpdateKind::Survey);

    harness
        .server
        .inject_changes(confsync_protocol::ChangeSet::from_sessions(at_minute(25), [survey]))
        .expect("inject");
    harness.drain();

    assert_eq!(harness.push.sent(), vec!["e1", "e2"]);
    assert_eq!(harness.store.changes_since(at_minute(0)).expect("history").len(), 1);
}
