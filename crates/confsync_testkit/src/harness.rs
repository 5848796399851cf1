//! A harness running the pipeline against in-memory collaborators.

use chrono::{DateTime, Utc};
use confsync_protocol::{ChangeSet, Task};
use confsync_server::{
    Caller, Collaborators, MemoryBookmarks, MemoryTaskQueue, MockManifestSource, MockPushTransport,
    PushServer, Response, ServerConfig, SyncOutcome,
};
use confsync_storage::{MemoryCache, MemoryStore};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

/// Upper bound on tasks run by one [`TestHarness::drain`].
const MAX_DRAIN_STEPS: usize = 10_000;

/// One task run by the harness.
#[derive(Debug, Clone, PartialEq)]
pub struct Execution {
    /// The task.
    pub task: Task,
    /// Execution count presented to the handler (1 for the first run).
    pub execution_count: u32,
    /// Delay the task was scheduled with.
    pub delay: Duration,
    /// Response status.
    pub status: u16,
}

/// Everything a drain ran.
#[derive(Debug, Clone, Default)]
pub struct DrainReport {
    /// Executions in order.
    pub executions: Vec<Execution>,
}

impl DrainReport {
    /// Returns true if every execution succeeded.
    pub fn all_succeeded(&self) -> bool {
        self.executions.iter().all(|e| (200..300).contains(&e.status))
    }

    /// Returns the executions of tasks named `name`.
    pub fn named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Execution> + 'a {
        self.executions.iter().filter(move |e| e.task.name() == name)
    }

    /// Number of executions that failed with a retryable status.
    pub fn failures(&self) -> usize {
        self.executions.iter().filter(|e| e.status >= 500).count()
    }
}

/// A [`PushServer`] wired to in-memory collaborators.
///
/// Tasks scheduled by the server land in [`TestHarness::queue`];
/// [`TestHarness::drain`] runs them the way the task queue would, delays
/// ignored, redelivering 5xx outcomes with an incremented execution count.
pub struct TestHarness {
    /// The server under test.
    pub server: PushServer<MemoryStore>,
    /// Store.
    pub store: Arc<MemoryStore>,
    /// Sync guard cache.
    pub cache: Arc<MemoryCache>,
    /// Upstream manifest.
    pub manifest: Arc<MockManifestSource>,
    /// Push transport.
    pub push: Arc<MockPushTransport>,
    /// Task queue.
    pub queue: Arc<MemoryTaskQueue>,
    /// Bookmarks.
    pub bookmarks: Arc<MemoryBookmarks>,
}

impl TestHarness {
    /// Creates a harness with default settings and no pauses.
    pub fn new() -> Self {
        Self::with_config(ServerConfig::new("https://example.com/manifest.json"))
    }

    /// Creates a harness with the given configuration.
    ///
    /// The device scheduling pause is forced to zero.
    pub fn with_config(config: ServerConfig) -> Self {
        let attempts = config.device_ping_attempts;
        let config = config.with_device_ping_retry(attempts, Duration::ZERO);

        let store = Arc::new(MemoryStore::new());
        let cache = Arc::new(MemoryCache::new());
        let manifest = Arc::new(MockManifestSource::new());
        let push = Arc::new(MockPushTransport::new());
        let queue = Arc::new(MemoryTaskQueue::new());
        let bookmarks = Arc::new(MemoryBookmarks::new());

        let server = PushServer::new(
            config,
            Arc::clone(&store),
            Collaborators {
                cache: cache.clone(),
                manifest: manifest.clone(),
                push: push.clone(),
                queue: queue.clone(),
                bookmarks: bookmarks.clone(),
            },
        );

        Self {
            server,
            store,
            cache,
            manifest,
            push,
            queue,
            bookmarks,
        }
    }

    /// Runs a sync as `caller`.
    pub fn sync(&self, caller: &Caller) -> SyncOutcome {
        self.server.sync(caller, None).expect("sync failed")
    }

    /// Runs a clock tick from the scheduler at `now`.
    pub fn tick(&self, now: DateTime<Utc>) -> Option<ChangeSet> {
        self.server
            .tick_clock(&Caller::cron(), now)
            .expect("clock tick failed")
    }

    /// Runs one task as the task queue would on its `execution_count`-th try.
    pub fn run(&self, task: Task, execution_count: u32) -> Response {
        let caller = Caller::task_queue(task.name(), execution_count);
        self.server.handle(task, &caller)
    }

    /// Runs queued tasks until the queue is empty.
    ///
    /// # Panics
    ///
    /// Panics if the queue does not settle.
    pub fn drain(&self) -> DrainReport {
        let ceiling = self.server.config().max_task_retry;
        let mut retries: VecDeque<(Task, Duration, u32)> = VecDeque::new();
        let mut report = DrainReport::default();

        for _ in 0..MAX_DRAIN_STEPS {
            let next = retries
                .pop_front()
                .or_else(|| self.queue.pop().map(|(task, delay)| (task, delay, 1)));
            let Some((task, delay, execution_count)) = next else {
                return report;
            };

            let response = self.run(task.clone(), execution_count);
            tracing::debug!(task = task.name(), execution_count, status = response.status, "drained");
            if response.should_retry() && execution_count <= ceiling + 1 {
                retries.push_back((task.clone(), delay, execution_count + 1));
            }
            report.executions.push(Execution {
                task,
                execution_count,
                delay,
                status: response.status,
            });
        }
        panic!("task queue did not settle after {MAX_DRAIN_STEPS} steps");
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}
