//! Wiring for unit tests.

use crate::config::ServerConfig;
use crate::handler::{Collaborators, HandlerContext};
use crate::transport::{MemoryBookmarks, MemoryTaskQueue, MockManifestSource, MockPushTransport};
use confsync_protocol::{EventData, Task};
use confsync_storage::{MemoryCache, MemoryStore};
use std::sync::Arc;
use std::time::Duration;

pub(crate) struct Fixture {
    pub context: Arc<HandlerContext<MemoryStore>>,
    pub store: Arc<MemoryStore>,
    pub cache: Arc<MemoryCache>,
    pub manifest: Arc<MockManifestSource>,
    pub push: Arc<MockPushTransport>,
    pub queue: Arc<MemoryTaskQueue>,
    pub bookmarks: Arc<MemoryBookmarks>,
}

impl Fixture {
    pub fn new() -> Self {
        Self::build(MemoryStore::new())
    }

    pub fn with_event_data(data: EventData) -> Self {
        Self::build(MemoryStore::with_event_data(data))
    }

    fn build(store: MemoryStore) -> Self {
        let config = ServerConfig::new("https://example.com/manifest.json")
            .with_device_ping_retry(6, Duration::ZERO);
        let store = Arc::new(store);
        let cache = Arc::new(MemoryCache::new());
        let manifest = Arc::new(MockManifestSource::new());
        let push = Arc::new(MockPushTransport::new());
        let queue = Arc::new(MemoryTaskQueue::new());
        let bookmarks = Arc::new(MemoryBookmarks::new());
        let services = Collaborators {
            cache: cache.clone(),
            manifest: manifest.clone(),
            push: push.clone(),
            queue: queue.clone(),
            bookmarks: bookmarks.clone(),
        };
        Self {
            context: Arc::new(HandlerContext::new(config, Arc::clone(&store), services)),
            store,
            cache,
            manifest,
            push,
            queue,
            bookmarks,
        }
    }

    pub fn queued(&self) -> Vec<Task> {
        self.queue.pending().into_iter().map(|(task, _)| task).collect()
    }
}
