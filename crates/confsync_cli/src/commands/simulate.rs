//! Simulate command implementation.
//!
//! Runs one sync with the manifest read from a file, then executes every
//! follow-up task in process. Push messages are logged instead of sent.

use super::{load_config, load_event_data, Format};
use chrono::{DateTime, Utc};
use confsync_protocol::{ChangeSet, EventData, Task, UserPush};
use confsync_server::{
    BookmarkError, BookmarkSource, Caller, Collaborators, DeliveryError, ManifestSource,
    MemoryTaskQueue, PushServer, PushTransport, ServerError, ServerResult, SyncOutcome,
};
use confsync_storage::{MemoryCache, MemoryStore, Store};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Upper bound on tasks run after the sync.
const MAX_TASKS: usize = 100_000;

/// Options of the simulate command.
pub struct Options {
    /// Upstream manifest file.
    pub manifest: PathBuf,
    /// Currently stored event data file.
    pub current: Option<PathBuf>,
    /// Users file.
    pub users: PathBuf,
    /// Configuration file.
    pub config: Option<PathBuf>,
    /// Output format.
    pub format: String,
}

/// One user in the users file.
#[derive(Debug, Deserialize)]
struct SimUser {
    #[serde(flatten)]
    push: UserPush,
    #[serde(default)]
    bookmarks: Vec<String>,
}

/// Result of a simulation.
#[derive(Debug, Serialize)]
pub struct Report {
    /// What the sync did.
    pub sync: String,
    /// Changed session IDs.
    pub changed_sessions: Vec<String>,
    /// Change records stored past the current version.
    pub recorded: Vec<ChangeSet>,
    /// Number of tasks executed after the sync.
    pub tasks: usize,
    /// Delivered endpoints.
    pub deliveries: Vec<String>,
    /// Final endpoints per user.
    pub endpoints: BTreeMap<String, Vec<String>>,
}

/// Serves a manifest read from disk, honouring `since`.
struct FileManifestSource {
    path: PathBuf,
}

impl ManifestSource for FileManifestSource {
    fn fetch(&self, _url: &str, since: Option<DateTime<Utc>>) -> ServerResult<Option<EventData>> {
        let data = load_event_data(&self.path).map_err(|e| ServerError::upstream(e.to_string()))?;
        match (data.modified, since) {
            (Some(modified), Some(since)) if modified <= since => Ok(None),
            _ => Ok(Some(data)),
        }
    }
}

/// Logs every push instead of sending it.
#[derive(Default)]
struct LoggingPushTransport {
    sent: Mutex<Vec<String>>,
}

impl PushTransport for LoggingPushTransport {
    fn send(&self, endpoint: &str, ttl: Duration) -> Result<Option<String>, DeliveryError> {
        info!(endpoint, ttl = ttl.as_secs(), "push");
        self.sent.lock().push(endpoint.to_string());
        Ok(None)
    }
}

struct FileBookmarks {
    bookmarks: HashMap<String, Vec<String>>,
}

impl BookmarkSource for FileBookmarks {
    fn bookmarks(&self, uid: &str) -> Result<Vec<String>, BookmarkError> {
        Ok(self.bookmarks.get(uid).cloned().unwrap_or_default())
    }
}

/// Runs the simulate command.
pub fn run(options: &Options) -> Result<(), Box<dyn std::error::Error>> {
    let format = Format::parse(&options.format)?;
    let report = simulate(options)?;

    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        Format::Text => {
            println!("sync: {}", report.sync);
            println!("changed sessions: {}", report.changed_sessions.join(", "));
            println!("change records: {}", report.recorded.len());
            println!("tasks run: {}", report.tasks);
            println!("deliveries: {}", report.deliveries.len());
            for endpoint in &report.deliveries {
                println!("  {endpoint}");
            }
        }
    }
    Ok(())
}

fn simulate(options: &Options) -> Result<Report, Box<dyn std::error::Error>> {
    let config = load_config(options.config.as_deref())?;
    let store = match &options.current {
        Some(path) => MemoryStore::with_event_data(load_event_data(path)?),
        None => MemoryStore::new(),
    };
    let store = Arc::new(store);
    let baseline = store.latest_event_data()?.modified.unwrap_or_default();

    let users = load_users(&options.users)?;
    let mut bookmarks = HashMap::new();
    for (uid, user) in users {
        store.put_user(uid.clone(), user.push);
        bookmarks.insert(uid, user.bookmarks);
    }

    let queue = Arc::new(MemoryTaskQueue::new());
    let push = Arc::new(LoggingPushTransport::default());
    let max_retry = config.max_task_retry;
    let server = PushServer::new(
        config,
        Arc::clone(&store),
        Collaborators {
            cache: Arc::new(MemoryCache::new()),
            manifest: Arc::new(FileManifestSource {
                path: options.manifest.clone(),
            }),
            push: push.clone(),
            queue: queue.clone(),
            bookmarks: Arc::new(FileBookmarks { bookmarks }),
        },
    );

    let outcome = server.sync(&Caller::cron(), None)?;
    let (sync, changed_sessions) = match &outcome {
        SyncOutcome::Synced(changes) => ("synced".to_string(), changes.session_ids()),
        other => (format!("{other:?}").to_lowercase(), Vec::new()),
    };

    let tasks = run_queue(&server, &queue, max_retry)?;
    let recorded = store.changes_since(baseline)?;

    let mut endpoints = BTreeMap::new();
    for uid in store.users_with_push()? {
        endpoints.insert(uid.clone(), store.user_push_info(&uid)?.endpoints);
    }
    let deliveries = push.sent.lock().clone();
    Ok(Report {
        sync,
        changed_sessions,
        recorded,
        tasks,
        deliveries,
        endpoints,
    })
}

fn load_users(path: &Path) -> Result<BTreeMap<String, SimUser>, Box<dyn std::error::Error>> {
    let bytes = std::fs::read(path).map_err(|e| format!("{}: {e}", path.display()))?;
    Ok(serde_json::from_slice(&bytes).map_err(|e| format!("{}: {e}", path.display()))?)
}

/// Executes queued tasks, redelivering 5xx outcomes up to the ceiling.
fn run_queue(
    server: &PushServer<MemoryStore>,
    queue: &MemoryTaskQueue,
    max_retry: u32,
) -> Result<usize, Box<dyn std::error::Error>> {
    let mut retries: Vec<(Task, u32)> = Vec::new();
    for executed in 0..MAX_TASKS {
        let next = retries
            .pop()
            .or_else(|| queue.pop().map(|(task, _delay)| (task, 1)));
        let Some((task, count)) = next else {
            return Ok(executed);
        };
        let response = server.handle(task.clone(), &Caller::task_queue(task.name(), count));
        if response.should_retry() && count <= max_retry + 1 {
            retries.push((task, count + 1));
        }
    }
    Err(format!("task queue did not settle after {MAX_TASKS} tasks").into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_json(json: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(json.as_bytes()).unwrap();
        file
    }

    #[test]
    fn simulate_delivers_to_bookmarked_users() {
        let manifest = write_json(
            r#"{"modified": "2016-05-17T09:00:00Z", "sessions": {"s1": {"id": "s1", "title": "Keynote",
                "startTime": "2016-05-18T17:00:00Z", "endTime": "2016-05-18T18:00:00Z"}}}"#,
        );
        let users = write_json(
            r#"{"u1": {"enabled": true, "endpoints": ["https://push.example/1"], "bookmarks": ["s1"]},
                "u2": {"enabled": true, "endpoints": ["https://push.example/2"]},
                "u3": {"enabled": true, "subscribers": ["reg"], "bookmarks": ["s1"]}}"#,
        );
        let config = write_json(r#"{"device_ping_pause": 0}"#);

        let mut report = simulate(&Options {
            manifest: manifest.path().to_path_buf(),
            current: None,
            users: users.path().to_path_buf(),
            config: Some(config.path().to_path_buf()),
            format: "json".into(),
        })
        .unwrap();

        assert_eq!(report.sync, "synced");
        assert_eq!(report.changed_sessions, vec!["s1"]);
        assert_eq!(report.recorded.len(), 1);
        assert_eq!(report.recorded[0].session_ids(), vec!["s1"]);
        report.deliveries.sort();
        assert_eq!(
            report.deliveries,
            vec![
                "https://android.googleapis.com/gcm/send/reg".to_string(),
                "https://push.example/1".to_string()
            ]
        );
        assert_eq!(report.endpoints["u3"], vec!["https://android.googleapis.com/gcm/send/reg"]);
    }
}
