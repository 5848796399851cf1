//! Event data and its entities.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

/// Why a session shows up in a change set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateKind {
    /// Session content changed (title, time, room, speakers...).
    Details,
    /// A recording became available.
    Video,
    /// Session is about to start.
    Start,
    /// Session feedback survey is opening.
    Survey,
}

impl UpdateKind {
    /// Returns the wire name of this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            UpdateKind::Details => "details",
            UpdateKind::Video => "video",
            UpdateKind::Start => "start",
            UpdateKind::Survey => "survey",
        }
    }
}

impl fmt::Display for UpdateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A scheduled session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    /// Stable session ID.
    pub id: String,
    /// Session title.
    pub title: String,
    /// Session description.
    #[serde(default)]
    pub desc: String,
    /// Start time.
    pub start_time: DateTime<Utc>,
    /// End time.
    pub end_time: DateTime<Utc>,
    /// Room name.
    #[serde(default)]
    pub room: String,
    /// Tag IDs.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Speaker IDs.
    #[serde(default)]
    pub speakers: Vec<String>,
    /// Recording URL, once published.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub youtube_url: Option<String>,
    /// Set only on sessions carried by a change set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update: Option<UpdateKind>,
}

impl Session {
    /// Creates a session with empty optional fields.
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            desc: String::new(),
            start_time,
            end_time,
            room: String::new(),
            tags: Vec::new(),
            speakers: Vec::new(),
            youtube_url: None,
            update: None,
        }
    }

    /// Compares everything except the `update` tag.
    pub fn same_content(&self, other: &Session) -> bool {
        self.id == other.id
            && self.title == other.title
            && self.desc == other.desc
            && self.start_time == other.start_time
            && self.end_time == other.end_time
            && self.room == other.room
            && self.tags == other.tags
            && self.speakers == other.speakers
            && self.youtube_url == other.youtube_url
    }

    /// Returns a copy tagged with the given update kind.
    pub fn with_update(&self, kind: UpdateKind) -> Self {
        let mut s = self.clone();
        s.update = Some(kind);
        s
    }
}

/// A speaker profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Speaker {
    /// Stable speaker ID.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Biography.
    #[serde(default)]
    pub bio: String,
    /// Company or affiliation.
    #[serde(default)]
    pub company: String,
    /// Thumbnail URL.
    #[serde(default)]
    pub thumbnail_url: String,
}

/// An entry in the video library.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Video {
    /// Stable video ID.
    pub id: String,
    /// Video title.
    pub title: String,
    /// Video description.
    #[serde(default)]
    pub desc: String,
    /// Topic name.
    #[serde(default)]
    pub topic: String,
    /// Speaker names.
    #[serde(default)]
    pub speakers: Vec<String>,
    /// Thumbnail URL.
    #[serde(default)]
    pub thumbnail_url: String,
}

/// A session tag (track, level, type...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tag {
    /// Stable tag ID, e.g. `TOPIC_ANDROID`.
    pub tag: String,
    /// Display name.
    pub name: String,
    /// Category, e.g. `TOPIC`.
    #[serde(default)]
    pub category: String,
}

/// The full event schedule.
///
/// Entity maps are ordered by ID so serialization and iteration never depend
/// on insertion order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventData {
    /// Sessions by ID.
    #[serde(default)]
    pub sessions: BTreeMap<String, Session>,
    /// Speakers by ID.
    #[serde(default)]
    pub speakers: BTreeMap<String, Speaker>,
    /// Videos by ID.
    #[serde(default)]
    pub videos: BTreeMap<String, Video>,
    /// Tags by ID.
    #[serde(default)]
    pub tags: BTreeMap<String, Tag>,
    /// Upstream last-modified time of this version.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified: Option<DateTime<Utc>>,
    /// Content hash of this version.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub etag: String,
}

#[derive(Serialize)]
struct EtagContent<'a> {
    sessions: &'a BTreeMap<String, Session>,
    speakers: &'a BTreeMap<String, Speaker>,
    videos: &'a BTreeMap<String, Video>,
    tags: &'a BTreeMap<String, Tag>,
}

impl EventData {
    /// Returns true if no entity of any kind is present.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
            && self.speakers.is_empty()
            && self.videos.is_empty()
            && self.tags.is_empty()
    }

    /// Inserts a session keyed by its ID.
    pub fn insert_session(&mut self, session: Session) {
        self.sessions.insert(session.id.clone(), session);
    }

    /// Computes the hex SHA-256 of the entity maps.
    ///
    /// `modified` and `etag` itself are not part of the hash.
    pub fn compute_etag(&self) -> String {
        let content = EtagContent {
            sessions: &self.sessions,
            speakers: &self.speakers,
            videos: &self.videos,
            tags: &self.tags,
        };
        let bytes = serde_json::to_vec(&content).unwrap_or_default();
        Sha256::digest(&bytes)
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect()
    }
}
