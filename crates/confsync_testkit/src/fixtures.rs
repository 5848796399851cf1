//! Event data fixtures.
//!
//! Times are given in minutes relative to [`conference_start`], so tests
//! read as a schedule rather than as timestamps.

use chrono::{DateTime, Duration, TimeZone, Utc};
use confsync_protocol::{EventData, Session, Speaker, Tag, Video};

/// Opening time of the fixture conference.
pub fn conference_start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2016, 5, 18, 9, 0, 0)
        .single()
        .unwrap_or_default()
}

/// Returns `conference_start() + minutes`.
pub fn at_minute(minutes: i64) -> DateTime<Utc> {
    conference_start() + Duration::minutes(minutes)
}

/// Builds [`EventData`] for tests.
#[derive(Debug, Clone)]
pub struct EventDataBuilder {
    data: EventData,
}

impl EventDataBuilder {
    /// Starts an empty schedule last modified the day before the
    /// conference.
    pub fn new() -> Self {
        Self {
            data: EventData {
                modified: Some(at_minute(-24 * 60)),
                ..EventData::default()
            },
        }
    }

    /// Starts from existing data.
    pub fn from_data(data: EventData) -> Self {
        Self { data }
    }

    /// Sets the `modified` stamp.
    pub fn modified(mut self, at: DateTime<Utc>) -> Self {
        self.data.modified = Some(at);
        self
    }

    /// Adds a session starting `start` minutes into the conference and
    /// lasting `length` minutes.
    pub fn session(mut self, id: &str, title: &str, start: i64, length: i64) -> Self {
        let start = at_minute(start);
        self.data
            .insert_session(Session::new(id, title, start, start + Duration::minutes(length)));
        self
    }

    /// Adds a fully specified session.
    pub fn with_session(mut self, session: Session) -> Self {
        self.data.insert_session(session);
        self
    }

    /// Adds a speaker.
    pub fn speaker(mut self, id: &str, name: &str) -> Self {
        self.data.speakers.insert(
            id.to_string(),
            Speaker {
                id: id.to_string(),
                name: name.to_string(),
                bio: String::new(),
                company: String::new(),
                thumbnail_url: String::new(),
            },
        );
        self
    }

    /// Adds a video.
    pub fn video(mut self, id: &str, title: &str) -> Self {
        self.data.videos.insert(
            id.to_string(),
            Video {
                id: id.to_string(),
                title: title.to_string(),
                desc: String::new(),
                topic: String::new(),
                speakers: Vec::new(),
                thumbnail_url: String::new(),
            },
        );
        self
    }

    /// Adds a tag.
    pub fn tag(mut self, tag: &str, name: &str, category: &str) -> Self {
        self.data.tags.insert(
            tag.to_string(),
            Tag {
                tag: tag.to_string(),
                name: name.to_string(),
                category: category.to_string(),
            },
        );
        self
    }

    /// Returns the built data.
    pub fn build(self) -> EventData {
        self.data
    }
}

impl Default for EventDataBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A small schedule: keynote, two talks, a speaker and a tag.
pub fn sample_event_data() -> EventData {
    EventDataBuilder::new()
        .session("keynote", "Keynote", 60, 90)
        .session("android", "What's new in Android", 180, 60)
        .session("web", "Progressive web apps", 180, 45)
        .speaker("sp1", "Ada")
        .tag("TOPIC_WEB", "Web", "TOPIC")
        .build()
}
