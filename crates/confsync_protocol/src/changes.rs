//! Change sets.

use crate::event::{EventData, Session, Speaker, Tag, Video};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A timestamped, sparse overlay of [`EventData`].
///
/// Only entities that changed are present. A change set is produced by the
/// diff engine or the clock scheduler, persisted as an audit record and then
/// handed to the notification dispatcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeSet {
    /// When the change was detected. Defaults to the Unix epoch when absent.
    #[serde(default)]
    pub updated: DateTime<Utc>,
    /// Changed sessions, each tagged with an update kind.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub sessions: BTreeMap<String, Session>,
    /// Changed speakers.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub speakers: BTreeMap<String, Speaker>,
    /// Changed videos.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub videos: BTreeMap<String, Video>,
    /// Changed tags.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, Tag>,
}

impl ChangeSet {
    /// Creates an empty change set stamped with `updated`.
    pub fn new(updated: DateTime<Utc>) -> Self {
        Self {
            updated,
            sessions: BTreeMap::new(),
            speakers: BTreeMap::new(),
            videos: BTreeMap::new(),
            tags: BTreeMap::new(),
        }
    }

    /// Builds a change set carrying only the given sessions.
    pub fn from_sessions(updated: DateTime<Utc>, sessions: impl IntoIterator<Item = Session>) -> Self {
        let mut changes = Self::new(updated);
        for s in sessions {
            changes.sessions.insert(s.id.clone(), s);
        }
        changes
    }

    /// Returns true if no entity mapping holds anything.
    ///
    /// An empty change set is never persisted nor notified.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
            && self.speakers.is_empty()
            && self.videos.is_empty()
            && self.tags.is_empty()
    }

    /// Returns the changed session IDs in ascending order.
    pub fn session_ids(&self) -> Vec<String> {
        self.sessions.keys().cloned().collect()
    }

    /// Returns true if any carried session has the given update kind.
    pub fn has_update(&self, kind: crate::UpdateKind) -> bool {
        self.sessions.values().any(|s| s.update == Some(kind))
    }
}

impl From<&ChangeSet> for EventData {
    fn from(changes: &ChangeSet) -> Self {
        EventData {
            sessions: changes.sessions.clone(),
            speakers: changes.speakers.clone(),
            videos: changes.videos.clone(),
            tags: changes.tags.clone(),
            modified: Some(changes.updated),
            etag: String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::UpdateKind;
    use chrono::TimeZone;

    #[test]
    fn emptiness_covers_every_mapping() {
        let now = Utc.with_ymd_and_hms(2016, 5, 18, 9, 0, 0).unwrap();
        let mut changes = ChangeSet::new(now);
        assert!(changes.is_empty());

        changes.videos.insert(
            "v1".into(),
            Video {
                id: "v1".into(),
                title: "Recap".into(),
                desc: String::new(),
                topic: String::new(),
                speakers: vec![],
                thumbnail_url: String::new(),
            },
        );
        assert!(!changes.is_empty());
    }

    #[test]
    fn session_ids_are_sorted() {
        let now = Utc.with_ymd_and_hms(2016, 5, 18, 9, 0, 0).unwrap();
        let later = now + chrono::Duration::hours(1);
        let changes = ChangeSet::from_sessions(
            now,
            vec![
                Session::new("zeta", "Z", now, later).with_update(UpdateKind::Start),
                Session::new("alpha", "A", now, later).with_update(UpdateKind::Survey),
            ],
        );
        assert_eq!(changes.session_ids(), vec!["alpha", "zeta"]);
        assert!(changes.has_update(UpdateKind::Survey));
        assert!(!changes.has_update(UpdateKind::Video));
    }

    #[test]
    fn serialization_skips_empty_maps() {
        let now = Utc.with_ymd_and_hms(2016, 5, 18, 9, 0, 0).unwrap();
        let json = serde_json::to_value(ChangeSet::new(now)).unwrap();
        assert!(json.get("sessions").is_none());
        let back: ChangeSet = serde_json::from_value(json).unwrap();
        assert!(back.is_empty());
    }
}
