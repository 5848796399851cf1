//! Diff engine.
//!
//! Computes the minimal [`ChangeSet`] between two versions of [`EventData`].
//! Entries present in `new` but absent or different in `old` are included.
//! Removed entries are omitted: deletions are never notified.

use crate::changes::ChangeSet;
use crate::event::{EventData, Session, UpdateKind};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// Returns the change set that turns `old` into `new`.
///
/// The result is stamped with `new.modified`, falling back to `old.modified`
/// and then the Unix epoch, so the function stays pure. Since all entity maps
/// are ordered, the output never depends on input iteration order.
pub fn diff_event_data(old: &EventData, new: &EventData) -> ChangeSet {
    let updated = new
        .modified
        .or(old.modified)
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
    let mut changes = ChangeSet::new(updated);

    for (id, session) in &new.sessions {
        if let Some(kind) = classify_session(old.sessions.get(id), session) {
            changes.sessions.insert(id.clone(), session.with_update(kind));
        }
    }
    changes.speakers = changed_entries(&old.speakers, &new.speakers);
    changes.videos = changed_entries(&old.videos, &new.videos);
    changes.tags = changed_entries(&old.tags, &new.tags);
    changes
}

/// Decides the update kind for a session, or `None` if it did not change.
fn classify_session(old: Option<&Session>, new: &Session) -> Option<UpdateKind> {
    let old = match old {
        Some(old) => old,
        None => return Some(UpdateKind::Details),
    };
    if old.same_content(new) {
        return None;
    }
    // a freshly published recording with nothing else touched
    if old.youtube_url.is_none() && new.youtube_url.is_some() {
        let mut probe = old.clone();
        probe.youtube_url = new.youtube_url.clone();
        if probe.same_content(new) {
            return Some(UpdateKind::Video);
        }
    }
    Some(UpdateKind::Details)
}

fn changed_entries<T: PartialEq + Clone>(
    old: &BTreeMap<String, T>,
    new: &BTreeMap<String, T>,
) -> BTreeMap<String, T> {
    new.iter()
        .filter(|(id, item)| old.get(*id) != Some(*item))
        .map(|(id, item)| (id.clone(), item.clone()))
        .collect()
}
