//! Property-based test generators using proptest.

use crate::fixtures::at_minute;
use chrono::Duration;
use confsync_protocol::{EventData, Session, UserPush};
use proptest::prelude::*;

/// Strategy for session IDs.
pub fn session_id_strategy() -> impl Strategy<Value = String> {
    "s[0-9]{1,3}"
}

/// Strategy for sessions within the first conference day.
pub fn session_strategy() -> impl Strategy<Value = Session> {
    (
        session_id_strategy(),
        "[A-Z][a-z]{2,12}( [a-z]{2,8}){0,3}",
        0i64..600,
        prop::sample::select(vec![30i64, 45, 60, 90]),
        prop::option::of("https://youtu\\.be/[a-zA-Z0-9]{6}"),
    )
        .prop_map(|(id, title, start, length, youtube_url)| {
            let start = at_minute(start);
            let mut session = Session::new(id, title, start, start + Duration::minutes(length));
            session.youtube_url = youtube_url;
            session
        })
}

/// Strategy for event data holding up to `max_sessions` sessions.
pub fn event_data_strategy(max_sessions: usize) -> impl Strategy<Value = EventData> {
    prop::collection::vec(session_strategy(), 0..=max_sessions).prop_map(|sessions| {
        let mut data = EventData {
            modified: Some(at_minute(-60)),
            ..EventData::default()
        };
        for s in sessions {
            data.insert_session(s);
        }
        data
    })
}

/// Strategy for an enabled user with a few endpoints and legacy
/// subscribers.
pub fn user_push_strategy() -> impl Strategy<Value = UserPush> {
    (
        prop::collection::vec("https://push\\.example/[a-z0-9]{4}", 0..4),
        prop::collection::vec("[a-zA-Z0-9]{8}", 0..3),
    )
        .prop_map(|(endpoints, subscribers)| UserPush {
            enabled: true,
            subscribers,
            endpoints,
        })
}
