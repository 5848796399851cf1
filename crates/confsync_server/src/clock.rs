//! Clock scheduler.
//!
//! Runs about once a minute. Each tick looks for sessions about to start
//! and sessions whose feedback survey is opening, skips those already
//! announced, and notifies about the rest.

use crate::auth::Caller;
use crate::dispatch;
use crate::error::{ServerError, ServerResult};
use crate::handler::HandlerContext;
use chrono::{DateTime, Duration as TimeDelta, Utc};
use confsync_protocol::{ChangeSet, Session, UpdateKind};
use confsync_storage::Store;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Sessions starting in `(now, now + lookahead]`, tagged [`UpdateKind::Start`].
pub fn upcoming_sessions<'a>(
    now: DateTime<Utc>,
    sessions: impl IntoIterator<Item = &'a Session>,
    lookahead: Duration,
) -> Vec<Session> {
    let until = window_end(now, lookahead);
    sessions
        .into_iter()
        .filter(|s| s.start_time > now && s.start_time <= until)
        .map(|s| s.with_update(UpdateKind::Start))
        .collect()
}

/// Sessions whose survey opens `lead` before they end, tagged
/// [`UpdateKind::Survey`]: those ending in `(now, now + lead]`.
pub fn upcoming_surveys<'a>(
    now: DateTime<Utc>,
    sessions: impl IntoIterator<Item = &'a Session>,
    lead: Duration,
) -> Vec<Session> {
    let until = window_end(now, lead);
    sessions
        .into_iter()
        .filter(|s| s.end_time > now && s.end_time <= until)
        .map(|s| s.with_update(UpdateKind::Survey))
        .collect()
}

/// Key under which a session is remembered as announced.
pub fn marker_key(session: &Session) -> String {
    match session.update {
        Some(kind) => format!("{}:{}", session.id, kind),
        None => session.id.clone(),
    }
}

fn window_end(now: DateTime<Utc>, window: Duration) -> DateTime<Utc> {
    TimeDelta::from_std(window)
        .ok()
        .and_then(|delta| now.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Announces upcoming sessions and surveys.
pub struct ClockScheduler<S> {
    context: Arc<HandlerContext<S>>,
}

impl<S: Store> ClockScheduler<S> {
    /// Creates a new clock scheduler.
    pub fn new(context: Arc<HandlerContext<S>>) -> Self {
        Self { context }
    }

    /// Runs one tick at `now`.
    ///
    /// Returns the change set that was stored and notified, if any.
    pub fn tick(&self, caller: &Caller, now: DateTime<Utc>) -> ServerResult<Option<ChangeSet>> {
        if !caller.may_tick_clock() {
            warn!(cron = caller.cron, retry = ?caller.retry().count(), "clock tick refused");
            return Ok(None);
        }

        let config = &self.context.config;
        let data = self.context.store.latest_event_data()?;
        let starting = upcoming_sessions(now, data.sessions.values(), config.start_lookahead);
        let surveys = upcoming_surveys(now, data.sessions.values(), config.survey_lead);
        if starting.is_empty() && surveys.is_empty() {
            debug!("no upcoming sessions");
            return Ok(None);
        }

        let queue = self.context.services.queue.as_ref();
        self.context.store.run_in_transaction(|txn| {
            let mut marker = txn.next_sessions()?;
            let fresh: Vec<Session> = starting
                .iter()
                .chain(surveys.iter())
                .filter(|s| !marker.contains(&marker_key(s)))
                .cloned()
                .collect();
            if fresh.is_empty() {
                return Ok::<_, ServerError>(None);
            }

            let new_surveys = fresh
                .iter()
                .filter(|s| s.update == Some(UpdateKind::Survey))
                .count();
            info!(
                sessions = fresh.len() - new_surveys,
                surveys = new_surveys,
                "found upcoming sessions and surveys"
            );

            marker.extend(fresh.iter().map(marker_key));
            let changes = ChangeSet::from_sessions(now, fresh);
            txn.store_next_sessions(marker)?;
            txn.store_changes(&changes)?;
            dispatch::notify(queue, &changes, new_surveys > 0)?;
            Ok(Some(changes))
        })
    }
}
