//! Upcoming command implementation.

use super::{load_config, load_event_data};
use chrono::{DateTime, Utc};
use confsync_server::{upcoming_sessions, upcoming_surveys};
use std::path::Path;

/// Runs the upcoming command.
pub fn run(events: &Path, at: Option<&str>, config: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(config)?;
    let data = load_event_data(events)?;
    let now = match at {
        Some(at) => DateTime::parse_from_rfc3339(at)
            .map_err(|e| format!("--at {at:?}: {e}"))?
            .with_timezone(&Utc),
        None => Utc::now(),
    };

    let starting = upcoming_sessions(now, data.sessions.values(), config.start_lookahead);
    let surveys = upcoming_surveys(now, data.sessions.values(), config.survey_lead);

    println!("at {}", now.to_rfc3339());
    println!("starting within {}s: {}", config.start_lookahead.as_secs(), starting.len());
    for s in &starting {
        println!("  {} {} ({})", s.start_time.to_rfc3339(), s.id, s.title);
    }
    println!("surveys opening within {}s: {}", config.survey_lead.as_secs(), surveys.len());
    for s in &surveys {
        println!("  {} {} ({})", s.end_time.to_rfc3339(), s.id, s.title);
    }
    Ok(())
}
