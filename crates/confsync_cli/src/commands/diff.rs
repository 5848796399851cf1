//! Diff command implementation.

use super::{load_event_data, Format};
use confsync_protocol::{diff_event_data, ChangeSet};
use std::path::Path;

/// Runs the diff command.
pub fn run(old: &Path, new: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let format = Format::parse(format)?;
    let old = load_event_data(old)?;
    let new = load_event_data(new)?;
    let changes = diff_event_data(&old, &new);

    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(&changes)?),
        Format::Text => print!("{}", render(&changes)),
    }
    Ok(())
}

fn render(changes: &ChangeSet) -> String {
    if changes.is_empty() {
        return "no changes\n".to_string();
    }

    let mut out = format!("changes at {}\n", changes.updated.to_rfc3339());
    for (id, session) in &changes.sessions {
        let kind = session.update.map(|k| k.as_str()).unwrap_or("details");
        out.push_str(&format!("  session {id} [{kind}] {}\n", session.title));
    }
    for (id, speaker) in &changes.speakers {
        out.push_str(&format!("  speaker {id} {}\n", speaker.name));
    }
    for (id, video) in &changes.videos {
        out.push_str(&format!("  video {id} {}\n", video.title));
    }
    for (id, tag) in &changes.tags {
        out.push_str(&format!("  tag {id} {}\n", tag.name));
    }
    out
}
