//! CLI command implementations.

pub mod diff;
pub mod simulate;
pub mod upcoming;

use confsync_protocol::EventData;
use confsync_server::ServerConfig;
use std::fs;
use std::path::Path;

/// Reads event data from a JSON file.
pub fn load_event_data(path: &Path) -> Result<EventData, Box<dyn std::error::Error>> {
    let bytes = fs::read(path).map_err(|e| format!("{}: {e}", path.display()))?;
    let data = serde_json::from_slice(&bytes).map_err(|e| format!("{}: {e}", path.display()))?;
    Ok(data)
}

/// Reads a pipeline configuration, or returns the default one.
pub fn load_config(path: Option<&Path>) -> Result<ServerConfig, Box<dyn std::error::Error>> {
    match path {
        Some(path) => {
            let json = fs::read_to_string(path).map_err(|e| format!("{}: {e}", path.display()))?;
            Ok(ServerConfig::from_json(&json)?)
        }
        None => Ok(ServerConfig::default()),
    }
}

/// Output format shared by the commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// Human-readable text.
    Text,
    /// Pretty-printed JSON.
    Json,
}

impl Format {
    /// Parses a `--format` value.
    pub fn parse(s: &str) -> Result<Self, String> {
        match s {
            "text" => Ok(Format::Text),
            "json" => Ok(Format::Json),
            other => Err(format!("unknown format {other:?}, expected text or json")),
        }
    }
}
