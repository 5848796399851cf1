//! Confsync CLI
//!
//! Offline tools for the confsync pipeline.
//!
//! # Commands
//!
//! - `diff` - Show what changed between two event data files
//! - `upcoming` - List sessions the clock would announce
//! - `simulate` - Run one sync against local files and show deliveries

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Confsync command-line tools.
#[derive(Parser)]
#[command(name = "confsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show what changed between two event data files
    Diff {
        /// Previous event data (JSON)
        old: PathBuf,

        /// New event data (JSON)
        new: PathBuf,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// List sessions starting soon and surveys opening
    Upcoming {
        /// Event data (JSON)
        events: PathBuf,

        /// Reference time (RFC 3339), defaults to now
        #[arg(long)]
        at: Option<String>,

        /// Pipeline configuration (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Run one sync against local files and print the deliveries
    Simulate {
        /// Upstream manifest (JSON event data)
        #[arg(short, long)]
        manifest: PathBuf,

        /// Currently stored event data (JSON)
        #[arg(long)]
        current: Option<PathBuf>,

        /// Users with push info and bookmarks (JSON)
        #[arg(short, long)]
        users: PathBuf,

        /// Pipeline configuration (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Diff { old, new, format } => {
            commands::diff::run(&old, &new, &format)?;
        }
        Commands::Upcoming { events, at, config } => {
            commands::upcoming::run(&events, at.as_deref(), config.as_deref())?;
        }
        Commands::Simulate {
            manifest,
            current,
            users,
            config,
            format,
        } => {
            let options = commands::simulate::Options {
                manifest,
                current,
                users,
                config,
                format,
            };
            commands::simulate::run(&options)?;
        }
        Commands::Version => {
            println!("confsync CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
