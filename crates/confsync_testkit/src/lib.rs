//! # Confsync Testkit
//!
//! Test utilities for confsync.
//!
//! This crate provides:
//! - Event data fixtures anchored at a fixed conference day
//! - Property-based test generators using proptest
//! - A harness wiring [`PushServer`](confsync_server::PushServer) to
//!   in-memory collaborators and draining its task queue
//!
//! ## Usage
//!
//! ```rust
//! use confsync_testkit::prelude::*;
//! use confsync_server::Caller;
//!
//! let harness = TestHarness::new();
//! harness.manifest.set_data(EventDataBuilder::new().session("s1", "Keynote", 60, 60).build());
//! harness.store.put_user("u1", confsync_protocol::UserPush::enabled_with(["https://push.example/1"]));
//! harness.bookmarks.set("u1", ["s1"]);
//!
//! harness.sync(&Caller::cron());
//! let report = harness.drain();
//! assert!(report.all_succeeded());
//! assert_eq!(harness.push.sent(), vec!["https://push.example/1"]);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod harness;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::harness::*;
}

pub use fixtures::*;
pub use generators::*;
pub use harness::*;
