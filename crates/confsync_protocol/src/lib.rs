//! # Confsync Protocol
//!
//! Data model shared by every confsync crate.
//!
//! This crate provides:
//! - `EventData` and its entities (`Session`, `Speaker`, `Video`, `Tag`)
//! - `ChangeSet`, the sparse overlay produced by a sync or a clock tick
//! - The diff engine (`diff_event_data`)
//! - Per-user push state (`UserPush`) and delivery outcomes (`PushOutcome`)
//! - Background `Task` descriptors exchanged with the task queue
//!
//! This is a pure data crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod changes;
mod diff;
mod event;
mod push;
mod task;

pub use changes::ChangeSet;
pub use diff::diff_event_data;
pub use event::{EventData, Session, Speaker, Tag, UpdateKind, Video};
pub use push::{upgrade_subscribers, PushOutcome, UserPush};
pub use task::Task;
