//! # Confsync Storage
//!
//! Storage abstractions for the confsync pipeline.
//!
//! This crate provides the two shared resources the pipeline mutates:
//!
//! - [`Store`] - transactional access to event data, change records,
//!   per-user push info and the "next sessions" marker
//! - [`Cache`] - an atomically incremented counter with expiry, used as the
//!   single-flight sync guard
//!
//! ## Design Principles
//!
//! - Writes happen inside [`Store::run_in_transaction`], which takes a
//!   closure over a [`Transaction`] and commits only if the closure succeeds
//! - Transactions are optimistic: a commit whose reads went stale fails with
//!   [`StorageError::Conflict`] instead of waiting on a lock
//! - Non-transactional reads may observe a stale version
//! - Implementations must be `Send + Sync`
//!
//! ## Example
//!
//! ```rust
//! use confsync_storage::{MemoryStore, Store, StorageError};
//! use confsync_protocol::UserPush;
//!
//! let store = MemoryStore::new();
//! store
//!     .run_in_transaction(|txn| {
//!         txn.store_user_push_info("u1", UserPush::enabled_with(["https://push.example/1"]))?;
//!         Ok::<_, StorageError>(())
//!     })
//!     .unwrap();
//! assert_eq!(store.users_with_push().unwrap(), vec!["u1".to_string()]);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cache;
mod error;
mod memory;
mod store;

pub use cache::{Cache, MemoryCache};
pub use error::{StorageError, StorageResult};
pub use memory::MemoryStore;
pub use store::{Store, Transaction};
