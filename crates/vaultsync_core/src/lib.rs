//! # VaultSync Core
//!
//! Local stores for the VaultSync offline synchronization core.
//!
//! This crate provides:
//! - [`ChangeLog`] — append-only, per-entity ordered store of mutation
//!   records, with a durable journal seam
//! - [`SnapshotStore`] — deterministic folds of log prefixes, with
//!   cursor-safe compaction
//! - [`SyncCursorStore`] — monotonic per-remote, per-direction progress
//!   ledger
//! - [`ProjectGraph`] — identity registry and referential-integrity checks
//!
//! ## Key invariants
//!
//! - `append` is the only mutator of the log; corrections are new appends
//! - A snapshot is a cache: refolding the raw log reproduces it exactly
//! - Cursors never regress
//! - Compaction never prunes history a remote has not acknowledged

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod changelog;
mod cursor;
mod error;
mod graph;
mod journal;
mod record;
mod snapshot;

pub use changelog::ChangeLog;
pub use cursor::{Direction, SyncCursorStore, SyncState};
pub use error::{CoreError, CoreResult};
pub use graph::{
    DatasetIdentity, GitConnectionIdentity, IntegrityViolation, ProjectGraph, ProjectIdentity,
};
pub use journal::{FileJournal, Journal, MemoryJournal};
pub use record::{ChangeRecord, EntityKey};
pub use snapshot::{fold, EntityState, Snapshot, SnapshotStore};
