//! # VaultSync Protocol
//!
//! Wire protocol types for the VaultSync offline synchronization core.
//!
//! This crate provides:
//! - `WireChangeSet` for replicated change records
//! - `ChangePayload` tagged mutation payloads
//! - Push/pull exchange messages
//! - `SnapshotExport` for backup and migration
//!
//! All messages serialize to JSON with camelCase field names. This is a
//! pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod entity;
mod error;
mod messages;
mod payload;

pub use entity::EntityType;
pub use error::{ProtocolError, ProtocolResult};
pub use messages::{PullRequest, PushAck, PushRequest, SnapshotExport, WireChangeSet};
pub use payload::{ChangePayload, FieldMap};
