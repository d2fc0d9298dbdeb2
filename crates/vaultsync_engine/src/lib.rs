//! # VaultSync Engine
//!
//! Reconciliation state machine for the VaultSync offline synchronization
//! core.
//!
//! This crate provides:
//! - The per-remote reconciliation state machine
//!   (idle → collecting → transmitting → awaiting ack → advancing)
//! - Deterministic last-writer-wins conflict resolution with an audit trail
//! - Retry with exponential backoff for transient transport failures
//! - A transport abstraction with a mock for testing
//!
//! ## Architecture
//!
//! The engine implements a **pull-then-push** model: remote changes are
//! applied locally first, then local changes are pushed. Cursors advance
//! only after the durable step of an exchange (remote ack for push, local
//! apply for pull), so interrupted cycles resume from the last
//! acknowledged point and replayed batches are idempotent.
//!
//! ## Key invariants
//!
//! - Cursors never move backwards
//! - Replaying any batch leaves the store identical
//! - Conflict verdicts are independent of application order
//! - A cancelled cycle leaves cursors where the last durable step put them

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod conflict;
mod engine;
mod error;
mod transport;

pub use config::{RetryConfig, SyncConfig};
pub use conflict::{ConflictRecord, ConflictWinner};
pub use engine::{EngineState, EngineStats, ReconciliationEngine, SyncReport, SyncStatus};
pub use error::{SyncError, SyncResult};
pub use transport::{MockTransport, SyncTransport};
