//! Conflict detection and deterministic resolution.
//!
//! A conflict is two different payloads at the same entity coordinate.
//! Resolution is last-writer-wins by `created_at`; an exact timestamp tie
//! falls back to the lexically greater replica id, so both sides of an
//! exchange reach the same verdict without coordination.

use chrono::{DateTime, Utc};
use vaultsync_core::ChangeRecord;
use vaultsync_protocol::{EntityType, WireChangeSet};

/// Which side of a conflict won.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictWinner {
    /// The local record stands.
    Local,
    /// The remote change set supersedes the local record.
    Remote,
}

/// Audit entry for one resolved conflict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictRecord {
    /// Entity type of the contested coordinate.
    pub entity_type: EntityType,
    /// Entity id of the contested coordinate.
    pub entity_id: u64,
    /// Contested per-entity sequence.
    pub sequence: u64,
    /// Serialized local payload.
    pub local_payload: String,
    /// Serialized remote payload.
    pub remote_payload: String,
    /// Local creation time.
    pub local_created_at: DateTime<Utc>,
    /// Remote creation time.
    pub remote_created_at: DateTime<Utc>,
    /// The resolution verdict.
    pub winner: ConflictWinner,
    /// When the conflict was detected.
    pub detected_at: DateTime<Utc>,
}

/// Decides a conflict between a local record and an inbound change set.
///
/// Both replicas evaluate the same inputs: creation timestamps first, then
/// the two replica ids on a tie. The verdict is therefore independent of
/// which side detects the conflict or in what order batches arrive.
pub fn resolve(
    local: &ChangeRecord,
    remote: &WireChangeSet,
    local_replica_id: &str,
    remote_replica_id: &str,
) -> ConflictWinner {
    match remote.created_at.cmp(&local.created_at) {
        std::cmp::Ordering::Greater => ConflictWinner::Remote,
        std::cmp::Ordering::Less => ConflictWinner::Local,
        std::cmp::Ordering::Equal => {
            if remote_replica_id > local_replica_id {
                ConflictWinner::Remote
            } else {
                ConflictWinner::Local
            }
        }
    }
}
