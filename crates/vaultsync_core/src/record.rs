//! Change records and entity coordinates.

use crate::error::CoreResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use vaultsync_protocol::{ChangePayload, EntityType, WireChangeSet};

/// Identifies one entity instance: the scope of a sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityKey {
    /// Entity type.
    pub entity_type: EntityType,
    /// Entity instance id.
    pub entity_id: u64,
}

impl EntityKey {
    /// Creates an entity key.
    pub fn new(entity_type: EntityType, entity_id: u64) -> Self {
        Self {
            entity_type,
            entity_id,
        }
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.entity_type, self.entity_id)
    }
}

/// A single committed mutation record.
///
/// Once appended a record is immutable and never reordered; `sequence` is
/// the causal order within its entity's history, `global_sequence` the
/// workspace-wide insertion order. The one sanctioned exception is conflict
/// resolution, which may supersede the payload at a coordinate while
/// preserving the losing payload in `conflict_loser` for audit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRecord {
    /// Workspace-wide insertion counter.
    pub global_sequence: u64,
    /// Per-entity monotonic sequence, from 1.
    pub sequence: u64,
    /// Entity type.
    pub entity_type: EntityType,
    /// Entity instance id.
    pub entity_id: u64,
    /// The mutation payload.
    pub payload: ChangePayload,
    /// Creation time at the originating replica.
    pub created_at: DateTime<Utc>,
    /// Losing payload of a resolved conflict at this coordinate, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conflict_loser: Option<String>,
}

impl ChangeRecord {
    /// Returns the entity coordinate scope of this record.
    pub fn key(&self) -> EntityKey {
        EntityKey::new(self.entity_type, self.entity_id)
    }

    /// Converts to the wire shape (the local-only audit metadata and
    /// global sequence do not travel).
    pub fn to_wire(&self) -> CoreResult<WireChangeSet> {
        Ok(WireChangeSet {
            entity_type: self.entity_type,
            entity_id: self.entity_id,
            sequence: self.sequence,
            payload: self.payload.encode()?,
            created_at: self.created_at,
        })
    }
}
