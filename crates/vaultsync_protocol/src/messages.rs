//! Exchange messages.
//!
//! These are the JSON shapes handed to the transport collaborator. A pull
//! response is deliberately the same shape as a push request: a batch of
//! change sets flowing in the opposite direction.

use crate::entity::EntityType;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A change set as it travels on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireChangeSet {
    /// The kind of entity addressed.
    pub entity_type: EntityType,
    /// The entity instance.
    pub entity_id: u64,
    /// Per-entity sequence number assigned by the originating replica.
    pub sequence: u64,
    /// Opaque serialized [`crate::ChangePayload`].
    pub payload: String,
    /// Creation time at the originating replica (ISO-8601).
    pub created_at: DateTime<Utc>,
}

/// A batch of change sets pushed to a remote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushRequest {
    /// The remote the batch is addressed to.
    pub remote_id: String,
    /// Global sequence the batch starts after.
    pub since: u64,
    /// Change sets in global insertion order.
    pub changesets: Vec<WireChangeSet>,
}

impl PushRequest {
    /// Creates a push request.
    pub fn new(remote_id: impl Into<String>, since: u64, changesets: Vec<WireChangeSet>) -> Self {
        Self {
            remote_id: remote_id.into(),
            since,
            changesets,
        }
    }

    /// Returns true if the batch carries no change sets.
    pub fn is_empty(&self) -> bool {
        self.changesets.is_empty()
    }
}

/// Acknowledgement of a push batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushAck {
    /// The acknowledging remote.
    pub remote_id: String,
    /// Highest global sequence durably applied by the remote.
    pub applied_through: u64,
}

impl PushAck {
    /// Creates a push acknowledgement.
    pub fn new(remote_id: impl Into<String>, applied_through: u64) -> Self {
        Self {
            remote_id: remote_id.into(),
            applied_through,
        }
    }
}

/// A request for changes the remote holds past a cursor.
///
/// The response to a pull is a [`PushRequest`] flowing inbound.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullRequest {
    /// The requesting replica's identifier.
    pub remote_id: String,
    /// Cursor to pull after.
    pub since: u64,
    /// Maximum number of change sets to return.
    pub limit: u32,
}

impl PullRequest {
    /// Creates a pull request.
    pub fn new(remote_id: impl Into<String>, since: u64, limit: u32) -> Self {
        Self {
            remote_id: remote_id.into(),
            since,
            limit,
        }
    }
}

/// A snapshot exported for backup or migration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotExport {
    /// Snapshot name.
    pub name: String,
    /// Highest per-entity sequence folded into the data.
    pub through_sequence: u64,
    /// Opaque serialized fold result.
    pub data: String,
}

impl SnapshotExport {
    /// Creates a snapshot export.
    pub fn new(name: impl Into<String>, through_sequence: u64, data: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            through_sequence,
            data: data.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn make_changeset(sequence: u64) -> WireChangeSet {
        WireChangeSet {
            entity_type: EntityType::Project,
            entity_id: 1,
            sequence,
            payload: "{\"op\":\"delete\"}".into(),
            created_at: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
        }
    }

    #[test]
    fn changeset_uses_camel_case_fields() {
        let json = serde_json::to_value(make_changeset(3)).unwrap();
        assert_eq!(json["entityType"], "Project");
        assert_eq!(json["entityId"], 1);
        assert_eq!(json["sequence"], 3);
        assert!(json["createdAt"].as_str().unwrap().starts_with("2024-05-01T12:00:00"));
    }

    #[test]
    fn push_request_roundtrip() {
        let req = PushRequest::new("origin", 10, vec![make_changeset(11), make_changeset(12)]);
        let json = serde_json::to_string(&req).unwrap();
        let decoded: PushRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, req);
        assert!(!decoded.is_empty());
    }

    #[test]
    fn push_ack_roundtrip() {
        let ack = PushAck::new("origin", 42);
        let json = serde_json::to_value(&ack).unwrap();
        assert_eq!(json["remoteId"], "origin");
        assert_eq!(json["appliedThrough"], 42);
    }

    #[test]
    fn pull_request_roundtrip() {
        let req = PullRequest::new("laptop", 5, 100);
        let json = serde_json::to_string(&req).unwrap();
        let decoded: PullRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, req);
    }

    #[test]
    fn snapshot_export_roundtrip() {
        let export = SnapshotExport::new("Project/1@7", 7, "{}");
        let json = serde_json::to_value(&export).unwrap();
        assert_eq!(json["throughSequence"], 7);
        let decoded: SnapshotExport = serde_json::from_value(json).unwrap();
        assert_eq!(decoded, export);
    }
}
