//! Error types for the core stores.

use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in the core stores.
#[derive(Debug, Error)]
pub enum CoreError {
    /// I/O error from the backing store.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Durable storage failed; the operation left no partial state behind.
    #[error("storage error: {message}")]
    Storage {
        /// Description of the failure.
        message: String,
    },

    /// JSON encoding or decoding failed.
    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// Wire protocol error.
    #[error("protocol error: {0}")]
    Protocol(#[from] vaultsync_protocol::ProtocolError),

    /// A cursor was asked to move backwards.
    #[error("cursor regression on {key}: current {current}, attempted {attempted}")]
    CursorRegression {
        /// Cursor key (`<remote>:<direction>`).
        key: String,
        /// Current cursor value.
        current: u64,
        /// The rejected value.
        attempted: u64,
    },

    /// Compaction would prune history a remote has not acknowledged.
    #[error(
        "compaction blocked: cursor {key} at {cursor}, pruning would drop history through global sequence {requested}"
    )]
    CompactionBlocked {
        /// The lagging cursor key.
        key: String,
        /// The lagging cursor value.
        cursor: u64,
        /// Highest global sequence the compaction would prune.
        requested: u64,
    },

    /// A record addressed an entity the log has no history for.
    #[error("unknown entity: {entity_type} {entity_id}")]
    UnknownEntity {
        /// Entity type identifier.
        entity_type: String,
        /// Entity instance id.
        entity_id: u64,
    },

    /// Operation not permitted in the current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why the operation is invalid.
        message: String,
    },
}

impl CoreError {
    /// Creates a storage error.
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Creates an unknown entity error.
    pub fn unknown_entity(entity_type: impl Into<String>, entity_id: u64) -> Self {
        Self::UnknownEntity {
            entity_type: entity_type.into(),
            entity_id,
        }
    }
}
