//! Error types for the reconciliation engine.

use thiserror::Error;

/// Result type for reconciliation operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur while reconciling with a remote.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// Protocol error (invalid or unexpected message).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Store error during reconciliation.
    #[error("store error: {0}")]
    Core(#[from] vaultsync_core::CoreError),

    /// Wire codec error.
    #[error("codec error: {0}")]
    Codec(#[from] vaultsync_protocol::ProtocolError),

    /// The remote rejected the exchange.
    #[error("remote error: {0}")]
    RemoteError(String),

    /// Reconciliation was cancelled.
    #[error("reconciliation cancelled")]
    Cancelled,

    /// Invalid state transition.
    #[error("invalid state transition from {from:?} to {to:?}")]
    InvalidStateTransition {
        /// Current state.
        from: String,
        /// Attempted target state.
        to: String,
    },

    /// Timeout.
    #[error("operation timed out")]
    Timeout,

    /// Not connected.
    #[error("not connected to remote")]
    NotConnected,
}

impl SyncError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if this error can be retried.
    ///
    /// Store and codec errors are never retryable: retrying cannot fix
    /// durable state, and cursors must stay where they are.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport { retryable, .. } => *retryable,
            SyncError::Timeout => true,
            SyncError::RemoteError(_) => true,
            _ => false,
        }
    }
}
