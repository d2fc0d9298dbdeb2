//! Durable per-remote, per-direction progress cursors.

use crate::error::{CoreError, CoreResult};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;

/// The direction of an exchange with a remote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Local changes flowing to the remote.
    Push,
    /// Remote changes flowing to this replica.
    Pull,
}

impl Direction {
    /// Returns the wire spelling (`"push"` / `"pull"`).
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Push => "push",
            Direction::Pull => "pull",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One cursor row: how far a remote has been exchanged in one direction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncState {
    /// Ledger key, `"<remote>:<direction>"`.
    pub key: String,
    /// Last global sequence successfully exchanged.
    pub value: u64,
    /// Time of the last advance.
    pub updated_at: DateTime<Utc>,
}

/// Durable key→cursor ledger.
///
/// Cursors are monotonically non-decreasing per key and only advance after
/// the corresponding remote operation is acknowledged — advancing the
/// cursor is the commit point of an exchange. Rows are created on first
/// contact with a remote and never deleted while the remote exists.
///
/// The store is the repository seam for persistence: restore it with
/// [`SyncCursorStore::from_states`] and persist [`SyncCursorStore::states`].
#[derive(Debug, Default)]
pub struct SyncCursorStore {
    rows: RwLock<HashMap<String, SyncState>>,
}

impl SyncCursorStore {
    /// Creates an empty cursor store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Restores a cursor store from persisted rows.
    pub fn from_states(states: Vec<SyncState>) -> Self {
        Self {
            rows: RwLock::new(states.into_iter().map(|s| (s.key.clone(), s)).collect()),
        }
    }

    fn ledger_key(remote_id: &str, direction: Direction) -> String {
        format!("{remote_id}:{direction}")
    }

    /// Returns the cursor for a remote and direction; `None` means the
    /// remote has never been synced in that direction (start from 0).
    pub fn get(&self, remote_id: &str, direction: Direction) -> Option<u64> {
        let key = Self::ledger_key(remote_id, direction);
        self.rows.read().get(&key).map(|s| s.value)
    }

    /// Advances a cursor to `new_sequence`.
    ///
    /// Re-acknowledging the current value is a no-op; moving backwards is
    /// rejected with [`CoreError::CursorRegression`] and never silently
    /// ignored.
    pub fn advance(
        &self,
        remote_id: &str,
        direction: Direction,
        new_sequence: u64,
    ) -> CoreResult<u64> {
        let key = Self::ledger_key(remote_id, direction);
        let mut rows = self.rows.write();

        if let Some(row) = rows.get_mut(&key) {
            if new_sequence < row.value {
                return Err(CoreError::CursorRegression {
                    key,
                    current: row.value,
                    attempted: new_sequence,
                });
            }
            row.value = new_sequence;
            row.updated_at = Utc::now();
            tracing::debug!(%key, cursor = new_sequence, "cursor advanced");
            return Ok(new_sequence);
        }

        rows.insert(
            key.clone(),
            SyncState {
                key: key.clone(),
                value: new_sequence,
                updated_at: Utc::now(),
            },
        );
        tracing::debug!(%key, cursor = new_sequence, "cursor created");
        Ok(new_sequence)
    }

    /// All cursor rows, sorted by key. This is the persistence and status
    /// surface.
    pub fn states(&self) -> Vec<SyncState> {
        let mut states: Vec<SyncState> = self.rows.read().values().cloned().collect();
        states.sort_by(|a, b| a.key.cmp(&b.key));
        states
    }

    /// The lowest cursor across every known remote and direction, or
    /// `None` if no remote has ever synced. Compaction must not prune past
    /// this value.
    ///
    /// A remote is known once any of its rows exists; a known remote
    /// missing a direction row counts as cursor 0 for that direction —
    /// absent means nothing has been acknowledged, never "ignore me".
    pub fn min_cursor(&self) -> Option<(String, u64)> {
        let rows = self.rows.read();
        let remotes: BTreeSet<&str> = rows
            .keys()
            .filter_map(|key| key.rsplit_once(':').map(|(remote, _)| remote))
            .collect();

        let mut min: Option<(String, u64)> = None;
        for remote in remotes {
            for direction in [Direction::Push, Direction::Pull] {
                let key = Self::ledger_key(remote, direction);
                let value = rows.get(&key).map(|s| s.value).unwrap_or(0);
                if min.as_ref().map_or(true, |(_, m)| value < *m) {
                    min = Some((key, value));
                }
            }
        }
        min
    }

    /// Number of tracked cursor rows.
    pub fn len(&self) -> usize {
        self.rows.read().len()
    }

    /// Returns true if no cursor rows exist.
    pub fn is_empty(&self) -> bool {
        self.rows.read().is_empty()
    }
}
