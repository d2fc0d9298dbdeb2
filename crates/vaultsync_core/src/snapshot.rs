//! Snapshot materialization and compaction.
//!
//! A snapshot is a cache of a deterministic fold over a log prefix, never a
//! source of truth: refolding the raw log must reproduce it bit for bit.

use crate::changelog::ChangeLog;
use crate::cursor::SyncCursorStore;
use crate::error::{CoreError, CoreResult};
use crate::graph::ProjectGraph;
use crate::record::EntityKey;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use vaultsync_protocol::{ChangePayload, EntityType, FieldMap, SnapshotExport};

/// The materialized state of one entity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityState {
    /// Current field values, in stable key order.
    pub fields: FieldMap,
    /// True once a delete has been folded and no later create resurrected
    /// the entity.
    pub deleted: bool,
}

impl EntityState {
    /// Returns true if the entity currently exists.
    pub fn exists(&self) -> bool {
        !self.deleted && !self.fields.is_empty()
    }

    /// Serializes to the opaque snapshot/export data string.
    pub fn encode(&self) -> CoreResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Deserializes from the opaque snapshot/export data string.
    pub fn decode(raw: &str) -> CoreResult<Self> {
        Ok(serde_json::from_str(raw)?)
    }
}

/// The pure fold step: `(prior state, payload) -> new state`.
///
/// - `Create` replaces the field set and clears any tombstone
/// - `Update` merges fields last-wins; updates on a tombstone are inert
/// - `Delete` tombstones the entity and drops its fields
pub fn fold(prior: EntityState, payload: &ChangePayload) -> EntityState {
    let mut state = prior;
    match payload {
        ChangePayload::Create { fields } => {
            state.fields = fields.clone();
            state.deleted = false;
        }
        ChangePayload::Update { fields } => {
            if !state.deleted {
                for (k, v) in fields {
                    state.fields.insert(k.clone(), v.clone());
                }
            }
        }
        ChangePayload::Delete => {
            state.fields.clear();
            state.deleted = true;
        }
    }
    state
}

/// A persisted fold result covering a log prefix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Store-assigned snapshot id.
    pub id: u64,
    /// Snapshot name.
    pub name: String,
    /// Entity type covered.
    pub entity_type: EntityType,
    /// Entity id covered.
    pub entity_id: u64,
    /// Highest per-entity sequence folded into `data`.
    pub through_sequence: u64,
    /// Serialized [`EntityState`].
    pub data: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct SnapshotIndex {
    /// Latest snapshot per entity; superseded ones are dropped.
    by_key: HashMap<EntityKey, Snapshot>,
    next_id: u64,
}

/// Materializes and caches folds of change-log prefixes.
///
/// Compaction persists a snapshot and prunes the covered log prefix, but
/// only when every remote cursor has acknowledged the pruned range —
/// otherwise the request is rejected whole with
/// [`CoreError::CompactionBlocked`].
pub struct SnapshotStore {
    log: Arc<ChangeLog>,
    cursors: Arc<SyncCursorStore>,
    graph: Arc<ProjectGraph>,
    index: RwLock<SnapshotIndex>,
}

impl SnapshotStore {
    /// Creates a snapshot store over the given log, cursor ledger, and
    /// identity graph.
    ///
    /// The graph is attached to the log so that local appends keep the
    /// identity registry in step with log state.
    pub fn new(
        log: Arc<ChangeLog>,
        cursors: Arc<SyncCursorStore>,
        graph: Arc<ProjectGraph>,
    ) -> Self {
        log.attach_graph(Arc::clone(&graph));
        Self {
            log,
            cursors,
            graph,
            index: RwLock::new(SnapshotIndex {
                next_id: 1,
                ..SnapshotIndex::default()
            }),
        }
    }

    /// Reconstructs the current state of an entity.
    ///
    /// Starts from the latest cached snapshot (when one exists) and folds
    /// the log remainder; the result is identical to folding the raw log
    /// from scratch. Records flagged with an integrity violation when they
    /// entered the log are skipped from the fold, never silently dropped
    /// from the log.
    pub fn materialize(&self, entity_type: EntityType, entity_id: u64) -> CoreResult<EntityState> {
        let key = EntityKey::new(entity_type, entity_id);
        let (mut state, after) = match self.index.read().by_key.get(&key) {
            Some(snapshot) => (EntityState::decode(&snapshot.data)?, snapshot.through_sequence),
            None => (EntityState::default(), 0),
        };

        for record in self.log.read_since(entity_type, entity_id, after) {
            if self.graph.is_flagged(entity_type, entity_id, record.sequence) {
                continue;
            }
            state = fold(state, &record.payload);
        }
        Ok(state)
    }

    /// Reconstructs state by folding the raw log only, ignoring the cache.
    ///
    /// Used to verify fold determinism; prefers the cached path for normal
    /// reads.
    pub fn materialize_uncached(
        &self,
        entity_type: EntityType,
        entity_id: u64,
    ) -> CoreResult<EntityState> {
        let mut state = EntityState::default();
        for record in self.log.read_since(entity_type, entity_id, 0) {
            if self.graph.is_flagged(entity_type, entity_id, record.sequence) {
                continue;
            }
            state = fold(state, &record.payload);
        }
        Ok(state)
    }

    /// Persists a snapshot covering sequences `[1, through_sequence]` and
    /// prunes the covered log prefix.
    ///
    /// # Errors
    ///
    /// - [`CoreError::CompactionBlocked`] if any remote cursor lags behind
    ///   a record the prune would drop; the request is rejected whole.
    /// - [`CoreError::InvalidOperation`] if an existing snapshot already
    ///   covers a higher sequence.
    pub fn compact(
        &self,
        entity_type: EntityType,
        entity_id: u64,
        through_sequence: u64,
    ) -> CoreResult<Snapshot> {
        let key = EntityKey::new(entity_type, entity_id);

        // Safety check before any state is touched: never prune history a
        // remote has not acknowledged.
        if let Some((cursor_key, cursor)) = self.cursors.min_cursor() {
            let pruned = self.log.read_since(entity_type, entity_id, 0);
            for record in pruned.iter().filter(|r| r.sequence <= through_sequence) {
                if record.global_sequence > cursor {
                    return Err(CoreError::CompactionBlocked {
                        key: cursor_key,
                        cursor,
                        requested: record.global_sequence,
                    });
                }
            }
        }

        let (mut state, base) = match self.index.read().by_key.get(&key) {
            Some(snapshot) if snapshot.through_sequence > through_sequence => {
                return Err(CoreError::invalid_operation(format!(
                    "snapshot for {key} already covers sequence {}",
                    snapshot.through_sequence
                )));
            }
            Some(snapshot) => (EntityState::decode(&snapshot.data)?, snapshot.through_sequence),
            None => (EntityState::default(), 0),
        };

        for record in self
            .log
            .read_since(entity_type, entity_id, base)
            .into_iter()
            .filter(|r| r.sequence <= through_sequence)
        {
            if self.graph.is_flagged(entity_type, entity_id, record.sequence) {
                continue;
            }
            state = fold(state, &record.payload);
        }

        let snapshot = {
            let mut index = self.index.write();
            let snapshot = Snapshot {
                id: index.next_id,
                name: format!("{key}@{through_sequence}"),
                entity_type,
                entity_id,
                through_sequence,
                data: state.encode()?,
                created_at: Utc::now(),
            };
            index.next_id += 1;
            index.by_key.insert(key, snapshot.clone());
            snapshot
        };

        let pruned = self.log.prune_through(key, through_sequence)?;
        tracing::info!(
            coordinate = %key,
            through_sequence,
            pruned,
            snapshot_id = snapshot.id,
            "compacted"
        );
        Ok(snapshot)
    }

    /// The latest cached snapshot for an entity, if any.
    pub fn latest_snapshot(&self, entity_type: EntityType, entity_id: u64) -> Option<Snapshot> {
        self.index
            .read()
            .by_key
            .get(&EntityKey::new(entity_type, entity_id))
            .cloned()
    }

    /// Exports the entity's current materialized state for backup or
    /// migration.
    pub fn export(
        &self,
        entity_type: EntityType,
        entity_id: u64,
        name: Option<&str>,
    ) -> CoreResult<SnapshotExport> {
        let state = self.materialize(entity_type, entity_id)?;
        let through = self.log.latest_sequence(entity_type, entity_id);
        let key = EntityKey::new(entity_type, entity_id);
        Ok(SnapshotExport::new(
            name.map(String::from)
                .unwrap_or_else(|| format!("{key}@{through}")),
            through,
            state.encode()?,
        ))
    }

    /// Imports an exported state as a fresh change for the target entity.
    ///
    /// The import goes through the log (a `Create` carrying the exported
    /// fields, or a `Delete` for an exported tombstone) so the log stays
    /// the single source of truth.
    pub fn import(
        &self,
        entity_type: EntityType,
        entity_id: u64,
        export: &SnapshotExport,
    ) -> CoreResult<()> {
        let state = EntityState::decode(&export.data)?;
        let payload = if state.deleted {
            ChangePayload::Delete
        } else {
            ChangePayload::Create {
                fields: state.fields,
            }
        };
        self.log.append(entity_type, entity_id, payload)?;
        Ok(())
    }
}
