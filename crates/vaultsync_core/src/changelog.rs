//! Append-only change log.

use crate::error::{CoreError, CoreResult};
use crate::graph::ProjectGraph;
use crate::journal::{Journal, MemoryJournal};
use crate::record::{ChangeRecord, EntityKey};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use vaultsync_protocol::{ChangePayload, EntityType};

/// In-memory index over the journaled records.
#[derive(Debug, Default)]
struct LogIndex {
    /// Records keyed by global insertion sequence.
    by_global: BTreeMap<u64, ChangeRecord>,
    /// Per-entity sequence → global sequence.
    by_entity: HashMap<EntityKey, BTreeMap<u64, u64>>,
    /// Next global sequence to assign.
    next_global: u64,
    /// Next per-entity sequence to assign.
    next_sequence: HashMap<EntityKey, u64>,
}

impl LogIndex {
    fn insert(&mut self, record: ChangeRecord) {
        let key = record.key();
        self.next_global = self.next_global.max(record.global_sequence + 1);
        let next = self.next_sequence.entry(key).or_insert(1);
        *next = (*next).max(record.sequence + 1);
        self.by_entity
            .entry(key)
            .or_default()
            .insert(record.sequence, record.global_sequence);
        self.by_global.insert(record.global_sequence, record);
    }

    fn get(&self, key: EntityKey, sequence: u64) -> Option<&ChangeRecord> {
        let global = self.by_entity.get(&key)?.get(&sequence)?;
        self.by_global.get(global)
    }
}

/// The append-only, per-entity ordered store of mutation records.
///
/// `append` is the only mutator: the log has no update or delete operation,
/// and corrections are new appends. Sequence numbers are scoped per entity
/// coordinate; a secondary global insertion counter orders records across
/// entities for export and push batching.
///
/// Every append is journaled durably before it becomes observable, so a
/// failed append leaves no partial state.
pub struct ChangeLog {
    journal: Box<dyn Journal>,
    index: RwLock<LogIndex>,
    graph: RwLock<Option<Arc<ProjectGraph>>>,
}

impl ChangeLog {
    /// Creates an ephemeral log backed by a [`MemoryJournal`].
    pub fn in_memory() -> Self {
        Self {
            journal: Box::new(MemoryJournal::new()),
            index: RwLock::new(LogIndex {
                next_global: 1,
                ..LogIndex::default()
            }),
            graph: RwLock::new(None),
        }
    }

    /// Opens a log over the given journal, replaying its records.
    ///
    /// A later journal line at an already-seen coordinate supersedes the
    /// earlier one; this is how resolved conflicts persist without
    /// rewriting history.
    ///
    /// # Errors
    ///
    /// Returns an error if the journal cannot be replayed.
    pub fn open(journal: Box<dyn Journal>) -> CoreResult<Self> {
        let mut index = LogIndex {
            next_global: 1,
            ..LogIndex::default()
        };
        let records = journal.load()?;
        let replayed = records.len();
        for record in records {
            if let Some(global) = index
                .by_entity
                .get(&record.key())
                .and_then(|m| m.get(&record.sequence))
                .copied()
            {
                // Superseding line for a resolved conflict.
                index.by_global.remove(&global);
            }
            index.insert(record);
        }
        tracing::info!(records = replayed, "change log opened");
        Ok(Self {
            journal,
            index: RwLock::new(index),
            graph: RwLock::new(None),
        })
    }

    /// Attaches an identity registry that local appends keep in step with
    /// log state.
    ///
    /// Records already in the log are validated and applied in global
    /// order first, so the registry and the violation list reflect
    /// replayed history. Replicated appends do not feed the registry here;
    /// the reconciliation engine validates inbound records before applying
    /// them itself.
    pub fn attach_graph(&self, graph: Arc<ProjectGraph>) {
        let index = self.index.read();
        for record in index.by_global.values() {
            match graph.check_reference(record) {
                Ok(()) => graph.apply_record(record),
                Err(violation) => graph.record_violation(violation),
            }
        }
        *self.graph.write() = Some(graph);
    }

    /// Appends a local mutation, assigning the next per-entity and global
    /// sequence numbers.
    ///
    /// The record is durably journaled before it becomes observable.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Storage`] (or an I/O error) if the journal
    /// cannot persist the record; the log is then unchanged.
    pub fn append(
        &self,
        entity_type: EntityType,
        entity_id: u64,
        payload: ChangePayload,
    ) -> CoreResult<ChangeRecord> {
        let key = EntityKey::new(entity_type, entity_id);
        let mut index = self.index.write();

        let record = ChangeRecord {
            global_sequence: index.next_global,
            sequence: index.next_sequence.get(&key).copied().unwrap_or(1),
            entity_type,
            entity_id,
            payload,
            created_at: Utc::now(),
            conflict_loser: None,
        };

        self.journal.append(&record)?;
        tracing::debug!(
            coordinate = %key,
            sequence = record.sequence,
            global = record.global_sequence,
            "append"
        );
        index.insert(record.clone());
        if let Some(graph) = self.graph.read().as_ref() {
            // Entry-time validation: a flagged record stays in the log but
            // never reaches the registry or a fold.
            match graph.check_reference(&record) {
                Ok(()) => graph.apply_record(&record),
                Err(violation) => graph.record_violation(violation),
            }
        }
        Ok(record)
    }

    /// Appends a record received from a remote, preserving its
    /// remote-assigned per-entity sequence.
    ///
    /// Idempotent: a record already present at the coordinate with an
    /// identical payload is returned unchanged. A differing payload is an
    /// error — the caller must resolve the conflict via [`Self::resolve_at`].
    pub fn append_replicated(
        &self,
        entity_type: EntityType,
        entity_id: u64,
        sequence: u64,
        payload: ChangePayload,
        created_at: DateTime<Utc>,
    ) -> CoreResult<ChangeRecord> {
        let key = EntityKey::new(entity_type, entity_id);
        let mut index = self.index.write();

        if let Some(existing) = index.get(key, sequence) {
            if existing.payload == payload {
                return Ok(existing.clone());
            }
            return Err(CoreError::invalid_operation(format!(
                "conflicting payload at {key} sequence {sequence}; resolve explicitly"
            )));
        }

        let record = ChangeRecord {
            global_sequence: index.next_global,
            sequence,
            entity_type,
            entity_id,
            payload,
            created_at,
            conflict_loser: None,
        };

        self.journal.append(&record)?;
        tracing::debug!(coordinate = %key, sequence, "append replicated");
        index.insert(record.clone());
        Ok(record)
    }

    /// Supersedes the payload at an existing coordinate with the winner of
    /// a resolved conflict, preserving the loser for audit.
    ///
    /// The record keeps its global sequence; the journal receives a
    /// superseding line so replay converges on the resolved state.
    pub fn resolve_at(
        &self,
        entity_type: EntityType,
        entity_id: u64,
        sequence: u64,
        payload: ChangePayload,
        created_at: DateTime<Utc>,
        conflict_loser: String,
    ) -> CoreResult<ChangeRecord> {
        let key = EntityKey::new(entity_type, entity_id);
        let mut index = self.index.write();

        let global = index
            .by_entity
            .get(&key)
            .and_then(|m| m.get(&sequence))
            .copied()
            .ok_or_else(|| CoreError::unknown_entity(entity_type.as_str(), entity_id))?;

        let record = ChangeRecord {
            global_sequence: global,
            sequence,
            entity_type,
            entity_id,
            payload,
            created_at,
            conflict_loser: Some(conflict_loser),
        };

        self.journal.append(&record)?;
        tracing::warn!(coordinate = %key, sequence, "conflict resolution superseded payload");
        index.by_global.insert(global, record.clone());
        Ok(record)
    }

    /// Returns the record at an exact coordinate, if present.
    pub fn get(&self, entity_type: EntityType, entity_id: u64, sequence: u64) -> Option<ChangeRecord> {
        let key = EntityKey::new(entity_type, entity_id);
        self.index.read().get(key, sequence).cloned()
    }

    /// Returns records for one entity with `sequence > after_sequence`,
    /// in sequence order. Restartable from any point.
    pub fn read_since(
        &self,
        entity_type: EntityType,
        entity_id: u64,
        after_sequence: u64,
    ) -> Vec<ChangeRecord> {
        let key = EntityKey::new(entity_type, entity_id);
        let index = self.index.read();
        let Some(entity) = index.by_entity.get(&key) else {
            return Vec::new();
        };
        entity
            .range(after_sequence + 1..)
            .filter_map(|(_, global)| index.by_global.get(global).cloned())
            .collect()
    }

    /// Returns records across all entities with
    /// `global_sequence > after_global_sequence`, in insertion order.
    pub fn read_all_since(&self, after_global_sequence: u64) -> Vec<ChangeRecord> {
        let index = self.index.read();
        index
            .by_global
            .range(after_global_sequence + 1..)
            .map(|(_, r)| r.clone())
            .collect()
    }

    /// Highest per-entity sequence appended for a coordinate (0 if none).
    pub fn latest_sequence(&self, entity_type: EntityType, entity_id: u64) -> u64 {
        let key = EntityKey::new(entity_type, entity_id);
        self.index
            .read()
            .next_sequence
            .get(&key)
            .map(|n| n - 1)
            .unwrap_or(0)
    }

    /// Highest global sequence appended (0 if empty).
    pub fn latest_global_sequence(&self) -> u64 {
        self.index.read().next_global - 1
    }

    /// Removes records for `key` with `sequence <= through_sequence` from
    /// the log and its journal. Compaction-only: callers must have verified
    /// cursor safety first.
    ///
    /// Returns the number of records pruned. Sequence counters are
    /// unaffected, so later appends continue the entity's history.
    pub(crate) fn prune_through(&self, key: EntityKey, through_sequence: u64) -> CoreResult<usize> {
        let mut index = self.index.write();

        let pruned: Vec<(u64, u64)> = match index.by_entity.get(&key) {
            Some(entity) => entity
                .range(..=through_sequence)
                .map(|(s, g)| (*s, *g))
                .collect(),
            None => return Ok(0),
        };
        for (sequence, global) in &pruned {
            if let Some(entity) = index.by_entity.get_mut(&key) {
                entity.remove(sequence);
            }
            index.by_global.remove(global);
        }

        self.journal.truncate_entity(key, through_sequence)?;
        tracing::debug!(coordinate = %key, through_sequence, pruned = pruned.len(), "pruned log prefix");
        Ok(pruned.len())
    }

    /// Number of live records in the log.
    pub fn len(&self) -> usize {
        self.index.read().by_global.len()
    }

    /// Returns true if the log holds no records.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
