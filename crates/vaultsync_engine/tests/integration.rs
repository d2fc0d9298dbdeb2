//! Integration tests: engine cycles against an in-memory remote replica.

use chrono::{TimeZone, Utc};
use serde_json::json;
use std::sync::Arc;
use vaultsync_core::{
    ChangeLog, Direction, FileJournal, ProjectGraph, SnapshotStore, SyncCursorStore,
};
use vaultsync_engine::{
    MockTransport, ReconciliationEngine, SyncConfig, SyncError, SyncResult, SyncTransport,
};
use vaultsync_protocol::{
    ChangePayload, EntityType, PullRequest, PushAck, PushRequest,
};

/// A transport wired straight into another replica's stores.
struct InMemoryRemote {
    id: String,
    log: Arc<ChangeLog>,
}

impl InMemoryRemote {
    fn new(id: impl Into<String>, log: Arc<ChangeLog>) -> Self {
        Self { id: id.into(), log }
    }
}

impl SyncTransport for InMemoryRemote {
    fn push(&self, request: &PushRequest) -> SyncResult<PushAck> {
        let mut applied_through = request.since;
        for changeset in &request.changesets {
            let payload = ChangePayload::decode(&changeset.payload)?;
            self.log.append_replicated(
                changeset.entity_type,
                changeset.entity_id,
                changeset.sequence,
                payload,
                changeset.created_at,
            )?;
            applied_through += 1;
        }
        Ok(PushAck::new(self.id.clone(), applied_through))
    }

    fn pull(&self, request: &PullRequest) -> SyncResult<PushRequest> {
        let changesets = self
            .log
            .read_all_since(request.since)
            .into_iter()
            .take(request.limit as usize)
            .map(|r| r.to_wire())
            .collect::<Result<Vec<_>, _>>()
            .map_err(SyncError::from)?;
        Ok(PushRequest::new(self.id.clone(), request.since, changesets))
    }

    fn is_connected(&self) -> bool {
        true
    }

    fn close(&self) -> SyncResult<()> {
        Ok(())
    }
}

struct Replica {
    log: Arc<ChangeLog>,
    cursors: Arc<SyncCursorStore>,
    graph: Arc<ProjectGraph>,
    snapshots: SnapshotStore,
}

impl Replica {
    fn new() -> Self {
        let log = Arc::new(ChangeLog::in_memory());
        let cursors = Arc::new(SyncCursorStore::new());
        let graph = Arc::new(ProjectGraph::new());
        let snapshots = SnapshotStore::new(
            Arc::clone(&log),
            Arc::clone(&cursors),
            Arc::clone(&graph),
        );
        Self {
            log,
            cursors,
            graph,
            snapshots,
        }
    }

    fn engine(
        &self,
        remote_id: &str,
        replica_id: &str,
        remote_log: &Arc<ChangeLog>,
    ) -> ReconciliationEngine<InMemoryRemote> {
        ReconciliationEngine::new(
            SyncConfig::new(remote_id, replica_id),
            InMemoryRemote::new(remote_id, Arc::clone(remote_log)),
            Arc::clone(&self.log),
            Arc::clone(&self.cursors),
            Arc::clone(&self.graph),
        )
    }
}

fn named(name: &str) -> ChangePayload {
    ChangePayload::create([("name", json!(name))])
}

/// Routes engine tracing to the test harness when `RUST_LOG` is set.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[test]
fn update_history_materializes_latest_state() {
    init_tracing();
    let replica = Replica::new();
    replica.log.append(EntityType::Project, 1, named("A")).unwrap();
    replica
        .log
        .append(EntityType::Project, 1, ChangePayload::update([("name", json!("B"))]))
        .unwrap();

    let state = replica.snapshots.materialize(EntityType::Project, 1).unwrap();
    assert_eq!(state.fields.get("name"), Some(&json!("B")));
    assert_eq!(replica.log.read_since(EntityType::Project, 1, 0).len(), 2);
}

#[test]
fn push_then_repush_sends_empty_batch() {
    init_tracing();
    let local = Replica::new();
    let remote = Replica::new();
    local.log.append(EntityType::Project, 1, named("A")).unwrap();
    local
        .log
        .append(EntityType::Project, 1, ChangePayload::update([("name", json!("B"))]))
        .unwrap();

    let engine = local.engine("origin", "laptop", &remote.log);
    let pushed = engine.push_cycle().unwrap();
    assert_eq!(pushed, 2);
    assert_eq!(local.cursors.get("origin", Direction::Push), Some(2));
    assert_eq!(remote.log.len(), 2);

    // Nothing new: the follow-up cycle transmits an empty batch and the
    // remote store is unchanged.
    let pushed = engine.push_cycle().unwrap();
    assert_eq!(pushed, 0);
    assert_eq!(remote.log.len(), 2);
}

#[test]
fn pull_replay_is_idempotent() {
    init_tracing();
    let local = Replica::new();
    let remote = Replica::new();
    remote.log.append(EntityType::Project, 1, named("A")).unwrap();
    remote.log.append(EntityType::Dataset, 2, named("d")).unwrap();

    let engine = local.engine("origin", "laptop", &remote.log);
    assert_eq!(engine.pull_cycle().unwrap(), 2);
    let len_before = local.log.len();

    // Simulate a lost cursor: reset by building a fresh engine over the
    // same log with an empty cursor ledger, so the whole batch replays.
    let replayed = ReconciliationEngine::new(
        SyncConfig::new("origin", "laptop"),
        InMemoryRemote::new("origin", Arc::clone(&remote.log)),
        Arc::clone(&local.log),
        Arc::new(SyncCursorStore::new()),
        Arc::clone(&local.graph),
    );
    assert_eq!(replayed.pull_cycle().unwrap(), 2);

    assert_eq!(local.log.len(), len_before);
    assert!(replayed.conflicts().is_empty());
}

#[test]
fn bidirectional_sync_converges_both_logs() {
    init_tracing();
    let a = Replica::new();
    let b = Replica::new();
    a.log.append(EntityType::Project, 1, named("alpha")).unwrap();
    b.log.append(EntityType::Project, 2, named("beta")).unwrap();
    b.log.append(EntityType::GitConnection, 3, ChangePayload::create([
        ("provider", json!("github")),
        ("providerUserId", json!("u1")),
    ]))
    .unwrap();

    let engine_a = a.engine("b", "a", &b.log);
    let report = engine_a.sync().unwrap();
    assert_eq!(report.pulled, 2);
    // The push echoes pulled records back; the remote applies them
    // idempotently.
    assert_eq!(report.pushed, 3);

    assert_eq!(a.log.len(), 3);
    assert_eq!(b.log.len(), 3);
    assert!(a.graph.contains(EntityType::Project, 2));
    assert!(a.graph.contains(EntityType::GitConnection, 3));
}

#[test]
fn concurrent_writes_resolve_deterministically_on_both_sides() {
    init_tracing();
    let a = Replica::new();
    let b = Replica::new();

    // Same coordinate written on both replicas while offline; the remote
    // side wrote later.
    a.log
        .append_replicated(
            EntityType::Project,
            1,
            1,
            named("from-a"),
            Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 10).unwrap(),
        )
        .unwrap();
    b.log
        .append_replicated(
            EntityType::Project,
            1,
            1,
            named("from-b"),
            Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 20).unwrap(),
        )
        .unwrap();

    let engine_a = a.engine("b", "a", &b.log);
    engine_a.pull_cycle().unwrap();

    // b wrote later, so b's payload wins on a...
    let record = a.log.get(EntityType::Project, 1, 1).unwrap();
    assert_eq!(record.payload, named("from-b"));
    assert!(record.conflict_loser.is_some());

    // ...and b sees the identical payload when it pulls from a, so the
    // logs converge without a second conflict.
    let engine_b = b.engine("a", "b", &a.log);
    engine_b.pull_cycle().unwrap();
    assert_eq!(
        b.log.get(EntityType::Project, 1, 1).unwrap().payload,
        named("from-b")
    );
    assert!(engine_b.conflicts().is_empty());
}

#[test]
fn timestamp_tie_resolves_by_replica_id_on_both_sides() {
    init_tracing();
    let a = Replica::new();
    let b = Replica::new();
    let instant = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();

    a.log
        .append_replicated(EntityType::Project, 1, 1, named("from-a"), instant)
        .unwrap();
    b.log
        .append_replicated(EntityType::Project, 1, 1, named("from-b"), instant)
        .unwrap();

    // "b" is lexically greater, so b's payload wins everywhere.
    let engine_a = a.engine("b", "a", &b.log);
    engine_a.pull_cycle().unwrap();
    let engine_b = b.engine("a", "b", &a.log);
    engine_b.pull_cycle().unwrap();

    assert_eq!(a.log.get(EntityType::Project, 1, 1).unwrap().payload, named("from-b"));
    assert_eq!(b.log.get(EntityType::Project, 1, 1).unwrap().payload, named("from-b"));
}

#[test]
fn compaction_blocked_until_remote_catches_up() {
    init_tracing();
    let local = Replica::new();
    let remote = Replica::new();
    local.log.append(EntityType::Project, 1, named("A")).unwrap();
    local
        .log
        .append(EntityType::Project, 1, ChangePayload::update([("name", json!("B"))]))
        .unwrap();

    // We have pulled from the remote, but it has never acknowledged a
    // push: its push cursor counts as 0 and blocks the prune.
    local.cursors.advance("origin", Direction::Pull, 1).unwrap();

    let err = local.snapshots.compact(EntityType::Project, 1, 2).unwrap_err();
    assert!(matches!(
        err,
        vaultsync_core::CoreError::CompactionBlocked { cursor: 0, .. }
    ));
    assert_eq!(local.log.len(), 2);

    // Once a full push round-trips, the cursor covers both records and
    // compaction goes through; materialization is unchanged.
    let engine = local.engine("origin", "laptop", &remote.log);
    engine.push_cycle().unwrap();
    local.cursors.advance("origin", Direction::Pull, 2).unwrap();

    local.snapshots.compact(EntityType::Project, 1, 2).unwrap();
    assert_eq!(local.log.len(), 0);
    let state = local.snapshots.materialize(EntityType::Project, 1).unwrap();
    assert_eq!(state.fields.get("name"), Some(&json!("B")));
}

#[test]
fn status_surfaces_cursors_violations_and_conflicts() {
    init_tracing();
    let local = Replica::new();
    let remote = Replica::new();
    // A dataset referencing a project the local replica never saw.
    remote
        .log
        .append(
            EntityType::Dataset,
            9,
            ChangePayload::create([("name", json!("d")), ("projectId", json!(404))]),
        )
        .unwrap();

    let engine = local.engine("origin", "laptop", &remote.log);
    engine.sync().unwrap();

    let status = engine.status();
    assert_eq!(status.violation_count, 1);
    assert!(status.conflicts.is_empty());
    assert!(status
        .cursors
        .iter()
        .any(|row| row.key == "origin:pull" && row.value == 1));
    // The offending record was kept for manual reconciliation.
    assert_eq!(local.log.len(), 1);
}

#[test]
fn sync_resumes_after_reopening_a_durable_log() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("local.jsonl");
    let remote = Replica::new();

    let persisted_cursors = {
        let log = Arc::new(ChangeLog::open(Box::new(FileJournal::open(&path).unwrap())).unwrap());
        log.append(EntityType::Project, 1, named("A")).unwrap();

        let cursors = Arc::new(SyncCursorStore::new());
        let engine = ReconciliationEngine::new(
            SyncConfig::new("origin", "laptop"),
            InMemoryRemote::new("origin", Arc::clone(&remote.log)),
            Arc::clone(&log),
            Arc::clone(&cursors),
            Arc::new(ProjectGraph::new()),
        );
        assert_eq!(engine.push_cycle().unwrap(), 1);
        cursors.states()
    };

    // Reopen from disk with the persisted cursor: the first record is not
    // re-pushed, only the change appended after the restart.
    let log = Arc::new(ChangeLog::open(Box::new(FileJournal::open(&path).unwrap())).unwrap());
    log.append(
        EntityType::Project,
        1,
        ChangePayload::update([("name", json!("B"))]),
    )
    .unwrap();

    let engine = ReconciliationEngine::new(
        SyncConfig::new("origin", "laptop"),
        InMemoryRemote::new("origin", Arc::clone(&remote.log)),
        Arc::clone(&log),
        Arc::new(SyncCursorStore::from_states(persisted_cursors)),
        Arc::new(ProjectGraph::new()),
    );
    assert_eq!(engine.push_cycle().unwrap(), 1);
    assert_eq!(remote.log.len(), 2);
    assert_eq!(
        remote.log.get(EntityType::Project, 1, 2).unwrap().payload,
        ChangePayload::update([("name", json!("B"))])
    );
}

#[test]
fn mock_transport_failure_leaves_cursor_unadvanced() {
    init_tracing();
    let local = Replica::new();
    local.log.append(EntityType::Project, 1, named("A")).unwrap();

    let transport = MockTransport::new();
    transport.fail_next_push(SyncError::transport_fatal("remote gone"));
    let engine = ReconciliationEngine::new(
        SyncConfig::new("origin", "laptop"),
        transport,
        Arc::clone(&local.log),
        Arc::clone(&local.cursors),
        Arc::clone(&local.graph),
    );

    assert!(engine.push_cycle().is_err());
    assert_eq!(local.cursors.get("origin", Direction::Push), None);

    // The next attempt succeeds and picks up from the start.
    assert_eq!(engine.push_cycle().unwrap(), 1);
    assert_eq!(local.cursors.get("origin", Direction::Push), Some(1));
}
