//! Reconciliation state machine.

use crate::config::SyncConfig;
use crate::conflict::{self, ConflictRecord, ConflictWinner};
use crate::error::{SyncError, SyncResult};
use crate::transport::SyncTransport;
use chrono::Utc;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use vaultsync_core::{ChangeLog, Direction, ProjectGraph, SyncCursorStore, SyncState};
use vaultsync_protocol::{ChangePayload, PullRequest, PushRequest, WireChangeSet};

/// The current state of a reconciliation cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// No cycle in progress.
    Idle,
    /// Gathering the next batch from the local log.
    Collecting,
    /// Sending a batch to the remote.
    Transmitting,
    /// Waiting for the remote's durable acknowledgement.
    AwaitingAck,
    /// Advancing the cursor after a successful exchange.
    Advancing,
    /// Resolving a payload conflict at an existing coordinate.
    Conflict,
}

impl EngineState {
    /// Returns true if a cycle is in progress.
    pub fn is_active(&self) -> bool {
        !matches!(self, EngineState::Idle)
    }

    /// Returns true if a new cycle can start.
    pub fn can_start(&self) -> bool {
        matches!(self, EngineState::Idle)
    }
}

/// Counters accumulated across cycles.
#[derive(Debug, Clone, Default)]
pub struct EngineStats {
    /// Completed push cycles.
    pub push_cycles: u64,
    /// Completed pull cycles.
    pub pull_cycles: u64,
    /// Change sets pushed to the remote.
    pub changesets_pushed: u64,
    /// Change sets pulled and applied locally.
    pub changesets_pulled: u64,
    /// Conflicts detected and resolved.
    pub conflicts_resolved: u64,
    /// Retry attempts made.
    pub retries: u64,
    /// Last error message, cleared on the next successful cycle.
    pub last_error: Option<String>,
}

/// Result of a full sync (pull then push).
#[derive(Debug, Clone)]
pub struct SyncReport {
    /// Change sets pulled and applied.
    pub pulled: u64,
    /// Change sets pushed.
    pub pushed: u64,
    /// Conflicts resolved during the cycle.
    pub conflicts_resolved: u64,
    /// Duration of the cycle.
    pub duration: Duration,
}

/// Snapshot of the engine for a status surface.
#[derive(Debug, Clone)]
pub struct SyncStatus {
    /// Current state.
    pub state: EngineState,
    /// All cursor rows, sorted by key.
    pub cursors: Vec<SyncState>,
    /// Unresolved integrity violations.
    pub violation_count: usize,
    /// Conflict audit trail, oldest first.
    pub conflicts: Vec<ConflictRecord>,
    /// Accumulated counters.
    pub stats: EngineStats,
}

/// Drives push and pull cycles against one remote.
///
/// A cycle walks `Idle -> Collecting -> Transmitting -> AwaitingAck ->
/// (Advancing | Conflict) -> Idle`. Cursors advance only after the
/// corresponding durable step (remote ack for push, local apply for pull),
/// so an interrupted cycle resumes from the last acknowledged point and
/// replayed batches are idempotent.
pub struct ReconciliationEngine<T: SyncTransport> {
    config: SyncConfig,
    transport: Arc<T>,
    log: Arc<ChangeLog>,
    cursors: Arc<SyncCursorStore>,
    graph: Arc<ProjectGraph>,
    state: RwLock<EngineState>,
    stats: RwLock<EngineStats>,
    conflicts: RwLock<Vec<ConflictRecord>>,
    cancelled: AtomicBool,
}

impl<T: SyncTransport> ReconciliationEngine<T> {
    /// Creates an engine over the given stores and transport.
    pub fn new(
        config: SyncConfig,
        transport: T,
        log: Arc<ChangeLog>,
        cursors: Arc<SyncCursorStore>,
        graph: Arc<ProjectGraph>,
    ) -> Self {
        Self {
            config,
            transport: Arc::new(transport),
            log,
            cursors,
            graph,
            state: RwLock::new(EngineState::Idle),
            stats: RwLock::new(EngineStats::default()),
            conflicts: RwLock::new(Vec::new()),
            cancelled: AtomicBool::new(false),
        }
    }

    /// Gets the current state.
    pub fn state(&self) -> EngineState {
        *self.state.read()
    }

    /// Gets the accumulated counters.
    pub fn stats(&self) -> EngineStats {
        self.stats.read().clone()
    }

    /// The conflict audit trail, oldest first.
    pub fn conflicts(&self) -> Vec<ConflictRecord> {
        self.conflicts.read().clone()
    }

    /// Snapshot of state, cursors, violations, and counters.
    pub fn status(&self) -> SyncStatus {
        SyncStatus {
            state: self.state(),
            cursors: self.cursors.states(),
            violation_count: self.graph.violation_count(),
            conflicts: self.conflicts(),
            stats: self.stats(),
        }
    }

    /// Cancels the ongoing cycle at the next state boundary.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Resets the cancelled flag.
    pub fn reset_cancel(&self) {
        self.cancelled.store(false, Ordering::SeqCst);
    }

    fn check_cancelled(&self) -> SyncResult<()> {
        if self.cancelled.load(Ordering::SeqCst) {
            Err(SyncError::Cancelled)
        } else {
            Ok(())
        }
    }

    fn set_state(&self, state: EngineState) {
        tracing::trace!(?state, remote = %self.config.remote_id, "state transition");
        *self.state.write() = state;
    }

    fn ensure_can_start(&self, target: &str) -> SyncResult<()> {
        let state = self.state();
        if state.can_start() {
            Ok(())
        } else {
            Err(SyncError::InvalidStateTransition {
                from: format!("{state:?}"),
                to: target.into(),
            })
        }
    }

    /// Pushes local changes until the remote has acknowledged everything.
    ///
    /// Returns the number of change sets pushed. An empty batch is still
    /// transmitted so the remote learns the local cursor position.
    pub fn push_cycle(&self) -> SyncResult<u64> {
        self.ensure_can_start("push")?;
        self.reset_cancel();
        match self.run_push() {
            Ok(pushed) => {
                self.finish_cycle(|stats| stats.push_cycles += 1);
                Ok(pushed)
            }
            Err(e) => {
                self.handle_error(&e);
                Err(e)
            }
        }
    }

    /// Pulls remote changes until the remote has nothing newer.
    ///
    /// Returns the number of change sets applied locally.
    pub fn pull_cycle(&self) -> SyncResult<u64> {
        self.ensure_can_start("pull")?;
        self.reset_cancel();
        match self.run_pull() {
            Ok(pulled) => {
                self.finish_cycle(|stats| stats.pull_cycles += 1);
                Ok(pulled)
            }
            Err(e) => {
                self.handle_error(&e);
                Err(e)
            }
        }
    }

    /// Performs a full sync: pull first, then push.
    pub fn sync(&self) -> SyncResult<SyncReport> {
        let start = Instant::now();
        self.ensure_can_start("sync")?;
        self.reset_cancel();

        let conflicts_before = self.stats.read().conflicts_resolved;

        let pulled = match self.run_pull() {
            Ok(pulled) => pulled,
            Err(e) => {
                self.handle_error(&e);
                return Err(e);
            }
        };
        let pushed = match self.run_push() {
            Ok(pushed) => pushed,
            Err(e) => {
                self.handle_error(&e);
                return Err(e);
            }
        };

        self.finish_cycle(|stats| {
            stats.pull_cycles += 1;
            stats.push_cycles += 1;
        });

        Ok(SyncReport {
            pulled,
            pushed,
            conflicts_resolved: self.stats.read().conflicts_resolved - conflicts_before,
            duration: start.elapsed(),
        })
    }

    /// Performs a full sync with retry on transient errors.
    pub fn sync_with_retry(&self) -> SyncResult<SyncReport> {
        let retry = self.config.retry.clone();
        let mut last_error = None;

        for attempt in 0..retry.max_attempts {
            if attempt > 0 {
                std::thread::sleep(retry.delay_for_attempt(attempt));
                self.stats.write().retries += 1;
            }

            self.check_cancelled()?;

            match self.sync() {
                Ok(report) => return Ok(report),
                Err(e) => {
                    if e.is_retryable() && attempt + 1 < retry.max_attempts {
                        tracing::warn!(attempt, error = %e, "sync attempt failed, retrying");
                        last_error = Some(e);
                        continue;
                    }
                    return Err(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| SyncError::Protocol("no sync attempts made".into())))
    }

    fn run_push(&self) -> SyncResult<u64> {
        let mut total = 0u64;

        loop {
            self.check_cancelled()?;
            self.set_state(EngineState::Collecting);

            let cursor = self
                .cursors
                .get(&self.config.remote_id, Direction::Push)
                .unwrap_or(0);
            let records = self.log.read_all_since(cursor);
            let batch: Vec<_> = records
                .into_iter()
                .take(self.config.push_batch_size as usize)
                .collect();
            let changesets = batch
                .iter()
                .map(|r| r.to_wire())
                .collect::<Result<Vec<WireChangeSet>, _>>()
                .map_err(SyncError::from)?;
            let batch_len = changesets.len() as u64;
            let last_global = batch.last().map(|r| r.global_sequence);
            let request = PushRequest::new(self.config.remote_id.clone(), cursor, changesets);

            self.set_state(EngineState::Transmitting);
            self.check_cancelled()?;
            self.set_state(EngineState::AwaitingAck);
            let ack = self.transport.push(&request)?;

            if ack.applied_through < cursor {
                return Err(SyncError::Protocol(format!(
                    "remote acknowledged {} behind cursor {cursor}",
                    ack.applied_through
                )));
            }
            if !request.is_empty() && ack.applied_through == cursor {
                return Err(SyncError::Protocol(format!(
                    "remote made no progress past cursor {cursor}"
                )));
            }

            self.set_state(EngineState::Advancing);
            self.cursors
                .advance(&self.config.remote_id, Direction::Push, ack.applied_through)?;

            total += batch_len;
            self.stats.write().changesets_pushed += batch_len;
            tracing::debug!(
                remote = %self.config.remote_id,
                since = cursor,
                batch = batch_len,
                applied_through = ack.applied_through,
                "push batch acknowledged"
            );

            // Done once the remote has acknowledged everything we hold and
            // the log has nothing past this batch.
            match last_global {
                None => return Ok(total),
                Some(last)
                    if ack.applied_through >= last
                        && batch_len < u64::from(self.config.push_batch_size) =>
                {
                    return Ok(total)
                }
                _ => {}
            }
        }
    }

    fn run_pull(&self) -> SyncResult<u64> {
        let mut total = 0u64;

        loop {
            self.check_cancelled()?;
            self.set_state(EngineState::Collecting);

            let since = self
                .cursors
                .get(&self.config.remote_id, Direction::Pull)
                .unwrap_or(0);
            let request = PullRequest::new(
                self.config.replica_id.clone(),
                since,
                self.config.pull_batch_size,
            );

            self.set_state(EngineState::Transmitting);
            self.check_cancelled()?;
            self.set_state(EngineState::AwaitingAck);
            let response = self.transport.pull(&request)?;
            let batch_len = response.changesets.len() as u64;

            for changeset in &response.changesets {
                self.check_cancelled()?;
                self.apply_inbound(changeset)?;
            }

            // The remote's global counter is dense, so a fully applied
            // batch moves the cursor by exactly its length.
            self.set_state(EngineState::Advancing);
            self.cursors
                .advance(&self.config.remote_id, Direction::Pull, since + batch_len)?;

            total += batch_len;
            self.stats.write().changesets_pulled += batch_len;
            tracing::debug!(
                remote = %self.config.remote_id,
                since,
                batch = batch_len,
                "pull batch applied"
            );

            if batch_len < u64::from(self.config.pull_batch_size) {
                return Ok(total);
            }
        }
    }

    /// Applies one inbound change set.
    ///
    /// Missing coordinate: the record is appended (after an integrity
    /// check that records violations without dropping the record).
    /// Identical payload: idempotent no-op. Different payload: a conflict,
    /// resolved deterministically; the cycle continues either way.
    fn apply_inbound(&self, changeset: &WireChangeSet) -> SyncResult<()> {
        let payload = ChangePayload::decode(&changeset.payload)?;

        let existing = self
            .log
            .get(changeset.entity_type, changeset.entity_id, changeset.sequence);

        match existing {
            None => {
                let record = self.log.append_replicated(
                    changeset.entity_type,
                    changeset.entity_id,
                    changeset.sequence,
                    payload,
                    changeset.created_at,
                )?;
                match self.graph.check_reference(&record) {
                    Ok(()) => self.graph.apply_record(&record),
                    // Kept in the log but excluded from the registry until
                    // reconciled.
                    Err(violation) => self.graph.record_violation(violation),
                }
            }
            Some(ref local) if local.payload == payload => {}
            Some(local) => {
                self.set_state(EngineState::Conflict);
                let winner = conflict::resolve(
                    &local,
                    changeset,
                    &self.config.replica_id,
                    &self.config.remote_id,
                );
                tracing::warn!(
                    entity = %local.key(),
                    sequence = changeset.sequence,
                    ?winner,
                    "conflict resolved"
                );

                if winner == ConflictWinner::Remote {
                    let resolved = self.log.resolve_at(
                        changeset.entity_type,
                        changeset.entity_id,
                        changeset.sequence,
                        payload,
                        changeset.created_at,
                        local.payload.encode().map_err(SyncError::from)?,
                    )?;
                    match self.graph.check_reference(&resolved) {
                        Ok(()) => self.graph.apply_record(&resolved),
                        Err(violation) => self.graph.record_violation(violation),
                    }
                }

                self.conflicts.write().push(ConflictRecord {
                    entity_type: changeset.entity_type,
                    entity_id: changeset.entity_id,
                    sequence: changeset.sequence,
                    local_payload: local.payload.encode().map_err(SyncError::from)?,
                    remote_payload: changeset.payload.clone(),
                    local_created_at: local.created_at,
                    remote_created_at: changeset.created_at,
                    winner,
                    detected_at: Utc::now(),
                });
                self.stats.write().conflicts_resolved += 1;
            }
        }
        Ok(())
    }

    fn finish_cycle(&self, bump: impl FnOnce(&mut EngineStats)) {
        let mut stats = self.stats.write();
        bump(&mut stats);
        stats.last_error = None;
        drop(stats);
        self.set_state(EngineState::Idle);
    }

    fn handle_error(&self, error: &SyncError) {
        self.stats.write().last_error = Some(error.to_string());
        // Idle again so a later attempt can start; cursors were not
        // advanced past the failure point.
        self.set_state(EngineState::Idle);
    }
}
