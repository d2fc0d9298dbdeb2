//! Durable journal backends for the change log.
//!
//! Journals are **opaque record sinks**: they append change records, replay
//! them on open, and drop pruned ranges. The change log owns all ordering
//! and sequence interpretation — journals do not assign sequences.
//!
//! # Invariants
//!
//! - `append` returns only after the record is durable
//! - `load` returns records in exactly the order they were appended
//! - Backends must be `Send + Sync` for concurrent access

use crate::error::{CoreError, CoreResult};
use crate::record::{ChangeRecord, EntityKey};
use fs2::FileExt;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// A durable sink for change records.
///
/// # Implementors
///
/// - [`MemoryJournal`] — for tests and ephemeral workspaces
/// - [`FileJournal`] — JSON-lines file with advisory locking
pub trait Journal: Send + Sync {
    /// Appends a record, returning once it is durably persisted.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be made durable. On error the
    /// journal is unchanged: partial writes must not be observable on
    /// replay.
    fn append(&self, record: &ChangeRecord) -> CoreResult<()>;

    /// Replays all journaled records in append order.
    fn load(&self) -> CoreResult<Vec<ChangeRecord>>;

    /// Drops records for `key` with `sequence <= through_sequence`.
    ///
    /// Called only by compaction, after the cursor-safety check.
    fn truncate_entity(&self, key: EntityKey, through_sequence: u64) -> CoreResult<()>;
}

/// An in-memory journal.
#[derive(Debug, Default)]
pub struct MemoryJournal {
    records: Mutex<Vec<ChangeRecord>>,
}

impl MemoryJournal {
    /// Creates an empty in-memory journal.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Journal for MemoryJournal {
    fn append(&self, record: &ChangeRecord) -> CoreResult<()> {
        self.records.lock().push(record.clone());
        Ok(())
    }

    fn load(&self) -> CoreResult<Vec<ChangeRecord>> {
        Ok(self.records.lock().clone())
    }

    fn truncate_entity(&self, key: EntityKey, through_sequence: u64) -> CoreResult<()> {
        self.records
            .lock()
            .retain(|r| r.key() != key || r.sequence > through_sequence);
        Ok(())
    }
}

/// A file-backed journal storing one JSON record per line.
///
/// # Durability
///
/// Every `append` writes the line, flushes, and calls `sync_all` before
/// returning, so an acknowledged append survives process termination.
///
/// # Locking
///
/// The file is held under an exclusive advisory lock for the lifetime of
/// the journal, so two processes cannot interleave appends.
pub struct FileJournal {
    path: PathBuf,
    file: Mutex<File>,
}

impl FileJournal {
    /// Opens or creates a file journal at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened, or if another
    /// process holds the journal lock.
    pub fn open(path: &Path) -> CoreResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(path)?;

        file.try_lock_exclusive()
            .map_err(|_| CoreError::storage(format!("journal locked: {}", path.display())))?;

        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
        })
    }

    /// Returns the journal file path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Journal for FileJournal {
    fn append(&self, record: &ChangeRecord) -> CoreResult<()> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let mut file = self.file.lock();
        file.write_all(line.as_bytes())?;
        file.flush()?;
        file.sync_all()?;
        tracing::trace!(coordinate = %record.key(), sequence = record.sequence, "journal append");
        Ok(())
    }

    fn load(&self) -> CoreResult<Vec<ChangeRecord>> {
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(0))?;

        let reader = BufReader::new(&mut *file);
        let mut records = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.is_empty() {
                continue;
            }
            records.push(serde_json::from_str(&line)?);
        }

        file.seek(SeekFrom::End(0))?;
        Ok(records)
    }

    fn truncate_entity(&self, key: EntityKey, through_sequence: u64) -> CoreResult<()> {
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(0))?;

        let mut kept = Vec::new();
        {
            let reader = BufReader::new(&mut *file);
            for line in reader.lines() {
                let line = line?;
                if line.is_empty() {
                    continue;
                }
                let record: ChangeRecord = serde_json::from_str(&line)?;
                if record.key() != key || record.sequence > through_sequence {
                    kept.push(line);
                }
            }
        }

        // Rewrite in place under the same lock.
        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        for line in &kept {
            file.write_all(line.as_bytes())?;
            file.write_all(b"\n")?;
        }
        file.flush()?;
        file.sync_all()?;
        tracing::debug!(coordinate = %key, through_sequence, "journal truncated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;
    use vaultsync_protocol::{ChangePayload, EntityType};

    fn make_record(global: u64, sequence: u64, entity_id: u64) -> ChangeRecord {
        ChangeRecord {
            global_sequence: global,
            sequence,
            entity_type: EntityType::Project,
            entity_id,
            payload: ChangePayload::create([("name", json!("p"))]),
            created_at: Utc::now(),
            conflict_loser: None,
        }
    }

    #[test]
    fn memory_journal_roundtrip() {
        let journal = MemoryJournal::new();
        journal.append(&make_record(1, 1, 1)).unwrap();
        journal.append(&make_record(2, 2, 1)).unwrap();

        let records = journal.load().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].global_sequence, 1);
        assert_eq!(records[1].sequence, 2);
    }

    #[test]
    fn memory_journal_truncate_is_scoped() {
        let journal = MemoryJournal::new();
        journal.append(&make_record(1, 1, 1)).unwrap();
        journal.append(&make_record(2, 2, 1)).unwrap();
        journal.append(&make_record(3, 1, 9)).unwrap();

        journal
            .truncate_entity(EntityKey::new(EntityType::Project, 1), 1)
            .unwrap();

        let records = journal.load().unwrap();
        assert_eq!(records.len(), 2);
        assert!(records.iter().any(|r| r.entity_id == 9));
    }

    #[test]
    fn file_journal_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("changes.jsonl");

        {
            let journal = FileJournal::open(&path).unwrap();
            journal.append(&make_record(1, 1, 1)).unwrap();
            journal.append(&make_record(2, 2, 1)).unwrap();
        }

        let journal = FileJournal::open(&path).unwrap();
        let records = journal.load().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].global_sequence, 2);
    }

    #[test]
    fn file_journal_truncate_rewrites() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("changes.jsonl");

        let journal = FileJournal::open(&path).unwrap();
        journal.append(&make_record(1, 1, 1)).unwrap();
        journal.append(&make_record(2, 2, 1)).unwrap();
        journal.append(&make_record(3, 3, 1)).unwrap();

        journal
            .truncate_entity(EntityKey::new(EntityType::Project, 1), 2)
            .unwrap();

        let records = journal.load().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].sequence, 3);
    }

    #[test]
    fn file_journal_append_after_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("changes.jsonl");

        let journal = FileJournal::open(&path).unwrap();
        journal.append(&make_record(1, 1, 1)).unwrap();
        let _ = journal.load().unwrap();
        journal.append(&make_record(2, 2, 1)).unwrap();

        assert_eq!(journal.load().unwrap().len(), 2);
    }
}
