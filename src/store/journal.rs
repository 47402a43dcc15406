//! Append-only journal store for crash-safe persistence.
//!
//! Every committed write appends a full record snapshot as a
//! length-prefixed, checksummed frame. Opening the journal replays frames
//! in order, keeping the last snapshot per id; replay stops at the first
//! corrupt or truncated frame, so a torn write never surfaces as state.

use super::TransactionStore;
use crate::error::{Result, TxError};
use crate::types::{TransactionId, TransactionRecord};
use fs2::FileExt;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

/// Magic bytes for the journal file.
const JOURNAL_MAGIC: &[u8; 4] = b"TXJ\0";

/// Current journal format version.
const JOURNAL_VERSION: u8 = 1;

/// Sanity cap on a single frame.
const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Durable journal-backed store.
///
/// Reads are served from an in-memory map; writes append to the journal
/// first and replace the in-memory entry only after the append commits.
pub struct JournalStore {
    records: RwLock<HashMap<TransactionId, TransactionRecord>>,
    writer: Mutex<BufWriter<File>>,
    _lock_file: File,
}

impl JournalStore {
    /// Open an existing journal or create a new one at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let lock_file = Self::acquire_lock(&path)?;

        let records = if path.exists() {
            Self::replay(&path)?
        } else {
            let mut file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&path)?;
            file.write_all(JOURNAL_MAGIC)?;
            file.write_all(&[JOURNAL_VERSION])?;
            file.sync_all()?;
            HashMap::new()
        };

        let file = OpenOptions::new().append(true).open(&path)?;

        Ok(Self {
            records: RwLock::new(records),
            writer: Mutex::new(BufWriter::new(file)),
            _lock_file: lock_file,
        })
    }

    /// Take an exclusive advisory lock next to the journal file.
    fn acquire_lock(path: &Path) -> Result<File> {
        let lock_path = path.with_extension("lock");
        let lock_file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(lock_path)?;
        lock_file.try_lock_exclusive().map_err(|_| TxError::Locked)?;
        Ok(lock_file)
    }

    /// Replay all intact frames, last snapshot per id winning.
    fn replay(path: &Path) -> Result<HashMap<TransactionId, TransactionRecord>> {
        let file = File::open(path)?;
        let mut reader = BufReader::new(file);

        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        if &magic != JOURNAL_MAGIC {
            return Err(TxError::InvalidFormat("Invalid journal magic".into()));
        }

        let mut version = [0u8; 1];
        reader.read_exact(&mut version)?;
        if version[0] != JOURNAL_VERSION {
            return Err(TxError::InvalidFormat(format!(
                "Unsupported journal version: {}",
                version[0]
            )));
        }

        let mut records = HashMap::new();
        // A torn tail frame ends replay; everything before it is intact.
        while let Ok(record) = Self::read_frame(&mut reader) {
            records.insert(record.id.clone(), record);
        }

        Ok(records)
    }

    fn append_frame(&self, record: &TransactionRecord) -> Result<()> {
        let encoded = rmp_serde::to_vec_named(record)?;

        let mut writer = self.writer.lock();
        let len = encoded.len() as u32;
        writer.write_all(&len.to_le_bytes())?;
        writer.write_all(&encoded)?;

        let checksum = crc32fast::hash(&encoded);
        writer.write_all(&checksum.to_le_bytes())?;

        writer.flush()?;
        writer.get_ref().sync_all()?;
        Ok(())
    }

    fn read_frame(reader: &mut BufReader<File>) -> Result<TransactionRecord> {
        let mut len_bytes = [0u8; 4];
        reader.read_exact(&mut len_bytes)?;
        let len = u32::from_le_bytes(len_bytes) as usize;

        if len > MAX_FRAME_LEN {
            return Err(TxError::Corruption("Journal frame too large".into()));
        }

        let mut encoded = vec![0u8; len];
        reader.read_exact(&mut encoded)?;

        let mut checksum_bytes = [0u8; 4];
        reader.read_exact(&mut checksum_bytes)?;
        let stored_checksum = u32::from_le_bytes(checksum_bytes);

        let computed_checksum = crc32fast::hash(&encoded);
        if stored_checksum != computed_checksum {
            return Err(TxError::Corruption("Journal checksum mismatch".into()));
        }

        Ok(rmp_serde::from_slice(&encoded)?)
    }
}

impl TransactionStore for JournalStore {
    fn get(&self, id: &TransactionId) -> Result<Option<TransactionRecord>> {
        Ok(self.records.read().get(id).cloned())
    }

    fn insert(&self, record: TransactionRecord) -> Result<()> {
        let mut records = self.records.write();
        self.append_frame(&record)?;
        records.insert(record.id.clone(), record);
        Ok(())
    }

    fn update(
        &self,
        id: &TransactionId,
        mutate: &mut dyn FnMut(&mut TransactionRecord) -> Result<()>,
    ) -> Result<TransactionRecord> {
        let mut records = self.records.write();
        let current = records
            .get(id)
            .ok_or_else(|| TxError::NotFound(id.clone()))?;

        let mut next = current.clone();
        mutate(&mut next)?;

        // Journal first; the in-memory entry changes only once the frame
        // is on disk.
        self.append_frame(&next)?;
        records.insert(id.clone(), next.clone());
        Ok(next)
    }

    fn ids_with_prefix(&self, prefix: &str) -> Result<Vec<TransactionId>> {
        Ok(self
            .records
            .read()
            .keys()
            .filter(|id| id.as_str().starts_with(prefix))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{TransactionInput, TransactionStatus};
    use serde_json::json;
    use tempfile::TempDir;

    fn make_record() -> TransactionRecord {
        TransactionRecord::new(
            TransactionId::generate(),
            TransactionInput::new("deploy", json!({"contract": "token"})),
        )
    }

    #[test]
    fn test_journal_basic_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = JournalStore::open(dir.path().join("tx.journal")).unwrap();

        let record = make_record();
        let id = record.id.clone();
        store.insert(record).unwrap();

        let loaded = store.get(&id).unwrap().unwrap();
        assert_eq!(loaded.status, TransactionStatus::Queued);
    }

    #[test]
    fn test_journal_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tx.journal");
        let id;

        {
            let store = JournalStore::open(&path).unwrap();
            let record = make_record();
            id = record.id.clone();
            store.insert(record).unwrap();
            store
                .update(&id, &mut |rec| {
                    rec.status = TransactionStatus::Processing;
                    Ok(())
                })
                .unwrap();
        }

        let store = JournalStore::open(&path).unwrap();
        let loaded = store.get(&id).unwrap().unwrap();
        assert_eq!(loaded.status, TransactionStatus::Processing);
    }

    #[test]
    fn test_last_snapshot_wins_on_replay() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tx.journal");
        let id;

        {
            let store = JournalStore::open(&path).unwrap();
            let record = make_record();
            id = record.id.clone();
            store.insert(record).unwrap();
            for status in [TransactionStatus::Processing, TransactionStatus::Completed] {
                store
                    .update(&id, &mut |rec| {
                        rec.status = status;
                        Ok(())
                    })
                    .unwrap();
            }
        }

        let store = JournalStore::open(&path).unwrap();
        let loaded = store.get(&id).unwrap().unwrap();
        assert_eq!(loaded.status, TransactionStatus::Completed);
    }

    #[test]
    fn test_torn_tail_frame_is_dropped() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tx.journal");
        let id;

        {
            let store = JournalStore::open(&path).unwrap();
            let record = make_record();
            id = record.id.clone();
            store.insert(record).unwrap();
        }

        // Simulate a torn write: a frame header with no body.
        {
            let mut file = OpenOptions::new().append(true).open(&path).unwrap();
            file.write_all(&999u32.to_le_bytes()).unwrap();
            file.write_all(b"partial").unwrap();
            file.sync_all().unwrap();
        }

        let store = JournalStore::open(&path).unwrap();
        assert!(store.get(&id).unwrap().is_some());
    }

    #[test]
    fn test_second_open_is_locked_out() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tx.journal");

        let _store = JournalStore::open(&path).unwrap();
        let second = JournalStore::open(&path);
        assert!(matches!(second, Err(TxError::Locked)));
    }

    #[test]
    fn test_failed_mutator_leaves_journal_untouched() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tx.journal");
        let id;

        {
            let store = JournalStore::open(&path).unwrap();
            let record = make_record();
            id = record.id.clone();
            store.insert(record).unwrap();

            let result = store.update(&id, &mut |rec| {
                rec.status = TransactionStatus::Failed;
                Err(TxError::TerminalConflict {
                    id: rec.id.clone(),
                    status: rec.status,
                })
            });
            assert!(result.is_err());
        }

        let store = JournalStore::open(&path).unwrap();
        let loaded = store.get(&id).unwrap().unwrap();
        assert_eq!(loaded.status, TransactionStatus::Queued);
    }
}
