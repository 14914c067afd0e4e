use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use keeldb::{
    common::{KeelDBError, PageID, Result, TransactionID, LSN},
    log_mod::{LogRecord, LogRecordType, WriteAheadLog},
    storage::{File, FileMode, MemoryFile},
};

fn open_wal(file: &MemoryFile) -> Result<WriteAheadLog> {
    WriteAheadLog::new(Box::new(file.clone()))
}

fn record_types(records: &[LogRecord]) -> Vec<LogRecordType> {
    records.iter().map(|r| r.record_type).collect()
}

#[test]
fn test_append_is_buffered_until_flush() -> Result<()> {
    let file = MemoryFile::new(FileMode::WRITE);
    let wal = open_wal(&file)?;
    let txn_id = TransactionID(1);

    let first = wal.append(LogRecord::begin(txn_id))?;
    let second = wal.append(LogRecord::update(txn_id, PageID(3), Vec::new(), b"v1".to_vec()))?;
    let third = wal.append(LogRecord::commit(txn_id))?;

    assert_eq!((first, second, third), (LSN(1), LSN(2), LSN(3)));
    assert!(wal.replay()?.is_empty());
    assert_eq!(wal.durable_lsn(), LSN::INVALID);

    wal.flush()?;

    let records = wal.replay()?;
    assert_eq!(
        record_types(&records),
        vec![
            LogRecordType::BeginRecord,
            LogRecordType::UpdateRecord,
            LogRecordType::CommitRecord
        ]
    );
    assert_eq!(records[1].page_id, Some(PageID(3)));
    assert_eq!(records[1].after_img.as_deref(), Some(&b"v1"[..]));
    assert_eq!(wal.durable_lsn(), LSN(3));

    // Replay is restartable
    assert_eq!(wal.replay()?, records);

    Ok(())
}

#[test]
fn test_flush_to_only_writes_when_needed() -> Result<()> {
    let file = MemoryFile::new(FileMode::WRITE);
    let wal = open_wal(&file)?;

    let lsn = wal.append(LogRecord::begin(TransactionID(1)))?;
    wal.flush_to(lsn)?;
    let size_after_flush = file.get_data().len();

    wal.flush_to(lsn)?;
    wal.flush_to(LSN::INVALID)?;
    assert_eq!(file.get_data().len(), size_after_flush);
    assert_eq!(wal.size_bytes(), size_after_flush as u64);

    Ok(())
}

#[test]
fn test_reopen_continues_numbering() -> Result<()> {
    let file = MemoryFile::new(FileMode::WRITE);
    {
        let wal = open_wal(&file)?;
        wal.append(LogRecord::begin(TransactionID(1)))?;
        wal.append(LogRecord::commit(TransactionID(1)))?;
        wal.flush()?;
        // Never flushed, lost with the log handle
        wal.append(LogRecord::begin(TransactionID(2)))?;
    }

    let wal = open_wal(&file)?;
    assert_eq!(wal.replay()?.len(), 2);
    assert_eq!(wal.next_lsn(), LSN(3));
    assert_eq!(wal.get_total_log_records_of_type(LogRecordType::CommitRecord), 1);

    Ok(())
}

#[test]
fn test_checksum_mismatch_is_fatal() -> Result<()> {
    let mut file = MemoryFile::new(FileMode::WRITE);
    {
        let wal = open_wal(&file)?;
        wal.append(LogRecord::begin(TransactionID(1)))?;
        wal.append(LogRecord::update(TransactionID(1), PageID(0), Vec::new(), b"payload".to_vec()))?;
        wal.flush()?;
    }

    let data = file.get_data();
    let last = data.len() - 1;
    file.write_block(&[data[last] ^ 0xFF], last)?;

    assert!(matches!(open_wal(&file), Err(KeelDBError::RecoveryError(_))));

    Ok(())
}

#[test]
fn test_truncated_frame_is_fatal() -> Result<()> {
    let mut file = MemoryFile::new(FileMode::WRITE);
    {
        let wal = open_wal(&file)?;
        wal.append(LogRecord::begin(TransactionID(1)))?;
        wal.flush()?;
    }

    let size = file.size()?;
    file.resize(size - 3)?;

    assert!(matches!(open_wal(&file), Err(KeelDBError::RecoveryError(_))));

    Ok(())
}

#[test]
fn test_bad_header_is_fatal() -> Result<()> {
    let garbage = MemoryFile::with_data(b"this is not a log file".to_vec(), FileMode::WRITE);
    assert!(matches!(open_wal(&garbage), Err(KeelDBError::RecoveryError(_))));

    let short = MemoryFile::with_data(b"KWAL".to_vec(), FileMode::WRITE);
    assert!(matches!(open_wal(&short), Err(KeelDBError::RecoveryError(_))));

    Ok(())
}

#[test]
fn test_zero_base_lsn_is_rejected() -> Result<()> {
    let mut header = b"KWAL".to_vec();
    header.extend_from_slice(&1u16.to_le_bytes());
    header.extend_from_slice(&[0u8; 2]);
    header.extend_from_slice(&0u64.to_le_bytes());

    let file = MemoryFile::with_data(header.clone(), FileMode::WRITE);
    assert!(matches!(open_wal(&file), Err(KeelDBError::RecoveryError(_))));

    // The same header with base 1 opens fine
    header[8..16].copy_from_slice(&1u64.to_le_bytes());
    let file = MemoryFile::with_data(header, FileMode::WRITE);
    let wal = open_wal(&file)?;
    assert_eq!(wal.next_lsn(), LSN(1));
    assert_eq!(wal.durable_lsn(), LSN::INVALID);

    Ok(())
}

// Once `crashed` is set, every write dies halfway through and nothing that
// replaces the file as a whole gets to finish.
struct CrashingFile {
    inner: MemoryFile,
    crashed: Arc<AtomicBool>,
}

impl CrashingFile {
    fn crash_error() -> KeelDBError {
        KeelDBError::IOError(io::Error::new(io::ErrorKind::Other, "crash"))
    }
}

impl File for CrashingFile {
    fn get_mode(&self) -> FileMode {
        self.inner.get_mode()
    }

    fn size(&self) -> Result<usize> {
        self.inner.size()
    }

    fn resize(&mut self, new_size: usize) -> Result<()> {
        if self.crashed.load(Ordering::SeqCst) {
            return Err(Self::crash_error());
        }
        self.inner.resize(new_size)
    }

    fn read_block(&mut self, offset: usize, size: usize) -> Result<Vec<u8>> {
        self.inner.read_block(offset, size)
    }

    fn write_block(&mut self, block: &[u8], offset: usize) -> Result<()> {
        if self.crashed.load(Ordering::SeqCst) {
            self.inner.write_block(&block[..block.len() / 2], offset)?;
            return Err(Self::crash_error());
        }
        self.inner.write_block(block, offset)
    }

    fn sync(&mut self) -> Result<()> {
        self.inner.sync()
    }

    fn replace_contents(&mut self, contents: &[u8]) -> Result<()> {
        if self.crashed.load(Ordering::SeqCst) {
            return Err(Self::crash_error());
        }
        self.inner.replace_contents(contents)
    }
}

#[test]
fn test_crash_during_clear_keeps_old_log() -> Result<()> {
    let file = MemoryFile::new(FileMode::WRITE);
    let crashed = Arc::new(AtomicBool::new(false));
    let wal = WriteAheadLog::new(Box::new(CrashingFile {
        inner: file.clone(),
        crashed: Arc::clone(&crashed),
    }))?;

    for id in 1..=4 {
        wal.append(LogRecord::begin(TransactionID(id)))?;
        wal.append(LogRecord::update(TransactionID(id), PageID(id), Vec::new(), b"done".to_vec()))?;
        wal.append(LogRecord::commit(TransactionID(id)))?;
    }
    let t5 = TransactionID(5);
    wal.append(LogRecord::begin(t5))?;
    wal.append(LogRecord::update(t5, PageID(9), b"old".to_vec(), b"new".to_vec()))?;
    wal.checkpoint(&[t5])?;
    let before_clear = wal.replay()?;
    let bytes_before_clear = file.get_data();

    crashed.store(true, Ordering::SeqCst);
    assert!(wal.clear().is_err());
    drop(wal);

    // The log on disk is exactly what it was before the clear started
    assert_eq!(file.get_data(), bytes_before_clear);
    let reopened = open_wal(&file)?;
    assert_eq!(reopened.replay()?, before_clear);

    // The active transaction's update is still there to undo
    assert!(before_clear.iter().any(|r| r.txn_id == t5 && r.is_update()));

    // A clear that runs to completion after the restart still works
    assert_eq!(reopened.clear()?, 12);
    let kept = reopened.replay()?;
    assert_eq!(
        record_types(&kept),
        vec![
            LogRecordType::BeginRecord,
            LogRecordType::UpdateRecord,
            LogRecordType::CheckpointRecord
        ]
    );
    assert!(kept.iter().take(2).all(|r| r.txn_id == t5));

    Ok(())
}

#[test]
fn test_clear_keeps_active_transactions() -> Result<()> {
    let file = MemoryFile::new(FileMode::WRITE);
    let wal = open_wal(&file)?;
    let (t1, t2, t3) = (TransactionID(1), TransactionID(2), TransactionID(3));

    wal.append(LogRecord::begin(t1))?;
    wal.append(LogRecord::update(t1, PageID(1), Vec::new(), b"a".to_vec()))?;
    wal.append(LogRecord::commit(t1))?;
    wal.append(LogRecord::begin(t2))?;
    wal.append(LogRecord::update(t2, PageID(2), Vec::new(), b"b".to_vec()))?;
    let checkpoint_lsn = wal.checkpoint(&[t2])?;
    wal.append(LogRecord::begin(t3))?;

    let discarded = wal.clear()?;
    assert_eq!(discarded, 3);

    let records = wal.replay()?;
    assert_eq!(
        record_types(&records),
        vec![
            LogRecordType::BeginRecord,
            LogRecordType::UpdateRecord,
            LogRecordType::CheckpointRecord,
            LogRecordType::BeginRecord
        ]
    );
    assert_eq!(records[0].txn_id, t2);
    assert_eq!(records[2].lsn, checkpoint_lsn);
    assert_eq!(records[2].active_txns, vec![t2]);
    assert_eq!(records[3].txn_id, t3);

    // The trimmed log survives a reopen
    let reopened = open_wal(&file)?;
    assert_eq!(reopened.replay()?, records);
    assert_eq!(reopened.next_lsn(), wal.next_lsn());

    Ok(())
}

#[test]
fn test_clear_after_quiet_checkpoint_empties_log() -> Result<()> {
    let file = MemoryFile::new(FileMode::WRITE);
    let wal = open_wal(&file)?;

    wal.append(LogRecord::begin(TransactionID(1)))?;
    wal.append(LogRecord::commit(TransactionID(1)))?;
    wal.checkpoint(&[])?;

    assert_eq!(wal.clear()?, 3);
    assert!(wal.replay()?.is_empty());

    // Numbering never restarts, even across a reopen
    assert_eq!(wal.next_lsn(), LSN(4));
    let reopened = open_wal(&file)?;
    assert_eq!(reopened.next_lsn(), LSN(4));
    assert_eq!(reopened.append(LogRecord::begin(TransactionID(2)))?, LSN(4));

    Ok(())
}

#[test]
fn test_clear_without_checkpoint_keeps_everything() -> Result<()> {
    let file = MemoryFile::new(FileMode::WRITE);
    let wal = open_wal(&file)?;

    wal.append(LogRecord::begin(TransactionID(1)))?;
    wal.append(LogRecord::commit(TransactionID(1)))?;

    assert_eq!(wal.clear()?, 0);
    assert_eq!(wal.replay()?.len(), 2);

    Ok(())
}

#[test]
fn test_record_counts() -> Result<()> {
    let file = MemoryFile::new(FileMode::WRITE);
    let wal = open_wal(&file)?;

    for id in 1..=3 {
        let txn_id = TransactionID(id);
        wal.append(LogRecord::begin(txn_id))?;
        wal.append(LogRecord::update(txn_id, PageID(id), Vec::new(), vec![id as u8]))?;
        if id % 2 == 0 {
            wal.append(LogRecord::abort(txn_id))?;
        } else {
            wal.append(LogRecord::commit(txn_id))?;
        }
    }

    assert_eq!(wal.get_total_log_records(), 9);
    assert_eq!(wal.get_total_log_records_of_type(LogRecordType::BeginRecord), 3);
    assert_eq!(wal.get_total_log_records_of_type(LogRecordType::UpdateRecord), 3);
    assert_eq!(wal.get_total_log_records_of_type(LogRecordType::CommitRecord), 2);
    assert_eq!(wal.get_total_log_records_of_type(LogRecordType::AbortRecord), 1);
    assert_eq!(wal.get_total_log_records_of_type(LogRecordType::CheckpointRecord), 0);

    Ok(())
}
