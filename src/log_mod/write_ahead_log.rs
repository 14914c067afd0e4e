use std::collections::{HashMap, HashSet};
use std::path::Path;

use log::{debug, info, warn};
use parking_lot::Mutex;

use crate::common::{KeelDBError, Result, TransactionID, LSN};
use crate::log_mod::{LogRecord, LogRecordType};
use crate::storage::{File, FileMode, PosixFile};

// File header: magic, format version, reserved, base LSN.
// The base LSN is where numbering resumes once the log has been cleared.
const WAL_MAGIC: &[u8; 4] = b"KWAL";
const WAL_VERSION: u16 = 1;
const HEADER_SIZE: usize = 16;

// Frame header: payload length, crc32 of the payload
const FRAME_HEADER_SIZE: usize = 8;

struct PendingFrame {
    lsn: LSN,
    bytes: Vec<u8>,
}

struct WalState {
    file: Box<dyn File>,
    // Appended but not yet durable, in LSN order
    pending: Vec<PendingFrame>,
    pending_bytes: usize,
    next_lsn: LSN,
    durable_lsn: LSN,
    // End of the durable frames
    write_offset: usize,
    record_counts: HashMap<LogRecordType, u64>,
}

pub struct WriteAheadLog {
    state: Mutex<WalState>,
}

fn encode_header(base_lsn: LSN) -> [u8; HEADER_SIZE] {
    let mut header = [0u8; HEADER_SIZE];
    header[0..4].copy_from_slice(WAL_MAGIC);
    header[4..6].copy_from_slice(&WAL_VERSION.to_le_bytes());
    header[8..16].copy_from_slice(&base_lsn.0.to_le_bytes());
    header
}

fn decode_header(header: &[u8]) -> Result<LSN> {
    if &header[0..4] != WAL_MAGIC {
        return Err(KeelDBError::RecoveryError("bad WAL magic".to_string()));
    }

    let version = u16::from_le_bytes([header[4], header[5]]);
    if version != WAL_VERSION {
        return Err(KeelDBError::RecoveryError(format!(
            "unsupported WAL format version {}",
            version
        )));
    }

    let mut base = [0u8; 8];
    base.copy_from_slice(&header[8..16]);
    let base = LSN(u64::from_le_bytes(base));
    // LSN 0 is reserved for "no LSN"
    if base == LSN::INVALID {
        return Err(KeelDBError::RecoveryError(
            "WAL base LSN must be at least 1".to_string(),
        ));
    }

    Ok(base)
}

fn encode_frame(record: &LogRecord) -> Result<Vec<u8>> {
    let payload = record.encode()?;
    let mut frame = Vec::with_capacity(FRAME_HEADER_SIZE + payload.len());
    frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    frame.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

// Reads every frame between the header and `end`. Anything that does not
// parse cleanly is fatal - we never guess past corruption.
fn read_frames(file: &mut dyn File, end: usize) -> Result<Vec<LogRecord>> {
    let mut records: Vec<LogRecord> = Vec::new();
    let mut offset = HEADER_SIZE;

    while offset < end {
        if end - offset < FRAME_HEADER_SIZE {
            return Err(KeelDBError::RecoveryError(format!(
                "truncated frame header at offset {}",
                offset
            )));
        }

        let frame_header = file.read_block(offset, FRAME_HEADER_SIZE)?;
        let len = u32::from_le_bytes([frame_header[0], frame_header[1], frame_header[2], frame_header[3]]) as usize;
        let crc = u32::from_le_bytes([frame_header[4], frame_header[5], frame_header[6], frame_header[7]]);

        let payload_offset = offset + FRAME_HEADER_SIZE;
        if payload_offset + len > end {
            return Err(KeelDBError::RecoveryError(format!(
                "truncated frame at offset {}: need {} bytes, {} left",
                offset,
                len,
                end - payload_offset
            )));
        }

        let payload = file.read_block(payload_offset, len)?;
        if crc32fast::hash(&payload) != crc {
            return Err(KeelDBError::RecoveryError(format!(
                "checksum mismatch in frame at offset {}",
                offset
            )));
        }

        let record = LogRecord::decode(&payload)?;
        if let Some(prev) = records.last() {
            if record.lsn <= prev.lsn {
                return Err(KeelDBError::RecoveryError(format!(
                    "{} follows {}: LSNs must increase",
                    record.lsn, prev.lsn
                )));
            }
        }

        records.push(record);
        offset = payload_offset + len;
    }

    Ok(records)
}

impl WriteAheadLog {
    pub fn new(mut file: Box<dyn File>) -> Result<Self> {
        let size = file.size()?;

        let (base_lsn, records) = if size == 0 {
            let base_lsn = LSN(1);
            file.write_block(&encode_header(base_lsn), 0)?;
            file.sync()?;
            (base_lsn, Vec::new())
        } else {
            if size < HEADER_SIZE {
                return Err(KeelDBError::RecoveryError("truncated WAL header".to_string()));
            }
            let base_lsn = decode_header(&file.read_block(0, HEADER_SIZE)?)?;
            (base_lsn, read_frames(file.as_mut(), size)?)
        };

        let next_lsn = match records.last() {
            Some(last) if last.lsn >= base_lsn => last.lsn.next(),
            _ => base_lsn,
        };

        let mut record_counts = HashMap::new();
        for record in &records {
            *record_counts.entry(record.record_type).or_insert(0) += 1;
        }

        debug!(
            "Opened WAL: {} durable records, next {}",
            records.len(),
            next_lsn
        );

        Ok(Self {
            state: Mutex::new(WalState {
                file,
                pending: Vec::new(),
                pending_bytes: 0,
                next_lsn,
                durable_lsn: LSN(next_lsn.0 - 1),
                write_offset: size.max(HEADER_SIZE),
                record_counts,
            }),
        })
    }

    pub fn open(log_file_path: &Path) -> Result<Self> {
        Self::new(Box::new(PosixFile::new(log_file_path, FileMode::WRITE)?))
    }

    // Assigns the next LSN and buffers the record. Not durable until flushed.
    pub fn append(&self, mut record: LogRecord) -> Result<LSN> {
        let mut state = self.state.lock();

        let lsn = state.next_lsn;
        record.lsn = lsn;
        let bytes = encode_frame(&record)?;

        state.next_lsn = lsn.next();
        state.pending_bytes += bytes.len();
        state.pending.push(PendingFrame { lsn, bytes });
        *state.record_counts.entry(record.record_type).or_insert(0) += 1;

        Ok(lsn)
    }

    pub fn flush(&self) -> Result<()> {
        let mut state = self.state.lock();
        Self::flush_locked(&mut state)
    }

    // Forces the log durable at least up to `lsn`
    pub fn flush_to(&self, lsn: LSN) -> Result<()> {
        let mut state = self.state.lock();
        if state.durable_lsn >= lsn {
            return Ok(());
        }
        Self::flush_locked(&mut state)
    }

    fn flush_locked(state: &mut WalState) -> Result<()> {
        let last_lsn = match state.pending.last() {
            Some(frame) => frame.lsn,
            None => return Ok(()),
        };

        let mut batch = Vec::with_capacity(state.pending_bytes);
        for frame in &state.pending {
            batch.extend_from_slice(&frame.bytes);
        }

        let offset = state.write_offset;
        let written = state
            .file
            .write_block(&batch, offset)
            .and_then(|_| state.file.sync());

        if let Err(e) = written {
            // Cut off whatever part of the batch reached the file so a later
            // reopen never sees a half-written tail. Pending records stay queued.
            if let Err(truncate_err) = state.file.resize(offset) {
                warn!("Could not truncate WAL after failed flush: {}", truncate_err);
            }
            warn!("WAL flush up to {} failed: {}", last_lsn, e);
            return Err(e);
        }

        state.write_offset = offset + batch.len();
        state.durable_lsn = last_lsn;
        state.pending.clear();
        state.pending_bytes = 0;

        debug!("WAL durable up to {}", last_lsn);
        Ok(())
    }

    // Durable records in LSN order. Safe to call repeatedly.
    pub fn replay(&self) -> Result<Vec<LogRecord>> {
        let mut state = self.state.lock();
        let end = state.write_offset;
        read_frames(state.file.as_mut(), end)
    }

    pub fn checkpoint(&self, active_txns: &[TransactionID]) -> Result<LSN> {
        let lsn = self.append(LogRecord::checkpoint(active_txns.to_vec()))?;
        self.flush_to(lsn)?;
        info!("Checkpoint at {} with {} active transactions", lsn, active_txns.len());
        Ok(lsn)
    }

    // Drops records made obsolete by the last checkpoint. Records of the
    // transactions that were active at the checkpoint are always kept.
    // Returns the number of records discarded.
    pub fn clear(&self) -> Result<usize> {
        let mut state = self.state.lock();
        Self::flush_locked(&mut state)?;

        let end = state.write_offset;
        let records = read_frames(state.file.as_mut(), end)?;

        let checkpoint = match records
            .iter()
            .rev()
            .find(|r| r.record_type == LogRecordType::CheckpointRecord)
        {
            Some(checkpoint) => checkpoint,
            None => return Ok(0),
        };

        let checkpoint_lsn = checkpoint.lsn;
        let active: HashSet<TransactionID> = checkpoint.active_txns.iter().copied().collect();

        let retained: Vec<&LogRecord> = records
            .iter()
            .filter(|r| {
                if r.lsn > checkpoint_lsn {
                    true
                } else if r.lsn == checkpoint_lsn {
                    !active.is_empty()
                } else {
                    active.contains(&r.txn_id)
                }
            })
            .collect();

        let mut contents = encode_header(state.next_lsn).to_vec();
        for record in &retained {
            contents.extend_from_slice(&encode_frame(record)?);
        }

        // All or nothing: a crash here must leave the old log readable
        state.file.replace_contents(&contents)?;
        state.write_offset = contents.len();

        let discarded = records.len() - retained.len();
        info!(
            "Cleared WAL: discarded {} records, kept {}",
            discarded,
            retained.len()
        );
        Ok(discarded)
    }

    pub fn durable_lsn(&self) -> LSN {
        self.state.lock().durable_lsn
    }

    pub fn next_lsn(&self) -> LSN {
        self.state.lock().next_lsn
    }

    // Durable bytes plus whatever is still buffered
    pub fn size_bytes(&self) -> u64 {
        let state = self.state.lock();
        (state.write_offset + state.pending_bytes) as u64
    }

    pub fn get_total_log_records(&self) -> u64 {
        self.state.lock().record_counts.values().sum()
    }

    pub fn get_total_log_records_of_type(&self, record_type: LogRecordType) -> u64 {
        *self.state.lock().record_counts.get(&record_type).unwrap_or(&0)
    }
}
