use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::common::{KeelDBError, PageID, Result, TransactionID, LSN};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LogRecordType {
    BeginRecord,
    CommitRecord,
    AbortRecord,
    UpdateRecord,
    CheckpointRecord,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    pub lsn: LSN,
    pub record_type: LogRecordType,
    pub txn_id: TransactionID,
    pub page_id: Option<PageID>,
    pub before_img: Option<Vec<u8>>,
    pub after_img: Option<Vec<u8>>,
    // Only set on checkpoint records
    pub active_txns: Vec<TransactionID>,
    // Milliseconds since the Unix epoch
    pub timestamp: u64,
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

impl LogRecord {
    // The WAL assigns the real LSN on append
    fn new(record_type: LogRecordType, txn_id: TransactionID) -> Self {
        Self {
            lsn: LSN::INVALID,
            record_type,
            txn_id,
            page_id: None,
            before_img: None,
            after_img: None,
            active_txns: Vec::new(),
            timestamp: now_millis(),
        }
    }

    pub fn begin(txn_id: TransactionID) -> Self {
        Self::new(LogRecordType::BeginRecord, txn_id)
    }

    pub fn commit(txn_id: TransactionID) -> Self {
        Self::new(LogRecordType::CommitRecord, txn_id)
    }

    pub fn abort(txn_id: TransactionID) -> Self {
        Self::new(LogRecordType::AbortRecord, txn_id)
    }

    pub fn update(txn_id: TransactionID, page_id: PageID, before_img: Vec<u8>, after_img: Vec<u8>) -> Self {
        Self {
            page_id: Some(page_id),
            before_img: Some(before_img),
            after_img: Some(after_img),
            ..Self::new(LogRecordType::UpdateRecord, txn_id)
        }
    }

    // Checkpoints are not owned by any transaction; they carry txn 0
    pub fn checkpoint(active_txns: Vec<TransactionID>) -> Self {
        Self {
            active_txns,
            ..Self::new(LogRecordType::CheckpointRecord, TransactionID(0))
        }
    }

    pub fn is_update(&self) -> bool {
        self.record_type == LogRecordType::UpdateRecord
    }

    pub(crate) fn encode(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).map_err(|e| KeelDBError::Serialization(e.to_string()))
    }

    pub(crate) fn decode(payload: &[u8]) -> Result<Self> {
        bincode::deserialize(payload)
            .map_err(|e| KeelDBError::RecoveryError(format!("undecodable log record: {}", e)))
    }

    // Update records must name a page and carry both images
    pub(crate) fn update_parts(&self) -> Result<(PageID, &[u8], &[u8])> {
        match (self.page_id, &self.before_img, &self.after_img) {
            (Some(page_id), Some(before), Some(after)) => Ok((page_id, before, after)),
            _ => Err(KeelDBError::RecoveryError(format!(
                "update record at {} is missing its page or images",
                self.lsn
            ))),
        }
    }
}
