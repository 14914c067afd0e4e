use std::collections::{BTreeMap, BTreeSet};

use log::{debug, info};

use crate::buffer::BufferManager;
use crate::common::{PageID, Result, TransactionID, LSN};
use crate::log_mod::{LogRecord, LogRecordType, WriteAheadLog};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    pub records_scanned: usize,
    pub redone: usize,
    pub undone: usize,
    pub winners: Vec<TransactionID>,
    pub losers: Vec<TransactionID>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Committed,
    Aborted,
    InFlight,
}

pub struct RecoveryManager<'a> {
    wal: &'a WriteAheadLog,
    buffer_manager: &'a BufferManager,
}

impl<'a> RecoveryManager<'a> {
    pub fn new(wal: &'a WriteAheadLog, buffer_manager: &'a BufferManager) -> Self {
        Self {
            wal,
            buffer_manager,
        }
    }

    // Repeats history, rolls back losers, then leaves behind an empty log.
    // Running it twice in a row is a no-op the second time.
    pub fn recover(&self) -> Result<RecoveryReport> {
        let logs = self.wal.replay()?;
        if logs.is_empty() {
            debug!("Recovery: log is empty, nothing to do");
            return Ok(RecoveryReport::default());
        }

        info!("Recovery: scanning {} log records", logs.len());

        let outcomes = self.analysis_phase(&logs);
        let winners: Vec<TransactionID> = outcomes
            .iter()
            .filter(|(_, outcome)| **outcome == Outcome::Committed)
            .map(|(txn_id, _)| *txn_id)
            .collect();
        let losers: BTreeSet<TransactionID> = outcomes
            .iter()
            .filter(|(_, outcome)| **outcome == Outcome::InFlight)
            .map(|(txn_id, _)| *txn_id)
            .collect();
        info!(
            "Recovery analysis: {} committed, {} in flight",
            winners.len(),
            losers.len()
        );

        let redone = self.redo_phase(&logs)?;
        info!("Recovery redo: re-applied {} updates", redone);

        let undone = self.undo_phase(&logs, &losers)?;
        info!("Recovery undo: reverted {} updates", undone);

        self.buffer_manager.flush_all_pages()?;
        self.wal.checkpoint(&[])?;
        self.wal.clear()?;

        Ok(RecoveryReport {
            records_scanned: logs.len(),
            redone,
            undone,
            winners,
            losers: losers.into_iter().collect(),
        })
    }

    // The last outcome record of a transaction decides its fate
    fn analysis_phase(&self, logs: &[LogRecord]) -> BTreeMap<TransactionID, Outcome> {
        let mut outcomes = BTreeMap::new();

        if let Some(checkpoint) = logs
            .iter()
            .rev()
            .find(|log| log.record_type == LogRecordType::CheckpointRecord)
        {
            for txn_id in &checkpoint.active_txns {
                outcomes.insert(*txn_id, Outcome::InFlight);
            }
        }

        for log in logs {
            match log.record_type {
                LogRecordType::BeginRecord | LogRecordType::UpdateRecord => {
                    outcomes.entry(log.txn_id).or_insert(Outcome::InFlight);
                }
                LogRecordType::CommitRecord => {
                    outcomes.insert(log.txn_id, Outcome::Committed);
                }
                LogRecordType::AbortRecord => {
                    outcomes.insert(log.txn_id, Outcome::Aborted);
                }
                LogRecordType::CheckpointRecord => {}
            }
        }

        outcomes
    }

    // Everything before the last checkpoint is already on disk
    fn redo_phase(&self, logs: &[LogRecord]) -> Result<usize> {
        let start = logs
            .iter()
            .rposition(|log| log.record_type == LogRecordType::CheckpointRecord)
            .map(|pos| pos + 1)
            .unwrap_or(0);

        let mut redone = 0;
        for log in logs[start..].iter().filter(|log| log.is_update()) {
            let (page_id, _, after_img) = log.update_parts()?;
            if self.install(page_id, after_img, log.lsn, true)? {
                redone += 1;
            }
        }

        Ok(redone)
    }

    fn undo_phase(&self, logs: &[LogRecord], losers: &BTreeSet<TransactionID>) -> Result<usize> {
        let mut undone = 0;
        for log in logs
            .iter()
            .rev()
            .filter(|log| log.is_update() && losers.contains(&log.txn_id))
        {
            let (page_id, before_img, _) = log.update_parts()?;
            self.install(page_id, before_img, log.lsn, false)?;
            undone += 1;
        }

        Ok(undone)
    }

    // With `only_if_newer` the image is skipped when the page already
    // reflects `lsn`. Returns whether the page was changed.
    fn install(&self, page_id: PageID, image: &[u8], lsn: LSN, only_if_newer: bool) -> Result<bool> {
        let frame = self.buffer_manager.fetch_page(page_id)?;
        let applied = {
            let mut frame_guard = frame.lock();
            if only_if_newer && frame_guard.page_lsn() >= lsn {
                Ok(false)
            } else {
                frame_guard.set_value(image, lsn).map(|_| true)
            }
        };

        self.buffer_manager
            .unpin_page(page_id, matches!(applied, Ok(true)))?;
        applied
    }
}
