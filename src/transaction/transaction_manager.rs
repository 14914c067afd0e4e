use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use log::{debug, info, warn};
use parking_lot::{Mutex, RwLock};

use crate::buffer::BufferManager;
use crate::common::{DatabaseConfig, KeelDBError, PageID, Result, TransactionID, LSN};
use crate::lock::{LockManager, LockMode};
use crate::log_mod::{LogRecord, RecoveryManager, RecoveryReport, WriteAheadLog};
use crate::storage::{page, DiskStorage};
use crate::transaction::{IsolationLevel, Transaction, TransactionState};

#[derive(Default)]
struct TransactionTable {
    active: HashMap<TransactionID, Transaction>,
    // Outcomes of the most recently finished transactions, oldest first in
    // `finished_order`. Bounded by `DatabaseConfig::finished_history`.
    finished: HashMap<TransactionID, TransactionState>,
    finished_order: VecDeque<TransactionID>,
}

/// Runs transactions over the buffer pool: locks through the lock manager,
/// logs every change ahead of the page it touches, and undoes changes on
/// abort.
///
/// Each transaction is driven by one thread at a time; different
/// transactions may run on different threads against the same manager.
pub struct TransactionManager {
    buffer_manager: Arc<BufferManager>,
    wal: Arc<WriteAheadLog>,
    lock_manager: LockManager,
    transactions: Mutex<TransactionTable>,
    next_txn_id: AtomicU64,
    // Shared by every logged page change, exclusive for checkpoints
    checkpoint_latch: RwLock<()>,
    config: DatabaseConfig,
}

impl TransactionManager {
    pub fn new(disk: Arc<dyn DiskStorage>, wal: Arc<WriteAheadLog>, config: DatabaseConfig) -> Result<Self> {
        page::check_page_size(config.page_size)?;
        if disk.page_size() != config.page_size {
            return Err(KeelDBError::PageSizeMismatch(disk.page_size(), config.page_size));
        }

        // Never reuse an id that still appears in the log
        let next_txn_id = wal
            .replay()?
            .iter()
            .map(|record| record.txn_id.0)
            .max()
            .unwrap_or(0)
            + 1;

        let buffer_manager = BufferManager::with_wal(disk, config.buffer_pool_size, Arc::clone(&wal));

        Ok(Self {
            buffer_manager: Arc::new(buffer_manager),
            wal,
            lock_manager: LockManager::new(config.deadlock_check_interval),
            transactions: Mutex::new(TransactionTable::default()),
            next_txn_id: AtomicU64::new(next_txn_id),
            checkpoint_latch: RwLock::new(()),
            config,
        })
    }

    pub fn begin(&self, isolation_level: IsolationLevel) -> Result<TransactionID> {
        let txn_id = TransactionID(self.next_txn_id.fetch_add(1, Ordering::SeqCst));

        {
            let _latch = self.checkpoint_latch.read();
            self.wal.append(LogRecord::begin(txn_id))?;
            self.transactions
                .lock()
                .active
                .insert(txn_id, Transaction::new(txn_id, isolation_level));
        }

        info!("Began {} ({:?})", txn_id, isolation_level);
        Ok(txn_id)
    }

    pub fn begin_default(&self) -> Result<TransactionID> {
        self.begin(self.config.default_isolation)
    }

    pub fn read(&self, txn_id: TransactionID, page_id: PageID) -> Result<Vec<u8>> {
        let isolation_level = self.isolation_level(txn_id)?;

        let mut short_lock = false;
        match isolation_level {
            IsolationLevel::ReadUncommitted => {}
            IsolationLevel::ReadCommitted => {
                if !self.lock_manager.holds(txn_id, page_id) {
                    self.lock_page(txn_id, page_id, LockMode::Shared, false)?;
                    short_lock = true;
                }
            }
            IsolationLevel::RepeatableRead | IsolationLevel::Serializable => {
                self.lock_page(txn_id, page_id, LockMode::Shared, true)?;
            }
        }

        let value = self.read_value(page_id);
        if short_lock {
            self.lock_manager.release(txn_id, page_id);
        }

        value
    }

    pub fn write(&self, txn_id: TransactionID, page_id: PageID, value: &[u8]) -> Result<()> {
        let max = page::max_value_size(self.buffer_manager.get_page_size());
        if value.len() > max {
            return Err(KeelDBError::ValueTooLarge(value.len(), max));
        }

        self.ensure_active(txn_id)?;
        self.lock_page(txn_id, page_id, LockMode::Exclusive, true)?;

        let before_img = {
            let _latch = self.checkpoint_latch.read();
            self.apply_update(txn_id, page_id, value)?
        };

        let mut table = self.transactions.lock();
        let txn = table
            .active
            .get_mut(&txn_id)
            .ok_or(KeelDBError::TransactionNotActive(txn_id))?;
        txn.record_write(page_id, before_img, value.to_vec());

        debug!("{} wrote {} bytes to {}", txn_id, value.len(), page_id);
        Ok(())
    }

    pub fn commit(&self, txn_id: TransactionID) -> Result<()> {
        self.ensure_active(txn_id)?;

        let lsn = self.wal.append(LogRecord::commit(txn_id))?;
        if let Err(e) = self.wal.flush_to(lsn) {
            warn!("Commit record of {} did not reach disk ({}), aborting", txn_id, e);
            if let Err(abort_err) = self.abort(txn_id) {
                warn!("Abort of {} after failed commit also failed: {}", txn_id, abort_err);
            }
            return Err(e);
        }

        self.finish(txn_id, TransactionState::Committed);
        self.lock_manager.release_all(txn_id);
        info!("Committed {}", txn_id);

        if self.wal.size_bytes() > self.config.max_wal_size_bytes {
            if let Err(e) = self.checkpoint() {
                warn!("Automatic checkpoint failed: {}", e);
            }
        }

        Ok(())
    }

    pub fn abort(&self, txn_id: TransactionID) -> Result<()> {
        // The transaction stays registered as active until its Abort record
        // is written, so a concurrent checkpoint keeps its log records.
        let undo_log = {
            let table = self.transactions.lock();
            let txn = table
                .active
                .get(&txn_id)
                .ok_or(KeelDBError::TransactionNotActive(txn_id))?;
            txn.undo_log.clone()
        };

        for entry in undo_log.iter().rev() {
            let _latch = self.checkpoint_latch.read();
            self.apply_update(txn_id, entry.page_id, &entry.before_img)?;
        }

        let lsn = self.wal.append(LogRecord::abort(txn_id))?;
        if let Err(e) = self.wal.flush_to(lsn) {
            warn!("Abort record of {} is not durable yet: {}", txn_id, e);
        }

        self.finish(txn_id, TransactionState::Aborted);
        self.lock_manager.release_all(txn_id);
        info!("Aborted {} ({} writes undone)", txn_id, undo_log.len());

        Ok(())
    }

    pub fn rollback(&self, txn_id: TransactionID) -> Result<()> {
        self.abort(txn_id)
    }

    // Makes every page durable and trims the log to what active
    // transactions still need.
    pub fn checkpoint(&self) -> Result<LSN> {
        let _latch = self.checkpoint_latch.write();

        self.wal.flush()?;
        self.buffer_manager.flush_all_pages()?;

        let active = self.active_transactions();
        let lsn = self.wal.checkpoint(&active)?;
        self.wal.clear()?;

        Ok(lsn)
    }

    pub fn recover(&self) -> Result<RecoveryReport> {
        let active = self.active_transactions();
        if !active.is_empty() {
            return Err(KeelDBError::Other(format!(
                "cannot recover while {} transactions are active",
                active.len()
            )));
        }

        let _latch = self.checkpoint_latch.write();
        let report = RecoveryManager::new(&self.wal, &self.buffer_manager).recover()?;
        info!(
            "Recovered: {} redone, {} undone, {} losers",
            report.redone,
            report.undone,
            report.losers.len()
        );

        Ok(report)
    }

    // Active transactions and the last `finished_history` finished ones are
    // known. Older ids, and ids never handed out, give None.
    pub fn state(&self, txn_id: TransactionID) -> Option<TransactionState> {
        let table = self.transactions.lock();
        table
            .active
            .get(&txn_id)
            .map(|txn| txn.state)
            .or_else(|| table.finished.get(&txn_id).copied())
    }

    pub fn active_transactions(&self) -> Vec<TransactionID> {
        let table = self.transactions.lock();
        let mut active: Vec<TransactionID> = table.active.keys().copied().collect();
        active.sort();
        active
    }

    pub fn buffer_manager(&self) -> &Arc<BufferManager> {
        &self.buffer_manager
    }

    pub fn wal(&self) -> &Arc<WriteAheadLog> {
        &self.wal
    }

    pub fn lock_manager(&self) -> &LockManager {
        &self.lock_manager
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    fn ensure_active(&self, txn_id: TransactionID) -> Result<()> {
        self.isolation_level(txn_id).map(|_| ())
    }

    fn isolation_level(&self, txn_id: TransactionID) -> Result<IsolationLevel> {
        let table = self.transactions.lock();
        table
            .active
            .get(&txn_id)
            .filter(|txn| txn.is_active())
            .map(|txn| txn.isolation_level)
            .ok_or(KeelDBError::TransactionNotActive(txn_id))
    }

    // A deadlock victim is rolled back before the error reaches the caller
    fn lock_page(&self, txn_id: TransactionID, page_id: PageID, mode: LockMode, hold: bool) -> Result<()> {
        match self.lock_manager.acquire(txn_id, page_id, mode) {
            Ok(()) => {
                if hold {
                    if let Some(txn) = self.transactions.lock().active.get_mut(&txn_id) {
                        txn.add_locked_page(page_id);
                    }
                }
                Ok(())
            }
            Err(KeelDBError::DeadlockAborted(victim)) => {
                if let Err(e) = self.abort(txn_id) {
                    warn!("Could not roll back deadlock victim {}: {}", txn_id, e);
                }
                Err(KeelDBError::DeadlockAborted(victim))
            }
            Err(e) => Err(e),
        }
    }

    fn read_value(&self, page_id: PageID) -> Result<Vec<u8>> {
        let frame = self.buffer_manager.fetch_page(page_id)?;
        let value = frame.lock().value();
        self.buffer_manager.unpin_page(page_id, false)?;
        value
    }

    // Logs the change, then installs it under the record's LSN. Returns the
    // value it replaced.
    fn apply_update(&self, txn_id: TransactionID, page_id: PageID, value: &[u8]) -> Result<Vec<u8>> {
        let frame = self.buffer_manager.fetch_page(page_id)?;
        let result = {
            let mut frame_guard = frame.lock();
            frame_guard.value().and_then(|before_img| {
                let record = LogRecord::update(txn_id, page_id, before_img.clone(), value.to_vec());
                let lsn = self.wal.append(record)?;
                frame_guard.set_value(value, lsn)?;
                Ok(before_img)
            })
        };

        self.buffer_manager.unpin_page(page_id, result.is_ok())?;
        result
    }

    fn finish(&self, txn_id: TransactionID, state: TransactionState) {
        let mut table = self.transactions.lock();
        table.active.remove(&txn_id);
        if self.config.finished_history == 0 {
            return;
        }

        table.finished.insert(txn_id, state);
        table.finished_order.push_back(txn_id);
        while table.finished_order.len() > self.config.finished_history {
            if let Some(oldest) = table.finished_order.pop_front() {
                table.finished.remove(&oldest);
            }
        }
    }
}
