pub mod buffer;
pub mod common;
pub mod lock;
pub mod log_mod;
pub mod storage;
pub mod transaction;

pub use buffer::BufferManager;
pub use common::{DatabaseConfig, KeelDBError, PageID, Result, TransactionID, LSN};
pub use lock::{LockManager, LockMode};
pub use log_mod::{RecoveryReport, WriteAheadLog};
pub use storage::DBFiles;
pub use transaction::{IsolationLevel, TransactionManager, TransactionState};

use std::path::Path;
use std::sync::Arc;

use log::info;

use storage::{FileDiskStorage, FileMode, PosixFile};

pub struct Database {
    files: DBFiles,
    transaction_manager: Arc<TransactionManager>,
    last_recovery: RecoveryReport,
}

impl Database {
    // Creates the directory layout if needed and recovers whatever the last
    // run left in the log before handing out the transaction manager.
    pub fn open(db_path: &Path, config: DatabaseConfig) -> Result<Self> {
        let files = DBFiles::new(db_path)?;

        let data_file = PosixFile::new(&files.get_data_file_path(), FileMode::WRITE)?;
        let disk = Arc::new(FileDiskStorage::new(Box::new(data_file), config.page_size)?);
        let wal = Arc::new(WriteAheadLog::open(&files.get_log_file_path())?);

        let transaction_manager = TransactionManager::new(disk, wal, config)?;
        let last_recovery = transaction_manager.recover()?;
        info!(
            "Opened database at {}: {} log records replayed",
            files.get_db_directory().display(),
            last_recovery.records_scanned
        );

        Ok(Self {
            files,
            transaction_manager: Arc::new(transaction_manager),
            last_recovery,
        })
    }

    pub fn transaction_manager(&self) -> &Arc<TransactionManager> {
        &self.transaction_manager
    }

    pub fn last_recovery(&self) -> &RecoveryReport {
        &self.last_recovery
    }

    pub fn files(&self) -> &DBFiles {
        &self.files
    }

    // Flush all changes and leave a trimmed log behind
    pub fn close(self) -> Result<()> {
        self.transaction_manager.checkpoint()?;
        Ok(())
    }
}
