#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use keeldb::{
    common::{DatabaseConfig, PageID, Result, TransactionID},
    storage::{FileDiskStorage, FileMode, MemoryFile},
    IsolationLevel, TransactionManager, WriteAheadLog,
};

pub const PAGE_SIZE: usize = 256;

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn test_config() -> DatabaseConfig {
    DatabaseConfig::default()
        .with_page_size(PAGE_SIZE)
        .with_buffer_pool_size(16)
        .with_deadlock_check_interval(Duration::from_millis(10))
}

// The data file and the log of one database. Every handle shares the same
// bytes, so dropping a TransactionManager and reopening from here behaves
// like a crash: only what reached the files survives.
#[derive(Clone)]
pub struct MemoryDisk {
    pub data: MemoryFile,
    pub log: MemoryFile,
}

impl MemoryDisk {
    pub fn new() -> Self {
        Self {
            data: MemoryFile::new(FileMode::WRITE),
            log: MemoryFile::new(FileMode::WRITE),
        }
    }

    pub fn open(&self, config: DatabaseConfig) -> Result<TransactionManager> {
        let storage = Arc::new(FileDiskStorage::new(Box::new(self.data.clone()), config.page_size)?);
        let wal = Arc::new(WriteAheadLog::new(Box::new(self.log.clone()))?);
        TransactionManager::new(storage, wal, config)
    }
}

// Reads a page in a throwaway transaction
pub fn read_committed_value(txn_manager: &TransactionManager, page_id: PageID) -> Result<Vec<u8>> {
    let txn_id = txn_manager.begin(IsolationLevel::ReadCommitted)?;
    let value = txn_manager.read(txn_id, page_id)?;
    txn_manager.commit(txn_id)?;
    Ok(value)
}

pub fn write_and_commit(txn_manager: &TransactionManager, page_id: PageID, value: &[u8]) -> Result<TransactionID> {
    let txn_id = txn_manager.begin(IsolationLevel::Serializable)?;
    txn_manager.write(txn_id, page_id, value)?;
    txn_manager.commit(txn_id)?;
    Ok(txn_id)
}
