use std::sync::Arc;

use keeldb::{
    common::{DatabaseConfig, PageID},
    storage::{File, FileDiskStorage, FileMode, MemoryFile},
    IsolationLevel, TransactionManager, TransactionState, WriteAheadLog,
};

#[test]
fn test_file_operations() {
    // Create a memory file and test basic operations
    let mut file = MemoryFile::new(FileMode::WRITE);

    // Test writing
    file.write_block(b"hello world", 0).unwrap();
    assert_eq!(file.size().unwrap(), 11);

    // Test reading
    let data = file.read_block(0, 5).unwrap();
    assert_eq!(&data, b"hello");
}

#[test]
fn test_transaction_lifecycle() {
    // Set up necessary components
    let config = DatabaseConfig::default();
    let disk = Arc::new(FileDiskStorage::new(
        Box::new(MemoryFile::new(FileMode::WRITE)),
        config.page_size,
    )
    .unwrap());
    let wal = Arc::new(WriteAheadLog::new(Box::new(MemoryFile::new(FileMode::WRITE))).unwrap());
    let txn_manager = TransactionManager::new(disk, wal, config).unwrap();

    // Start a transaction
    let txn_id = txn_manager.begin(IsolationLevel::Serializable).unwrap();
    assert_eq!(txn_manager.active_transactions(), vec![txn_id]);
    txn_manager.write(txn_id, PageID(0), b"hello").unwrap();

    // Commit it
    txn_manager.commit(txn_id).unwrap();
    assert_eq!(txn_manager.state(txn_id), Some(TransactionState::Committed));
    assert!(txn_manager.active_transactions().is_empty());
}
