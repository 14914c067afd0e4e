use env_logger::Builder;
use log::{info, LevelFilter};

use keeldb::{Database, DatabaseConfig, IsolationLevel, PageID};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    Builder::new()
        .filter_level(LevelFilter::Info)
        .init();

    info!("KeelDB transactional storage core");

    let db_path = std::env::temp_dir().join("keeldb-demo");
    let db = Database::open(&db_path, DatabaseConfig::default())?;
    let txn_manager = db.transaction_manager();

    // A committed write
    let txn_id = txn_manager.begin(IsolationLevel::Serializable)?;
    txn_manager.write(txn_id, PageID(0), b"hello")?;
    txn_manager.commit(txn_id)?;
    info!("Committed {}", txn_id);

    // An aborted write leaves the committed value in place
    let txn_id = txn_manager.begin(IsolationLevel::ReadCommitted)?;
    txn_manager.write(txn_id, PageID(0), b"discarded")?;
    txn_manager.abort(txn_id)?;

    let reader = txn_manager.begin_default()?;
    let value = txn_manager.read(reader, PageID(0))?;
    txn_manager.commit(reader)?;
    info!("Page 0 holds {:?}", String::from_utf8_lossy(&value));
    info!("Buffer pool: {}", txn_manager.buffer_manager().stats());

    let files_dir = db.files().get_db_directory().to_path_buf();
    db.close()?;

    // Clean up
    if files_dir.exists() {
        std::fs::remove_dir_all(&files_dir)?;
    }

    Ok(())
}
