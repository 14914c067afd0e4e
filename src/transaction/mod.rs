mod transaction;
mod transaction_manager;

pub use transaction::{IsolationLevel, Transaction, TransactionState, UndoEntry};
pub use transaction_manager::TransactionManager;
