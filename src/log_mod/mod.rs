mod log_record;
mod recovery;
mod write_ahead_log;

pub use log_record::{LogRecord, LogRecordType};
pub use recovery::{RecoveryManager, RecoveryReport};
pub use write_ahead_log::WriteAheadLog;
