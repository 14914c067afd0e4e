use thiserror::Error;

use super::TransactionID;

#[derive(Debug, Error)]
pub enum KeelDBError {
    #[error("Lock request queued, not yet granted")]
    WouldBlock,

    #[error("{0} aborted to break a deadlock")]
    DeadlockAborted(TransactionID),

    #[error("IO error: {0}")]
    IOError(#[from] std::io::Error),

    #[error("Recovery error: {0}")]
    RecoveryError(String),

    #[error("Out of frames: every buffer frame is pinned")]
    OutOfFrames,

    #[error("{0} is not active")]
    TransactionNotActive(TransactionID),

    #[error("Value too large: got {0} bytes, max {1}")]
    ValueTooLarge(usize, usize),

    #[error("Page size mismatch: got {0} bytes, expected {1}")]
    PageSizeMismatch(usize, usize),

    #[error("Invalid page size {0}: a page must be larger than its {1}-byte header")]
    InvalidPageSize(usize, usize),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Other error: {0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, KeelDBError>;
