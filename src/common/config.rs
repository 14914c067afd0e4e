use std::time::Duration;

use crate::transaction::IsolationLevel;

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub page_size: usize,
    pub buffer_pool_size: usize,
    // Commit triggers a checkpoint once the WAL grows past this
    pub max_wal_size_bytes: u64,
    // How long a blocked lock request sleeps before re-running deadlock detection
    pub deadlock_check_interval: Duration,
    pub default_isolation: IsolationLevel,
    // How many finished transactions `state()` still remembers the outcome of
    pub finished_history: usize,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            page_size: 4096,
            buffer_pool_size: 1000,
            max_wal_size_bytes: 64 * 1024 * 1024,
            deadlock_check_interval: Duration::from_millis(50),
            default_isolation: IsolationLevel::Serializable,
            finished_history: 1024,
        }
    }
}

impl DatabaseConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn with_buffer_pool_size(mut self, frames: usize) -> Self {
        self.buffer_pool_size = frames;
        self
    }

    pub fn with_max_wal_size_bytes(mut self, bytes: u64) -> Self {
        self.max_wal_size_bytes = bytes;
        self
    }

    pub fn with_deadlock_check_interval(mut self, interval: Duration) -> Self {
        self.deadlock_check_interval = interval;
        self
    }

    pub fn with_default_isolation(mut self, level: IsolationLevel) -> Self {
        self.default_isolation = level;
        self
    }

    pub fn with_finished_history(mut self, transactions: usize) -> Self {
        self.finished_history = transactions;
        self
    }
}
