mod buffer_manager;
mod stats;

pub use buffer_manager::{BufferFrame, BufferManager};
pub use stats::{BufferStats, StatsSnapshot};
