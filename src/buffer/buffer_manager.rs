use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use log::{debug, trace};
use parking_lot::Mutex;

use crate::buffer::stats::{BufferStats, StatsSnapshot};
use crate::common::{KeelDBError, PageID, Result, LSN};
use crate::log_mod::WriteAheadLog;
use crate::storage::{page, DiskStorage};

pub struct BufferFrame {
    page_id: PageID,
    data: Vec<u8>,
    is_dirty: bool,
    pin_count: u32, // Reference count - can't evict while > 0
}

impl BufferFrame {
    pub fn new(page_id: PageID, page_size: usize) -> Self {
        Self::from_data(page_id, vec![0; page_size])
    }

    fn from_data(page_id: PageID, data: Vec<u8>) -> Self {
        Self {
            page_id,
            data,
            is_dirty: false,
            pin_count: 0,
        }
    }

    pub fn get_data(&self) -> &[u8] {
        &self.data
    }

    pub fn get_data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn set_dirty(&mut self, dirty: bool) {
        self.is_dirty = dirty;
    }

    pub fn is_dirty(&self) -> bool {
        self.is_dirty
    }

    pub fn pin(&mut self) {
        self.pin_count += 1;
    }

    pub fn unpin(&mut self) -> Result<()> {
        if self.pin_count == 0 {
            return Err(KeelDBError::Other(format!(
                "Cannot unpin {} with pin count 0",
                self.page_id
            )));
        }
        self.pin_count -= 1;
        Ok(())
    }

    pub fn pin_count(&self) -> u32 {
        self.pin_count
    }

    pub fn get_page_id(&self) -> PageID {
        self.page_id
    }

    // LSN of the last update applied to this page
    pub fn page_lsn(&self) -> LSN {
        page::page_lsn(&self.data)
    }

    pub fn value(&self) -> Result<Vec<u8>> {
        page::read_value(&self.data)
    }

    // Installs `value` as the page contents on behalf of the log record at `lsn`
    pub fn set_value(&mut self, value: &[u8], lsn: LSN) -> Result<()> {
        page::write_value(&mut self.data, value)?;
        page::set_page_lsn(&mut self.data, lsn);
        self.is_dirty = true;
        Ok(())
    }
}

struct BufferPool {
    frames: HashMap<PageID, Arc<Mutex<BufferFrame>>>,
    // Front is the least recently used page
    lru: VecDeque<PageID>,
}

impl BufferPool {
    fn touch(&mut self, page_id: PageID) {
        self.remove_from_lru(page_id);
        self.lru.push_back(page_id);
    }

    fn remove_from_lru(&mut self, page_id: PageID) {
        if let Some(pos) = self.lru.iter().position(|&p| p == page_id) {
            self.lru.remove(pos);
        }
    }
}

// Lock order: pool, then a frame, then the WAL. Never take the pool lock
// while holding a frame lock.
pub struct BufferManager {
    pool: Mutex<BufferPool>,
    disk: Arc<dyn DiskStorage>,
    wal: Option<Arc<WriteAheadLog>>,
    page_size: usize,
    capacity: usize,
    stats: BufferStats,
}

impl BufferManager {
    pub fn new(disk: Arc<dyn DiskStorage>, capacity: usize) -> Self {
        let page_size = disk.page_size();
        Self {
            pool: Mutex::new(BufferPool {
                frames: HashMap::with_capacity(capacity),
                lru: VecDeque::with_capacity(capacity),
            }),
            disk,
            wal: None,
            page_size,
            capacity,
            stats: BufferStats::new(),
        }
    }

    // Every page write-back first forces the log up to the page LSN
    pub fn with_wal(disk: Arc<dyn DiskStorage>, capacity: usize, wal: Arc<WriteAheadLog>) -> Self {
        let mut buffer_manager = Self::new(disk, capacity);
        buffer_manager.wal = Some(wal);
        buffer_manager
    }

    // Returns the page pinned; callers must hand it back with unpin_page
    pub fn fetch_page(&self, page_id: PageID) -> Result<Arc<Mutex<BufferFrame>>> {
        let mut pool = self.pool.lock();

        // Fast path: page already in buffer
        if let Some(frame) = pool.frames.get(&page_id).cloned() {
            frame.lock().pin();
            pool.touch(page_id);
            BufferStats::bump(&self.stats.cache_hits);
            return Ok(frame);
        }

        BufferStats::bump(&self.stats.cache_misses);

        if pool.frames.len() >= self.capacity {
            self.evict_page(&mut pool)?;
        }

        let data = self.disk.read_page(page_id)?;
        if data.len() != self.page_size {
            return Err(KeelDBError::PageSizeMismatch(data.len(), self.page_size));
        }
        BufferStats::bump(&self.stats.pages_read);

        let mut frame = BufferFrame::from_data(page_id, data);
        frame.pin();
        let frame = Arc::new(Mutex::new(frame));

        pool.frames.insert(page_id, Arc::clone(&frame));
        pool.lru.push_back(page_id);
        trace!("Loaded {} into the buffer", page_id);

        Ok(frame)
    }

    pub fn unpin_page(&self, page_id: PageID, is_dirty: bool) -> Result<()> {
        let pool = self.pool.lock();
        let frame = pool
            .frames
            .get(&page_id)
            .ok_or_else(|| KeelDBError::Other(format!("Cannot unpin {}: not in buffer", page_id)))?;

        let mut frame = frame.lock();
        if is_dirty {
            frame.set_dirty(true);
        }
        frame.unpin()
    }

    pub fn mark_dirty(&self, page_id: PageID) {
        let pool = self.pool.lock();
        if let Some(frame) = pool.frames.get(&page_id) {
            frame.lock().set_dirty(true);
        }
    }

    pub fn flush_page(&self, page_id: PageID) -> Result<()> {
        let pool = self.pool.lock();
        if let Some(frame) = pool.frames.get(&page_id) {
            let mut frame = frame.lock();
            if frame.is_dirty() {
                self.write_back(&mut frame)?;
            }
        }

        Ok(())
    }

    pub fn flush_all_pages(&self) -> Result<()> {
        let pool = self.pool.lock();
        for frame in pool.frames.values() {
            let mut frame = frame.lock();
            if frame.is_dirty() {
                self.write_back(&mut frame)?;
            }
        }

        Ok(())
    }

    pub fn is_cached(&self, page_id: PageID) -> bool {
        self.pool.lock().frames.contains_key(&page_id)
    }

    pub fn is_dirty(&self, page_id: PageID) -> bool {
        let pool = self.pool.lock();
        pool.frames
            .get(&page_id)
            .map(|frame| frame.lock().is_dirty())
            .unwrap_or(false)
    }

    // Least recently used first
    pub fn cached_pages(&self) -> Vec<PageID> {
        self.pool.lock().lru.iter().copied().collect()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn get_page_size(&self) -> usize {
        self.page_size
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn write_back(&self, frame: &mut BufferFrame) -> Result<()> {
        // Write-ahead rule: the record that produced this page image goes first
        if let Some(wal) = &self.wal {
            wal.flush_to(frame.page_lsn())?;
        }

        self.disk.write_page(frame.get_page_id(), frame.get_data())?;
        frame.set_dirty(false);
        BufferStats::bump(&self.stats.pages_written);

        Ok(())
    }

    fn evict_page(&self, pool: &mut BufferPool) -> Result<()> {
        let victim = pool.lru.iter().copied().find(|page_id| {
            pool.frames
                .get(page_id)
                .map(|frame| frame.lock().pin_count() == 0)
                .unwrap_or(false)
        });

        let page_id = victim.ok_or(KeelDBError::OutOfFrames)?;

        if let Some(frame) = pool.frames.get(&page_id) {
            let mut frame = frame.lock();
            if frame.is_dirty() {
                self.write_back(&mut frame)?;
            }
        }

        pool.frames.remove(&page_id);
        pool.remove_from_lru(page_id);
        BufferStats::bump(&self.stats.evictions);
        debug!("Evicted {}", page_id);

        Ok(())
    }
}
