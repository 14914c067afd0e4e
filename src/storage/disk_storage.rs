use parking_lot::Mutex;

use crate::common::{KeelDBError, PageID, Result};
use crate::storage::{page, File};

// Synchronous, page-granular access to durable storage
pub trait DiskStorage: Send + Sync {
    fn page_size(&self) -> usize;
    fn read_page(&self, page_id: PageID) -> Result<Vec<u8>>;
    fn write_page(&self, page_id: PageID, data: &[u8]) -> Result<()>;
}

// Pages live back to back in one file: page N starts at N * page_size.
// Reading past the end yields a zeroed page.
pub struct FileDiskStorage {
    file: Mutex<Box<dyn File>>,
    page_size: usize,
}

impl FileDiskStorage {
    pub fn new(file: Box<dyn File>, page_size: usize) -> Result<Self> {
        page::check_page_size(page_size)?;

        Ok(Self {
            file: Mutex::new(file),
            page_size,
        })
    }

    fn offset_of(&self, page_id: PageID) -> usize {
        page_id.0 as usize * self.page_size
    }
}

impl DiskStorage for FileDiskStorage {
    fn page_size(&self) -> usize {
        self.page_size
    }

    fn read_page(&self, page_id: PageID) -> Result<Vec<u8>> {
        let offset = self.offset_of(page_id);
        let mut file = self.file.lock();
        let file_size = file.size()?;

        if offset >= file_size {
            return Ok(vec![0; self.page_size]);
        }

        // A short trailing page is padded out
        let available = (file_size - offset).min(self.page_size);
        let mut data = file.read_block(offset, available)?;
        data.resize(self.page_size, 0);
        Ok(data)
    }

    fn write_page(&self, page_id: PageID, data: &[u8]) -> Result<()> {
        if data.len() != self.page_size {
            return Err(KeelDBError::PageSizeMismatch(data.len(), self.page_size));
        }

        let mut file = self.file.lock();
        file.write_block(data, self.offset_of(page_id))?;
        file.sync()
    }
}
