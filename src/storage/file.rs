use std::fs::{File as StdFile, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::common::{KeelDBError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileMode {
    READ,
    WRITE,
}

// File abstraction - lets us swap between real files and in-memory for testing

pub trait File: Send {
    fn get_mode(&self) -> FileMode;
    fn size(&self) -> Result<usize>;
    fn resize(&mut self, new_size: usize) -> Result<()>;
    fn read_block(&mut self, offset: usize, size: usize) -> Result<Vec<u8>>;
    fn write_block(&mut self, block: &[u8], offset: usize) -> Result<()>;
    // Durability point: everything written so far survives a crash once this returns
    fn sync(&mut self) -> Result<()>;
    // Swaps the whole file for `contents` and makes the result durable. A
    // crash or error along the way leaves either the old bytes or the new
    // ones, never a mix.
    fn replace_contents(&mut self, contents: &[u8]) -> Result<()>;
}

fn read_only_error(action: &str) -> KeelDBError {
    KeelDBError::Other(format!("Cannot {} a read-only file", action))
}

pub struct PosixFile {
    mode: FileMode,
    file: StdFile,
    cached_size: usize,
    // None for unlinked temporaries
    path: Option<PathBuf>,
}

impl PosixFile {
    pub fn new(path: &Path, mode: FileMode) -> Result<Self> {
        let file = match mode {
            FileMode::READ => OpenOptions::new().read(true).open(path)?,
            FileMode::WRITE => OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .open(path)?,
        };

        let cached_size = file.metadata()?.len() as usize;

        Ok(Self {
            mode,
            file,
            cached_size,
            path: Some(path.to_path_buf()),
        })
    }

    pub fn make_temporary() -> Result<Self> {
        use std::env::temp_dir;
        use uuid::Uuid;

        let temp_path = temp_dir().join(format!("keeldb-temp-{}.tmp", Uuid::new_v4()));

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&temp_path)?;

        // Unlink right away - the handle stays valid until dropped
        std::fs::remove_file(&temp_path)?;

        Ok(Self {
            mode: FileMode::WRITE,
            file,
            cached_size: 0,
            path: None,
        })
    }

    fn staging_path(path: &Path) -> PathBuf {
        let mut name: OsString = path.as_os_str().to_owned();
        name.push(".swap");
        PathBuf::from(name)
    }
}

#[cfg(unix)]
fn sync_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        StdFile::open(parent)?.sync_all()?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn sync_parent_dir(_path: &Path) -> Result<()> {
    Ok(())
}

impl File for PosixFile {
    fn get_mode(&self) -> FileMode {
        self.mode
    }

    fn size(&self) -> Result<usize> {
        Ok(self.cached_size)
    }

    fn resize(&mut self, new_size: usize) -> Result<()> {
        if new_size == self.cached_size {
            return Ok(());
        }

        if self.mode == FileMode::READ {
            return Err(read_only_error("resize"));
        }

        self.file.set_len(new_size as u64)?;
        self.cached_size = new_size;

        Ok(())
    }

    fn read_block(&mut self, offset: usize, size: usize) -> Result<Vec<u8>> {
        if offset + size > self.cached_size {
            return Err(KeelDBError::Other(format!(
                "Attempt to read past end of file: offset={}, size={}, filesize={}",
                offset, size, self.cached_size
            )));
        }

        let mut buffer = vec![0u8; size];
        self.file.seek(SeekFrom::Start(offset as u64))?;
        self.file.read_exact(&mut buffer)?;

        Ok(buffer)
    }

    fn write_block(&mut self, block: &[u8], offset: usize) -> Result<()> {
        if self.mode == FileMode::READ {
            return Err(read_only_error("write to"));
        }

        self.file.seek(SeekFrom::Start(offset as u64))?;
        self.file.write_all(block)?;

        if offset + block.len() > self.cached_size {
            self.cached_size = offset + block.len();
        }

        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        self.file.flush()?;
        self.file.sync_data()?;
        Ok(())
    }

    fn replace_contents(&mut self, contents: &[u8]) -> Result<()> {
        if self.mode == FileMode::READ {
            return Err(read_only_error("replace"));
        }

        let path = match &self.path {
            Some(path) => path.clone(),
            None => {
                // Nobody can reopen an unlinked file after a crash
                self.file.set_len(0)?;
                self.cached_size = 0;
                self.write_block(contents, 0)?;
                return self.sync();
            }
        };

        // Stage the new bytes next to the file, then rename over it
        let staging = Self::staging_path(&path);
        {
            let mut staged = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&staging)?;
            staged.write_all(contents)?;
            staged.sync_all()?;
        }
        std::fs::rename(&staging, &path)?;
        sync_parent_dir(&path)?;

        self.file = OpenOptions::new().read(true).write(true).open(&path)?;
        self.cached_size = contents.len();

        Ok(())
    }
}

// In-memory file. Clones share the same bytes, so a test can drop every
// component that owns a handle ("crash") and reopen from another clone.
#[derive(Clone)]
pub struct MemoryFile {
    mode: FileMode,
    data: Arc<Mutex<Vec<u8>>>,
}

impl MemoryFile {
    pub fn new(mode: FileMode) -> Self {
        Self {
            mode,
            data: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_data(data: Vec<u8>, mode: FileMode) -> Self {
        Self {
            mode,
            data: Arc::new(Mutex::new(data)),
        }
    }

    pub fn get_data(&self) -> Vec<u8> {
        self.data.lock().clone()
    }
}

impl File for MemoryFile {
    fn get_mode(&self) -> FileMode {
        self.mode
    }

    fn size(&self) -> Result<usize> {
        Ok(self.data.lock().len())
    }

    fn resize(&mut self, new_size: usize) -> Result<()> {
        if self.mode == FileMode::READ {
            return Err(read_only_error("resize"));
        }

        self.data.lock().resize(new_size, 0);
        Ok(())
    }

    fn read_block(&mut self, offset: usize, size: usize) -> Result<Vec<u8>> {
        let data = self.data.lock();
        if offset + size > data.len() {
            return Err(KeelDBError::Other(format!(
                "Attempt to read past end of file: offset={}, size={}, filesize={}",
                offset,
                size,
                data.len()
            )));
        }

        Ok(data[offset..offset + size].to_vec())
    }

    fn write_block(&mut self, block: &[u8], offset: usize) -> Result<()> {
        if self.mode == FileMode::READ {
            return Err(read_only_error("write to"));
        }

        let mut data = self.data.lock();
        if offset + block.len() > data.len() {
            data.resize(offset + block.len(), 0);
        }

        data[offset..offset + block.len()].copy_from_slice(block);
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        Ok(())
    }

    fn replace_contents(&mut self, contents: &[u8]) -> Result<()> {
        if self.mode == FileMode::READ {
            return Err(read_only_error("replace"));
        }

        *self.data.lock() = contents.to_vec();
        Ok(())
    }
}
