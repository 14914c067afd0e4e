mod db_files;
mod disk_storage;
mod file;
pub mod page;

pub use db_files::DBFiles;
pub use disk_storage::{DiskStorage, FileDiskStorage};
pub use file::{File, FileMode, MemoryFile, PosixFile};
