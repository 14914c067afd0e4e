use keeldb::{
    common::{KeelDBError, PageID, Result, LSN},
    storage::{page, DiskStorage, File, FileDiskStorage, FileMode, MemoryFile, PosixFile},
};

#[test]
fn test_file_resize() {
    let mut file = MemoryFile::new(FileMode::WRITE);

    // Initial size should be zero
    assert_eq!(file.size().unwrap(), 0);

    // Resize to 100 bytes
    file.resize(100).unwrap();
    assert_eq!(file.size().unwrap(), 100);

    // Write something and read it back
    let test_data = b"test data";
    file.write_block(test_data, 50).unwrap();

    let read_data = file.read_block(50, test_data.len()).unwrap();
    assert_eq!(read_data, test_data);
}

#[test]
fn test_memory_file_clones_share_bytes() -> Result<()> {
    let mut writer = MemoryFile::new(FileMode::WRITE);
    let mut reader = writer.clone();

    writer.write_block(b"shared", 0)?;
    assert_eq!(reader.read_block(0, 6)?, b"shared".to_vec());
    assert_eq!(reader.get_data(), b"shared".to_vec());

    Ok(())
}

#[test]
fn test_read_only_and_out_of_bounds() {
    let mut file = MemoryFile::with_data(vec![1, 2, 3], FileMode::READ);

    assert!(file.write_block(b"x", 0).is_err());
    assert!(file.resize(10).is_err());
    assert!(file.read_block(2, 5).is_err());
    assert_eq!(file.read_block(0, 3).unwrap(), vec![1, 2, 3]);
}

#[test]
fn test_posix_file_round_trip() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("blocks.dat");

    {
        let mut file = PosixFile::new(&path, FileMode::WRITE)?;
        file.write_block(b"hello world", 4)?;
        file.sync()?;
        assert_eq!(file.size()?, 15);
    }

    let mut file = PosixFile::new(&path, FileMode::READ)?;
    assert_eq!(file.read_block(4, 5)?, b"hello".to_vec());
    assert_eq!(file.read_block(0, 4)?, vec![0; 4]);
    assert!(file.write_block(b"nope", 0).is_err());

    let mut temp = PosixFile::make_temporary()?;
    temp.write_block(b"scratch", 0)?;
    assert_eq!(temp.read_block(0, 7)?, b"scratch".to_vec());

    Ok(())
}

#[test]
fn test_replace_contents_swaps_whole_file() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("wal.log");
    let staging = dir.path().join("wal.log.swap");

    // Left over from an earlier crash before the rename
    std::fs::write(&staging, b"stale half-written bytes")?;

    let mut file = PosixFile::new(&path, FileMode::WRITE)?;
    file.write_block(b"the old and much longer contents", 0)?;
    file.sync()?;

    file.replace_contents(b"fresh")?;
    assert_eq!(file.size()?, 5);
    assert_eq!(file.read_block(0, 5)?, b"fresh".to_vec());
    assert!(!staging.exists());

    // The handle keeps working after the swap
    file.write_block(b"!", 5)?;
    file.sync()?;

    let mut reopened = PosixFile::new(&path, FileMode::READ)?;
    assert_eq!(reopened.size()?, 6);
    assert_eq!(reopened.read_block(0, 6)?, b"fresh!".to_vec());
    assert!(reopened.replace_contents(b"nope").is_err());

    let mut temp = PosixFile::make_temporary()?;
    temp.write_block(b"scratch space", 0)?;
    temp.replace_contents(b"tmp")?;
    assert_eq!(temp.size()?, 3);
    assert_eq!(temp.read_block(0, 3)?, b"tmp".to_vec());

    let mut memory = MemoryFile::new(FileMode::WRITE);
    memory.write_block(b"longer bytes", 0)?;
    memory.replace_contents(b"short")?;
    assert_eq!(memory.get_data(), b"short".to_vec());

    Ok(())
}

#[test]
fn test_disk_storage_pages() -> Result<()> {
    let file = MemoryFile::new(FileMode::WRITE);
    let storage = FileDiskStorage::new(Box::new(file.clone()), 64)?;

    // Never written: a zeroed page
    assert_eq!(storage.read_page(PageID(3))?, vec![0; 64]);

    let mut data = vec![0u8; 64];
    page::write_value(&mut data, b"page two")?;
    page::set_page_lsn(&mut data, LSN(42));
    storage.write_page(PageID(2), &data)?;

    assert_eq!(file.get_data().len(), 3 * 64);
    let read_back = storage.read_page(PageID(2))?;
    assert_eq!(page::read_value(&read_back)?, b"page two".to_vec());
    assert_eq!(page::page_lsn(&read_back), LSN(42));

    assert!(matches!(
        storage.write_page(PageID(0), &[0u8; 10]),
        Err(KeelDBError::PageSizeMismatch(10, 64))
    ));

    // A page has to hold at least its header plus one byte
    assert!(matches!(
        FileDiskStorage::new(Box::new(file.clone()), page::PAGE_HEADER_SIZE),
        Err(KeelDBError::InvalidPageSize(12, 12))
    ));

    Ok(())
}

#[test]
fn test_page_value_layout() -> Result<()> {
    let mut data = vec![0u8; 32];
    assert_eq!(page::read_value(&data)?, Vec::<u8>::new());
    assert_eq!(page::page_lsn(&data), LSN::INVALID);
    assert_eq!(page::max_value_size(32), 32 - page::PAGE_HEADER_SIZE);

    page::write_value(&mut data, b"a longer value")?;
    page::write_value(&mut data, b"short")?;
    assert_eq!(page::read_value(&data)?, b"short".to_vec());
    // No leftovers from the longer value
    assert!(data[page::PAGE_HEADER_SIZE + 5..].iter().all(|&b| b == 0));

    assert!(matches!(
        page::write_value(&mut data, &[0u8; 21]),
        Err(KeelDBError::ValueTooLarge(21, 20))
    ));

    Ok(())
}
