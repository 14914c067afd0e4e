//! On-page layout of a resource.
//!
//! ```text
//! 0        8             12
//! +--------+-------------+------------------+-----------+
//! | pageLSN| value length| value bytes      | zero fill |
//! +--------+-------------+------------------+-----------+
//! ```
//!
//! A zeroed page reads as an empty value with page LSN 0, so pages that were
//! never written need no initialisation.

use crate::common::{KeelDBError, Result, LSN};

pub const PAGE_HEADER_SIZE: usize = 12;

const LSN_RANGE: std::ops::Range<usize> = 0..8;
const LEN_RANGE: std::ops::Range<usize> = 8..12;

pub fn check_page_size(page_size: usize) -> Result<()> {
    if page_size <= PAGE_HEADER_SIZE {
        return Err(KeelDBError::InvalidPageSize(page_size, PAGE_HEADER_SIZE));
    }
    Ok(())
}

pub fn max_value_size(page_size: usize) -> usize {
    page_size.saturating_sub(PAGE_HEADER_SIZE)
}

pub fn page_lsn(data: &[u8]) -> LSN {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&data[LSN_RANGE]);
    LSN(u64::from_le_bytes(bytes))
}

pub fn set_page_lsn(data: &mut [u8], lsn: LSN) {
    data[LSN_RANGE].copy_from_slice(&lsn.0.to_le_bytes());
}

pub fn read_value(data: &[u8]) -> Result<Vec<u8>> {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&data[LEN_RANGE]);
    let len = u32::from_le_bytes(bytes) as usize;

    if len > max_value_size(data.len()) {
        return Err(KeelDBError::Other(format!(
            "Corrupt page: value length {} exceeds payload of {} bytes",
            len,
            max_value_size(data.len())
        )));
    }

    Ok(data[PAGE_HEADER_SIZE..PAGE_HEADER_SIZE + len].to_vec())
}

pub fn write_value(data: &mut [u8], value: &[u8]) -> Result<()> {
    let max = max_value_size(data.len());
    if value.len() > max {
        return Err(KeelDBError::ValueTooLarge(value.len(), max));
    }

    data[LEN_RANGE].copy_from_slice(&(value.len() as u32).to_le_bytes());
    data[PAGE_HEADER_SIZE..PAGE_HEADER_SIZE + value.len()].copy_from_slice(value);
    // Clear leftovers from a longer previous value
    for byte in &mut data[PAGE_HEADER_SIZE + value.len()..] {
        *byte = 0;
    }

    Ok(())
}
