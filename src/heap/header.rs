//! Serialized heap header and free-list entry storage.
//!
//! The header occupies bytes `[0, HEADER_SIZE)` of the managed buffer. It is
//! the only thing that makes a buffer recognizable as a heap: reattaching is
//! a validated deserialization of this header, never a raw reinterpret.

use std::io::Cursor;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::heap::{HeapError, HeapResult};
use crate::memory::{FreeRange, RangeHandle, VirtualAddress};

/// Magic tag identifying a managed buffer ("VHEP")
pub(crate) const HEAP_MAGIC: u32 = 0x5648_4550;

/// Current header format version
pub(crate) const FORMAT_VERSION: u8 = 1;

/// Bytes reserved at offset 0 for the serialized header
pub(crate) const HEADER_SIZE: usize = 32;

/// Serialized size of one free-list entry (start + end)
pub(crate) const FREE_ENTRY_SIZE: usize = 8;

/// The deserialized heap header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct HeapHeader {
    pub object_id_counter: u64,
    pub free_list: RangeHandle,
    pub free_len: u32,
}

/// Read and validate the header at the start of `bytes`.
///
/// Returns `Ok(None)` for a fresh buffer (zero magic), which callers
/// bootstrap; anything else that is not a well-formed current-version header
/// is an error.
pub(crate) fn read_header(bytes: &[u8]) -> HeapResult<Option<HeapHeader>> {
    if bytes.len() < HEADER_SIZE {
        if bytes.iter().all(|&b| b == 0) {
            return Ok(None);
        }
        return Err(HeapError::InvalidHeader(format!(
            "buffer of {} bytes is too short for a header",
            bytes.len()
        )));
    }

    let mut cursor = Cursor::new(bytes);
    let magic = cursor.read_u32::<LittleEndian>()?;
    if magic == 0 {
        return Ok(None);
    }
    if magic != HEAP_MAGIC {
        return Err(HeapError::InvalidHeader(format!("bad magic 0x{:08X}", magic)));
    }

    let version = cursor.read_u8()?;
    if version != FORMAT_VERSION {
        return Err(HeapError::InvalidHeader(format!(
            "unsupported format version {}",
            version
        )));
    }
    let _minor = cursor.read_u8()?;
    let _reserved = cursor.read_u16::<LittleEndian>()?;

    let object_id_counter = cursor.read_u64::<LittleEndian>()?;
    let free_address = cursor.read_u32::<LittleEndian>()?;
    let free_size = cursor.read_u32::<LittleEndian>()?;
    let free_len = cursor.read_u32::<LittleEndian>()?;

    let free_list = RangeHandle::new(VirtualAddress::new(free_address), free_size);
    if !free_list.is_valid() {
        return Err(HeapError::InvalidHeader(
            "free-list storage handle is null".to_string(),
        ));
    }
    let storage_start = free_list.address().offset();
    let storage_end = storage_start + free_list.size() as usize;
    if storage_start < HEADER_SIZE || storage_end > bytes.len() {
        return Err(HeapError::InvalidHeader(format!(
            "free-list storage {}..{} is out of bounds",
            storage_start, storage_end
        )));
    }
    if free_len as usize * FREE_ENTRY_SIZE > free_list.size() as usize {
        return Err(HeapError::InvalidHeader(format!(
            "{} free ranges do not fit storage of {} bytes",
            free_len,
            free_list.size()
        )));
    }

    Ok(Some(HeapHeader {
        object_id_counter,
        free_list,
        free_len,
    }))
}

/// Serialize the header into the start of `bytes`
pub(crate) fn write_header(bytes: &mut [u8], header: &HeapHeader) -> HeapResult<()> {
    if bytes.len() < HEADER_SIZE {
        return Err(HeapError::InvalidHeader(format!(
            "buffer of {} bytes cannot hold a header",
            bytes.len()
        )));
    }

    let mut cursor = Cursor::new(&mut bytes[..HEADER_SIZE]);
    cursor.write_u32::<LittleEndian>(HEAP_MAGIC)?;
    cursor.write_u8(FORMAT_VERSION)?;
    cursor.write_u8(0)?; // Minor version
    cursor.write_u16::<LittleEndian>(0)?; // Reserved
    cursor.write_u64::<LittleEndian>(header.object_id_counter)?;
    cursor.write_u32::<LittleEndian>(header.free_list.address().offset() as u32)?;
    cursor.write_u32::<LittleEndian>(header.free_list.size())?;
    cursor.write_u32::<LittleEndian>(header.free_len)?;
    cursor.write_u32::<LittleEndian>(0)?; // Reserved

    Ok(())
}

/// Read `len` free-list entries from the entry storage region
pub(crate) fn read_entries(
    bytes: &[u8],
    address: VirtualAddress,
    len: u32,
) -> HeapResult<Vec<FreeRange>> {
    let start = address.offset();
    let end = start + len as usize * FREE_ENTRY_SIZE;
    if end > bytes.len() {
        return Err(HeapError::InvalidHeader(format!(
            "free-list entries {}..{} are out of bounds",
            start, end
        )));
    }

    let mut cursor = Cursor::new(&bytes[start..end]);
    let mut ranges = Vec::with_capacity(len as usize);
    for _ in 0..len {
        let range_start = cursor.read_u32::<LittleEndian>()?;
        let range_end = cursor.read_u32::<LittleEndian>()?;
        ranges.push(FreeRange::new(range_start, range_end));
    }

    Ok(ranges)
}

/// Serialize the free-list entries into the entry storage region
pub(crate) fn write_entries(
    bytes: &mut [u8],
    address: VirtualAddress,
    ranges: &[FreeRange],
) -> HeapResult<()> {
    let start = address.offset();
    let end = start + ranges.len() * FREE_ENTRY_SIZE;
    if end > bytes.len() {
        return Err(HeapError::InvalidHeader(format!(
            "free-list entries {}..{} are out of bounds",
            start, end
        )));
    }

    let mut cursor = Cursor::new(&mut bytes[start..end]);
    for range in ranges {
        cursor.write_u32::<LittleEndian>(range.start())?;
        cursor.write_u32::<LittleEndian>(range.end())?;
    }

    Ok(())
}

/// Structural validation of a deserialized free list: every range in bounds,
/// sorted ascending, pairwise non-overlapping and non-adjacent.
pub(crate) fn validate_ranges(ranges: &[FreeRange], buffer_len: usize) -> HeapResult<()> {
    for range in ranges {
        if range.is_empty() {
            return Err(HeapError::InvalidHeader(format!(
                "empty free range {:?}",
                range
            )));
        }
        if (range.start() as usize) < HEADER_SIZE || range.end() as usize > buffer_len {
            return Err(HeapError::InvalidHeader(format!(
                "free range {:?} is out of bounds",
                range
            )));
        }
    }
    for pair in ranges.windows(2) {
        if pair[0].end() >= pair[1].start() {
            return Err(HeapError::InvalidHeader(format!(
                "free ranges {:?} and {:?} are not sorted and separated",
                pair[0], pair[1]
            )));
        }
    }
    Ok(())
}
