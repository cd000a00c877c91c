//! Common types and sentinels used throughout the storage engine.

use std::fmt;

/// Sentinel for an unknown content or encoded size.
pub const INVALID_SIZE: u32 = u32::MAX;

/// Sentinel for an unknown storage offset.
pub const INVALID_OFFSET: u64 = u64::MAX;

/// Highest number of `data.NNN` archives a storage may reference.
pub const MAX_ARCHIVES: u32 = 0x100;

/// Default split of the packed 40-bit archive-and-offset field: the low 30
/// bits are the byte offset, the rest the archive index.
pub const DEFAULT_FILE_OFFSET_BITS: u32 = 30;

/// Location of an encoded span within an archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchiveLocation {
    /// Archive file number (`data.NNN`).
    pub archive_id: u16,
    /// Byte offset within the archive file.
    pub offset: u64,
    /// Encoded size of the span, frame headers included.
    pub size: u32,
}

impl ArchiveLocation {
    /// Pack into the storage-offset form kept on file entries.
    pub fn pack(&self, file_offset_bits: u32) -> u64 {
        (u64::from(self.archive_id) << file_offset_bits) | self.offset
    }

    /// Unpack a storage offset; `None` for the invalid sentinel.
    pub fn unpack(storage_offset: u64, size: u32, file_offset_bits: u32) -> Option<Self> {
        if storage_offset == INVALID_OFFSET {
            return None;
        }
        Some(Self {
            archive_id: (storage_offset >> file_offset_bits) as u16,
            offset: storage_offset & ((1 << file_offset_bits) - 1),
            size,
        })
    }
}

impl fmt::Display for ArchiveLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "data.{:03}+{:#x}({} bytes)",
            self.archive_id, self.offset, self.size
        )
    }
}

/// A named download tag, projected onto entry bitmasks by position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagInfo {
    pub name: String,
    pub value: u16,
}
