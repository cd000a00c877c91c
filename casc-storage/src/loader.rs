//! The internal-file loader: central entry in, decoded blob out.
//!
//! Everything the open pipeline reads after the index phase - ENCODING,
//! DOWNLOAD, INSTALL, the ROOT blob - comes through here, as do caller file
//! reads after open.

use tracing::debug;

use crate::archive::ArchiveSet;
use crate::error::{CascError, Result};
use crate::frame::{FrameCodec, FrameTable, decode_frames};
use crate::table::{CKeyEntry, CKeyTable, EntryId};
use crate::types::{ArchiveLocation, INVALID_SIZE};

/// Load and decode the file behind a central entry.
pub fn load_entry(
    archives: &ArchiveSet,
    table: &CKeyTable,
    id: EntryId,
    codec: &dyn FrameCodec,
    file_offset_bits: u32,
) -> Result<Vec<u8>> {
    let entry = table.get(id);
    load(archives, entry, codec, file_offset_bits)
}

/// As [`load_entry`], for a borrowed entry.
pub fn load(
    archives: &ArchiveSet,
    entry: &CKeyEntry,
    codec: &dyn FrameCodec,
    file_offset_bits: u32,
) -> Result<Vec<u8>> {
    let Some(location) =
        ArchiveLocation::unpack(entry.storage_offset, entry.encoded_size, file_offset_bits)
    else {
        // Metadata-only entries are listable but carry no local data.
        return Err(CascError::FileNotFound);
    };
    if location.size == INVALID_SIZE {
        return Err(CascError::FileNotFound);
    }

    debug!("loading {} ({location})", entry.ekey);

    let span = archives.read(&location)?;
    let table = FrameTable::parse(&span, Some(location.size))?;
    let content = decode_frames(&table, &span, codec)?;

    if entry.content_size != INVALID_SIZE && content.len() as u64 != u64::from(entry.content_size)
    {
        return Err(CascError::FileCorrupt("decoded size mismatch"));
    }

    Ok(content)
}
