//! TVFS (TACT virtual filesystem) root handler.
//!
//! A TVFS manifest carries three tables: paths, VFS entries pointing into
//! the container-file table, and container-file entries naming the encoded
//! key of each span. Mounting resolves every file path to a central entry
//! through its truncated encoded key.

use std::io::{Cursor, Read, Seek, SeekFrom};
use tracing::{debug, trace, warn};

use tact_formats::ioutils::ReadInt;

use crate::error::{CascError, Result};
use crate::features;
use crate::root::{NameMap, RootHandler, RootOutcome};
use crate::table::{CKeyTable, EntryId};

/// FileManifestFlags.
mod flags {
    /// Content keys are included in container records.
    pub const INCLUDE_CKEY: u8 = 0x01;
    /// Paths are case-insensitive and stored lowercase.
    pub const LOWERCASE: u8 = 0x08;
}

/// Fixed-size TVFS header.
#[derive(Debug, Clone)]
#[allow(dead_code)]
struct TvfsHeader {
    version: u8,
    header_size: u8,
    ekey_size: u8,
    patch_key_size: u8,
    flags: u8,
    path_table_offset: u64,
    path_table_size: u64,
    vfs_table_offset: u64,
    vfs_table_size: u64,
    cft_table_offset: u64,
    cft_table_size: u64,
}

impl TvfsHeader {
    fn parse<R: Read>(reader: &mut R) -> Result<Self> {
        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        if &magic != b"TVFS" {
            return Err(CascError::BadFormat("tvfs magic"));
        }

        let version = reader.read_u8()?;
        if version != 1 {
            return Err(CascError::BadFormat("tvfs version"));
        }

        let header_size = reader.read_u8()?;
        let ekey_size = reader.read_u8()?;
        let patch_key_size = reader.read_u8()?;
        let flags = reader.read_u8()?;
        if ekey_size as usize != tact_formats::keys::EKEY_PREFIX_SIZE {
            return Err(CascError::BadFormat("tvfs ekey size"));
        }

        let path_table_offset = reader.read_u40be()?;
        let path_table_size = reader.read_u40be()?;
        let vfs_table_offset = reader.read_u40be()?;
        let vfs_table_size = reader.read_u40be()?;
        let cft_table_offset = reader.read_u40be()?;
        let cft_table_size = reader.read_u40be()?;

        Ok(Self {
            version,
            header_size,
            ekey_size,
            patch_key_size,
            flags,
            path_table_offset,
            path_table_size,
            vfs_table_offset,
            vfs_table_size,
            cft_table_offset,
            cft_table_size,
        })
    }
}

/// One VFS file entry: a path and its container spans.
#[derive(Debug)]
struct VfsEntry {
    span_index: u32,
    span_count: u32,
    path_index: u32,
}

/// One container-file entry.
#[derive(Debug)]
struct CftEntry {
    ekey: [u8; 16],
    file_size: u64,
}

pub struct TvfsRoot {
    names: NameMap,
    lowercase: bool,
}

impl RootHandler for TvfsRoot {
    fn insert(&mut self, name: &str, id: EntryId) {
        self.names.insert(name, id);
    }

    fn lookup(&self, name: &str) -> Option<EntryId> {
        if self.lowercase {
            self.names.lookup(&name.to_ascii_lowercase())
        } else {
            self.names.lookup(name)
        }
    }

    fn name_entries(&self) -> Box<dyn Iterator<Item = (&str, EntryId)> + '_> {
        Box::new(self.names.iter())
    }

    fn features(&self) -> u32 {
        features::FILE_NAMES
    }
}

/// Parse and mount a TVFS root blob.
///
/// Dual-root storages wrap the product's real ROOT manifest as a file named
/// `root` at the top of the tree; mounting one of those asks the dispatcher
/// to reparse with the build's ROOT key instead.
pub fn load(blob: &[u8], table: &mut CKeyTable) -> Result<RootOutcome> {
    let mut cursor = Cursor::new(blob);
    let header = TvfsHeader::parse(&mut cursor)?;
    trace!(
        "TVFS header: flags={:#04x} paths={}B vfs={}B cft={}B",
        header.flags, header.path_table_size, header.vfs_table_size, header.cft_table_size
    );

    cursor.seek(SeekFrom::Start(header.path_table_offset))?;
    let paths = parse_path_table(&mut cursor, header.path_table_size as usize)?;

    cursor.seek(SeekFrom::Start(header.vfs_table_offset))?;
    let vfs = parse_vfs_table(&mut cursor, header.vfs_table_size as usize)?;

    cursor.seek(SeekFrom::Start(header.cft_table_offset))?;
    let cft = parse_cft_table(&mut cursor, header.cft_table_size as usize)?;

    let mut root = TvfsRoot {
        names: NameMap::default(),
        lowercase: header.flags & flags::LOWERCASE != 0,
    };
    let mut wraps_inner_root = false;

    for entry in &vfs {
        let Some(path) = paths.get(entry.path_index as usize) else {
            warn!("TVFS entry references path {} out of range", entry.path_index);
            continue;
        };

        if entry.span_count == 0 {
            continue;
        }
        let Some(span) = cft.get(entry.span_index as usize) else {
            warn!("TVFS entry references span {} out of range", entry.span_index);
            continue;
        };

        let prefix = tact_formats::EKey::new(span.ekey).prefix();
        let Some(id) = table.find_by_ekey_prefix(&prefix) else {
            trace!("TVFS: {path}: ekey not in storage");
            continue;
        };

        {
            let central = table.get_mut(id);
            central.ref_count += 1;
            if central.content_size == crate::types::INVALID_SIZE {
                central.content_size = span.file_size as u32;
            }
            if entry.span_count > 1 {
                central.span_count = entry.span_count.min(0xFF) as u8;
            }
        }

        if path.eq_ignore_ascii_case("root") {
            wraps_inner_root = true;
        }
        root.names.insert(path, id);
    }

    debug!("TVFS: mounted {} names", root.names.len());

    if wraps_inner_root {
        debug!("TVFS: tree wraps an inner ROOT manifest, requesting reparse");
        return Ok(RootOutcome::Reparse(Box::new(root)));
    }
    Ok(RootOutcome::Ready(Box::new(root)))
}

/// Path table: length-prefixed path strings, NUL ends the table.
fn parse_path_table<R: Read>(reader: &mut R, size: usize) -> Result<Vec<String>> {
    let mut paths = Vec::new();
    let mut consumed = 0usize;

    while consumed < size {
        let len = reader.read_u8()? as usize;
        consumed += 1;
        if len == 0 {
            break;
        }

        let mut bytes = vec![0u8; len];
        reader.read_exact(&mut bytes)?;
        consumed += len;

        let path =
            String::from_utf8(bytes).map_err(|_| CascError::BadFormat("tvfs path encoding"))?;
        paths.push(path);
    }

    Ok(paths)
}

/// VFS table: per entry a type byte, span index and count, path index.
fn parse_vfs_table<R: Read>(reader: &mut R, size: usize) -> Result<Vec<VfsEntry>> {
    let mut entries = Vec::new();
    let mut consumed = 0usize;

    while consumed < size {
        let type_byte = reader.read_u8()?;
        consumed += 1;

        // Only plain files participate in the mount.
        let is_file = type_byte & 0x03 == 0;

        let (span_index, span_count) = if is_file {
            (
                read_varint(reader, &mut consumed)?,
                read_varint(reader, &mut consumed)?,
            )
        } else {
            (0, 0)
        };
        let path_index = read_varint(reader, &mut consumed)?;

        if is_file {
            entries.push(VfsEntry {
                span_index,
                span_count,
                path_index,
            });
        }
    }

    Ok(entries)
}

/// Container-file table: encoded key and 40-bit size per span.
fn parse_cft_table<R: Read>(reader: &mut R, size: usize) -> Result<Vec<CftEntry>> {
    const ENTRY_SIZE: usize = 16 + 5;
    if size % ENTRY_SIZE != 0 {
        return Err(CascError::BadFormat("tvfs cft size"));
    }

    let mut entries = Vec::with_capacity(size / ENTRY_SIZE);
    for _ in 0..size / ENTRY_SIZE {
        let mut ekey = [0u8; 16];
        reader.read_exact(&mut ekey)?;
        let file_size = reader.read_u40be()?;
        entries.push(CftEntry { ekey, file_size });
    }

    Ok(entries)
}

fn read_varint<R: Read>(reader: &mut R, consumed: &mut usize) -> Result<u32> {
    let mut value = 0u32;
    let mut shift = 0;
    for _ in 0..5 {
        let byte = reader.read_u8()?;
        *consumed += 1;
        value |= u32::from(byte & 0x7F) << shift;
        if byte & 0x80 == 0 {
            break;
        }
        shift += 7;
    }
    Ok(value)
}
