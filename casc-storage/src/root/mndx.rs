//! MNDX root handler (early Heroes of the Storm).
//!
//! MNDX wraps its file table in MAR search structures built for glob
//! matching; that machinery is a subsystem of its own. This handler
//! validates the container and exposes the shared name map so well-known
//! files remain reachable; path search over the MAR trees is reported as
//! unsupported rather than guessed at.

use std::io::Cursor;
use tracing::debug;

use tact_formats::ioutils::ReadInt;

use crate::error::{CascError, Result};
use crate::features;
use crate::root::{NameMap, RootHandler};
use crate::table::EntryId;

/// Highest header version ever shipped.
const MAX_HEADER_VERSION: u32 = 2;

/// Number of MAR files in every known MNDX root.
const MAR_COUNT: u32 = 3;

pub struct MndxRoot {
    names: NameMap,
    format_version: u32,
}

impl MndxRoot {
    pub fn format_version(&self) -> u32 {
        self.format_version
    }
}

impl RootHandler for MndxRoot {
    fn insert(&mut self, name: &str, id: EntryId) {
        self.names.insert(name, id);
    }

    fn lookup(&self, name: &str) -> Option<EntryId> {
        self.names.lookup(name)
    }

    fn name_entries(&self) -> Box<dyn Iterator<Item = (&str, EntryId)> + '_> {
        Box::new(self.names.iter())
    }

    fn features(&self) -> u32 {
        features::FILE_NAMES
    }
}

pub fn load(blob: &[u8]) -> Result<Box<dyn RootHandler>> {
    let mut cursor = Cursor::new(blob);

    let mut magic = [0u8; 4];
    std::io::Read::read_exact(&mut cursor, &mut magic)?;
    if &magic != b"MNDX" {
        return Err(CascError::BadFormat("mndx magic"));
    }

    let header_version = cursor.read_u32le()?;
    let format_version = cursor.read_u32le()?;
    if header_version > MAX_HEADER_VERSION {
        return Err(CascError::BadFormat("mndx header version"));
    }

    // Header version 2 prefixes the offset table with its own size fields.
    if header_version == 2 {
        let _build = cursor.read_u32le()?;
        let _header_size = cursor.read_u32le()?;
    }

    let mar_offset = cursor.read_u32le()?;
    let mar_count = cursor.read_u32le()?;
    if mar_count != MAR_COUNT || mar_offset as usize >= blob.len() {
        return Err(CascError::BadFormat("mndx mar table"));
    }

    debug!("MNDX root: format {format_version}, {mar_count} MAR files (search not mounted)");
    Ok(Box::new(MndxRoot {
        names: NameMap::default(),
        format_version,
    }))
}
