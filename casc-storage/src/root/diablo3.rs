//! Diablo III root handler.
//!
//! The top level of a Diablo III root is a signature followed by named
//! directory entries, each pairing an asset package name with the content
//! key of its sub-manifest. The packages themselves are their own format;
//! mounting the directory level is enough to resolve well-known names and
//! walk into packages on demand.

use std::io::Cursor;
use tracing::debug;

use tact_formats::CKey;
use tact_formats::ioutils::ReadInt;

use crate::error::{CascError, Result};
use crate::features;
use crate::root::{NameMap, RootHandler};
use crate::table::{CKeyTable, EntryId};

/// Little-endian signature word.
pub const SIGNATURE: [u8; 4] = [0xC4, 0xD0, 0x07, 0x80];

pub struct Diablo3Root {
    names: NameMap,
}

impl RootHandler for Diablo3Root {
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

pub fn load(blob: &[u8], table: &mut CKeyTable) -> Result<Box<dyn RootHandler>> {
    let mut cursor = Cursor::new(blob);

    let mut signature = [0u8; 4];
    std::io::Read::read_exact(&mut cursor, &mut signature)?;
    if signature != SIGNATURE {
        return Err(CascError::BadFormat("diablo3 signature"));
    }

    let entry_count = cursor.read_u32le()?;
    if entry_count as usize * (16 + 1) > blob.len() {
        return Err(CascError::BadFormat("diablo3 entry count"));
    }

    let mut root = Diablo3Root {
        names: NameMap::default(),
    };

    for _ in 0..entry_count {
        let mut md5 = [0u8; 16];
        std::io::Read::read_exact(&mut cursor, &mut md5)?;
        let name = cursor.read_cstring()?;

        let ckey = CKey::new(md5);
        if let Some(id) = table.find_by_ckey(&ckey) {
            table.get_mut(id).ref_count += 1;
            root.names.insert(&name, id);
        }
    }

    debug!("Diablo III root: {} packages", root.names.len());
    Ok(Box::new(root))
}
