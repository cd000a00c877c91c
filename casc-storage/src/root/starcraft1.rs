//! StarCraft (remastered) root handler.
//!
//! A listfile-shaped text root: each line is a file path followed by the
//! hex content key. The prober demands that shape from the very first line.

use tracing::debug;

use tact_formats::CKey;
use tact_formats::config::parser::parse_md5_string;

use crate::error::{CascError, Result};
use crate::features;
use crate::root::{NameMap, RootHandler};
use crate::table::{CKeyTable, EntryId};

pub struct Starcraft1Root {
    names: NameMap,
}

impl RootHandler for Starcraft1Root {
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
    let text = std::str::from_utf8(blob).map_err(|_| CascError::BadFormat("sc1 text"))?;

    let mut root = Starcraft1Root {
        names: NameMap::default(),
    };
    let mut rows = 0usize;

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        // "<path> <32 hex chars>", path may contain spaces.
        let Some((name, md5)) = line.rsplit_once(char::is_whitespace) else {
            return Err(CascError::BadFormat("sc1 row"));
        };
        let Ok(md5) = parse_md5_string(md5.trim()) else {
            return Err(CascError::BadFormat("sc1 row"));
        };
        rows += 1;

        if let Some(id) = table.find_by_ckey(&CKey::new(md5)) {
            table.get_mut(id).ref_count += 1;
            root.names.insert(name.trim(), id);
        }
    }

    if rows == 0 {
        return Err(CascError::BadFormat("sc1 empty"));
    }

    debug!("StarCraft root: {} names", root.names.len());
    Ok(Box::new(root))
}
