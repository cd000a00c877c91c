//! Overwatch root handler.
//!
//! The Overwatch root is plain text: a `#MD5|...` header line naming the
//! columns, then one `|`-separated row per file. This prober accepts
//! nothing without that header.

use tracing::debug;

use tact_formats::CKey;
use tact_formats::config::parser::parse_md5_string;

use crate::error::{CascError, Result};
use crate::features;
use crate::root::{NameMap, RootHandler};
use crate::table::{CKeyTable, EntryId};

pub struct OverwatchRoot {
    names: NameMap,
}

impl RootHandler for OverwatchRoot {
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
    let text = std::str::from_utf8(blob).map_err(|_| CascError::BadFormat("overwatch text"))?;
    let mut lines = text.lines();

    let header = lines.next().ok_or(CascError::BadFormat("overwatch header"))?;
    if !header.starts_with("#MD5") {
        return Err(CascError::BadFormat("overwatch header"));
    }

    // Column order varies between builds; FILENAME moves around.
    let name_column = header
        .trim_start_matches('#')
        .split('|')
        .position(|c| c.trim().eq_ignore_ascii_case("FILENAME"))
        .ok_or(CascError::BadFormat("overwatch filename column"))?;

    let mut root = OverwatchRoot {
        names: NameMap::default(),
    };

    for line in lines {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let fields: Vec<&str> = line.split('|').map(str::trim).collect();
        let (Some(md5), Some(name)) = (fields.first(), fields.get(name_column)) else {
            continue;
        };
        let Ok(md5) = parse_md5_string(md5) else {
            return Err(CascError::BadFormat("overwatch row"));
        };

        if let Some(id) = table.find_by_ckey(&CKey::new(md5)) {
            table.get_mut(id).ref_count += 1;
            root.names.insert(name, id);
        }
    }

    debug!("Overwatch root: {} names", root.names.len());
    Ok(Box::new(root))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DEFAULT_FILE_OFFSET_BITS;
    use tact_formats::EKey;

    #[test]
    fn parses_rows_by_header_columns() {
        let ckey = CKey::new([0xAB; 16]);
        let mut table = CKeyTable::with_capacity(4);
        table.insert_encoding(
            ckey,
            EKey::new([0xAC; 16]),
            10,
            None,
            DEFAULT_FILE_OFFSET_BITS,
        );

        let text = format!(
            "#MD5|CHUNK_ID|PRIORITY|MPRIORITY|FILENAME|INSTALLPATH\n{}|0|0|0|TactManifest/Win_SPWin_RCN_LenUS_speech.apm|x\n",
            ckey
        );
        let root = load(text.as_bytes(), &mut table).unwrap();
        assert!(
            root.lookup("TactManifest/Win_SPWin_RCN_LenUS_speech.apm")
                .is_some()
        );
    }

    #[test]
    fn rejects_headerless_text() {
        let mut table = CKeyTable::with_capacity(4);
        assert!(matches!(
            load(b"just some random text data here", &mut table),
            Err(CascError::BadFormat(_))
        ));
    }
}
