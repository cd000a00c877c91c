//! INSTALL manifest as a root handler.
//!
//! When no ROOT manifest can be mounted the installer's file list is the
//! next best name source: fewer files, but enough to keep the storage
//! browsable.

use tracing::debug;

use tact_formats::install::InstallManifest;

use crate::error::Result;
use crate::features;
use crate::root::{NameMap, RootHandler};
use crate::table::{CKeyTable, EntryId};

pub struct InstallRoot {
    names: NameMap,
}

impl InstallRoot {
    /// Build the fallback root from a parsed INSTALL manifest.
    pub fn from_manifest(manifest: &InstallManifest, table: &mut CKeyTable) -> Result<Self> {
        let mut names = NameMap::default();

        for entry in &manifest.entries {
            let Some(id) = table.find_by_ckey(&entry.ckey) else {
                continue;
            };
            {
                let central = table.get_mut(id);
                central.ref_count += 1;
                if central.content_size == crate::types::INVALID_SIZE {
                    central.content_size = entry.size;
                }
            }
            names.insert(&entry.path, id);
        }

        debug!("INSTALL root: {} names", names.len());
        Ok(Self { names })
    }
}

impl RootHandler for InstallRoot {
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
