//! ROOT manifest handlers.
//!
//! The ROOT manifest translates user-facing names into content keys, and
//! every product family ships its own format. The dispatcher sniffs the
//! blob and builds the matching handler; the handlers share one narrow
//! interface so the storage never cares which product it mounted.

mod diablo3;
mod install;
mod mndx;
mod overwatch;
mod starcraft1;
mod tvfs;
mod wow;

pub use install::InstallRoot;

use std::collections::HashMap;
use tracing::debug;

use tact_formats::CKey;

use crate::error::{CascError, Result};
use crate::table::{CKeyTable, EntryId};

/// Root blobs this small are MD5 placeholders, not manifests.
const MIN_ROOT_SIZE: usize = 32;

/// Name-to-entry map shared by every handler.
#[derive(Default)]
pub struct NameMap {
    entries: HashMap<String, EntryId>,
}

impl NameMap {
    pub fn insert(&mut self, name: &str, id: EntryId) {
        self.entries.insert(name.to_string(), id);
    }

    pub fn lookup(&self, name: &str) -> Option<EntryId> {
        self.entries.get(name).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, EntryId)> {
        self.entries.iter().map(|(name, id)| (name.as_str(), *id))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

/// The contract every root format honours.
pub trait RootHandler: Send + Sync {
    /// Register a name for an entry. Also used for the well-known build
    /// files after the manifest is mounted.
    fn insert(&mut self, name: &str, id: EntryId);

    /// Resolve a name registered by the manifest or by [`insert`].
    ///
    /// [`insert`]: RootHandler::insert
    fn lookup(&self, name: &str) -> Option<EntryId>;

    /// Resolve a file-data ID, for root formats that index by one.
    fn lookup_fid(&self, _fid: u32) -> Option<EntryId> {
        None
    }

    /// Every name mapping this handler knows, for [`copy_from`].
    ///
    /// [`copy_from`]: RootHandler::copy_from
    fn name_entries(&self) -> Box<dyn Iterator<Item = (&str, EntryId)> + '_>;

    /// Feature bits contributed by this root format.
    fn features(&self) -> u32;

    /// Whether a content key is in scope for the mounted locale set.
    fn in_scope(&self, _ckey: &CKey) -> bool {
        true
    }

    /// Adopt the name mappings of a handler that is being replaced.
    fn copy_from(&mut self, other: &dyn RootHandler) {
        for (name, id) in other.name_entries() {
            if self.lookup(name).is_none() {
                self.insert(name, id);
            }
        }
    }
}

/// What the dispatcher produced from one blob.
pub enum RootOutcome {
    Ready(Box<dyn RootHandler>),
    /// The handler mounted, but the build's original ROOT file should be
    /// parsed instead; the partial handler's names must be carried over.
    Reparse(Box<dyn RootHandler>),
}

/// Sniff a ROOT blob and build the matching handler.
///
/// Formats without a magic are probed in a fixed order; each prober must
/// verify its own format and fail with BAD_FORMAT on anything foreign.
pub fn dispatch(blob: &[u8], table: &mut CKeyTable, locale_mask: u32) -> Result<RootOutcome> {
    if blob.len() <= MIN_ROOT_SIZE {
        return Err(CascError::BadFormat("root blob too small"));
    }

    match &blob[..4] {
        b"MNDX" => {
            debug!("ROOT: MNDX");
            mndx::load(blob).map(RootOutcome::Ready)
        }
        b"TVFS" => {
            debug!("ROOT: TVFS");
            tvfs::load(blob, table)
        }
        b"TSFM" => {
            debug!("ROOT: WoW");
            wow::load(blob, table, locale_mask).map(RootOutcome::Ready)
        }
        [0xC4, 0xD0, 0x07, 0x80] => {
            debug!("ROOT: Diablo III");
            diablo3::load(blob, table).map(RootOutcome::Ready)
        }
        _ => {
            // No magic: Overwatch, then StarCraft I, then the headerless
            // WoW format.
            let probe = overwatch::load(blob, table);
            let probe = match probe {
                Err(CascError::BadFormat(_)) => starcraft1::load(blob, table),
                other => other,
            };
            let probe = match probe {
                Err(CascError::BadFormat(_)) => wow::load(blob, table, locale_mask),
                other => other,
            };
            probe.map(RootOutcome::Ready)
        }
    }
}
