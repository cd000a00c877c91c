//! The central file table.
//!
//! Every file the storage knows about has exactly one entry here, built up
//! during load from ENCODING, DOWNLOAD, the build configuration and the
//! root handler. The table is append-only while loading and frozen
//! afterwards; entries are addressed by stable [`EntryId`] handles, and two
//! side maps provide lookup by content key and by truncated encoded key.

use std::collections::HashMap;
use std::fmt;
use std::ops::{BitOr, BitOrAssign};

use tact_formats::{CKey, EKey, EKeyPrefix};
use tracing::trace;

use crate::types::{ArchiveLocation, INVALID_OFFSET, INVALID_SIZE};

/// Per-entry flag bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EntryFlags(u16);

impl EntryFlags {
    /// The content key is known.
    pub const HAS_CKEY: EntryFlags = EntryFlags(0x0001);
    /// The encoded key is known in full.
    pub const HAS_EKEY: EntryFlags = EntryFlags(0x0002);
    /// Only the nine-byte encoded key prefix is known.
    pub const HAS_EKEY_PARTIAL: EntryFlags = EntryFlags(0x0004);
    /// The entry came from the ENCODING manifest.
    pub const IN_ENCODING: EntryFlags = EntryFlags(0x0008);
    /// The entry came from the DOWNLOAD manifest.
    pub const IN_DOWNLOAD: EntryFlags = EntryFlags(0x0010);
    /// The entry is one of the build configuration's well-known files.
    pub const IN_BUILD: EntryFlags = EntryFlags(0x0020);
    /// The entry is the PATCH file, which never sits in a local archive.
    pub const FILE_PATCH: EntryFlags = EntryFlags(0x0040);

    pub const fn empty() -> Self {
        EntryFlags(0)
    }

    pub fn contains(&self, other: EntryFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn intersects(&self, other: EntryFlags) -> bool {
        self.0 & other.0 != 0
    }

    pub fn remove(&mut self, other: EntryFlags) {
        self.0 &= !other.0;
    }
}

impl BitOr for EntryFlags {
    type Output = EntryFlags;

    fn bitor(self, rhs: Self) -> Self::Output {
        EntryFlags(self.0 | rhs.0)
    }
}

impl BitOrAssign for EntryFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for EntryFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#06x}", self.0)
    }
}

/// One central file entry (spec: unified CKey table entry).
#[derive(Debug, Clone)]
pub struct CKeyEntry {
    /// Content key; all-zero when unknown.
    pub ckey: CKey,
    /// Encoded key; may be a zero-padded prefix when HAS_EKEY_PARTIAL.
    pub ekey: EKey,
    /// Packed archive-and-offset, [`INVALID_OFFSET`] when unknown.
    pub storage_offset: u64,
    /// Decoded size, [`INVALID_SIZE`] when unknown.
    pub content_size: u32,
    /// Encoded size including frame headers, [`INVALID_SIZE`] when unknown.
    pub encoded_size: u32,
    /// Bit *i* set iff the file belongs to tag *i* of the download tag
    /// vector. Tags past 64 are not representable and dropped.
    pub tag_bitmask: u64,
    /// Download priority.
    pub priority: u8,
    /// Number of distinct name references to this entry.
    pub ref_count: u32,
    /// 1 for normal files; reserved for multi-span files.
    pub span_count: u8,
    pub flags: EntryFlags,
}

impl CKeyEntry {
    fn empty() -> Self {
        Self {
            ckey: CKey::default(),
            ekey: EKey::default(),
            storage_offset: INVALID_OFFSET,
            content_size: INVALID_SIZE,
            encoded_size: INVALID_SIZE,
            tag_bitmask: 0,
            priority: 0,
            ref_count: 0,
            span_count: 1,
            flags: EntryFlags::empty(),
        }
    }

    /// Whether the entry stands for actual file content rather than a bare
    /// key sighting.
    pub fn is_file(&self) -> bool {
        self.flags
            .intersects(EntryFlags::HAS_CKEY | EntryFlags::HAS_EKEY)
            && (self.content_size != INVALID_SIZE || self.encoded_size != INVALID_SIZE)
    }

    /// Whether local archive data exists for this entry.
    pub fn is_local(&self) -> bool {
        self.storage_offset != INVALID_OFFSET
    }
}

/// Stable handle into the central table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntryId(u32);

impl EntryId {
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

/// The central table plus its two lookup maps.
pub struct CKeyTable {
    entries: Vec<CKeyEntry>,
    ckey_map: HashMap<CKey, EntryId>,
    ekey_map: HashMap<EKeyPrefix, EntryId>,
}

impl CKeyTable {
    /// Reserve for the estimated file count up front; the entry vector must
    /// not need to grow during the hot ENCODING walk.
    pub fn with_capacity(estimate: usize) -> Self {
        Self {
            entries: Vec::with_capacity(estimate),
            ckey_map: HashMap::with_capacity(estimate),
            ekey_map: HashMap::with_capacity(estimate),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, id: EntryId) -> &CKeyEntry {
        &self.entries[id.index()]
    }

    pub fn get_mut(&mut self, id: EntryId) -> &mut CKeyEntry {
        &mut self.entries[id.index()]
    }

    pub fn find_by_ckey(&self, ckey: &CKey) -> Option<EntryId> {
        self.ckey_map.get(ckey).copied()
    }

    /// Lookup by the nine-byte prefix of a full encoded key.
    pub fn find_by_ekey(&self, ekey: &EKey) -> Option<EntryId> {
        self.ekey_map.get(&ekey.prefix()).copied()
    }

    pub fn find_by_ekey_prefix(&self, prefix: &EKeyPrefix) -> Option<EntryId> {
        self.ekey_map.get(prefix).copied()
    }

    /// Entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (EntryId, &CKeyEntry)> {
        self.entries
            .iter()
            .enumerate()
            .map(|(i, e)| (EntryId(i as u32), e))
    }

    fn push(&mut self, entry: CKeyEntry) -> EntryId {
        let id = EntryId(self.entries.len() as u32);
        if entry.flags.contains(EntryFlags::HAS_CKEY) {
            self.ckey_map.insert(entry.ckey, id);
        }
        if entry
            .flags
            .intersects(EntryFlags::HAS_EKEY | EntryFlags::HAS_EKEY_PARTIAL)
        {
            self.ekey_map.insert(entry.ekey.prefix(), id);
        }
        self.entries.push(entry);
        id
    }

    /// Insert one ENCODING record, taking archive data from `location` when
    /// the index knew this encoded key.
    ///
    /// Reloading a page that was already seen reuses the existing entry, so
    /// the operation is idempotent.
    pub fn insert_encoding(
        &mut self,
        ckey: CKey,
        ekey: EKey,
        content_size: u32,
        location: Option<ArchiveLocation>,
        file_offset_bits: u32,
    ) -> EntryId {
        if let Some(id) = self.find_by_ckey(&ckey) {
            let entry = self.get_mut(id);
            entry.flags |= EntryFlags::IN_ENCODING;
            if entry.content_size == INVALID_SIZE {
                entry.content_size = content_size;
            }
            return id;
        }

        let mut entry = CKeyEntry {
            ckey,
            ekey,
            content_size,
            flags: EntryFlags::HAS_CKEY | EntryFlags::HAS_EKEY | EntryFlags::IN_ENCODING,
            ..CKeyEntry::empty()
        };
        if let Some(location) = location {
            entry.storage_offset = location.pack(file_offset_bits);
            entry.encoded_size = location.size;
        }

        self.push(entry)
    }

    /// Upsert one DOWNLOAD record, keyed by encoded key.
    ///
    /// A known field is never downgraded to a sentinel; a full encoded key
    /// upgrades an entry the index only knew a prefix of.
    pub fn upsert_download(
        &mut self,
        ekey: EKey,
        ekey_length: usize,
        encoded_size: u32,
        priority: u8,
        location: Option<ArchiveLocation>,
        file_offset_bits: u32,
    ) -> EntryId {
        let id = match self.find_by_ekey(&ekey) {
            Some(id) => {
                let entry = self.get_mut(id);
                if entry.flags.contains(EntryFlags::HAS_EKEY_PARTIAL)
                    && ekey_length == tact_formats::keys::EKEY_SIZE
                {
                    entry.ekey = ekey;
                    entry.flags.remove(EntryFlags::HAS_EKEY_PARTIAL);
                    entry.flags |= EntryFlags::HAS_EKEY;
                }
                if entry.encoded_size == INVALID_SIZE {
                    entry.encoded_size = encoded_size;
                }
                entry.flags |= EntryFlags::IN_DOWNLOAD;
                id
            }
            None => {
                // No ENCODING record and no index hit: a metadata-only
                // entry without a content key.
                let has_full_key = ekey_length == tact_formats::keys::EKEY_SIZE;
                let mut entry = CKeyEntry {
                    ekey,
                    encoded_size,
                    flags: EntryFlags::IN_DOWNLOAD
                        | if has_full_key {
                            EntryFlags::HAS_EKEY
                        } else {
                            EntryFlags::HAS_EKEY_PARTIAL
                        },
                    ..CKeyEntry::empty()
                };
                if let Some(location) = location {
                    entry.storage_offset = location.pack(file_offset_bits);
                    if entry.encoded_size == INVALID_SIZE {
                        entry.encoded_size = location.size;
                    }
                }
                self.push(entry)
            }
        };

        self.get_mut(id).priority = priority;
        id
    }

    /// Insert a well-known file from the build configuration.
    ///
    /// Entries without any key are skipped; an existing entry only has its
    /// sentinels upgraded.
    pub fn insert_build(
        &mut self,
        ckey: Option<CKey>,
        ekey: Option<EKey>,
        content_size: u32,
        encoded_size: u32,
        location: Option<ArchiveLocation>,
        file_offset_bits: u32,
    ) -> Option<EntryId> {
        let existing = ckey
            .as_ref()
            .and_then(|k| self.find_by_ckey(k))
            .or_else(|| ekey.as_ref().and_then(|k| self.find_by_ekey(k)));

        if let Some(id) = existing {
            let entry = self.get_mut(id);
            if entry.content_size == INVALID_SIZE {
                entry.content_size = content_size;
            }
            if entry.encoded_size == INVALID_SIZE {
                entry.encoded_size = encoded_size;
            }
            return Some(id);
        }

        let mut flags = EntryFlags::empty();
        if ckey.is_some() {
            flags |= EntryFlags::HAS_CKEY;
        }
        if ekey.is_some() {
            flags |= EntryFlags::HAS_EKEY;
        }
        if flags == EntryFlags::empty() {
            // Every entry must carry at least one key.
            return None;
        }

        let mut entry = CKeyEntry {
            ckey: ckey.unwrap_or_default(),
            ekey: ekey.unwrap_or_default(),
            content_size,
            encoded_size,
            flags,
            ..CKeyEntry::empty()
        };
        if let Some(location) = location {
            entry.storage_offset = location.pack(file_offset_bits);
            if entry.encoded_size == INVALID_SIZE {
                entry.encoded_size = location.size;
            }
        }

        trace!("build entry: ckey={} flags={}", entry.ckey, entry.flags);
        Some(self.push(entry))
    }

    /// Total file count as reported to callers: entries with several name
    /// references count once per reference.
    pub fn total_file_count(&self) -> u32 {
        self.entries
            .iter()
            .filter(|e| e.is_file())
            .map(|e| e.ref_count.max(1))
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DEFAULT_FILE_OFFSET_BITS;

    fn loc(archive: u16, offset: u64, size: u32) -> ArchiveLocation {
        ArchiveLocation {
            archive_id: archive,
            offset,
            size,
        }
    }

    #[test]
    fn encoding_insert_populates_both_maps() {
        let mut table = CKeyTable::with_capacity(16);
        let ckey = CKey::new([0xAA; 16]);
        let ekey = EKey::new([0xBB; 16]);

        let id = table.insert_encoding(
            ckey,
            ekey,
            0x100,
            Some(loc(0, 0x40, 0x90)),
            DEFAULT_FILE_OFFSET_BITS,
        );

        assert_eq!(table.find_by_ckey(&ckey), Some(id));
        assert_eq!(table.find_by_ekey(&ekey), Some(id));

        let entry = table.get(id);
        assert!(entry.flags.contains(
            EntryFlags::HAS_CKEY | EntryFlags::HAS_EKEY | EntryFlags::IN_ENCODING
        ));
        assert_eq!(entry.content_size, 0x100);
        assert_eq!(entry.encoded_size, 0x90);
        assert_eq!(entry.storage_offset, 0x40);
    }

    #[test]
    fn encoding_insert_is_idempotent() {
        let mut table = CKeyTable::with_capacity(16);
        let ckey = CKey::new([0xAA; 16]);
        let ekey = EKey::new([0xBB; 16]);

        let a = table.insert_encoding(ckey, ekey, 0x100, None, DEFAULT_FILE_OFFSET_BITS);
        let b = table.insert_encoding(ckey, ekey, 0x100, None, DEFAULT_FILE_OFFSET_BITS);
        assert_eq!(a, b);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn download_upgrades_partial_ekey() {
        let mut table = CKeyTable::with_capacity(16);
        // The index only knew a nine-byte prefix.
        let prefix_only = EKey::from_short_slice(&[0xBB; 9]).unwrap();
        let id = table.upsert_download(
            prefix_only,
            9,
            INVALID_SIZE,
            0,
            Some(loc(1, 0x80, 0x200)),
            DEFAULT_FILE_OFFSET_BITS,
        );
        assert!(table.get(id).flags.contains(EntryFlags::HAS_EKEY_PARTIAL));

        // A later manifest supplies the full key.
        let mut full = [0xBB; 16];
        full[15] = 0x01;
        let full = EKey::new(full);
        let id2 = table.upsert_download(full, 16, 0x200, 3, None, DEFAULT_FILE_OFFSET_BITS);
        assert_eq!(id, id2);

        let entry = table.get(id);
        assert!(entry.flags.contains(EntryFlags::HAS_EKEY));
        assert!(!entry.flags.contains(EntryFlags::HAS_EKEY_PARTIAL));
        assert_eq!(entry.ekey, full);
        assert_eq!(entry.priority, 3);
    }

    #[test]
    fn download_never_downgrades_known_size() {
        let mut table = CKeyTable::with_capacity(16);
        let ckey = CKey::new([0xAA; 16]);
        let ekey = EKey::new([0xBB; 16]);
        let id = table.insert_encoding(
            ckey,
            ekey,
            0x100,
            Some(loc(0, 0, 0x90)),
            DEFAULT_FILE_OFFSET_BITS,
        );

        table.upsert_download(ekey, 16, INVALID_SIZE, 1, None, DEFAULT_FILE_OFFSET_BITS);
        assert_eq!(table.get(id).encoded_size, 0x90);
    }

    #[test]
    fn build_entry_without_keys_is_skipped() {
        let mut table = CKeyTable::with_capacity(4);
        assert!(
            table
                .insert_build(
                    None,
                    None,
                    INVALID_SIZE,
                    INVALID_SIZE,
                    None,
                    DEFAULT_FILE_OFFSET_BITS
                )
                .is_none()
        );
        assert!(table.is_empty());
    }

    #[test]
    fn total_count_weighs_ref_count() {
        let mut table = CKeyTable::with_capacity(4);
        let a = table.insert_encoding(
            CKey::new([1; 16]),
            EKey::new([2; 16]),
            10,
            None,
            DEFAULT_FILE_OFFSET_BITS,
        );
        table.insert_encoding(
            CKey::new([3; 16]),
            EKey::new([4; 16]),
            10,
            None,
            DEFAULT_FILE_OFFSET_BITS,
        );
        table.get_mut(a).ref_count = 3;

        assert_eq!(table.total_file_count(), 4);
    }
}
