//! The merged view over every index shard of a storage.

use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info};

use tact_formats::{EKey, EKeyPrefix};

use crate::error::{CascError, Result};
use crate::index::IndexShard;
use crate::types::ArchiveLocation;

/// All shards merged into one ordered table keyed by truncated encoded key.
///
/// Lives only for the duration of the open pipeline; everything the storage
/// needs afterwards is copied onto the central table entries.
#[derive(Debug)]
pub struct IndexGroup {
    entries: BTreeMap<EKeyPrefix, ArchiveLocation>,
    file_offset_bits: u32,
}

impl IndexGroup {
    /// Load every shard in `data_path` and merge them.
    ///
    /// Shards are named `<bucket:2 hex><version:8 hex>.idx`; when several
    /// versions of a bucket coexist, the newest wins. Failure to parse any
    /// selected shard fails the load.
    pub fn load_from_dir(data_path: &Path) -> Result<Self> {
        let mut newest: BTreeMap<String, std::path::PathBuf> = BTreeMap::new();
        for entry in std::fs::read_dir(data_path)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|s| s.to_str()) != Some("idx") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if stem.len() < 2 {
                continue;
            }

            let bucket = stem[..2].to_ascii_lowercase();
            // Version is hex-encoded, so lexicographic order is newest-last.
            match newest.get(&bucket) {
                Some(existing) if existing.file_name() >= path.file_name() => {}
                _ => {
                    newest.insert(bucket, path);
                }
            }
        }

        if newest.is_empty() {
            return Err(CascError::FileNotFound);
        }

        let mut shards = Vec::with_capacity(newest.len());
        for path in newest.values() {
            debug!("loading index shard {:?}", path.file_name());
            shards.push(IndexShard::parse_file(path)?);
        }

        Self::from_shards(shards)
    }

    /// Merge parsed shards; the first record inserted for a key wins.
    pub fn from_shards(shards: Vec<IndexShard>) -> Result<Self> {
        let file_offset_bits = match shards.first() {
            Some(shard) => u32::from(shard.header().file_offset_bits),
            None => return Err(CascError::FileNotFound),
        };
        if shards
            .iter()
            .any(|s| u32::from(s.header().file_offset_bits) != file_offset_bits)
        {
            return Err(CascError::BadFormat("shards disagree on offset split"));
        }

        let mut entries = BTreeMap::new();
        for shard in &shards {
            for (key, location) in shard.entries() {
                entries.entry(*key).or_insert(*location);
            }
        }

        info!("index: {} entries from {} shards", entries.len(), shards.len());
        Ok(Self {
            entries,
            file_offset_bits,
        })
    }

    pub fn lookup(&self, key: &EKeyPrefix) -> Option<ArchiveLocation> {
        self.entries.get(key).copied()
    }

    pub fn lookup_ekey(&self, ekey: &EKey) -> Option<ArchiveLocation> {
        self.lookup(&ekey.prefix())
    }

    /// Number of bits of a packed storage offset holding the byte offset.
    pub fn file_offset_bits(&self) -> u32 {
        self.file_offset_bits
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in byte-lexicographic key order.
    pub fn iter(&self) -> impl Iterator<Item = (&EKeyPrefix, &ArchiveLocation)> {
        self.entries.iter()
    }
}
