//! INSTALL manifest parser.
//!
//! The install manifest names the files an installer materialises on disk,
//! keyed by content key and tagged by platform and locale. The storage also
//! uses it as the name source of last resort when no ROOT manifest can be
//! loaded.

use std::io::{Cursor, Read};
use tracing::{debug, trace};

use crate::ioutils::ReadInt;
use crate::{CKey, Error, Result};

/// Magic bytes for the install manifest: "IN"
const INSTALL_MAGIC: [u8; 2] = *b"IN";

/// Install manifest header.
#[derive(Debug, Clone)]
pub struct InstallHeader {
    /// Version, must be 1.
    pub version: u8,
    /// Hash size, must be 16.
    pub hash_size: u8,
    pub tag_count: u16,
    pub entry_count: u32,
}

/// A named tag over the install entries.
#[derive(Debug, Clone)]
pub struct InstallTag {
    pub name: String,
    pub tag_type: u16,
    /// One bit per entry, `0x80 >> (i % 8)` of byte `i / 8`.
    mask: Vec<u8>,
}

impl InstallTag {
    /// Whether entry `index` carries this tag.
    pub fn contains(&self, index: usize) -> bool {
        self.mask
            .get(index / 8)
            .is_some_and(|byte| byte & (0x80 >> (index % 8)) != 0)
    }
}

/// One install entry.
#[derive(Debug, Clone)]
pub struct InstallEntry {
    /// Path relative to the game root.
    pub path: String,
    pub ckey: CKey,
    pub size: u32,
}

/// Parsed INSTALL manifest.
pub struct InstallManifest {
    pub header: InstallHeader,
    pub tags: Vec<InstallTag>,
    pub entries: Vec<InstallEntry>,
}

impl InstallManifest {
    /// Parse an INSTALL manifest from raw decoded bytes.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(data);
        let header = Self::parse_header(&mut cursor)?;

        debug!(
            "INSTALL v{}: {} tags, {} entries",
            header.version, header.tag_count, header.entry_count
        );

        let bytes_per_tag = header.entry_count.div_ceil(8) as usize;

        // Tags precede the entries, unlike DOWNLOAD.
        let mut tags = Vec::with_capacity(header.tag_count as usize);
        for _ in 0..header.tag_count {
            let name = cursor.read_cstring()?;
            let tag_type = cursor.read_u16be()?;

            let mut mask = vec![0u8; bytes_per_tag];
            cursor.read_exact(&mut mask)?;

            trace!("INSTALL tag '{name}' type={tag_type:#06x}");
            tags.push(InstallTag {
                name,
                tag_type,
                mask,
            });
        }

        let mut entries = Vec::with_capacity(header.entry_count as usize);
        for _ in 0..header.entry_count {
            let path = cursor.read_cstring()?;

            let mut key = [0u8; 16];
            cursor.read_exact(&mut key)?;
            let size = cursor.read_u32be()?;

            entries.push(InstallEntry {
                path,
                ckey: CKey::new(key),
                size,
            });
        }

        debug!("INSTALL: parsed {} entries", entries.len());
        Ok(Self {
            header,
            tags,
            entries,
        })
    }

    fn parse_header<R: Read>(reader: &mut R) -> Result<InstallHeader> {
        let mut magic = [0u8; 2];
        reader.read_exact(&mut magic)?;
        if magic != INSTALL_MAGIC {
            return Err(Error::BadMagic);
        }

        let version = reader.read_u8()?;
        if version != 1 {
            return Err(Error::UnsupportedVersion(version));
        }

        let hash_size = reader.read_u8()?;
        if hash_size != 16 {
            return Err(Error::BadKeyLength(hash_size));
        }

        let tag_count = reader.read_u16be()?;
        let entry_count = reader.read_u32be()?;

        Ok(InstallHeader {
            version,
            hash_size,
            tag_count,
            entry_count,
        })
    }

    /// Names of the tags entry `index` belongs to.
    pub fn tags_for_entry(&self, index: usize) -> impl Iterator<Item = &str> {
        self.tags
            .iter()
            .filter(move |tag| tag.contains(index))
            .map(|tag| tag.name.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_entry_manifest() -> Vec<u8> {
        let mut data = Vec::new();
        data.extend_from_slice(&INSTALL_MAGIC);
        data.push(1); // version
        data.push(16); // hash size
        data.extend_from_slice(&2u16.to_be_bytes()); // tags
        data.extend_from_slice(&2u32.to_be_bytes()); // entries

        data.extend_from_slice(b"Windows\0");
        data.extend_from_slice(&0u16.to_be_bytes());
        data.push(0x80); // first entry only

        data.extend_from_slice(b"OSX\0");
        data.extend_from_slice(&0u16.to_be_bytes());
        data.push(0x40); // second entry only

        data.extend_from_slice(b"Wow.exe\0");
        data.extend_from_slice(&[1u8; 16]);
        data.extend_from_slice(&1000u32.to_be_bytes());

        data.extend_from_slice(b"World of Warcraft.app\0");
        data.extend_from_slice(&[2u8; 16]);
        data.extend_from_slice(&2000u32.to_be_bytes());

        data
    }

    #[test]
    fn parses_tags_and_entries() {
        let manifest = InstallManifest::parse(&two_entry_manifest()).unwrap();
        assert_eq!(manifest.tags.len(), 2);
        assert_eq!(manifest.entries.len(), 2);

        assert_eq!(manifest.entries[0].path, "Wow.exe");
        assert_eq!(manifest.entries[0].ckey, CKey::new([1; 16]));
        assert_eq!(manifest.entries[0].size, 1000);

        let tags: Vec<_> = manifest.tags_for_entry(0).collect();
        assert_eq!(tags, vec!["Windows"]);
        let tags: Vec<_> = manifest.tags_for_entry(1).collect();
        assert_eq!(tags, vec!["OSX"]);
    }

    #[test]
    fn empty_manifest() {
        let mut data = Vec::new();
        data.extend_from_slice(&INSTALL_MAGIC);
        data.push(1);
        data.push(16);
        data.extend_from_slice(&0u16.to_be_bytes());
        data.extend_from_slice(&0u32.to_be_bytes());

        let manifest = InstallManifest::parse(&data).unwrap();
        assert!(manifest.tags.is_empty());
        assert!(manifest.entries.is_empty());
    }

    #[test]
    fn rejects_bad_magic() {
        assert!(matches!(
            InstallManifest::parse(&[0xFF, 0xFF, 1]),
            Err(Error::BadMagic)
        ));
    }
}
