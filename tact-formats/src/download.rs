//! DOWNLOAD manifest parser.
//!
//! The download manifest lists every encoded file with its download
//! priority, and carries named tag bitmaps (locale, platform, ...) that the
//! storage projects onto each file entry.

use std::io::{Cursor, Read};
use tracing::{debug, trace};

use crate::ioutils::ReadInt;
use crate::keys::EKEY_SIZE;
use crate::{EKey, Error, Result};

/// Magic bytes for the download manifest: "DL"
const DOWNLOAD_MAGIC: [u8; 2] = *b"DL";

/// Download manifest header, version-gated.
#[derive(Debug, Clone)]
pub struct DownloadHeader {
    /// Version (1, 2 or 3).
    pub version: u8,
    /// Encoded key length, at most 16. Older products truncate to 9.
    pub ekey_length: u8,
    /// Whether entries carry a checksum.
    pub has_checksum: bool,
    /// Number of file entries.
    pub entry_count: u32,
    /// Number of tags.
    pub tag_count: u16,
    /// Size of the per-entry flag field (v2+).
    pub flag_size: u8,
    /// Base priority (v3+).
    pub base_priority: u8,
}

impl DownloadHeader {
    pub fn parse<R: Read>(reader: &mut R) -> Result<Self> {
        let mut magic = [0u8; 2];
        reader.read_exact(&mut magic)?;
        if magic != DOWNLOAD_MAGIC {
            return Err(Error::BadMagic);
        }

        let version = reader.read_u8()?;
        if version == 0 || version > 3 {
            return Err(Error::UnsupportedVersion(version));
        }

        let ekey_length = reader.read_u8()?;
        if ekey_length as usize > EKEY_SIZE {
            return Err(Error::BadKeyLength(ekey_length));
        }

        let has_checksum = reader.read_u8()? != 0;
        let entry_count = reader.read_u32be()?;
        let tag_count = reader.read_u16be()?;

        let mut flag_size = 0;
        let mut base_priority = 0;
        if version >= 2 {
            flag_size = reader.read_u8()?;
            if version >= 3 {
                base_priority = reader.read_u8()?;
                // Three reserved bytes close the v3 header.
                let mut reserved = [0u8; 3];
                reader.read_exact(&mut reserved)?;
            }
        }

        Ok(Self {
            version,
            ekey_length,
            has_checksum,
            entry_count,
            tag_count,
            flag_size,
            base_priority,
        })
    }

    /// On-wire size of a single entry under this header.
    pub fn entry_size(&self) -> usize {
        self.ekey_length as usize
            + 5
            + 1
            + if self.has_checksum { 4 } else { 0 }
            + self.flag_size as usize
    }
}

/// One download manifest entry.
#[derive(Debug, Clone)]
pub struct DownloadEntry {
    /// Encoded key, zero-padded to full width when the manifest stores a
    /// truncated one.
    pub ekey: EKey,
    /// How many of `ekey`'s bytes the manifest actually carried.
    pub ekey_length: u8,
    /// Encoded size, including frame headers.
    pub encoded_size: u64,
    pub priority: u8,
    pub checksum: Option<u32>,
    pub flags: u64,
}

impl DownloadEntry {
    fn parse<R: Read>(reader: &mut R, header: &DownloadHeader) -> Result<Self> {
        let mut raw = vec![0u8; header.ekey_length as usize];
        reader.read_exact(&mut raw)?;
        let ekey = EKey::from_short_slice(&raw).ok_or(Error::BadKeyLength(header.ekey_length))?;

        let encoded_size = reader.read_u40be()?;
        let priority = reader.read_u8()?;

        let checksum = if header.has_checksum {
            Some(reader.read_u32be()?)
        } else {
            None
        };

        let flags = reader.read_uint_be(header.flag_size as usize)?;

        Ok(Self {
            ekey,
            ekey_length: header.ekey_length,
            encoded_size,
            priority,
            checksum,
            flags,
        })
    }
}

/// A named tag and its entry bitmap.
#[derive(Debug, Clone)]
pub struct DownloadTag {
    pub name: String,
    pub value: u16,
    /// One bit per entry, `0x80 >> (i % 8)` of byte `i / 8`. May be shorter
    /// than `ceil(entry_count / 8)` when the manifest ends early.
    pub bitmap: Vec<u8>,
}

impl DownloadTag {
    /// Whether entry `index` belongs to this tag.
    pub fn contains(&self, index: usize) -> bool {
        self.bitmap
            .get(index / 8)
            .is_some_and(|byte| byte & (0x80 >> (index % 8)) != 0)
    }
}

/// Parsed DOWNLOAD manifest.
#[derive(Debug, Clone)]
pub struct DownloadManifest {
    pub header: DownloadHeader,
    /// Entries in manifest order; tag bitmaps index into this.
    pub entries: Vec<DownloadEntry>,
    pub tags: Vec<DownloadTag>,
}

impl DownloadManifest {
    /// Parse a DOWNLOAD manifest from raw decoded bytes.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(data);
        let header = DownloadHeader::parse(&mut cursor)?;

        debug!(
            "DOWNLOAD v{}: {} entries, {} tags",
            header.version, header.entry_count, header.tag_count
        );

        let entries_len = header.entry_size() * header.entry_count as usize;
        let remaining = data.len() - cursor.position() as usize;
        if remaining < entries_len {
            return Err(Error::Truncated {
                expected: entries_len,
                actual: remaining,
            });
        }

        let mut entries = Vec::with_capacity(header.entry_count as usize);
        for i in 0..header.entry_count {
            let entry = DownloadEntry::parse(&mut cursor, &header)?;
            trace!(
                "DOWNLOAD entry {i}: ekey={} priority={} size={}",
                entry.ekey, entry.priority, entry.encoded_size
            );
            entries.push(entry);
        }

        let tags = Self::parse_tags(data, cursor.position() as usize, &header)?;

        Ok(Self {
            header,
            entries,
            tags,
        })
    }

    fn parse_tags(data: &[u8], mut pos: usize, header: &DownloadHeader) -> Result<Vec<DownloadTag>> {
        let bitmap_len = header.entry_count.div_ceil(8) as usize;
        let mut tags = Vec::with_capacity(header.tag_count as usize);

        for i in 0..header.tag_count {
            let mut cursor = Cursor::new(&data[pos..]);
            let name = cursor.read_cstring()?;
            let value = cursor.read_u16be()?;
            pos += cursor.position() as usize;

            // A bitmap running past the end of the manifest is shortened to
            // what is actually there, not rejected; the final tag of real
            // manifests is often cut.
            let len = bitmap_len.min(data.len() - pos);
            let bitmap = data[pos..pos + len].to_vec();
            pos += len;

            trace!("DOWNLOAD tag {i}: '{name}' value={value:#06x} bitmap={len}B");
            tags.push(DownloadTag {
                name,
                value,
                bitmap,
            });
        }

        Ok(tags)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v3_manifest() -> Vec<u8> {
        let mut data = vec![
            b'D', b'L', // magic
            3,    // version
            9,    // ekey length
            0,    // no checksum
            0, 0, 0, 1, // entry count
            0, 2, // tag count
            1,    // flag size
            0,    // base priority
            0, 0, 0, // reserved
        ];
        // entry: 9-byte ekey, u40 size, priority, 1 flag byte
        data.extend_from_slice(&[0xBB; 9]);
        data.extend_from_slice(&[0x00, 0x00, 0x00, 0x02, 0x00]); // 0x200
        data.push(3); // priority
        data.push(0x00); // flags
        // tags
        data.extend_from_slice(b"mac\0");
        data.extend_from_slice(&0x0001u16.to_be_bytes());
        data.push(0x80);
        data.extend_from_slice(b"enUS\0");
        data.extend_from_slice(&0x0002u16.to_be_bytes());
        data.push(0x80);
        data
    }

    #[test]
    fn header_v1() {
        let data = vec![
            b'D', b'L',
            1,
            16,
            0,
            0, 0, 0, 2,
            0, 1,
        ];
        let header = DownloadHeader::parse(&mut Cursor::new(&data)).unwrap();
        assert_eq!(header.version, 1);
        assert_eq!(header.ekey_length, 16);
        assert!(!header.has_checksum);
        assert_eq!(header.entry_count, 2);
        assert_eq!(header.tag_count, 1);
        assert_eq!(header.flag_size, 0);
        assert_eq!(header.entry_size(), 16 + 5 + 1);
    }

    #[test]
    fn v3_entry_and_tags() {
        let manifest = DownloadManifest::parse(&v3_manifest()).unwrap();
        assert_eq!(manifest.entries.len(), 1);

        let entry = &manifest.entries[0];
        assert_eq!(&entry.ekey.as_bytes()[..9], &[0xBB; 9]);
        assert_eq!(entry.ekey_length, 9);
        assert_eq!(entry.encoded_size, 0x200);
        assert_eq!(entry.priority, 3);

        assert_eq!(manifest.tags.len(), 2);
        assert_eq!(manifest.tags[0].name, "mac");
        assert_eq!(manifest.tags[0].value, 0x0001);
        assert!(manifest.tags[0].contains(0));
        assert_eq!(manifest.tags[1].name, "enUS");
        assert!(manifest.tags[1].contains(0));
    }

    #[test]
    fn truncated_last_tag_bitmap() {
        let mut data = v3_manifest();
        // Drop the final tag's bitmap byte entirely.
        data.truncate(data.len() - 1);

        let manifest = DownloadManifest::parse(&data).unwrap();
        assert_eq!(manifest.tags.len(), 2);
        assert!(manifest.tags[0].contains(0));
        assert!(manifest.tags[1].bitmap.is_empty());
        assert!(!manifest.tags[1].contains(0));
    }

    #[test]
    fn checksum_entries() {
        let mut data = vec![
            b'D', b'L',
            1,
            16,
            1, // has checksum
            0, 0, 0, 1,
            0, 0,
        ];
        data.extend_from_slice(&[0x11; 16]);
        data.extend_from_slice(&[0, 0, 0, 0, 42]); // size
        data.push(0); // priority
        data.extend_from_slice(&0xDEADBEEFu32.to_be_bytes());

        let manifest = DownloadManifest::parse(&data).unwrap();
        assert_eq!(manifest.entries[0].checksum, Some(0xDEADBEEF));
        assert_eq!(manifest.entries[0].encoded_size, 42);
    }

    #[test]
    fn rejects_bad_magic() {
        assert!(matches!(
            DownloadManifest::parse(&[0xFF, 0xFF, 1]),
            Err(Error::BadMagic)
        ));
    }

    #[test]
    fn rejects_short_entries() {
        let data = vec![
            b'D', b'L',
            1,
            16,
            0,
            0, 0, 0, 5, // five entries announced
            0, 0,
        ];
        assert!(matches!(
            DownloadManifest::parse(&data),
            Err(Error::Truncated { .. })
        ));
    }
}
