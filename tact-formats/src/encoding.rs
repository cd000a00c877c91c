//! ENCODING manifest parser.
//!
//! The ENCODING file maps content keys to the encoded keys under which the
//! content is actually stored. It is paginated: a descriptor table announces
//! the first content key and MD5 of every page, and each page holds
//! back-to-back records.
//!
//! Everything in this file is big-endian.

use byteorder::{BigEndian, ReadBytesExt};
use std::io::{Cursor, Read};
use tracing::{debug, trace, warn};

use crate::keys::{CKEY_SIZE, EKEY_SIZE};
use crate::{CKey, EKey, Error, Md5, Result};

/// Magic bytes for the encoding file: "EN"
const ENCODING_MAGIC: [u8; 2] = *b"EN";

/// Fixed on-wire header length.
const HEADER_SIZE: usize = 22;

/// Fixed part of a CKey record: key count + content size.
const RECORD_FIXED_SIZE: usize = 2 + 4;

/// Encoding file header.
#[derive(Debug, Clone)]
pub struct EncodingHeader {
    /// Version, must be 1.
    pub version: u8,
    /// Content key length, must be 16.
    pub ckey_length: u8,
    /// Encoded key length, must be 16.
    pub ekey_length: u8,
    /// Size of one CKey page, in bytes.
    pub ckey_page_size: u32,
    /// Size of one EKey-spec page, in bytes.
    pub ekey_page_size: u32,
    /// Number of CKey pages.
    pub ckey_page_count: u32,
    /// Number of EKey-spec pages.
    pub ekey_page_count: u32,
    /// Size of the ESpec string block, in bytes.
    pub espec_block_size: u32,
}

impl EncodingHeader {
    /// Parse and validate the 22-byte header.
    pub fn parse<R: Read>(reader: &mut R) -> Result<Self> {
        let mut magic = [0u8; 2];
        reader.read_exact(&mut magic)?;
        if magic != ENCODING_MAGIC {
            return Err(Error::BadMagic);
        }

        let version = reader.read_u8()?;
        if version != 1 {
            return Err(Error::UnsupportedVersion(version));
        }

        let ckey_length = reader.read_u8()?;
        let ekey_length = reader.read_u8()?;
        if ckey_length as usize != CKEY_SIZE {
            return Err(Error::BadKeyLength(ckey_length));
        }
        if ekey_length as usize != EKEY_SIZE {
            return Err(Error::BadKeyLength(ekey_length));
        }

        let ckey_page_size = u32::from(reader.read_u16::<BigEndian>()?) * 1024;
        let ekey_page_size = u32::from(reader.read_u16::<BigEndian>()?) * 1024;
        let ckey_page_count = reader.read_u32::<BigEndian>()?;
        let ekey_page_count = reader.read_u32::<BigEndian>()?;
        let _unused = reader.read_u8()?;
        let espec_block_size = reader.read_u32::<BigEndian>()?;

        Ok(Self {
            version,
            ckey_length,
            ekey_length,
            ckey_page_size,
            ekey_page_size,
            ckey_page_count,
            ekey_page_count,
            espec_block_size,
        })
    }
}

/// One entry of the CKey page descriptor table.
#[derive(Debug, Clone)]
pub struct PageDescriptor {
    /// Content key of the first record in the page.
    pub first_ckey: CKey,
    /// MD5 of the whole page.
    pub page_md5: Md5,
}

/// One CKey record: a content key and the encoded keys it is stored under.
#[derive(Debug, Clone)]
pub struct EncodingEntry {
    pub ckey: CKey,
    pub ekeys: Vec<EKey>,
    /// Decoded size of the content.
    pub content_size: u32,
}

/// Parsed ENCODING manifest.
///
/// Entries are kept in page order, which is the order the storage inserts
/// them into its file table.
pub struct EncodingFile {
    pub header: EncodingHeader,
    entries: Vec<EncodingEntry>,
}

impl EncodingFile {
    /// Parse an ENCODING manifest from raw decoded bytes.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(data);
        let header = EncodingHeader::parse(&mut cursor)?;

        debug!(
            "ENCODING: {} pages of {} bytes, espec block {} bytes",
            header.ckey_page_count, header.ckey_page_size, header.espec_block_size
        );

        // ESpec strings are not needed for lookups.
        let mut pos = HEADER_SIZE + header.espec_block_size as usize;

        // CKey page descriptors.
        let descriptor_size = CKEY_SIZE + 16;
        let table_len = header.ckey_page_count as usize * descriptor_size;
        let descriptors = Self::parse_page_table(data, pos, header.ckey_page_count as usize)?;
        pos += table_len;

        // The EKey-spec page table sits between the descriptors and the CKey
        // pages; its contents are not used here.
        pos += header.ekey_page_count as usize * (EKEY_SIZE + 16);

        let page_size = header.ckey_page_size as usize;
        let mut entries = Vec::new();
        for (i, descriptor) in descriptors.iter().enumerate() {
            let Some(page) = data.get(pos..pos + page_size) else {
                return Err(Error::Truncated {
                    expected: page_size,
                    actual: data.len().saturating_sub(pos),
                });
            };

            // Verifying every page digest costs a noticeable share of the
            // load time, so a mismatch is only reported.
            let digest = md5::compute(page);
            if digest.as_ref() != descriptor.page_md5 {
                warn!("ENCODING page {i} MD5 mismatch");
            }

            Self::parse_ckey_page(page, i, descriptor, &mut entries)?;
            pos += page_size;
        }

        debug!("ENCODING: {} entries", entries.len());
        Ok(Self { header, entries })
    }

    fn parse_page_table(
        data: &[u8],
        offset: usize,
        page_count: usize,
    ) -> Result<Vec<PageDescriptor>> {
        let descriptor_size = CKEY_SIZE + 16;
        let Some(table) = data.get(offset..offset + page_count * descriptor_size) else {
            return Err(Error::Truncated {
                expected: page_count * descriptor_size,
                actual: data.len().saturating_sub(offset),
            });
        };

        let mut descriptors = Vec::with_capacity(page_count);
        for chunk in table.chunks_exact(descriptor_size) {
            let first_ckey = CKey::from_slice(&chunk[..CKEY_SIZE]).ok_or(Error::BadMagic)?;
            let mut page_md5 = [0u8; 16];
            page_md5.copy_from_slice(&chunk[CKEY_SIZE..]);
            descriptors.push(PageDescriptor {
                first_ckey,
                page_md5,
            });
        }

        Ok(descriptors)
    }

    fn parse_ckey_page(
        page: &[u8],
        page_index: usize,
        descriptor: &PageDescriptor,
        entries: &mut Vec<EncodingEntry>,
    ) -> Result<()> {
        let mut offset = 0;
        let mut first = true;

        while offset + RECORD_FIXED_SIZE + CKEY_SIZE <= page.len() {
            let ekey_count =
                u16::from_be_bytes([page[offset], page[offset + 1]]) as usize;
            if ekey_count == 0 {
                break;
            }

            let content_size = u32::from_be_bytes([
                page[offset + 2],
                page[offset + 3],
                page[offset + 4],
                page[offset + 5],
            ]);
            offset += RECORD_FIXED_SIZE;

            let ckey = CKey::from_slice(&page[offset..offset + CKEY_SIZE])
                .ok_or(Error::BadMagic)?;
            offset += CKEY_SIZE;

            if first {
                // The descriptor names the first key of the page; anything
                // else means the page table and the pages disagree.
                if ckey != descriptor.first_ckey {
                    return Err(Error::PageKeyMismatch { page: page_index });
                }
                first = false;
            }

            if offset + ekey_count * EKEY_SIZE > page.len() {
                return Err(Error::Truncated {
                    expected: ekey_count * EKEY_SIZE,
                    actual: page.len() - offset,
                });
            }

            let mut ekeys = Vec::with_capacity(ekey_count);
            for _ in 0..ekey_count {
                let ekey = EKey::from_slice(&page[offset..offset + EKEY_SIZE])
                    .ok_or(Error::BadMagic)?;
                offset += EKEY_SIZE;
                ekeys.push(ekey);
            }

            trace!("ENCODING entry: ckey={ckey} size={content_size}");
            entries.push(EncodingEntry {
                ckey,
                ekeys,
                content_size,
            });
        }

        Ok(())
    }

    /// All records, in page order.
    pub fn entries(&self) -> &[EncodingEntry] {
        &self.entries
    }

    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build an ENCODING manifest with one page holding the given records.
    fn build_encoding(
        page_size_kb: u16,
        first_key: CKey,
        records: &[(CKey, &[EKey], u32)],
    ) -> Vec<u8> {
        let page_size = page_size_kb as usize * 1024;
        let mut page = Vec::with_capacity(page_size);
        for (ckey, ekeys, content_size) in records {
            page.extend_from_slice(&(ekeys.len() as u16).to_be_bytes());
            page.extend_from_slice(&content_size.to_be_bytes());
            page.extend_from_slice(ckey.as_bytes());
            for ekey in *ekeys {
                page.extend_from_slice(ekey.as_bytes());
            }
        }
        page.resize(page_size, 0);

        let mut data = Vec::new();
        data.extend_from_slice(&ENCODING_MAGIC);
        data.push(1); // version
        data.push(16); // ckey length
        data.push(16); // ekey length
        data.extend_from_slice(&page_size_kb.to_be_bytes());
        data.extend_from_slice(&page_size_kb.to_be_bytes());
        data.extend_from_slice(&1u32.to_be_bytes()); // ckey pages
        data.extend_from_slice(&0u32.to_be_bytes()); // ekey pages
        data.push(0);
        data.extend_from_slice(&0u32.to_be_bytes()); // espec block

        data.extend_from_slice(first_key.as_bytes());
        data.extend_from_slice(md5::compute(&page).as_ref());
        data.extend_from_slice(&page);
        data
    }

    #[test]
    fn minimal_page() {
        let ckey = CKey::new([0xAA; 16]);
        let ekey = EKey::new([0xBB; 16]);
        let data = build_encoding(4, ckey, &[(ckey, &[ekey], 0x100)]);

        let encoding = EncodingFile::parse(&data).unwrap();
        assert_eq!(encoding.entry_count(), 1);
        let entry = &encoding.entries()[0];
        assert_eq!(entry.ckey, ckey);
        assert_eq!(entry.ekeys, vec![ekey]);
        assert_eq!(entry.content_size, 0x100);
    }

    #[test]
    fn first_key_mismatch_is_fatal() {
        let announced = CKey::new([0xAA; 16]);
        let actual = CKey::new([0xCC; 16]);
        let ekey = EKey::new([0xBB; 16]);
        let data = build_encoding(4, announced, &[(actual, &[ekey], 0x100)]);

        assert!(matches!(
            EncodingFile::parse(&data),
            Err(Error::PageKeyMismatch { page: 0 })
        ));
    }

    #[test]
    fn multiple_ekeys_per_record() {
        let ckey = CKey::new([0x0E; 16]);
        let ekeys = [EKey::new([0x01; 16]), EKey::new([0x02; 16])];
        let data = build_encoding(4, ckey, &[(ckey, &ekeys, 42)]);

        let encoding = EncodingFile::parse(&data).unwrap();
        assert_eq!(encoding.entries()[0].ekeys.len(), 2);
    }

    #[test]
    fn rejects_wrong_version() {
        let ckey = CKey::new([0xAA; 16]);
        let mut data = build_encoding(4, ckey, &[]);
        data[2] = 2;
        assert!(matches!(
            EncodingFile::parse(&data),
            Err(Error::UnsupportedVersion(2))
        ));
    }

    #[test]
    fn rejects_wrong_key_length() {
        let ckey = CKey::new([0xAA; 16]);
        let mut data = build_encoding(4, ckey, &[]);
        data[3] = 9;
        assert!(matches!(
            EncodingFile::parse(&data),
            Err(Error::BadKeyLength(9))
        ));
    }

    #[test]
    fn truncated_page_is_reported() {
        let ckey = CKey::new([0xAA; 16]);
        let ekey = EKey::new([0xBB; 16]);
        let mut data = build_encoding(4, ckey, &[(ckey, &[ekey], 1)]);
        data.truncate(data.len() - 512);
        assert!(matches!(
            EncodingFile::parse(&data),
            Err(Error::Truncated { .. })
        ));
    }
}
