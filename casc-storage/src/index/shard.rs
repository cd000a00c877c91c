//! Parser for a single `.idx` index shard.
//!
//! A shard is a header describing the record geometry, followed by an array
//! of fixed 18-byte records: nine key bytes, a packed big-endian
//! archive-and-offset field, and a little-endian encoded size.

use byteorder::{BigEndian, LittleEndian, ReadBytesExt};
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;
use tracing::{debug, warn};

use tact_formats::EKeyPrefix;
use tact_formats::keys::EKEY_PREFIX_SIZE;

use crate::error::{CascError, Result};
use crate::types::{ArchiveLocation, MAX_ARCHIVES};

/// Supported shard version.
const INDEX_VERSION: u16 = 7;

/// On-wire record size: key + 5-byte location + 4-byte size.
const RECORD_SIZE: usize = EKEY_PREFIX_SIZE + 5 + 4;

/// Geometry fields of the shard header.
#[derive(Debug, Clone)]
pub struct ShardHeader {
    pub version: u16,
    pub bucket: u8,
    pub extra_bytes: u8,
    pub span_size_bytes: u8,
    pub span_offs_bytes: u8,
    pub key_bytes: u8,
    pub file_offset_bits: u8,
    pub segment_size: u64,
}

impl ShardHeader {
    fn parse<R: Read>(reader: &mut R) -> Result<Self> {
        let header_size = reader.read_u32::<LittleEndian>()?;
        let _header_hash = reader.read_u32::<LittleEndian>()?;
        if header_size < 0x10 {
            return Err(CascError::BadFormat("index header too small"));
        }

        let version = reader.read_u16::<LittleEndian>()?;
        if version != INDEX_VERSION {
            return Err(CascError::BadFormat("unsupported index version"));
        }

        let bucket = reader.read_u8()?;
        let extra_bytes = reader.read_u8()?;
        let span_size_bytes = reader.read_u8()?;
        let span_offs_bytes = reader.read_u8()?;
        let key_bytes = reader.read_u8()?;
        let file_offset_bits = reader.read_u8()?;
        let segment_size = reader.read_u64::<LittleEndian>()?;

        // Only the standard geometry is supported; nothing else has been
        // seen in the wild for v7 shards.
        if key_bytes as usize != EKEY_PREFIX_SIZE
            || span_offs_bytes != 5
            || span_size_bytes != 4
            || extra_bytes != 0
        {
            return Err(CascError::BadFormat("unsupported index record geometry"));
        }
        if file_offset_bits == 0 || file_offset_bits >= 40 {
            return Err(CascError::BadFormat("bad file offset split"));
        }

        Ok(Self {
            version,
            bucket,
            extra_bytes,
            span_size_bytes,
            span_offs_bytes,
            key_bytes,
            file_offset_bits,
            segment_size,
        })
    }
}

/// One parsed shard: records sorted by key, binary-searchable.
pub struct IndexShard {
    header: ShardHeader,
    entries: Vec<(EKeyPrefix, ArchiveLocation)>,
}

impl IndexShard {
    /// Parse a shard from disk.
    pub fn parse_file(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let mut reader = BufReader::new(file);
        Self::parse(&mut reader)
    }

    /// Parse a shard from a reader.
    pub fn parse<R: Read + Seek>(reader: &mut R) -> Result<Self> {
        let header = ShardHeader::parse(reader)?;

        debug!(
            "idx shard: bucket={:02x} offset_bits={} segment={}",
            header.bucket, header.file_offset_bits, header.segment_size
        );

        // The header block is zero-padded to a 16-byte boundary before the
        // entry block begins.
        let pos = reader.stream_position()?;
        let padding = (16 - (pos % 16)) % 16;
        if padding > 0 {
            reader.seek(SeekFrom::Current(padding as i64))?;
        }

        let entries_size = reader.read_u32::<LittleEndian>()?;
        let _entries_hash = reader.read_u32::<LittleEndian>()?;
        if entries_size as usize % RECORD_SIZE != 0 {
            return Err(CascError::BadFormat("index entry block size"));
        }
        let count = entries_size as usize / RECORD_SIZE;

        let mut entries = Vec::with_capacity(count);
        let mut dropped = 0usize;
        for _ in 0..count {
            let mut key = [0u8; EKEY_PREFIX_SIZE];
            reader.read_exact(&mut key)?;

            // 5 bytes big-endian: archive index above the offset split.
            let high = reader.read_u8()?;
            let low = reader.read_u32::<BigEndian>()?;
            let packed = (u64::from(high) << 32) | u64::from(low);
            let archive_id = (packed >> header.file_offset_bits) as u32;
            let offset = packed & ((1 << header.file_offset_bits) - 1);

            let size = reader.read_u32::<LittleEndian>()?;

            if archive_id >= MAX_ARCHIVES {
                dropped += 1;
                continue;
            }

            entries.push((
                EKeyPrefix::new(key),
                ArchiveLocation {
                    archive_id: archive_id as u16,
                    offset,
                    size,
                },
            ));
        }
        if dropped > 0 {
            warn!("idx shard: dropped {dropped} records with out-of-range archive index");
        }

        entries.sort_by(|a, b| a.0.cmp(&b.0));

        debug!("idx shard: {} records", entries.len());
        Ok(Self { header, entries })
    }

    pub fn header(&self) -> &ShardHeader {
        &self.header
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Binary-search lookup by truncated key.
    pub fn lookup(&self, key: &EKeyPrefix) -> Option<&ArchiveLocation> {
        self.entries
            .binary_search_by(|(k, _)| k.cmp(key))
            .ok()
            .map(|i| &self.entries[i].1)
    }

    /// Records in key order.
    pub fn entries(&self) -> impl Iterator<Item = &(EKeyPrefix, ArchiveLocation)> {
        self.entries.iter()
    }
}
