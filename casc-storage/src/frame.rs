//! Encoded frame sequences ("BLTE") and the codec that decodes them.
//!
//! An encoded span is a frame-table header followed by one frame per table
//! entry. Each frame starts with a mode byte selecting the transformation;
//! decoding a frame is delegated through [`FrameCodec`] so the storage core
//! stays independent of compression and encryption machinery.

use byteorder::{BigEndian, ReadBytesExt};
use flate2::read::ZlibDecoder;
use std::io::{Cursor, Read};
use std::sync::Arc;
use tracing::trace;

use tact_formats::Md5;
use tact_formats::ioutils::ReadInt;

use crate::error::{CascError, Result};
use crate::keysvc::KeyService;

/// Magic of an encoded span.
pub const FRAME_MAGIC: [u8; 4] = *b"BLTE";

/// Fixed bytes before the per-frame table: magic + header size.
const FRAME_TABLE_PREFIX: usize = 8;

/// Bytes per frame-table entry: encoded size, content size, digest.
const FRAME_ENTRY_SIZE: usize = 4 + 4 + 16;

/// One frame of an encoded file.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Encoded byte count, mode byte included.
    pub encoded_size: u32,
    /// Decoded byte count.
    pub content_size: u32,
    /// MD5 of the encoded frame bytes.
    pub hash: Md5,
}

/// Parsed frame table of an encoded span.
#[derive(Debug)]
pub struct FrameTable {
    /// Bytes consumed by the table itself; frame data starts here.
    pub header_size: u32,
    pub frames: Vec<Frame>,
}

impl FrameTable {
    /// Parse the frame table at the start of an encoded span.
    ///
    /// `encoded_size` is the span length recorded by the index or the
    /// DOWNLOAD manifest and cross-checks the table.
    pub fn parse(data: &[u8], encoded_size: Option<u32>) -> Result<Self> {
        let mut cursor = Cursor::new(data);

        let mut magic = [0u8; 4];
        cursor
            .read_exact(&mut magic)
            .map_err(|_| CascError::BadFormat("encoded span too short"))?;
        if magic != FRAME_MAGIC {
            return Err(CascError::BadFormat("bad frame magic"));
        }

        let header_size = cursor.read_u32::<BigEndian>()?;

        if header_size == 0 {
            // Single headerless frame covering the remainder of the span.
            let total = match encoded_size {
                Some(size) => size as usize,
                None => data.len(),
            };
            if total < FRAME_TABLE_PREFIX || total > data.len() {
                return Err(CascError::BadFormat("frame span size mismatch"));
            }
            return Ok(Self {
                header_size: FRAME_TABLE_PREFIX as u32,
                frames: vec![Frame {
                    encoded_size: (total - FRAME_TABLE_PREFIX) as u32,
                    content_size: u32::MAX,
                    hash: [0; 16],
                }],
            });
        }

        let flags = ReadInt::read_u8(&mut cursor)?;
        let frame_count = cursor.read_uint_be(3)? as u32;
        trace!("frame table: flags={flags:#04x} count={frame_count}");

        if frame_count == 0 {
            return Err(CascError::BadFormat("empty frame table"));
        }
        // Table geometry must agree with the declared header size.
        let expected = FRAME_TABLE_PREFIX as u32 + 4 + frame_count * FRAME_ENTRY_SIZE as u32;
        if expected != header_size {
            return Err(CascError::BadFormat("frame count inconsistent with header"));
        }

        let mut frames = Vec::with_capacity(frame_count as usize);
        let mut encoded_total = u64::from(header_size);
        for _ in 0..frame_count {
            let encoded = cursor.read_u32::<BigEndian>()?;
            let content = cursor.read_u32::<BigEndian>()?;
            let mut hash = [0u8; 16];
            cursor.read_exact(&mut hash)?;
            encoded_total += u64::from(encoded);
            frames.push(Frame {
                encoded_size: encoded,
                content_size: content,
                hash,
            });
        }

        if let Some(size) = encoded_size {
            if encoded_total != u64::from(size) {
                return Err(CascError::BadFormat("frame sizes inconsistent with span"));
            }
        }

        Ok(Self {
            header_size,
            frames,
        })
    }

    /// Sum of the decoded sizes, when every frame declares one.
    pub fn content_size(&self) -> Option<u64> {
        self.frames
            .iter()
            .map(|f| (f.content_size != u32::MAX).then_some(u64::from(f.content_size)))
            .sum()
    }
}

/// Frame transformation modes.
pub mod mode {
    /// Verbatim copy.
    pub const NONE: u8 = b'N';
    /// zlib-compressed.
    pub const ZLIB: u8 = b'Z';
    /// Encrypted, wrapping an inner frame.
    pub const ENCRYPTED: u8 = b'E';
    /// Recursive frame sequence.
    pub const FRAMED: u8 = b'F';
}

/// Decodes a single frame into its content bytes.
///
/// `input` starts with the mode byte; `expected_size` is the decoded size
/// declared by the frame table, or `None` for headerless spans.
pub trait FrameCodec {
    fn decode(&self, frame_index: u32, input: &[u8], expected_size: Option<usize>)
    -> Result<Vec<u8>>;
}

/// The stock codec: plain and zlib frames, plus enough of the encrypted
/// frame envelope to name the key it would need. Actual decryption belongs
/// to the crypto layer and is not performed here.
pub struct DefaultCodec {
    keys: Arc<KeyService>,
}

impl DefaultCodec {
    pub fn new(keys: Arc<KeyService>) -> Self {
        Self { keys }
    }
}

impl FrameCodec for DefaultCodec {
    fn decode(
        &self,
        frame_index: u32,
        input: &[u8],
        expected_size: Option<usize>,
    ) -> Result<Vec<u8>> {
        let (&mode_byte, payload) = input
            .split_first()
            .ok_or(CascError::BadFormat("empty frame"))?;

        match mode_byte {
            mode::NONE => {
                if expected_size.is_some_and(|s| s != payload.len()) {
                    return Err(CascError::BadFormat("plain frame size mismatch"));
                }
                Ok(payload.to_vec())
            }

            mode::ZLIB => {
                let mut out = match expected_size {
                    Some(size) => Vec::with_capacity(size),
                    None => Vec::new(),
                };
                ZlibDecoder::new(payload)
                    .read_to_end(&mut out)
                    .map_err(|_| CascError::BadFormat("zlib frame"))?;
                if expected_size.is_some_and(|s| s != out.len()) {
                    return Err(CascError::BadFormat("zlib frame size mismatch"));
                }
                Ok(out)
            }

            mode::ENCRYPTED => {
                // key-name length, key name (little-endian u64), IV, cipher id.
                let mut cursor = Cursor::new(payload);
                let name_len = ReadInt::read_u8(&mut cursor)? as usize;
                if name_len != 8 {
                    return Err(CascError::BadFormat("encrypted frame key name"));
                }
                let key_name = cursor.read_u64le()?;
                if self.keys.get(key_name).is_none() {
                    return Err(CascError::KeyNotFound(key_name));
                }
                trace!("frame {frame_index}: encrypted with known key {key_name:016x}");
                // The cipher itself lives outside this crate.
                Err(CascError::NotSupported)
            }

            mode::FRAMED => {
                // Nested frame sequences only appear in patch tooling.
                Err(CascError::NotSupported)
            }

            _ => Err(CascError::BadFormat("unknown frame mode")),
        }
    }
}

/// Decode every frame of a parsed span into one contiguous buffer.
pub fn decode_frames(
    table: &FrameTable,
    data: &[u8],
    codec: &dyn FrameCodec,
) -> Result<Vec<u8>> {
    let mut out = match table.content_size() {
        Some(total) => Vec::with_capacity(total as usize),
        None => Vec::new(),
    };

    let mut offset = table.header_size as usize;
    for (i, frame) in table.frames.iter().enumerate() {
        let end = offset + frame.encoded_size as usize;
        let Some(input) = data.get(offset..end) else {
            return Err(CascError::BadFormat("frame data truncated"));
        };

        // Frame digests are trusted by default; spot-check in debug builds
        // only, as for the page digests in ENCODING.
        #[cfg(debug_assertions)]
        if frame.hash != [0; 16] {
            let digest = md5::compute(input);
            if digest.as_ref() != frame.hash {
                return Err(CascError::FileCorrupt("frame digest"));
            }
        }

        let expected = (frame.content_size != u32::MAX).then_some(frame.content_size as usize);
        let decoded = codec.decode(i as u32, input, expected)?;
        out.extend_from_slice(&decoded);
        offset = end;
    }

    Ok(out)
}
