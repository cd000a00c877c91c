//! World of Warcraft root handler (`TSFM` magic and the pre-8.2
//! headerless format).
//!
//! The manifest is a sequence of blocks, each scoped to a locale and
//! content flag combination. Records map file-data IDs to content keys,
//! optionally with a 64-bit path hash. One file-data ID commonly resolves
//! to several records at once (Windows vs macOS binaries, x86 variants,
//! low-violence assets), so the handler keeps every variant with its
//! flags and picks among them at lookup time.

use modular_bitfield::prelude::*;
use std::collections::{BTreeMap, HashMap};
use std::io::{Cursor, ErrorKind, Read, Seek};
use std::ops::BitAnd;
use tracing::{debug, trace};

use tact_formats::CKey;
use tact_formats::ioutils::ReadInt;
use tact_formats::jenkins3::hashpath;

use crate::error::{CascError, Result};
use crate::features;
use crate::root::{NameMap, RootHandler};
use crate::table::{CKeyTable, EntryId};

const WOW_MAGIC: &[u8; 4] = b"TSFM";

/// Bitmask of locales the content should be used for.
#[bitfield(bytes = 4)]
#[derive(PartialEq, Eq, Debug, Copy, Clone, Hash, PartialOrd, Ord)]
#[repr(u32)]
pub struct LocaleFlags {
    #[skip]
    __: B1,
    pub en_us: bool, // 0x2
    pub ko_kr: bool, // 0x4
    #[skip]
    __: B1,

    pub fr_fr: bool, // 0x10
    pub de_de: bool, // 0x20
    pub zh_cn: bool, // 0x40
    pub es_es: bool, // 0x80

    pub zh_tw: bool, // 0x100
    pub en_gb: bool, // 0x200
    pub en_cn: bool, // 0x400
    pub en_tw: bool, // 0x800

    pub es_mx: bool, // 0x1000
    pub ru_ru: bool, // 0x2000
    pub pt_br: bool, // 0x4000
    pub it_it: bool, // 0x8000

    pub pt_pt: bool, // 0x10000
    #[skip]
    __: B15,
}

impl LocaleFlags {
    /// `LocaleFlags` which sets all locales to `true`.
    pub fn any_locale() -> Self {
        LocaleFlags::from(0xffff_ffff)
    }

    /// `true` if the flags indicate all locales.
    pub fn all(&self) -> bool {
        self == &Self::any_locale()
    }

    /// `true` if there is at least one locale flag set.
    pub fn any(&self) -> bool {
        u32::from(*self) != 0
    }
}

impl BitAnd for LocaleFlags {
    type Output = LocaleFlags;

    fn bitand(self, rhs: Self) -> Self::Output {
        Self::from(u32::from(self) & u32::from(rhs))
    }
}

/// Content flags on a root block.
#[bitfield(bytes = 4)]
#[derive(PartialEq, Eq, Debug, Copy, Clone, Hash, PartialOrd, Ord)]
#[repr(u32)]
pub struct ContentFlags {
    /// High-resolution texture variant.
    pub high_res_texture: bool, // 0x1
    #[skip]
    __: B1,
    /// File is in the install manifest.
    pub install: bool, // 0x4
    /// Non-Windows clients should ignore this file.
    pub windows: bool, // 0x8

    /// Non-macOS clients should ignore this file.
    pub macos: bool, // 0x10
    /// `x86_32` binary.
    pub x86_32: bool, // 0x20
    /// `x86_64` binary.
    pub x86_64: bool, // 0x40
    /// Low violence variant.
    pub low_violence: bool, // 0x80

    #[skip]
    __: B7,
    /// `aarch64` / ARM64 binary.
    pub aarch64: bool, // 0x8000

    #[skip]
    __: B11,
    pub encrypted: bool, // 0x8000000

    /// Records in this block carry no path hash.
    pub no_name_hash: bool, // 0x10000000
    #[skip]
    __: B3,
}

/// The scope of one root block: which locales and content variant it is
/// for.
#[derive(Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Clone, Copy)]
pub struct LocaleContentFlags {
    pub locale: LocaleFlags,
    pub content: ContentFlags,
}

/// Whether a variant's content flags satisfy the required platform bits.
pub fn content_flags_match(flags: &ContentFlags, required: &ContentFlags) -> bool {
    if required.windows() && !flags.windows() {
        return false;
    }
    if required.macos() && !flags.macos() {
        return false;
    }
    if required.x86_64() && !flags.x86_64() {
        return false;
    }
    if required.x86_32() && !flags.x86_32() {
        return false;
    }
    if required.aarch64() && !flags.aarch64() {
        return false;
    }
    true
}

/// Header of the `TSFM` format; the headerless legacy format synthesises
/// one.
#[derive(Debug)]
struct WowRootHeader {
    use_old_record_format: bool,
    version: u32,
    total_file_count: u32,
    named_file_count: u32,
    allow_non_named_files: bool,
}

impl WowRootHeader {
    fn parse<R: Read + Seek>(f: &mut R) -> Result<Self> {
        let mut magic = [0; WOW_MAGIC.len()];
        f.read_exact(&mut magic)?;
        if &magic != WOW_MAGIC {
            // Pre-8.2 root file, records start immediately.
            f.seek_relative(-(WOW_MAGIC.len() as i64))?;
            return Ok(Self {
                use_old_record_format: true,
                version: 0,
                total_file_count: 0,
                named_file_count: 0,
                allow_non_named_files: true,
            });
        }

        // 10.1.7 gained an explicit header size and version field.
        let mut header_size = f.read_u32le()?;
        let mut version = 0;
        let total_file_count;

        if header_size == 0x18 {
            version = f.read_u32le()?;
            total_file_count = f.read_u32le()?;
        } else {
            total_file_count = header_size;
            header_size = 0;
        }
        let named_file_count = f.read_u32le()?;

        if header_size == 0x18 {
            // padding
            f.seek_relative(4)?;
        }

        Ok(Self {
            use_old_record_format: false,
            allow_non_named_files: total_file_count != named_file_count,
            version,
            total_file_count,
            named_file_count,
        })
    }
}

/// One parsed block: scope flags plus its records.
struct Block {
    flags: LocaleContentFlags,
    /// (file data id, content key) pairs, when the block is in scope.
    fid_md5: Vec<(u32, [u8; 16])>,
    /// (path hash, file data id) pairs.
    name_hash_fid: Vec<(u64, u32)>,
    /// Records the block declared, whether or not it was in scope.
    record_count: usize,
}

impl Block {
    fn parse<R: Read + Seek>(
        f: &mut R,
        header: &WowRootHeader,
        only_locale: LocaleFlags,
    ) -> Result<Self> {
        let num_records = f.read_u32le()? as usize;

        let (content, locale) = if header.version == 2 {
            let locale = LocaleFlags::from(f.read_u32le()?);
            let v1 = f.read_u32le()?;
            let v2 = f.read_u32le()?;
            let v3 = f.read_u8()?;
            (
                ContentFlags::from(v1 | v2 | (u32::from(v3) << 17)),
                locale,
            )
        } else {
            (
                ContentFlags::from(f.read_u32le()?),
                LocaleFlags::from(f.read_u32le()?),
            )
        };

        let mut block = Self {
            flags: LocaleContentFlags { locale, content },
            fid_md5: Vec::new(),
            name_hash_fid: Vec::new(),
            record_count: num_records,
        };
        if num_records == 0 {
            return Ok(block);
        }

        let has_name_hashes = header.use_old_record_format
            || !(header.allow_non_named_files && content.no_name_hash());

        if !locale.all() && !(locale & only_locale).any() {
            // Out of scope; the record size is the same in both layouts.
            let record_length =
                size_of::<u32>() + 16 + if has_name_hashes { size_of::<u64>() } else { 0 };
            f.seek_relative((num_records * record_length) as i64)?;
            return Ok(block);
        }

        // File IDs are delta-encoded.
        let mut file_ids: Vec<u32> = Vec::with_capacity(num_records);
        let mut file_id = 0u32;
        for i in 0..num_records {
            let delta = f.read_i32le()?;
            file_id = if i == 0 {
                u32::try_from(delta).map_err(|_| CascError::FileCorrupt("file id delta"))?
            } else {
                file_id
                    .checked_add_signed(1 + delta)
                    .ok_or(CascError::FileCorrupt("file id delta"))?
            };
            file_ids.push(file_id);
        }

        block.fid_md5.reserve(num_records);
        if header.use_old_record_format {
            // Interleaved: md5 + name hash per record.
            for file_id in file_ids {
                let mut md5 = [0; 16];
                f.read_exact(&mut md5)?;
                block.fid_md5.push((file_id, md5));
                block.name_hash_fid.push((f.read_u64le()?, file_id));
            }
        } else {
            for &file_id in &file_ids {
                let mut md5 = [0; 16];
                f.read_exact(&mut md5)?;
                block.fid_md5.push((file_id, md5));
            }
            if has_name_hashes {
                for &file_id in &file_ids {
                    block.name_hash_fid.push((f.read_u64le()?, file_id));
                }
            }
        }

        Ok(block)
    }
}

pub struct WowRoot {
    names: NameMap,
    /// Every mounted variant of a file-data ID, keyed by block scope.
    fid_variants: BTreeMap<u32, BTreeMap<LocaleContentFlags, EntryId>>,
    /// Path hash to file-data ID, for name lookups.
    name_hash_fid: HashMap<u64, u32>,
    /// The locale set the root was mounted for.
    locale: LocaleFlags,
    has_name_hashes: bool,
}

impl WowRoot {
    /// Resolve a file-data ID with no content-flag preference.
    pub fn resolve_fid(&self, fid: u32) -> Option<EntryId> {
        self.select_variant(fid, None)
    }

    /// Pick the variant of a file-data ID that best fits `wanted` content
    /// flags: a single variant wins outright; otherwise variants inside
    /// the mounted locale are preferred, and among those the first whose
    /// platform bits satisfy `wanted`.
    pub fn select_variant(&self, fid: u32, wanted: Option<ContentFlags>) -> Option<EntryId> {
        let variants = self.fid_variants.get(&fid)?;
        if variants.len() == 1 {
            return variants.values().next().copied();
        }

        let in_locale = |flags: &LocaleContentFlags| {
            flags.locale.all() || (flags.locale & self.locale).any()
        };

        if let Some(required) = wanted {
            if let Some(id) = variants
                .iter()
                .find(|(flags, _)| in_locale(flags) && content_flags_match(&flags.content, &required))
                .map(|(_, id)| *id)
            {
                return Some(id);
            }
        }

        variants
            .iter()
            .find(|(flags, _)| in_locale(flags))
            .map(|(_, id)| *id)
            .or_else(|| variants.values().next().copied())
    }

    /// Content flags of every mounted variant of a file-data ID.
    pub fn variants(&self, fid: u32) -> impl Iterator<Item = (&LocaleContentFlags, EntryId)> {
        self.fid_variants
            .get(&fid)
            .into_iter()
            .flat_map(|m| m.iter().map(|(flags, id)| (flags, *id)))
    }
}

impl RootHandler for WowRoot {
    fn insert(&mut self, name: &str, id: EntryId) {
        self.names.insert(name, id);
    }

    fn lookup(&self, name: &str) -> Option<EntryId> {
        if let Some(id) = self.names.lookup(name) {
            return Some(id);
        }
        let fid = *self.name_hash_fid.get(&hashpath(name))?;
        self.select_variant(fid, None)
    }

    fn lookup_fid(&self, fid: u32) -> Option<EntryId> {
        self.select_variant(fid, None)
    }

    fn name_entries(&self) -> Box<dyn Iterator<Item = (&str, EntryId)> + '_> {
        Box::new(self.names.iter())
    }

    fn features(&self) -> u32 {
        let mut features = features::FILE_DATA_IDS | features::LOCALE_FLAGS
            | features::CONTENT_FLAGS;
        if self.has_name_hashes {
            features |= features::FILE_NAME_HASHES_OPTIONAL;
        }
        features
    }
}

/// Parse and mount a WoW root blob.
///
/// Both the magic-bearing and the headerless format are handled; for the
/// latter the parse doubles as the format probe and fails with BAD_FORMAT
/// when the block structure does not line up.
pub fn load(blob: &[u8], table: &mut CKeyTable, locale_mask: u32) -> Result<Box<dyn RootHandler>> {
    let only_locale = if locale_mask == 0 {
        LocaleFlags::any_locale()
    } else {
        LocaleFlags::from(locale_mask)
    };

    let mut cursor = Cursor::new(blob);
    let header = WowRootHeader::parse(&mut cursor)?;
    trace!(
        "WoW root: old_format={} version={} files={}/{}",
        header.use_old_record_format,
        header.version,
        header.named_file_count,
        header.total_file_count
    );

    let mut root = WowRoot {
        names: NameMap::default(),
        fid_variants: BTreeMap::new(),
        name_hash_fid: HashMap::new(),
        locale: only_locale,
        has_name_hashes: false,
    };
    let mut records = 0usize;

    loop {
        if cursor.position() as usize == blob.len() {
            break;
        }
        match Block::parse(&mut cursor, &header, only_locale) {
            Ok(block) => {
                trace!(
                    "WoW root block: locale={:#x} content={:#x} records={}",
                    u32::from(block.flags.locale),
                    u32::from(block.flags.content),
                    block.record_count
                );
                records += block.record_count;

                for (fid, md5) in block.fid_md5 {
                    let Some(id) = table.find_by_ckey(&CKey::new(md5)) else {
                        continue;
                    };
                    let variants = root.fid_variants.entry(fid).or_default();
                    if !variants.contains_key(&block.flags) {
                        variants.insert(block.flags, id);
                        table.get_mut(id).ref_count += 1;
                    }
                }
                for (hash, fid) in block.name_hash_fid {
                    root.name_hash_fid.entry(hash).or_insert(fid);
                }
            }
            Err(CascError::Io(e)) if e.kind() == ErrorKind::UnexpectedEof => {
                // A block that runs off the end means this is not a WoW
                // root at all.
                return Err(CascError::BadFormat("wow root block truncated"));
            }
            Err(e) => return Err(e),
        }
    }

    if records == 0 {
        return Err(CascError::BadFormat("wow root without records"));
    }
    root.has_name_hashes = !root.name_hash_fid.is_empty();

    debug!(
        "WoW root: {} file data ids, {} name hashes",
        root.fid_variants.len(),
        root.name_hash_fid.len()
    );
    Ok(Box::new(root))
}
