//! Storage and root-handler feature bits, as reported by info queries.
//!
//! The values match the original library's public constants so callers can
//! test the same masks.

/// Files can be opened by name.
pub const FILE_NAMES: u32 = 0x0000_0001;
/// Files can be opened by content key.
pub const ROOT_CKEY: u32 = 0x0000_0002;
/// The storage carries download tags.
pub const TAGS: u32 = 0x0000_0004;
/// Names are referenced through 64-bit path hashes.
pub const FILE_NAME_HASHES: u32 = 0x0000_0008;
/// Some, but not all, files have path hashes.
pub const FILE_NAME_HASHES_OPTIONAL: u32 = 0x0000_0010;
/// Files can be opened by file-data ID.
pub const FILE_DATA_IDS: u32 = 0x0000_0020;
/// Entries carry locale flags.
pub const LOCALE_FLAGS: u32 = 0x0000_0040;
/// Entries carry content flags.
pub const CONTENT_FLAGS: u32 = 0x0000_0080;
/// Local `data.NNN` archives are present.
pub const DATA_ARCHIVES: u32 = 0x0000_1000;
/// A loose-file data directory is present.
pub const DATA_FILES: u32 = 0x0000_2000;
/// The storage is CDN-backed.
pub const ONLINE: u32 = 0x0000_4000;
/// Caller asked for missing files to be fetched eagerly.
pub const FORCE_DOWNLOAD: u32 = 0x0000_8000;
