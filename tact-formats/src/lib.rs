//! Parsers for the TACT manifest and configuration formats that make up a
//! CASC storage: ENCODING, DOWNLOAD, INSTALL, the build/CDN configuration
//! files, and the build descriptors (`.build.info`, `.build.db`, `versions`).
//!
//! All parsers here operate on in-memory buffers or [`std::io::BufRead`]
//! sources and never touch archives themselves; resolving keys to archive
//! locations is the storage engine's job.

pub mod config;
pub mod download;
pub mod encoding;
mod error;
pub mod install;
pub mod ioutils;
pub mod jenkins3;
pub mod keys;

pub use error::Error;
pub type Result<T> = std::result::Result<T, Error>;

pub use keys::{CKey, EKey, EKeyPrefix, Md5};

/// Byte length of an MD5 digest.
pub const MD5_LENGTH: usize = 16;
/// Character length of a base16-encoded MD5 digest.
pub const MD5_HEX_LENGTH: usize = MD5_LENGTH * 2;

/// One or two values of the same type.
///
/// Configuration entries like `encoding` or `download` carry either a single
/// content key, or a content key followed by the encoded key of the same
/// file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaybePair<T> {
    Solo(T),
    Pair(T, T),
}

impl<T> MaybePair<T> {
    /// The first (or only) value.
    pub fn primary(&self) -> &T {
        match self {
            MaybePair::Solo(v) | MaybePair::Pair(v, _) => v,
        }
    }

    /// The second value, if there is one.
    pub fn secondary(&self) -> Option<&T> {
        match self {
            MaybePair::Solo(_) => None,
            MaybePair::Pair(_, v) => Some(v),
        }
    }
}

impl<T> From<(T, T)> for MaybePair<T> {
    fn from((a, b): (T, T)) -> Self {
        MaybePair::Pair(a, b)
    }
}
