//! Fixed-width key types shared by every TACT and CASC structure.
//!
//! A *content key* is the MD5 of a file's decoded bytes; an *encoded key* is
//! the MD5 of the encoded stream's header. Index files store only the first
//! nine bytes of an encoded key, so [`EKeyPrefix`] exists as its own type.

use crate::{Error, MD5_HEX_LENGTH, MD5_LENGTH, Result};
use std::fmt;
use std::str::FromStr;

/// An MD5 digest as it appears in configuration files.
pub type Md5 = [u8; MD5_LENGTH];

/// Byte length of a content key.
pub const CKEY_SIZE: usize = 16;
/// Byte length of a full encoded key.
pub const EKEY_SIZE: usize = 16;
/// Byte length of a truncated encoded key, as stored in index files.
pub const EKEY_PREFIX_SIZE: usize = 9;

/// Content key: MD5 of a logical file's decoded content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct CKey([u8; CKEY_SIZE]);

/// Encoded key: MD5 of the encoded stream header of one particular encoding
/// of a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct EKey([u8; EKEY_SIZE]);

/// The first nine bytes of an encoded key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct EKeyPrefix([u8; EKEY_PREFIX_SIZE]);

impl CKey {
    pub const fn new(data: [u8; CKEY_SIZE]) -> Self {
        Self(data)
    }

    pub fn from_slice(data: &[u8]) -> Option<Self> {
        data.try_into().ok().map(Self)
    }

    pub const fn as_bytes(&self) -> &[u8; CKEY_SIZE] {
        &self.0
    }

    /// An all-zero content key marks an entry whose content key is unknown.
    pub fn is_zero(&self) -> bool {
        self.0 == [0; CKEY_SIZE]
    }
}

impl EKey {
    pub const fn new(data: [u8; EKEY_SIZE]) -> Self {
        Self(data)
    }

    pub fn from_slice(data: &[u8]) -> Option<Self> {
        data.try_into().ok().map(Self)
    }

    /// Build a full-width key from a shorter one, zero-padding the tail.
    /// Returns `None` when `data` is longer than a full key.
    pub fn from_short_slice(data: &[u8]) -> Option<Self> {
        if data.len() > EKEY_SIZE {
            return None;
        }
        let mut key = [0u8; EKEY_SIZE];
        key[..data.len()].copy_from_slice(data);
        Some(Self(key))
    }

    pub const fn as_bytes(&self) -> &[u8; EKEY_SIZE] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0; EKEY_SIZE]
    }

    /// The nine-byte truncation used by index files.
    pub fn prefix(&self) -> EKeyPrefix {
        let mut p = [0u8; EKEY_PREFIX_SIZE];
        p.copy_from_slice(&self.0[..EKEY_PREFIX_SIZE]);
        EKeyPrefix(p)
    }
}

impl EKeyPrefix {
    pub const fn new(data: [u8; EKEY_PREFIX_SIZE]) -> Self {
        Self(data)
    }

    pub fn from_slice(data: &[u8]) -> Option<Self> {
        data.try_into().ok().map(Self)
    }

    pub const fn as_bytes(&self) -> &[u8; EKEY_PREFIX_SIZE] {
        &self.0
    }
}

impl From<Md5> for CKey {
    fn from(data: Md5) -> Self {
        Self(data)
    }
}

impl From<Md5> for EKey {
    fn from(data: Md5) -> Self {
        Self(data)
    }
}

macro_rules! hex_display {
    ($ty:ty) => {
        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                for byte in &self.0 {
                    write!(f, "{byte:02x}")?;
                }
                Ok(())
            }
        }
    };
}

hex_display!(CKey);
hex_display!(EKey);
hex_display!(EKeyPrefix);

impl FromStr for CKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if s.len() != MD5_HEX_LENGTH {
            return Err(Error::ConfigTypeMismatch);
        }
        let mut key = [0u8; CKEY_SIZE];
        hex::decode_to_slice(s, &mut key).map_err(|_| Error::ConfigTypeMismatch)?;
        Ok(Self(key))
    }
}

impl FromStr for EKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if s.len() != MD5_HEX_LENGTH {
            return Err(Error::ConfigTypeMismatch);
        }
        let mut key = [0u8; EKEY_SIZE];
        hex::decode_to_slice(s, &mut key).map_err(|_| Error::ConfigTypeMismatch)?;
        Ok(Self(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_roundtrip() {
        let ckey: CKey = "00112233445566778899aabbccddeeff".parse().unwrap();
        assert_eq!(ckey.to_string(), "00112233445566778899aabbccddeeff");
        assert_eq!(ckey.as_bytes()[0], 0x00);
        assert_eq!(ckey.as_bytes()[15], 0xff);
    }

    #[test]
    fn rejects_bad_hex() {
        assert!("00112233".parse::<CKey>().is_err());
        assert!(
            "zz112233445566778899aabbccddeeff"
                .parse::<EKey>()
                .is_err()
        );
    }

    #[test]
    fn prefix_takes_first_nine_bytes() {
        let ekey = EKey::new([
            1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16,
        ]);
        assert_eq!(ekey.prefix().as_bytes(), &[1, 2, 3, 4, 5, 6, 7, 8, 9]);
    }

    #[test]
    fn short_slice_zero_pads() {
        let ekey = EKey::from_short_slice(&[0xAA; 9]).unwrap();
        assert_eq!(&ekey.as_bytes()[..9], &[0xAA; 9]);
        assert_eq!(&ekey.as_bytes()[9..], &[0; 7]);
        assert!(EKey::from_short_slice(&[0; 17]).is_none());
    }

    #[test]
    fn zero_detection() {
        assert!(CKey::default().is_zero());
        assert!(!CKey::new([1; 16]).is_zero());
    }
}
