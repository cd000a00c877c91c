//! Encryption-key registry.
//!
//! Encrypted frames name a 64-bit key; the storage loads the well-known
//! keys at the end of the open pipeline and hands the registry to the frame
//! codec. The ciphers themselves live outside this crate.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

use crate::error::{CascError, Result};

/// Well-known TACT keys shipped with the engine. Community-collected;
/// enough for the manifests of the products the engine is tested against.
const BUILTIN_KEYS: &[(u64, [u8; 16])] = &[
    (
        0xFA505078126ACB3E,
        [
            0xBD, 0xC5, 0x18, 0x62, 0xAB, 0xED, 0x79, 0xB2, 0xDE, 0x48, 0xC8, 0xE7, 0xE6, 0x6C,
            0x62, 0x00,
        ],
    ),
    (
        0xFF813F7D062AC0BC,
        [
            0xAA, 0x0B, 0x5C, 0x77, 0xF0, 0x88, 0xCC, 0xC2, 0xD3, 0x90, 0x49, 0xBD, 0x26, 0x7F,
            0x06, 0x6D,
        ],
    ),
    (
        0xD1E9B5EDF9283668,
        [
            0x8E, 0x4A, 0x25, 0x79, 0x89, 0x4E, 0x38, 0xB4, 0xAB, 0x90, 0x58, 0xBA, 0x5C, 0x73,
            0x28, 0xEE,
        ],
    ),
    (
        0xB76729641141CB34,
        [
            0x98, 0x49, 0xD1, 0xAA, 0x7B, 0x1F, 0xD0, 0x98, 0x19, 0xC5, 0xC6, 0x62, 0x83, 0xA3,
            0x26, 0xEC,
        ],
    ),
    (
        0xFFB9469FF16E6BF8,
        [
            0xD5, 0x14, 0xBD, 0x19, 0x09, 0xA9, 0xE5, 0xDC, 0x87, 0x03, 0xF4, 0xB8, 0xBB, 0x1D,
            0xFD, 0x9A,
        ],
    ),
];

/// Map of key name to 16-byte key.
pub struct KeyService {
    keys: HashMap<u64, [u8; 16]>,
}

impl KeyService {
    /// A registry preloaded with the built-in keys.
    pub fn new() -> Self {
        let keys = BUILTIN_KEYS.iter().copied().collect();
        Self { keys }
    }

    /// A registry with no keys at all.
    pub fn empty() -> Self {
        Self {
            keys: HashMap::new(),
        }
    }

    pub fn get(&self, key_name: u64) -> Option<&[u8; 16]> {
        self.keys.get(&key_name)
    }

    pub fn add(&mut self, key_name: u64, key: [u8; 16]) {
        self.keys.insert(key_name, key);
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Load keys from a text file of `keyname keyhex` lines.
    ///
    /// Unparseable lines are skipped with a warning, matching how loose
    /// these community key lists tend to be. Returns how many keys loaded.
    pub fn load_key_file(&mut self, path: &Path) -> Result<usize> {
        let content = fs::read_to_string(path)?;
        let mut loaded = 0;

        for (line_no, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with("//") {
                continue;
            }

            let mut fields = line.split([' ', '\t', ',', ';']).filter(|f| !f.is_empty());
            let (Some(name), Some(value)) = (fields.next(), fields.next()) else {
                warn!("key file line {}: not a name/key pair", line_no + 1);
                continue;
            };

            match (parse_key_name(name), parse_key_value(value)) {
                (Ok(key_name), Ok(key)) => {
                    self.add(key_name, key);
                    loaded += 1;
                }
                _ => {
                    warn!("key file line {}: unparseable entry", line_no + 1);
                }
            }
        }

        debug!("loaded {loaded} keys from {path:?}");
        Ok(loaded)
    }
}

impl Default for KeyService {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_key_name(s: &str) -> Result<u64> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    u64::from_str_radix(s, 16).map_err(|_| CascError::InvalidParameter("key name"))
}

fn parse_key_value(s: &str) -> Result<[u8; 16]> {
    let mut key = [0u8; 16];
    hex::decode_to_slice(s, &mut key).map_err(|_| CascError::InvalidParameter("key value"))?;
    Ok(key)
}
