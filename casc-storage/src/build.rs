//! Build bootstrap: locating the main descriptor file, resolving the CDN
//! configuration pair, and turning the build configuration into the set of
//! well-known manifest keys the open pipeline loads.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use tracing::debug;

use tact_formats::config::parser::ConfigParsable;
use tact_formats::config::{BuildConfig, BuildFileKind, CdnConfig};
use tact_formats::{CKey, EKey, MaybePair, Md5};

use crate::error::{CascError, Result};
use crate::types::INVALID_SIZE;

/// Find the main descriptor for `local_path`.
///
/// The path may name the descriptor itself, the installation root, or any
/// directory below it; ancestors are searched the way the game client does.
pub fn find_main_file(local_path: &Path) -> Result<(PathBuf, BuildFileKind)> {
    // An exact file path wins.
    if local_path.is_file() {
        if let Some(kind) = local_path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(BuildFileKind::from_file_name)
        {
            return Ok((local_path.to_path_buf(), kind));
        }
        return Err(CascError::InvalidParameter("not a build descriptor"));
    }

    let mut dir = Some(local_path);
    while let Some(d) = dir {
        for name in [".build.info", ".build.db", "versions"] {
            let candidate = d.join(name);
            if candidate.is_file() {
                // Unwrap is safe: the name came from the table above.
                let kind = BuildFileKind::from_file_name(name)
                    .ok_or(CascError::InvalidParameter("descriptor name"))?;
                debug!("main file: {candidate:?}");
                return Ok((candidate, kind));
            }
        }
        dir = d.parent();
    }

    Err(CascError::FileNotFound)
}

/// Candidate names of the directory holding `data/` and `config/`.
const DATA_DIR_NAMES: &[&str] = &["Data", "data", "HeroesData", "SC2Data"];

/// Resolve the data and config directories under the storage root.
pub fn find_data_dirs(root_path: &Path) -> Option<(PathBuf, PathBuf)> {
    for name in DATA_DIR_NAMES {
        let base = root_path.join(name);
        if base.join("data").is_dir() {
            return Some((base.join("data"), base.join("config")));
        }
    }
    None
}

/// Path of a CDN config blob under the local config tree:
/// `config/<k0><k1>/<k2><k3>/<full hex key>`, matching the CDN layout.
pub fn config_file_path(config_path: &Path, key: &Md5) -> PathBuf {
    let hex = hex::encode(key);
    config_path.join(&hex[0..2]).join(&hex[2..4]).join(hex)
}

/// Parse the CDN config addressed by `key`, if it exists locally.
pub fn load_cdn_config(config_path: &Path, key: &Md5) -> Result<CdnConfig> {
    let path = config_file_path(config_path, key);
    let file = File::open(&path)?;
    debug!("cdn config: {path:?}");
    Ok(CdnConfig::parse_config(BufReader::new(file))?)
}

/// Parse the build config addressed by `key`.
pub fn load_build_config(config_path: &Path, key: &Md5) -> Result<BuildConfig> {
    let path = config_file_path(config_path, key);
    let file = File::open(&path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            CascError::FileNotFound
        } else {
            CascError::Io(e)
        }
    })?;
    debug!("build config: {path:?}");
    Ok(BuildConfig::parse_config(BufReader::new(file))?)
}

/// Keys and sizes of one well-known manifest file.
#[derive(Debug, Clone, Copy)]
pub struct KeySpec {
    pub ckey: Option<CKey>,
    pub ekey: Option<EKey>,
    pub content_size: u32,
    pub encoded_size: u32,
}

impl Default for KeySpec {
    fn default() -> Self {
        Self {
            ckey: None,
            ekey: None,
            content_size: INVALID_SIZE,
            encoded_size: INVALID_SIZE,
        }
    }
}

impl KeySpec {
    fn from_pair(keys: Option<&MaybePair<Md5>>, sizes: Option<&MaybePair<u32>>) -> Self {
        Self {
            ckey: keys.map(|p| CKey::new(*p.primary())),
            ekey: keys.and_then(|p| p.secondary()).map(|k| EKey::new(*k)),
            content_size: sizes.map(|p| *p.primary()).unwrap_or(INVALID_SIZE),
            encoded_size: sizes
                .and_then(|p| p.secondary())
                .copied()
                .unwrap_or(INVALID_SIZE),
        }
    }

    fn from_exact_pair(keys: Option<&(Md5, Md5)>, sizes: Option<&(u32, u32)>) -> Self {
        Self {
            ckey: keys.map(|(c, _)| CKey::new(*c)),
            ekey: keys.map(|(_, e)| EKey::new(*e)),
            content_size: sizes.map(|(c, _)| *c).unwrap_or(INVALID_SIZE),
            encoded_size: sizes.map(|(_, e)| *e).unwrap_or(INVALID_SIZE),
        }
    }

    pub fn is_present(&self) -> bool {
        self.ckey.is_some() || self.ekey.is_some()
    }
}

/// The build configuration reduced to what the open pipeline consumes.
#[derive(Debug, Default)]
pub struct BuildManifests {
    pub encoding: KeySpec,
    pub download: KeySpec,
    pub install: KeySpec,
    pub size: KeySpec,
    pub patch: KeySpec,
    pub root: KeySpec,
    pub vfs_root: KeySpec,
    /// Numbered VFS roots, in index order.
    pub vfs: Vec<KeySpec>,
    pub build_number: Option<u32>,
    pub build_uid: Option<String>,
}

impl BuildManifests {
    pub fn from_config(config: &BuildConfig) -> Self {
        let root = KeySpec {
            ckey: config.root.map(CKey::new),
            ekey: None,
            content_size: INVALID_SIZE,
            encoded_size: INVALID_SIZE,
        };
        let patch = KeySpec {
            // The patch key addresses encoded data directly.
            ckey: config.patch.map(CKey::new),
            ekey: config.patch.map(EKey::new),
            content_size: INVALID_SIZE,
            encoded_size: config.patch_size.unwrap_or(INVALID_SIZE),
        };

        Self {
            encoding: KeySpec::from_pair(config.encoding.as_ref(), config.encoding_size.as_ref()),
            download: KeySpec::from_pair(config.download.as_ref(), config.download_size.as_ref()),
            install: KeySpec::from_pair(config.install.as_ref(), config.install_size.as_ref()),
            size: KeySpec::from_exact_pair(config.size.as_ref(), config.size_size.as_ref()),
            patch,
            root,
            vfs_root: KeySpec::from_exact_pair(
                config.vfs_root.as_ref(),
                config.vfs_root_size.as_ref(),
            ),
            vfs: config
                .vfs
                .as_ref()
                .map(|m| {
                    m.iter()
                        .map(|(index, pair)| {
                            KeySpec::from_exact_pair(
                                Some(pair),
                                config.vfs_size.as_ref().and_then(|s| s.get(index)),
                            )
                        })
                        .collect()
                })
                .unwrap_or_default(),
            build_number: config.build_number(),
            build_uid: config.build_uid.clone(),
        }
    }

    /// Estimated number of files, used to pre-size the central table.
    ///
    /// DOWNLOAD is the most reliable ruler (one entry per file, at least 22
    /// bytes each); ENCODING underestimates on TVFS storages. With neither
    /// size known, assume an old storage of up to a million files.
    pub fn estimated_file_count(&self) -> usize {
        const EXTRA: usize = 0x40;
        const DOWNLOAD_ENTRY_SIZE: usize = 22;
        const ENCODING_ENTRY_SIZE: usize = 38;

        let by_download = (self.download.content_size != INVALID_SIZE)
            .then(|| self.download.content_size as usize / DOWNLOAD_ENTRY_SIZE + EXTRA);
        let by_encoding = (self.encoding.content_size != INVALID_SIZE)
            .then(|| self.encoding.content_size as usize / ENCODING_ENTRY_SIZE + EXTRA);

        match (by_download, by_encoding) {
            (None, None) => 1_000_000,
            (a, b) => a.unwrap_or(0).max(b.unwrap_or(0)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn finds_descriptor_in_ancestors() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(".build.info"), "x").unwrap();
        let nested = dir.path().join("Data").join("data");
        std::fs::create_dir_all(&nested).unwrap();

        let (path, kind) = find_main_file(&nested).unwrap();
        assert_eq!(kind, BuildFileKind::BuildInfo);
        assert_eq!(path, dir.path().join(".build.info"));
    }

    #[test]
    fn missing_descriptor_is_file_not_found() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            find_main_file(dir.path()),
            Err(CascError::FileNotFound)
        ));
    }

    #[test]
    fn config_paths_shard_by_key_prefix() {
        let key = [0xAB; 16];
        let path = config_file_path(Path::new("/cfg"), &key);
        assert_eq!(
            path,
            Path::new("/cfg/ab/ab/abababababababababababababababab")
        );
    }

    #[test]
    fn manifests_from_config() {
        let text = "\
root = 11111111111111111111111111111111
encoding = 22222222222222222222222222222222 33333333333333333333333333333333
encoding-size = 100 200
download = 44444444444444444444444444444444 55555555555555555555555555555555
download-size = 2200 2300
build-uid = wow
build-name = WOW-45745patch9.2.7
";
        let config = BuildConfig::parse_config(Cursor::new(text)).unwrap();
        let manifests = BuildManifests::from_config(&config);

        assert!(manifests.root.is_present());
        assert!(manifests.root.ekey.is_none());
        assert_eq!(manifests.encoding.content_size, 100);
        assert_eq!(manifests.encoding.encoded_size, 200);
        assert_eq!(manifests.build_number, Some(45745));
        // 2200 / 22 + 0x40
        assert_eq!(manifests.estimated_file_count(), 100 + 0x40);
        assert!(!manifests.vfs_root.is_present());
    }

    #[test]
    fn estimate_defaults_to_a_million() {
        let manifests = BuildManifests::default();
        assert_eq!(
            BuildManifests {
                encoding: KeySpec {
                    content_size: INVALID_SIZE,
                    ..Default::default()
                },
                ..manifests
            }
            .estimated_file_count(),
            1_000_000
        );
    }
}
