use crate::config::parser::*;
use crate::{Error, MaybePair, Md5, Result};
use std::collections::BTreeMap;

/// [Build configuration][0] parser.
///
/// The keys of the well-known manifest files live here: each entry is either
/// a single content key, or a content key followed by the encoded key of the
/// same file.
///
/// [0]: https://wowdev.wiki/TACT#Build_Config
#[derive(Debug, Default, PartialEq, Eq)]
pub struct BuildConfig {
    pub root: Option<Md5>,

    pub install: Option<MaybePair<Md5>>,
    pub install_size: Option<MaybePair<u32>>,

    pub download: Option<MaybePair<Md5>>,
    pub download_size: Option<MaybePair<u32>>,

    pub size: Option<(Md5, Md5)>,
    pub size_size: Option<(u32, u32)>,

    pub encoding: Option<MaybePair<Md5>>,
    pub encoding_size: Option<MaybePair<u32>>,

    pub patch: Option<Md5>,
    pub patch_size: Option<u32>,
    pub patch_config: Option<Md5>,

    pub build_name: Option<String>,
    pub build_uid: Option<String>,
    pub build_product: Option<String>,
    pub build_num: Option<u32>,

    pub vfs_root: Option<(Md5, Md5)>,
    pub vfs_root_size: Option<(u32, u32)>,

    /// Numbered VFS manifests (`vfs-1`, `vfs-2`, ...).
    ///
    /// This uses the indexes from the original file, which normally start
    /// at 1.
    pub vfs: Option<BTreeMap<u16, (Md5, Md5)>>,

    /// Numbered VFS manifest sizes.
    pub vfs_size: Option<BTreeMap<u16, (u32, u32)>>,
}

impl ConfigParsableInternal for BuildConfig {
    fn handle_kv(o: &mut Self, k: &str, v: &str) -> Result<()> {
        let k = k.to_ascii_lowercase();
        match k.as_str() {
            "root" => {
                o.root = Some(parse_md5_string(v)?);
            }

            "install" => {
                o.install = Some(parse_md5_maybepair_string(v)?);
            }
            "install-size" => {
                o.install_size = Some(parse_u32_maybepair_string(v)?);
            }

            "download" => {
                o.download = Some(parse_md5_maybepair_string(v)?);
            }
            "download-size" => {
                o.download_size = Some(parse_u32_maybepair_string(v)?);
            }

            "size" => {
                o.size = Some(parse_md5_pair_string(v)?);
            }
            "size-size" => {
                o.size_size = Some(parse_u32_pair_string(v)?);
            }

            "encoding" => {
                o.encoding = Some(parse_md5_maybepair_string(v)?);
            }
            "encoding-size" => {
                o.encoding_size = Some(parse_u32_maybepair_string(v)?);
            }

            "patch" => {
                o.patch = Some(parse_md5_string(v)?);
            }
            "patch-size" => {
                o.patch_size = Some(v.parse().map_err(|_| Error::ConfigTypeMismatch)?);
            }
            "patch-config" => {
                o.patch_config = Some(parse_md5_string(v)?);
            }

            "build-name" => {
                o.build_name = Some(v.to_string());
            }
            "build-uid" => {
                o.build_uid = Some(v.to_string());
            }
            "build-product" => {
                o.build_product = Some(v.to_string());
            }
            "build-num" | "build-number" => {
                o.build_num = Some(v.parse().map_err(|_| Error::ConfigTypeMismatch)?);
            }

            "vfs-root" => {
                o.vfs_root = Some(parse_md5_pair_string(v)?);
            }
            "vfs-root-size" => {
                o.vfs_root_size = Some(parse_u32_pair_string(v)?);
            }

            _ => {
                if let Some(suffix) = k.strip_prefix("vfs-") {
                    if let Some(index) = suffix.strip_suffix("-size") {
                        if let Ok(index) = index.parse::<u16>() {
                            o.vfs_size
                                .get_or_insert_default()
                                .insert(index, parse_u32_pair_string(v)?);
                        }
                    } else if let Ok(index) = suffix.parse::<u16>() {
                        o.vfs
                            .get_or_insert_default()
                            .insert(index, parse_md5_pair_string(v)?);
                    }
                }
                // Unknown keys are ignored; the format grows regularly.
            }
        }

        Ok(())
    }
}

impl BuildConfig {
    /// The build number, falling back to trailing digits of `build-name`
    /// (e.g. `WOW-45745patch9.2.7`) when `build-num` is absent.
    pub fn build_number(&self) -> Option<u32> {
        if self.build_num.is_some() {
            return self.build_num;
        }

        let name = self.build_name.as_deref()?;
        let digits: String = name
            .chars()
            .skip_while(|c| !c.is_ascii_digit())
            .take_while(char::is_ascii_digit)
            .collect();
        digits.parse().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parser::ConfigParsable;
    use std::io::Cursor;

    const SAMPLE: &str = "\
# Build Configuration

root = 44b2dcd305b23b8fee0d5cf81b48f84e
install = 5fe91a1b4eee7d0a3efd5a1a57e30837 8b5e51e1be48e5074fff39bd46aa1b7f
install-size = 20947 20964
download = cb9a9a83f30be6c0e11b3b363db69df3 d0a731e3fb3c7971f76ae5f2899f6a83
download-size = 2539292 2539309
size = f75f38a5ed4c3b9b88ed0e84a8ae5cf7 e18a7a58fba66e1bbc10e1c3e4661aa8
size-size = 617940 617957
encoding = b3ebe8498e26e73e0cd6640f0932cfc2 4cfe6e7b45b247e3f3dcb6e2b9fe1e26
encoding-size = 13979328 13979363
patch = 04e31482f51601801d2cf8c5829bea2b
patch-size = 316447
patch-config = 8b95f77b2f7c41d5cc62d7cc7d87f2a1
build-name = WOW-45745patch9.2.7_Retail
build-uid = wow
build-product = WoW
vfs-root = 6288b13ef627d3ca7b2e978b5e2a0a16 15a0e891b8a4a4d0b859e30333e83f3c
vfs-root-size = 463 479
vfs-1 = 74b662e8691be5fd2d9b3b2dd5f93ee5 cdbdc0d5a3be10891ae56ba00de12126
vfs-1-size = 162913 162929
";

    #[test]
    fn parses_sample() {
        let config = BuildConfig::parse_config(Cursor::new(SAMPLE)).unwrap();

        assert_eq!(
            config.root.map(hex::encode).as_deref(),
            Some("44b2dcd305b23b8fee0d5cf81b48f84e")
        );
        let encoding = config.encoding.unwrap();
        assert_eq!(
            hex::encode(encoding.primary()),
            "b3ebe8498e26e73e0cd6640f0932cfc2"
        );
        assert_eq!(
            encoding.secondary().map(hex::encode).as_deref(),
            Some("4cfe6e7b45b247e3f3dcb6e2b9fe1e26")
        );
        assert_eq!(config.encoding_size, Some(MaybePair::Pair(13979328, 13979363)));
        assert_eq!(config.build_uid.as_deref(), Some("wow"));
        assert_eq!(config.build_number(), Some(45745));
        assert!(config.vfs_root.is_some());
        assert_eq!(config.vfs.as_ref().unwrap().len(), 1);
        assert_eq!(config.vfs_size.as_ref().unwrap()[&1], (162913, 162929));
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let config =
            BuildConfig::parse_config(Cursor::new("future-key = whatever\n")).unwrap();
        assert_eq!(config, BuildConfig::default());
    }

    #[test]
    fn bad_hash_is_type_mismatch() {
        assert!(matches!(
            BuildConfig::parse_config(Cursor::new("root = nothex\n")),
            Err(Error::ConfigTypeMismatch)
        ));
    }
}
