use crate::config::parser::*;
use crate::{Error, Md5, Result};

/// CDN configuration parser.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct CdnConfig {
    /// C-Keys of all archives.
    pub archives: Option<Vec<Md5>>,
    pub archives_index_size: Option<Vec<u32>>,

    /// C-Key of the combined archive index.
    pub archive_group: Option<Md5>,

    /// C-Keys of patch archives.
    pub patch_archives: Option<Vec<Md5>>,
    pub patch_archives_index_size: Option<Vec<u32>>,
    pub patch_archive_group: Option<Md5>,

    pub file_index: Option<Md5>,
    pub file_index_size: Option<u32>,
    pub patch_file_index: Option<Md5>,
    pub patch_file_index_size: Option<u32>,

    /// List of build configs this CDN config supports.
    pub builds: Option<Vec<String>>,
}

impl ConfigParsableInternal for CdnConfig {
    fn handle_kv(o: &mut Self, k: &str, v: &str) -> Result<()> {
        let k = k.to_ascii_lowercase();
        match k.as_str() {
            "archives" => {
                o.archives = Some(parse_md5s_string(v)?);
            }
            "archives-index-size" => {
                o.archives_index_size = Some(parse_u32s_string(v)?);
            }
            "archive-group" => {
                o.archive_group = Some(parse_md5_string(v)?);
            }
            "patch-archives" => {
                o.patch_archives = Some(parse_md5s_string(v)?);
            }
            "patch-archives-index-size" => {
                o.patch_archives_index_size = Some(parse_u32s_string(v)?);
            }
            "patch-archive-group" => {
                o.patch_archive_group = Some(parse_md5_string(v)?);
            }
            "file-index" => {
                o.file_index = Some(parse_md5_string(v)?);
            }
            "file-index-size" => {
                o.file_index_size = Some(v.parse().map_err(|_| Error::ConfigTypeMismatch)?);
            }
            "patch-file-index" => {
                o.patch_file_index = Some(parse_md5_string(v)?);
            }
            "patch-file-index-size" => {
                o.patch_file_index_size =
                    Some(v.parse().map_err(|_| Error::ConfigTypeMismatch)?);
            }
            "builds" => {
                o.builds = Some(v.split_ascii_whitespace().map(String::from).collect());
            }
            _ => {
                // Unknown keys are ignored.
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parser::ConfigParsable;
    use std::io::Cursor;

    #[test]
    fn parses_groups() {
        let text = "\
archives = 11111111111111111111111111111111 22222222222222222222222222222222
archives-index-size = 10 20
archive-group = 33333333333333333333333333333333
patch-archive-group = 44444444444444444444444444444444
";
        let config = CdnConfig::parse_config(Cursor::new(text)).unwrap();
        assert_eq!(config.archives.as_ref().unwrap().len(), 2);
        assert_eq!(config.archives_index_size, Some(vec![10, 20]));
        assert_eq!(config.archive_group, Some([0x33; 16]));
        assert_eq!(config.patch_archive_group, Some([0x44; 16]));
    }

    #[test]
    fn empty_config() {
        let config = CdnConfig::parse_config(Cursor::new("")).unwrap();
        assert_eq!(config, CdnConfig::default());
    }
}
