//! Build descriptor ("main file") parsing.
//!
//! A storage is bootstrapped from one of three textual descriptors sitting
//! next to (or above) the data directory:
//!
//! - `.build.info`: field-tagged CSV with headers like `Build Key!HEX:16`,
//!   one row per installed branch;
//! - `versions`: the same CSV dialect as served by the version service,
//!   one row per region;
//! - `.build.db`: a legacy headerless form with the build and CDN keys as
//!   the first two columns.
//!
//! The parser extracts the *active* row and resolves it into the keys and
//! metadata the storage needs to continue loading.

use crate::config::parser::parse_md5_string;
use crate::{Error, Md5, Result};
use tracing::{debug, warn};

/// Which descriptor flavour a file is, by filename convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildFileKind {
    /// `.build.info`, current local installations.
    BuildInfo,
    /// `.build.db`, older local installations.
    BuildDb,
    /// `versions`, cached online storages.
    Versions,
}

impl BuildFileKind {
    pub fn from_file_name(name: &str) -> Option<Self> {
        match name {
            ".build.info" => Some(Self::BuildInfo),
            ".build.db" => Some(Self::BuildDb),
            "versions" => Some(Self::Versions),
            _ => None,
        }
    }

    /// `versions` descriptors mark a CDN-backed storage.
    pub fn is_online(&self) -> bool {
        matches!(self, Self::Versions)
    }
}

/// The resolved active row of a build descriptor.
#[derive(Debug, Clone)]
pub struct BuildDescriptor {
    pub kind: BuildFileKind,
    /// Key of the CDN build configuration.
    pub build_key: Md5,
    /// Key of the CDN configuration.
    pub cdn_key: Md5,
    pub cdn_hosts: Vec<String>,
    pub cdn_path: Option<String>,
    pub region: Option<String>,
    pub version_name: Option<String>,
    pub build_number: Option<u32>,
    pub product: Option<String>,
    pub tags: Vec<String>,
    /// Locale bits derived from locale-named tags.
    pub default_locale_mask: u32,
}

/// Locale bit for a tag name, zero when the tag is not a locale.
///
/// The bit values match the original library's public locale constants.
pub fn locale_mask_for_tag(tag: &str) -> u32 {
    match tag {
        "enUS" => 0x0000_0002,
        "koKR" => 0x0000_0004,
        "frFR" => 0x0000_0010,
        "deDE" => 0x0000_0020,
        "zhCN" => 0x0000_0040,
        "esES" => 0x0000_0080,
        "zhTW" => 0x0000_0100,
        "enGB" => 0x0000_0200,
        "enCN" => 0x0000_0400,
        "enTW" => 0x0000_0800,
        "esMX" => 0x0000_1000,
        "ruRU" => 0x0000_2000,
        "ptBR" => 0x0000_4000,
        "itIT" => 0x0000_8000,
        "ptPT" => 0x0001_0000,
        _ => 0,
    }
}

/// Column indexes of interest, resolved from a tagged CSV header.
#[derive(Default)]
struct Columns {
    build_key: Option<usize>,
    cdn_key: Option<usize>,
    region: Option<usize>,
    version: Option<usize>,
    build_id: Option<usize>,
    product: Option<usize>,
    tags: Option<usize>,
    cdn_hosts: Option<usize>,
    cdn_path: Option<usize>,
    active: Option<usize>,
}

impl Columns {
    fn from_header(header: &str) -> Self {
        let mut o = Self::default();
        for (i, field) in header.split('|').enumerate() {
            // "Build Key!HEX:16" -> "build key"
            let name = field.split('!').next().unwrap_or("").trim().to_ascii_lowercase();
            match name.as_str() {
                "build key" | "buildconfig" => o.build_key = Some(i),
                "cdn key" | "cdnconfig" => o.cdn_key = Some(i),
                "branch" | "region" => o.region = Some(i),
                "version" | "versionsname" => o.version = Some(i),
                "buildid" => o.build_id = Some(i),
                "product" => o.product = Some(i),
                "tags" => o.tags = Some(i),
                "cdn hosts" => o.cdn_hosts = Some(i),
                "cdn path" => o.cdn_path = Some(i),
                "active" => o.active = Some(i),
                _ => {}
            }
        }
        o
    }
}

impl BuildDescriptor {
    /// Parse a descriptor, selecting the row for `region` when given.
    pub fn parse(kind: BuildFileKind, text: &str, region: Option<&str>) -> Result<Self> {
        match kind {
            BuildFileKind::BuildInfo | BuildFileKind::Versions => {
                Self::parse_tagged_csv(kind, text, region)
            }
            BuildFileKind::BuildDb => Self::parse_build_db(text),
        }
    }

    fn parse_tagged_csv(
        kind: BuildFileKind,
        text: &str,
        region: Option<&str>,
    ) -> Result<Self> {
        let mut lines = text
            .lines()
            .map(str::trim_end)
            .filter(|l| !l.is_empty() && !l.starts_with('#'));

        let header = lines.next().ok_or(Error::MissingField("header"))?;
        let columns = Columns::from_header(header);
        let build_key_col = columns.build_key.ok_or(Error::MissingField("Build Key"))?;
        let cdn_key_col = columns.cdn_key.ok_or(Error::MissingField("CDN Key"))?;

        let rows: Vec<Vec<&str>> = lines.map(|l| l.split('|').map(str::trim).collect()).collect();
        if rows.is_empty() {
            return Err(Error::MissingField("rows"));
        }

        let field = |row: &[&str], col: Option<usize>| -> Option<String> {
            col.and_then(|c| row.get(c))
                .filter(|v| !v.is_empty())
                .map(|v| v.to_string())
        };

        // Row selection: an explicit region wins, then the row flagged
        // active, then the first row.
        let selected = region
            .and_then(|want| {
                rows.iter().find(|row| {
                    field(row, columns.region).is_some_and(|r| r.eq_ignore_ascii_case(want))
                })
            })
            .or_else(|| {
                rows.iter()
                    .find(|row| field(row, columns.active).as_deref() == Some("1"))
            })
            .unwrap_or(&rows[0]);

        let build_key = parse_md5_string(
            field(selected, Some(build_key_col))
                .ok_or(Error::MissingField("Build Key"))?
                .as_str(),
        )?;
        let cdn_key = parse_md5_string(
            field(selected, Some(cdn_key_col))
                .ok_or(Error::MissingField("CDN Key"))?
                .as_str(),
        )?;

        let tags: Vec<String> = field(selected, columns.tags)
            .map(|t| t.split_ascii_whitespace().map(String::from).collect())
            .unwrap_or_default();
        let default_locale_mask = tags
            .iter()
            .fold(0, |mask, tag| mask | locale_mask_for_tag(tag));

        let version_name = field(selected, columns.version);
        let build_number = field(selected, columns.build_id)
            .and_then(|id| id.parse().ok())
            .or_else(|| build_number_from_version(Some(version_name.as_deref()?)));

        let descriptor = Self {
            kind,
            build_key,
            cdn_key,
            cdn_hosts: field(selected, columns.cdn_hosts)
                .map(|h| h.split_ascii_whitespace().map(String::from).collect())
                .unwrap_or_default(),
            cdn_path: field(selected, columns.cdn_path),
            region: field(selected, columns.region),
            version_name,
            build_number,
            product: field(selected, columns.product),
            tags,
            default_locale_mask,
        };

        debug!(
            "build descriptor: region={:?} build={} cdn={} locale_mask={:#x}",
            descriptor.region,
            hex::encode(descriptor.build_key),
            hex::encode(descriptor.cdn_key),
            descriptor.default_locale_mask,
        );
        Ok(descriptor)
    }

    /// Legacy `.build.db`: one headerless line, the build key and CDN key
    /// first, a version name somewhere behind them.
    fn parse_build_db(text: &str) -> Result<Self> {
        let line = text
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .ok_or(Error::MissingField("row"))?;

        let fields: Vec<&str> = line.split(['|', '\t']).map(str::trim).collect();
        if fields.len() < 2 {
            return Err(Error::MissingField("Build Key"));
        }

        let build_key = parse_md5_string(fields[0])?;
        let cdn_key = parse_md5_string(fields[1])?;

        let version_name = fields
            .iter()
            .skip(2)
            .find(|f| f.contains('.') && f.chars().next().is_some_and(|c| c.is_ascii_digit()))
            .map(|f| f.to_string());
        if version_name.is_none() {
            warn!(".build.db row carries no version field");
        }

        Ok(Self {
            kind: BuildFileKind::BuildDb,
            build_key,
            cdn_key,
            cdn_hosts: Vec::new(),
            cdn_path: None,
            region: None,
            build_number: build_number_from_version(version_name.as_deref()),
            version_name,
            product: None,
            tags: Vec::new(),
            default_locale_mask: 0,
        })
    }
}

/// `"9.2.7.45745"` → `45745`.
fn build_number_from_version(version: Option<&str>) -> Option<u32> {
    version?.rsplit('.').next()?.parse().ok()
}
