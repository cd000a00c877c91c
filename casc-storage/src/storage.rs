//! The storage façade: open parameters, the open pipeline, and the
//! post-open query surface.
//!
//! Opening is strictly sequential; each phase either completes, short-
//! circuits the open with an error (dropping all partial state), or is one
//! of the two documented softenings (a missing CDN config on a local
//! storage, and the ROOT to INSTALL fallback).

use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use tracing::{debug, info, warn};

use tact_formats::config::buildinfo::{BuildDescriptor, BuildFileKind};
use tact_formats::config::parser::parse_md5_string;
use tact_formats::download::DownloadManifest;
use tact_formats::encoding::EncodingFile;
use tact_formats::install::InstallManifest;
use tact_formats::{CKey, Md5};

use crate::archive::ArchiveSet;
use crate::build::{self, BuildManifests, KeySpec};
use crate::error::{CascError, Result};
use crate::features;
use crate::frame::DefaultCodec;
use crate::index::IndexGroup;
use crate::keysvc::KeyService;
use crate::loader;
use crate::root::{self, InstallRoot, RootHandler, RootOutcome};
use crate::table::{CKeyEntry, CKeyTable, EntryFlags, EntryId};
use crate::types::{INVALID_SIZE, TagInfo};

/// Progress callback: called with a phase description, returns `true` to
/// cancel the open.
pub type ProgressFn = dyn FnMut(&str) -> bool + Send;

/// Parameters for [`Storage::open`].
pub struct OpenArgs {
    /// Installation root, any directory below it, or the descriptor file
    /// itself. Required.
    pub local_path: PathBuf,
    /// Override for the CDN host recorded in the descriptor.
    pub cdn_host_url: Option<String>,
    /// Product code, e.g. `"wowt"` or `"agent"`.
    pub code_name: Option<String>,
    /// Region row to select in multi-row descriptors.
    pub region: Option<String>,
    /// Hex build-config key, overriding the descriptor's active row.
    pub build_key: Option<String>,
    /// Locale bits to mount; 0 selects the descriptor default.
    pub locale_mask: u32,
    /// Extra encryption keys to load, `keyname keyhex` per line.
    pub key_file: Option<PathBuf>,
    /// Treat every file as downloadable even without local data.
    pub force_download: bool,
    /// Phase-boundary progress callback.
    pub progress: Option<Box<ProgressFn>>,
}

impl OpenArgs {
    pub fn new(local_path: impl Into<PathBuf>) -> Self {
        Self {
            local_path: local_path.into(),
            cdn_host_url: None,
            code_name: None,
            region: None,
            build_key: None,
            locale_mask: 0,
            key_file: None,
            force_download: false,
            progress: None,
        }
    }

    /// Parse the legacy parameter string
    /// `"<local_path>*[<cdn_url>*]<code_name>*<region>"`.
    ///
    /// The middle field is taken as a CDN URL only when it looks like one
    /// (`://`, a dot, or a slash), which is what keeps the `*` separator
    /// unambiguous.
    pub fn parse(params: &str) -> Result<Self> {
        let mut args = Self::new("");
        args.apply_params(params)?;
        Ok(args)
    }

    /// Merge a legacy parameter string into these arguments. Fields set on
    /// both sides conflict.
    pub fn apply_params(&mut self, params: &str) -> Result<()> {
        let mut parts = params.split('*');

        let local = parts.next().unwrap_or("");
        if local.is_empty() {
            return Err(CascError::InvalidParameter("local path"));
        }
        if !self.local_path.as_os_str().is_empty() {
            return Err(CascError::InvalidParameter("local path given twice"));
        }
        self.local_path = PathBuf::from(local);

        let mut rest: Vec<&str> = parts.collect();
        if !rest.is_empty() && is_url(rest[0]) {
            if self.cdn_host_url.is_some() {
                return Err(CascError::InvalidParameter("cdn url given twice"));
            }
            self.cdn_host_url = Some(rest.remove(0).to_string());
        }
        if !rest.is_empty() {
            if self.code_name.is_some() {
                return Err(CascError::InvalidParameter("code name given twice"));
            }
            self.code_name = Some(rest.remove(0).to_string());
        }
        if !rest.is_empty() {
            if self.region.is_some() {
                return Err(CascError::InvalidParameter("region given twice"));
            }
            self.region = Some(rest.remove(0).to_string());
        }

        Ok(())
    }
}

fn is_url(s: &str) -> bool {
    s.contains("://") || s.contains('.') || s.contains('/')
}

/// Info query selector, mirroring the classic info-class API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InfoClass {
    LocalFileCount,
    TotalFileCount,
    Features,
    InstalledLocales,
    Product,
    Tags,
    PathProduct,
}

/// Info query result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageInfo {
    Count(u32),
    Features(u32),
    Locales(u32),
    Product(ProductInfo),
    Tags(Vec<TagInfo>),
    Path(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProductInfo {
    pub code_name: Option<String>,
    pub build_number: u32,
}

struct StorageInner {
    root_path: PathBuf,
    kind: BuildFileKind,
    features: u32,
    archive_group: Option<Md5>,
    patch_archive_group: Option<Md5>,
    code_name: Option<String>,
    region: Option<String>,
    build_number: u32,
    default_locale: u32,
    file_offset_bits: u32,
    local_files: u32,
    total_files: OnceLock<u32>,
    tags: Vec<TagInfo>,
    table: CKeyTable,
    root: Box<dyn RootHandler>,
    archives: ArchiveSet,
    codec: DefaultCodec,
}

/// An open, immutable CASC storage.
///
/// Cheap to clone; the underlying state is dropped when the last clone
/// goes away.
#[derive(Clone)]
pub struct Storage {
    inner: Arc<StorageInner>,
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage")
            .field("root_path", &self.inner.root_path)
            .finish_non_exhaustive()
    }
}

impl Storage {
    /// Open a local storage.
    pub fn open(args: OpenArgs) -> Result<Self> {
        let inner = open_pipeline(args)?;
        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    /// Number of encoded spans present in the local index.
    pub fn local_file_count(&self) -> u32 {
        self.inner.local_files
    }

    /// Number of files reachable through the storage, weighing multi-named
    /// entries once per name. Computed on first use.
    pub fn total_file_count(&self) -> u32 {
        *self
            .inner
            .total_files
            .get_or_init(|| self.inner.table.total_file_count())
    }

    /// Storage feature bits merged with the root handler's.
    pub fn features(&self) -> u32 {
        self.inner.features | self.inner.root.features()
    }

    pub fn installed_locales(&self) -> u32 {
        self.inner.default_locale
    }

    /// Which descriptor flavour bootstrapped this storage.
    pub fn build_file_kind(&self) -> BuildFileKind {
        self.inner.kind
    }

    /// Key of the combined archive index, when the CDN config was present.
    pub fn archive_group(&self) -> Option<&Md5> {
        self.inner.archive_group.as_ref()
    }

    /// Key of the combined patch-archive index.
    pub fn patch_archive_group(&self) -> Option<&Md5> {
        self.inner.patch_archive_group.as_ref()
    }

    pub fn product(&self) -> ProductInfo {
        ProductInfo {
            code_name: self.inner.code_name.clone(),
            build_number: self.inner.build_number,
        }
    }

    pub fn tags(&self) -> &[TagInfo] {
        &self.inner.tags
    }

    /// `"<root>*<code>*<region>"`, the canonical reopen string.
    pub fn path_product(&self) -> String {
        let mut out = self.inner.root_path.display().to_string();
        if let Some(code) = &self.inner.code_name {
            out.push('*');
            out.push_str(code);
        }
        if let Some(region) = &self.inner.region {
            out.push('*');
            out.push_str(region);
        }
        out
    }

    /// Enum-selector form of the individual queries.
    pub fn info(&self, class: InfoClass) -> StorageInfo {
        match class {
            InfoClass::LocalFileCount => StorageInfo::Count(self.local_file_count()),
            InfoClass::TotalFileCount => StorageInfo::Count(self.total_file_count()),
            InfoClass::Features => StorageInfo::Features(self.features()),
            InfoClass::InstalledLocales => StorageInfo::Locales(self.installed_locales()),
            InfoClass::Product => StorageInfo::Product(self.product()),
            InfoClass::Tags => StorageInfo::Tags(self.inner.tags.clone()),
            InfoClass::PathProduct => StorageInfo::Path(self.path_product()),
        }
    }

    /// The central file table.
    pub fn table(&self) -> &CKeyTable {
        &self.inner.table
    }

    /// Resolve a name through the root handler.
    pub fn lookup_name(&self, name: &str) -> Option<&CKeyEntry> {
        let id = self.inner.root.lookup(name)?;
        Some(self.inner.table.get(id))
    }

    /// Resolve a file-data ID, on storages whose root indexes by one.
    pub fn lookup_fid(&self, fid: u32) -> Option<&CKeyEntry> {
        let id = self.inner.root.lookup_fid(fid)?;
        Some(self.inner.table.get(id))
    }

    /// Read and decode a file by name.
    pub fn read_by_name(&self, name: &str) -> Result<Vec<u8>> {
        let id = self.inner.root.lookup(name).ok_or(CascError::FileNotFound)?;
        loader::load_entry(
            &self.inner.archives,
            &self.inner.table,
            id,
            &self.inner.codec,
            self.inner.file_offset_bits,
        )
    }

    /// Read and decode a file by file-data ID.
    pub fn read_by_fid(&self, fid: u32) -> Result<Vec<u8>> {
        let id = self
            .inner
            .root
            .lookup_fid(fid)
            .ok_or(CascError::FileNotFound)?;
        loader::load_entry(
            &self.inner.archives,
            &self.inner.table,
            id,
            &self.inner.codec,
            self.inner.file_offset_bits,
        )
    }

    /// Read and decode a file by content key.
    pub fn read_by_ckey(&self, ckey: &CKey) -> Result<Vec<u8>> {
        let id = self
            .inner
            .table
            .find_by_ckey(ckey)
            .ok_or(CascError::FileNotFound)?;
        loader::load_entry(
            &self.inner.archives,
            &self.inner.table,
            id,
            &self.inner.codec,
            self.inner.file_offset_bits,
        )
    }
}

/// Load state carried between the open phases.
struct OpenState {
    manifests: BuildManifests,
    index: IndexGroup,
    table: CKeyTable,
    archives: ArchiveSet,
    codec: DefaultCodec,
    file_offset_bits: u32,
    tags: Vec<TagInfo>,
    features: u32,
}

impl OpenState {
    fn index_location(&self, spec: &KeySpec) -> Option<crate::types::ArchiveLocation> {
        spec.ekey.and_then(|ekey| self.index.lookup_ekey(&ekey))
    }

    /// Put one well-known file into the central table.
    fn insert_spec(&mut self, spec: &KeySpec) -> Option<EntryId> {
        let location = self.index_location(spec);
        self.table.insert_build(
            spec.ckey,
            spec.ekey,
            spec.content_size,
            spec.encoded_size,
            location,
            self.file_offset_bits,
        )
    }

    fn load_blob_by_ckey(&self, ckey: &CKey) -> Result<Vec<u8>> {
        let id = self
            .table
            .find_by_ckey(ckey)
            .ok_or(CascError::FileNotFound)?;
        loader::load_entry(
            &self.archives,
            &self.table,
            id,
            &self.codec,
            self.file_offset_bits,
        )
    }
}

fn open_pipeline(mut args: OpenArgs) -> Result<StorageInner> {
    if args.local_path.as_os_str().is_empty() {
        return Err(CascError::InvalidParameter("local path"));
    }

    let mut progress = args.progress.take();
    let mut report = move |phase: &str| -> Result<()> {
        debug!("{phase}");
        if let Some(callback) = progress.as_mut() {
            if callback(phase) {
                return Err(CascError::Cancelled);
            }
        }
        Ok(())
    };

    // Fresh -> MainFileLoaded
    let (main_file, kind) = build::find_main_file(&args.local_path)?;
    let root_path = main_file
        .parent()
        .map(Path::to_path_buf)
        .ok_or(CascError::InvalidParameter("descriptor location"))?;

    let mut features = features::DATA_ARCHIVES | features::DATA_FILES;
    if kind.is_online() {
        features |= features::ONLINE;
    }
    if args.force_download {
        features |= features::FORCE_DOWNLOAD;
    }

    let descriptor_text = std::fs::read_to_string(&main_file)?;
    let descriptor = BuildDescriptor::parse(kind, &descriptor_text, args.region.as_deref())?;

    let build_key: Md5 = match &args.build_key {
        Some(hex) => parse_md5_string(hex)
            .map_err(|_| CascError::InvalidParameter("build key"))?,
        None => descriptor.build_key,
    };

    let Some((data_path, config_path)) = build::find_data_dirs(&root_path) else {
        // No archives, nothing this engine can serve.
        return Err(CascError::FileNotFound);
    };

    // MainFileLoaded -> CdnConfigLoaded
    let cdn_config = match build::load_cdn_config(&config_path, &descriptor.cdn_key) {
        Ok(config) => Some(config),
        Err(e) if features & features::ONLINE == 0 => {
            // Local storages work without the CDN config.
            debug!("cdn config unavailable, ignoring on local storage: {e}");
            None
        }
        Err(e) => return Err(e),
    };
    let archive_group = cdn_config.as_ref().and_then(|c| c.archive_group);
    let patch_archive_group = cdn_config.as_ref().and_then(|c| c.patch_archive_group);
    if let Some(config) = &cdn_config {
        debug!(
            "cdn config: {} archives, archive group {:?}",
            config.archives.as_ref().map_or(0, Vec::len),
            config.archive_group.map(hex::encode),
        );
    }

    // CdnConfigLoaded -> CdnBuildLoaded
    let build_config = build::load_build_config(&config_path, &build_key)?;
    let manifests = BuildManifests::from_config(&build_config);

    let build_number = manifests
        .build_number
        .or(descriptor.build_number)
        .unwrap_or(0);
    let code_name = args
        .code_name
        .clone()
        .or_else(|| manifests.build_uid.clone())
        .or_else(|| descriptor.product.clone());
    let default_locale = if descriptor.default_locale_mask != 0 {
        descriptor.default_locale_mask
    } else {
        args.locale_mask
    };

    // CdnBuildLoaded -> IndexLoaded
    let index = IndexGroup::load_from_dir(&data_path)?;
    let file_offset_bits = index.file_offset_bits();
    let local_files = index.len() as u32;

    let keys = load_keys(&args);
    let mut state = OpenState {
        table: CKeyTable::with_capacity(manifests.estimated_file_count()),
        archives: ArchiveSet::new(data_path),
        codec: DefaultCodec::new(keys),
        file_offset_bits,
        index,
        manifests,
        tags: Vec::new(),
        features,
    };

    // IndexLoaded -> EncodingLoaded
    report("Loading ENCODING manifest")?;
    load_encoding(&mut state)?;

    // EncodingLoaded -> DownloadLoaded
    report("Loading DOWNLOAD manifest")?;
    match load_download(&mut state) {
        Ok(()) => {}
        Err(CascError::Cancelled) => return Err(CascError::Cancelled),
        // The storage stays usable without download metadata.
        Err(e) => warn!("DOWNLOAD manifest unavailable: {e}"),
    }

    // DownloadLoaded -> RootLoaded
    let mount_locale = if args.locale_mask != 0 {
        args.locale_mask
    } else {
        default_locale
    };
    let root = load_root(&mut state, mount_locale, &mut report)?;
    let mut root = match root {
        Some(root) => root,
        None => {
            // ROOT failed for a recoverable reason: mount INSTALL instead.
            report("Loading INSTALL manifest")?;
            load_install_fallback(&mut state)?
        }
    };

    insert_well_known(&mut state, root.as_mut());

    // RootLoaded -> KeysLoaded happened with the codec; -> Open releases
    // the index buffers by dropping the group.
    let OpenState {
        table,
        archives,
        codec,
        tags,
        features,
        index,
        ..
    } = state;
    drop(index);

    info!(
        "storage open: {} entries, {} local spans, build {}",
        table.len(),
        local_files,
        build_number
    );

    Ok(StorageInner {
        root_path,
        kind,
        features,
        archive_group,
        patch_archive_group,
        code_name,
        region: args.region.clone().or(descriptor.region),
        build_number,
        default_locale,
        file_offset_bits,
        local_files,
        total_files: OnceLock::new(),
        tags,
        table,
        root,
        archives,
        codec,
    })
}

fn load_keys(args: &OpenArgs) -> Arc<KeyService> {
    let mut keys = KeyService::new();
    if let Some(path) = &args.key_file {
        if let Err(e) = keys.load_key_file(path) {
            warn!("key file {path:?} not loaded: {e}");
        }
    }
    Arc::new(keys)
}

/// ENCODING: fatal on any failure.
fn load_encoding(state: &mut OpenState) -> Result<()> {
    let spec = state.manifests.encoding;
    if !spec.is_present() {
        return Err(CascError::FileNotFound);
    }

    // The manifest's own entry must resolve through the index before
    // anything can be read.
    if state.index_location(&spec).is_none() {
        return Err(CascError::FileNotFound);
    }
    state.insert_spec(&spec);

    let ckey = spec.ckey.ok_or(CascError::FileNotFound)?;
    let blob = state.load_blob_by_ckey(&ckey)?;
    let encoding = EncodingFile::parse(&blob)?;

    for entry in encoding.entries() {
        let Some(&ekey) = entry.ekeys.first() else {
            continue;
        };
        let location = state.index.lookup_ekey(&ekey);
        state.table.insert_encoding(
            entry.ckey,
            ekey,
            entry.content_size,
            location,
            state.file_offset_bits,
        );
    }
    debug!("ENCODING: {} table entries", state.table.len());

    // With CKey -> EKey resolution in place, the other well-known files
    // can enter the table.
    let mut well_known = vec![
        state.manifests.download,
        state.manifests.install,
        state.manifests.patch,
        state.manifests.root,
        state.manifests.size,
        state.manifests.vfs_root,
    ];
    well_known.extend(state.manifests.vfs.iter().copied());
    for spec in &well_known {
        if spec.is_present() {
            state.insert_spec(spec);
        }
    }

    Ok(())
}

/// DOWNLOAD: non-fatal; tag vector and per-entry priorities.
fn load_download(state: &mut OpenState) -> Result<()> {
    let Some(ckey) = state.manifests.download.ckey else {
        return Err(CascError::FileNotFound);
    };

    let blob = state.load_blob_by_ckey(&ckey)?;
    let manifest = DownloadManifest::parse(&blob)?;

    if manifest.header.tag_count > 0 {
        state.features |= features::TAGS;
    }
    state.tags = manifest
        .tags
        .iter()
        .map(|tag| TagInfo {
            name: tag.name.clone(),
            value: tag.value,
        })
        .collect();

    for (index, entry) in manifest.entries.iter().enumerate() {
        let location = state.index.lookup(&entry.ekey.prefix());
        let id = state.table.upsert_download(
            entry.ekey,
            entry.ekey_length as usize,
            entry.encoded_size.min(u64::from(INVALID_SIZE - 1)) as u32,
            entry.priority,
            location,
            state.file_offset_bits,
        );

        // Project the tag bitmaps onto the entry's bitmask; the mask is 64
        // bits wide by design, later tags are dropped.
        let mut bitmask = 0u64;
        for (tag_index, tag) in manifest.tags.iter().take(64).enumerate() {
            if tag.contains(index) {
                bitmask |= 1 << tag_index;
            }
        }
        state.table.get_mut(id).tag_bitmask |= bitmask;
    }

    debug!(
        "DOWNLOAD: {} entries, {} tags",
        manifest.entries.len(),
        manifest.tags.len()
    );
    Ok(())
}

/// ROOT: returns `None` when the failure should soften into the INSTALL
/// fallback.
fn load_root(
    state: &mut OpenState,
    locale_mask: u32,
    report: &mut impl FnMut(&str) -> Result<()>,
) -> Result<Option<Box<dyn RootHandler>>> {
    report("Loading ROOT manifest")?;

    // The VFS root wins over the legacy ROOT file when both exist.
    let use_vfs = state.manifests.vfs_root.is_present();
    let first = if use_vfs {
        state.manifests.vfs_root
    } else {
        state.manifests.root
    };

    let outcome = mount_root(state, &first, locale_mask);
    let outcome = match outcome {
        Ok(RootOutcome::Ready(handler)) => Ok(Some(handler)),
        Ok(RootOutcome::Reparse(old)) if use_vfs => {
            report("Loading ROOT manifest (reparsed)")?;
            let root_spec = state.manifests.root;
            match mount_root(state, &root_spec, locale_mask) {
                Ok(RootOutcome::Ready(mut new)) => {
                    // Names mounted by the first pass stay reachable.
                    new.copy_from(old.as_ref());
                    Ok(Some(new))
                }
                Ok(RootOutcome::Reparse(_)) => {
                    Err(CascError::BadFormat("root reparse loop"))
                }
                Err(e) => Err(e),
            }
        }
        Ok(RootOutcome::Reparse(_)) => Err(CascError::ReparseRoot),
        Err(e) => Err(e),
    };

    match outcome {
        Ok(root) => Ok(root),
        Err(CascError::Cancelled) => Err(CascError::Cancelled),
        Err(CascError::NotEnoughMemory) => Err(CascError::NotEnoughMemory),
        Err(e) => {
            warn!("ROOT manifest failed ({e}), falling back to INSTALL");
            Ok(None)
        }
    }
}

fn mount_root(state: &mut OpenState, spec: &KeySpec, locale_mask: u32) -> Result<RootOutcome> {
    let ckey = spec.ckey.ok_or(CascError::FileNotFound)?;
    let blob = state.load_blob_by_ckey(&ckey)?;
    root::dispatch(&blob, &mut state.table, locale_mask)
}

fn load_install_fallback(state: &mut OpenState) -> Result<Box<dyn RootHandler>> {
    let ckey = state
        .manifests
        .install
        .ckey
        .ok_or(CascError::FileNotFound)?;
    let blob = state.load_blob_by_ckey(&ckey)?;
    let manifest = InstallManifest::parse(&blob)?;
    let root = InstallRoot::from_manifest(&manifest, &mut state.table)?;
    Ok(Box::new(root))
}

/// Register the build's well-known files with the root handler.
fn insert_well_known(state: &mut OpenState, root: &mut dyn RootHandler) {
    let entries = [
        ("ENCODING", state.manifests.encoding, EntryFlags::empty()),
        ("DOWNLOAD", state.manifests.download, EntryFlags::empty()),
        ("INSTALL", state.manifests.install, EntryFlags::empty()),
        ("PATCH", state.manifests.patch, EntryFlags::FILE_PATCH),
        ("ROOT", state.manifests.root, EntryFlags::empty()),
        ("SIZE", state.manifests.size, EntryFlags::empty()),
    ];

    for (name, spec, extra) in entries {
        let Some(ckey) = spec.ckey else {
            continue;
        };

        let found = state.table.find_by_ckey(&ckey).or_else(|| {
            // The PATCH file sits outside the archives; give it an entry
            // anyway on online storages so it stays listable.
            (extra.contains(EntryFlags::FILE_PATCH)
                && state.features & features::ONLINE != 0)
                .then(|| state.insert_spec(&spec))
                .flatten()
        });

        if let Some(id) = found {
            root.insert(name, id);
            let entry = state.table.get_mut(id);
            entry.flags |= extra | EntryFlags::IN_BUILD;
            entry.ref_count += 1;
        }
    }
}
