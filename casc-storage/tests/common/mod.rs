//! Synthetic local-storage fixtures: a complete installation (descriptor,
//! configs, index shard, `data.000`) assembled in a tempdir so the whole
//! open pipeline can run against it.

use std::path::Path;
use tempfile::TempDir;

use casc_storage::{CKey, EKey};

/// One logical file placed into the fixture.
pub struct TestFile {
    pub name: String,
    pub ckey: CKey,
    pub ekey: EKey,
    pub content: Vec<u8>,
}

/// Which ROOT manifest flavour the fixture writes.
#[derive(Clone, Copy, PartialEq)]
pub enum RootKind {
    /// Listfile-style text root (`<name> <ckey hex>` lines).
    Text,
    /// WoW `TSFM` root with file-data IDs and path hashes.
    Wow,
    /// Unparseable bytes; every prober must reject them.
    Garbage,
}

pub struct StorageBuilder {
    files: Vec<(String, Vec<u8>)>,
    root_kind: RootKind,
    /// 9 switches DOWNLOAD to v3 with truncated keys, 16 to v1 full keys.
    download_ekey_len: u8,
    /// An encoded key the DOWNLOAD manifest lists although no manifest or
    /// index knows it.
    orphan_download_ekey: Option<EKey>,
    truncate_last_tag_bitmap: bool,
    corrupt_encoding_first_key: bool,
    skip_cdn_config: bool,
    /// Wrap the storage in a TVFS vfs-root carrying these extra files plus
    /// an inner `root` file, forcing the reparse path.
    vfs_wrapper: bool,
}

/// The assembled fixture.
pub struct BuiltStorage {
    pub dir: TempDir,
    pub files: Vec<TestFile>,
    /// Span offsets of every file in `data.000`, by file index.
    pub offsets: Vec<(u64, u32)>,
    /// File-data IDs assigned per file when the root is [`RootKind::Wow`].
    pub fids: Vec<u32>,
    /// The extra file reachable only through the TVFS wrapper.
    pub vfs_file: Option<TestFile>,
}

/// The file-data ID the WoW root fixture assigns to file `index`.
pub fn fid_for(index: usize) -> u32 {
    100 + index as u32 * 3
}

impl BuiltStorage {
    pub fn path(&self) -> &Path {
        self.dir.path()
    }
}

impl StorageBuilder {
    pub fn new() -> Self {
        Self {
            files: vec![
                ("sounds/intro.ogg".into(), b"intro music bytes".to_vec()),
                ("maps/melee.scm".into(), b"map data, such as it is".to_vec()),
                ("locales/enUS.txt".into(), b"localized strings".to_vec()),
            ],
            root_kind: RootKind::Text,
            download_ekey_len: 16,
            orphan_download_ekey: None,
            truncate_last_tag_bitmap: false,
            corrupt_encoding_first_key: false,
            skip_cdn_config: false,
            vfs_wrapper: false,
        }
    }

    pub fn root_kind(mut self, kind: RootKind) -> Self {
        self.root_kind = kind;
        self
    }

    pub fn download_ekey_len(mut self, len: u8) -> Self {
        self.download_ekey_len = len;
        self
    }

    pub fn orphan_download_ekey(mut self, ekey: EKey) -> Self {
        self.orphan_download_ekey = Some(ekey);
        self
    }

    pub fn truncate_last_tag_bitmap(mut self) -> Self {
        self.truncate_last_tag_bitmap = true;
        self
    }

    pub fn corrupt_encoding_first_key(mut self) -> Self {
        self.corrupt_encoding_first_key = true;
        self
    }

    pub fn skip_cdn_config(mut self) -> Self {
        self.skip_cdn_config = true;
        self
    }

    pub fn vfs_wrapper(mut self) -> Self {
        self.vfs_wrapper = true;
        self
    }

    pub fn build(self) -> BuiltStorage {
        let dir = TempDir::new().expect("tempdir");
        let data_dir = dir.path().join("Data").join("data");
        let config_dir = dir.path().join("Data").join("config");
        std::fs::create_dir_all(&data_dir).unwrap();
        std::fs::create_dir_all(&config_dir).unwrap();

        // Content files, keyed like the real thing: CKey over the decoded
        // bytes, EKey over the encoded span.
        let files: Vec<TestFile> = self
            .files
            .iter()
            .map(|(name, content)| make_file(name, content))
            .collect();

        let vfs_file = self
            .vfs_wrapper
            .then(|| make_file("vfs/wrapped.txt", b"only reachable through the vfs"));

        // ROOT blob.
        let root_blob = match self.root_kind {
            RootKind::Text => {
                let mut text = String::new();
                for file in &files {
                    text.push_str(&format!("{} {}\n", file.name, file.ckey));
                }
                text.into_bytes()
            }
            RootKind::Wow => build_wow_root(&files),
            RootKind::Garbage => vec![0xFF; 64],
        };
        let root_file = wrap_blob(&root_blob);

        // INSTALL blob names the same files.
        let install_blob = build_install(&files);
        let install_file = wrap_blob(&install_blob);

        // DOWNLOAD blob: one entry per content file (plus an optional
        // orphan), tags "Windows" and "enUS" covering everything.
        let mut download_keys: Vec<EKey> = files.iter().map(|f| f.ekey).collect();
        if let Some(orphan) = self.orphan_download_ekey {
            download_keys.push(orphan);
        }
        let download_blob = build_download(
            &download_keys,
            self.download_ekey_len,
            self.truncate_last_tag_bitmap,
        );
        let download_file = wrap_blob(&download_blob);

        // TVFS wrapper, when requested: the wrapped extra file plus an
        // inner `root` entry pointing at the real ROOT span.
        let vfs_blob = vfs_file.as_ref().map(|extra| {
            build_tvfs(&[
                (extra.name.as_str(), extra.ekey),
                ("root", root_file.ekey),
            ])
        });
        let vfs_span = vfs_blob.as_ref().map(|blob| wrap_blob(blob));

        // ENCODING records cover every blob the pipeline reads after it.
        let mut records: Vec<(CKey, EKey, u32)> = files
            .iter()
            .map(|f| (f.ckey, f.ekey, f.content.len() as u32))
            .collect();
        if let Some(extra) = &vfs_file {
            records.push((extra.ckey, extra.ekey, extra.content.len() as u32));
        }
        records.push((root_file.ckey, root_file.ekey, root_blob.len() as u32));
        records.push((
            install_file.ckey,
            install_file.ekey,
            install_blob.len() as u32,
        ));
        records.push((
            download_file.ckey,
            download_file.ekey,
            download_blob.len() as u32,
        ));
        if let Some(span) = &vfs_span {
            records.push((span.ckey, span.ekey, vfs_blob.as_ref().unwrap().len() as u32));
        }
        records.sort_by(|a, b| a.0.cmp(&b.0));
        let encoding_blob = build_encoding(&records, self.corrupt_encoding_first_key);
        let encoding_file = wrap_blob(&encoding_blob);

        // Lay every span into data.000 and the index shard.
        let mut spans: Vec<&WrappedBlob> = Vec::new();
        spans.push(&encoding_file);
        spans.push(&download_file);
        spans.push(&install_file);
        spans.push(&root_file);
        if let Some(span) = &vfs_span {
            spans.push(span);
        }
        let file_spans: Vec<WrappedBlob> = files
            .iter()
            .map(|f| WrappedBlob {
                ckey: f.ckey,
                ekey: f.ekey,
                span: wrap_content(&f.content),
            })
            .collect();
        spans.extend(file_spans.iter());
        let extra_span = vfs_file.as_ref().map(|f| WrappedBlob {
            ckey: f.ckey,
            ekey: f.ekey,
            span: wrap_content(&f.content),
        });
        if let Some(span) = &extra_span {
            spans.push(span);
        }

        let mut archive = Vec::new();
        let mut index_records: Vec<([u8; 9], u64, u32)> = Vec::new();
        let mut offsets = vec![(0u64, 0u32); files.len()];
        for wrapped in &spans {
            let offset = archive.len() as u64;
            let size = wrapped.span.len() as u32;
            archive.extend_from_slice(&wrapped.span);

            let mut key9 = [0u8; 9];
            key9.copy_from_slice(&wrapped.ekey.as_bytes()[..9]);
            index_records.push((key9, offset, size));

            if let Some(i) = files.iter().position(|f| f.ekey == wrapped.ekey) {
                offsets[i] = (offset, size);
            }
        }
        std::fs::write(data_dir.join("data.000"), &archive).unwrap();
        std::fs::write(data_dir.join("0000000001.idx"), build_shard(&index_records)).unwrap();

        // Build config.
        let build_key = [0x11u8; 16];
        let cdn_key = [0x22u8; 16];
        let mut build_config = String::new();
        build_config.push_str(&format!("root = {}\n", root_file.ckey));
        build_config.push_str(&format!(
            "encoding = {} {}\nencoding-size = {} {}\n",
            encoding_file.ckey,
            encoding_file.ekey,
            encoding_blob.len(),
            encoding_file.span.len()
        ));
        build_config.push_str(&format!(
            "download = {} {}\ndownload-size = {} {}\n",
            download_file.ckey,
            download_file.ekey,
            download_blob.len(),
            download_file.span.len()
        ));
        build_config.push_str(&format!(
            "install = {} {}\ninstall-size = {} {}\n",
            install_file.ckey,
            install_file.ekey,
            install_blob.len(),
            install_file.span.len()
        ));
        if let Some(span) = &vfs_span {
            build_config.push_str(&format!(
                "vfs-root = {} {}\nvfs-root-size = {} {}\n",
                span.ckey,
                span.ekey,
                vfs_blob.as_ref().unwrap().len(),
                span.span.len()
            ));
        }
        build_config.push_str("build-uid = wow\nbuild-name = WOW-12345patch9.9.9\n");
        write_config(&config_dir, &build_key, &build_config);

        if !self.skip_cdn_config {
            write_config(
                &config_dir,
                &cdn_key,
                "archives = 33333333333333333333333333333333\narchive-group = 44444444444444444444444444444444\n",
            );
        }

        // Main descriptor.
        let build_info = format!(
            "Branch!STRING:0|Active!DEC:1|Build Key!HEX:16|CDN Key!HEX:16|CDN Hosts!STRING:0|Tags!STRING:0|Version!STRING:0|Product!STRING:0\n\
             us|1|{}|{}|us.cdn.example|Windows x86_64 enUS acct-ROU?|9.9.9.12345|wow\n",
            hex::encode(build_key),
            hex::encode(cdn_key),
        );
        std::fs::write(dir.path().join(".build.info"), build_info).unwrap();

        let fids = (0..files.len()).map(fid_for).collect();
        BuiltStorage {
            dir,
            files,
            offsets,
            fids,
            vfs_file,
        }
    }
}

struct WrappedBlob {
    ckey: CKey,
    ekey: EKey,
    span: Vec<u8>,
}

fn make_file(name: &str, content: &[u8]) -> TestFile {
    let span = wrap_content(content);
    TestFile {
        name: name.to_string(),
        ckey: CKey::new(md5::compute(content).0),
        ekey: EKey::new(md5::compute(&span).0),
        content: content.to_vec(),
    }
}

/// Wrap decoded bytes into a single plain frame span.
pub fn wrap_content(content: &[u8]) -> Vec<u8> {
    let mut frame = vec![b'N'];
    frame.extend_from_slice(content);

    let mut span = Vec::new();
    span.extend_from_slice(b"BLTE");
    span.extend_from_slice(&36u32.to_be_bytes());
    span.push(0x0F);
    span.extend_from_slice(&1u32.to_be_bytes()[1..]);
    span.extend_from_slice(&(frame.len() as u32).to_be_bytes());
    span.extend_from_slice(&(content.len() as u32).to_be_bytes());
    span.extend_from_slice(md5::compute(&frame).as_ref());
    span.extend_from_slice(&frame);
    span
}

/// Wrap a manifest blob and derive its keys the way the fixture needs
/// them: CKey over the blob, EKey over the span.
fn wrap_blob(blob: &[u8]) -> WrappedBlob {
    let span = wrap_content(blob);
    WrappedBlob {
        ckey: CKey::new(md5::compute(blob).0),
        ekey: EKey::new(md5::compute(&span).0),
        span,
    }
}

/// Minimal single-page ENCODING manifest.
fn build_encoding(records: &[(CKey, EKey, u32)], corrupt_first_key: bool) -> Vec<u8> {
    const PAGE_KB: u16 = 4;
    let page_size = PAGE_KB as usize * 1024;

    let mut page = Vec::with_capacity(page_size);
    for (ckey, ekey, content_size) in records {
        page.extend_from_slice(&1u16.to_be_bytes());
        page.extend_from_slice(&content_size.to_be_bytes());
        page.extend_from_slice(ckey.as_bytes());
        page.extend_from_slice(ekey.as_bytes());
    }
    page.resize(page_size, 0);

    let first_key = if corrupt_first_key {
        CKey::new([0xCC; 16])
    } else {
        records[0].0
    };

    let mut blob = Vec::new();
    blob.extend_from_slice(b"EN");
    blob.push(1);
    blob.push(16);
    blob.push(16);
    blob.extend_from_slice(&PAGE_KB.to_be_bytes());
    blob.extend_from_slice(&PAGE_KB.to_be_bytes());
    blob.extend_from_slice(&1u32.to_be_bytes());
    blob.extend_from_slice(&0u32.to_be_bytes());
    blob.push(0);
    blob.extend_from_slice(&0u32.to_be_bytes());
    blob.extend_from_slice(first_key.as_bytes());
    blob.extend_from_slice(md5::compute(&page).as_ref());
    blob.extend_from_slice(&page);
    blob
}

/// DOWNLOAD manifest: v1 for full keys, v3 for truncated ones. Tags
/// "Windows" and "enUS" cover every entry.
fn build_download(ekeys: &[EKey], ekey_len: u8, truncate_last_bitmap: bool) -> Vec<u8> {
    let v3 = ekey_len != 16;
    let mut blob = Vec::new();
    blob.extend_from_slice(b"DL");
    blob.push(if v3 { 3 } else { 1 });
    blob.push(ekey_len);
    blob.push(0); // no checksum
    blob.extend_from_slice(&(ekeys.len() as u32).to_be_bytes());
    blob.extend_from_slice(&2u16.to_be_bytes());
    if v3 {
        blob.push(1); // flag size
        blob.push(0); // base priority
        blob.extend_from_slice(&[0, 0, 0]);
    }

    for ekey in ekeys {
        blob.extend_from_slice(&ekey.as_bytes()[..ekey_len as usize]);
        blob.extend_from_slice(&[0, 0, 0, 2, 0]); // encoded size 0x200
        blob.push(3); // priority
        if v3 {
            blob.push(0); // flags
        }
    }

    let bitmap_len = ekeys.len().div_ceil(8);
    for (name, value) in [("Windows", 0x0001u16), ("enUS", 0x0002u16)] {
        blob.extend_from_slice(name.as_bytes());
        blob.push(0);
        blob.extend_from_slice(&value.to_be_bytes());
        if truncate_last_bitmap && name == "enUS" {
            break; // bitmap cut by end-of-buffer
        }
        blob.extend_from_slice(&vec![0xFF; bitmap_len]);
    }
    blob
}

/// WoW `TSFM` root: one all-locale block mapping each file's fixture FID
/// to its content key, with jenkins3 path hashes.
fn build_wow_root(files: &[TestFile]) -> Vec<u8> {
    let mut blob = Vec::new();
    blob.extend_from_slice(b"TSFM");
    blob.extend_from_slice(&(files.len() as u32).to_le_bytes()); // total
    blob.extend_from_slice(&(files.len() as u32).to_le_bytes()); // named

    blob.extend_from_slice(&(files.len() as u32).to_le_bytes()); // records
    blob.extend_from_slice(&0u32.to_le_bytes()); // content flags
    blob.extend_from_slice(&0xffff_ffffu32.to_le_bytes()); // all locales

    let mut prev: Option<u32> = None;
    for (i, _) in files.iter().enumerate() {
        let fid = fid_for(i);
        let delta = match prev {
            None => fid as i32,
            Some(p) => (fid as i32) - (p as i32) - 1,
        };
        prev = Some(fid);
        blob.extend_from_slice(&delta.to_le_bytes());
    }
    for file in files {
        blob.extend_from_slice(file.ckey.as_bytes());
    }
    for file in files {
        blob.extend_from_slice(&tact_formats::jenkins3::hashpath(&file.name).to_le_bytes());
    }
    blob
}

/// INSTALL manifest naming every file, tagged "Windows".
fn build_install(files: &[TestFile]) -> Vec<u8> {
    let mut blob = Vec::new();
    blob.extend_from_slice(b"IN");
    blob.push(1);
    blob.push(16);
    blob.extend_from_slice(&1u16.to_be_bytes());
    blob.extend_from_slice(&(files.len() as u32).to_be_bytes());

    blob.extend_from_slice(b"Windows\0");
    blob.extend_from_slice(&0u16.to_be_bytes());
    blob.extend_from_slice(&vec![0xFF; files.len().div_ceil(8)]);

    for file in files {
        blob.extend_from_slice(file.name.as_bytes());
        blob.push(0);
        blob.extend_from_slice(file.ckey.as_bytes());
        blob.extend_from_slice(&(file.content.len() as u32).to_be_bytes());
    }
    blob
}

/// Minimal TVFS manifest over `(path, ekey)` pairs.
fn build_tvfs(files: &[(&str, EKey)]) -> Vec<u8> {
    fn varint(mut v: u32) -> Vec<u8> {
        let mut out = Vec::new();
        loop {
            let byte = (v & 0x7F) as u8;
            v >>= 7;
            if v == 0 {
                out.push(byte);
                break;
            }
            out.push(byte | 0x80);
        }
        out
    }

    let mut path_table = Vec::new();
    for (path, _) in files {
        path_table.push(path.len() as u8);
        path_table.extend_from_slice(path.as_bytes());
    }

    let mut vfs_table = Vec::new();
    for (i, _) in files.iter().enumerate() {
        vfs_table.push(0);
        vfs_table.extend_from_slice(&varint(i as u32));
        vfs_table.extend_from_slice(&varint(1));
        vfs_table.extend_from_slice(&varint(i as u32));
    }

    let mut cft_table = Vec::new();
    for (_, ekey) in files {
        cft_table.extend_from_slice(ekey.as_bytes());
        cft_table.extend_from_slice(&[0, 0, 0, 1, 0]);
    }

    let header_size = 4 + 5 + 30;
    let path_offset = header_size as u64;
    let vfs_offset = path_offset + path_table.len() as u64;
    let cft_offset = vfs_offset + vfs_table.len() as u64;

    let mut blob = Vec::new();
    blob.extend_from_slice(b"TVFS");
    blob.push(1);
    blob.push(header_size as u8);
    blob.push(9);
    blob.push(9);
    blob.push(0);
    for value in [
        path_offset,
        path_table.len() as u64,
        vfs_offset,
        vfs_table.len() as u64,
        cft_offset,
        cft_table.len() as u64,
    ] {
        blob.extend_from_slice(&value.to_be_bytes()[3..]);
    }
    blob.extend_from_slice(&path_table);
    blob.extend_from_slice(&vfs_table);
    blob.extend_from_slice(&cft_table);
    blob
}

/// Single v7 index shard over the given records.
fn build_shard(records: &[([u8; 9], u64, u32)]) -> Vec<u8> {
    const FILE_OFFSET_BITS: u8 = 30;

    let mut data = Vec::new();
    data.extend_from_slice(&0x10u32.to_le_bytes());
    data.extend_from_slice(&0u32.to_le_bytes());
    data.extend_from_slice(&7u16.to_le_bytes());
    data.push(0); // bucket
    data.push(0); // extra bytes
    data.push(4); // span size bytes
    data.push(5); // span offset bytes
    data.push(9); // key bytes
    data.push(FILE_OFFSET_BITS);
    data.extend_from_slice(&0x4000_0000u64.to_le_bytes());
    while data.len() % 16 != 0 {
        data.push(0);
    }

    data.extend_from_slice(&((records.len() * 18) as u32).to_le_bytes());
    data.extend_from_slice(&0u32.to_le_bytes());
    for (key, offset, size) in records {
        data.extend_from_slice(key);
        let packed = *offset; // archive 0
        data.push((packed >> 32) as u8);
        data.extend_from_slice(&(packed as u32).to_be_bytes());
        data.extend_from_slice(&size.to_le_bytes());
    }
    data
}

fn write_config(config_dir: &Path, key: &[u8; 16], content: &str) {
    let hex = hex::encode(key);
    let dir = config_dir.join(&hex[0..2]).join(&hex[2..4]);
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join(hex), content).unwrap();
}
