//! Access to the `data.NNN` archive files.

use memmap2::Mmap;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

use crate::error::{CascError, Result};
use crate::types::ArchiveLocation;

/// Archives above this size fall back to seek-and-read access.
const MMAP_LIMIT: u64 = 2 << 30;

/// One open archive file, memory-mapped when possible.
pub struct Archive {
    path: PathBuf,
    mmap: Option<Mmap>,
    size: u64,
}

impl Archive {
    /// Open an archive file for reading.
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let size = file.metadata()?.len();

        debug!("opening archive {path:?} ({size} bytes)");

        let mmap = if size > 0 && size < MMAP_LIMIT {
            match unsafe { Mmap::map(&file) } {
                Ok(mmap) => Some(mmap),
                Err(e) => {
                    debug!("mmap failed, falling back to reads: {e}");
                    None
                }
            }
        } else {
            None
        };

        Ok(Self {
            path: path.to_path_buf(),
            mmap,
            size,
        })
    }

    /// Read `length` bytes at `offset`.
    pub fn read_at(&self, offset: u64, length: usize) -> Result<Vec<u8>> {
        if offset + length as u64 > self.size {
            return Err(CascError::BadFormat("read beyond archive bounds"));
        }

        if let Some(mmap) = &self.mmap {
            return Ok(mmap[offset as usize..offset as usize + length].to_vec());
        }

        // The handle is shared read-only, so reopen for a positioned read
        // rather than keeping a seek cursor.
        let mut file = File::open(&self.path)?;
        file.seek(SeekFrom::Start(offset))?;
        let mut buf = vec![0u8; length];
        file.read_exact(&mut buf)?;
        Ok(buf)
    }

    pub fn size(&self) -> u64 {
        self.size
    }
}

/// Lazily-opened set of the storage's archives.
pub struct ArchiveSet {
    data_path: PathBuf,
    open: RwLock<HashMap<u16, Arc<Archive>>>,
}

impl ArchiveSet {
    pub fn new(data_path: PathBuf) -> Self {
        Self {
            data_path,
            open: RwLock::new(HashMap::new()),
        }
    }

    /// Path of archive `id`: `data.000`, `data.001`, ...
    fn archive_path(&self, id: u16) -> PathBuf {
        self.data_path.join(format!("data.{id:03}"))
    }

    fn archive(&self, id: u16) -> Result<Arc<Archive>> {
        if let Some(archive) = self.open.read().get(&id) {
            return Ok(archive.clone());
        }

        let path = self.archive_path(id);
        if !path.is_file() {
            return Err(CascError::FileNotFound);
        }
        let archive = Arc::new(Archive::open(&path)?);
        self.open.write().insert(id, archive.clone());
        Ok(archive)
    }

    /// Read the encoded span at `location`.
    pub fn read(&self, location: &ArchiveLocation) -> Result<Vec<u8>> {
        self.archive(location.archive_id)?
            .read_at(location.offset, location.size as usize)
    }

    /// Number of archives currently open.
    pub fn open_count(&self) -> usize {
        self.open.read().len()
    }
}
