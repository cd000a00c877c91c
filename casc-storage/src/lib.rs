//! Read-only storage engine for CASC (Content Addressable Storage
//! Container) game installations.
//!
//! Opening a storage resolves the chain of manifests - build descriptor,
//! CDN configuration, index shards, ENCODING, DOWNLOAD, ROOT - into one
//! central file table addressable by content key, encoded key, or
//! user-facing name:
//!
//! ```no_run
//! use casc_storage::{OpenArgs, Storage};
//!
//! let storage = Storage::open(OpenArgs::new("/games/wow"))?;
//! let blob = storage.read_by_name("Interface/FrameXML/Bindings.xml")?;
//! # Ok::<(), casc_storage::CascError>(())
//! ```
//!
//! The engine never writes; a loaded storage is immutable and every query
//! is idempotent.

pub mod archive;
pub mod build;
mod error;
pub mod features;
pub mod frame;
pub mod index;
pub mod keysvc;
pub mod loader;
pub mod root;
mod storage;
pub mod table;
pub mod types;

pub use error::{CascError, Result};
pub use storage::{InfoClass, OpenArgs, ProductInfo, ProgressFn, Storage, StorageInfo};
pub use table::{CKeyEntry, CKeyTable, EntryFlags, EntryId};
pub use types::{ArchiveLocation, INVALID_OFFSET, INVALID_SIZE, TagInfo};

// The key types travel with the engine's public API.
pub use tact_formats::{CKey, EKey, EKeyPrefix};
