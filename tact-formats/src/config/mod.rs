//! Configuration-file parsers: the `key = value` build and CDN configs
//! fetched by content key, and the textual build descriptors that bootstrap
//! a storage (`.build.info`, `.build.db`, `versions`).

pub mod build;
pub mod buildinfo;
pub mod cdn;
pub mod parser;

pub use build::BuildConfig;
pub use buildinfo::{BuildDescriptor, BuildFileKind};
pub use cdn::CdnConfig;
pub use parser::ConfigParser;
