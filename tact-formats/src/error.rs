use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    IOError(#[from] std::io::Error),

    #[error("File has incorrect magic - possibly wrong file format")]
    BadMagic,

    #[error("Unsupported format version {0}")]
    UnsupportedVersion(u8),

    #[error("Unsupported key length {0}")]
    BadKeyLength(u8),

    #[error("Data is truncated: wanted {expected} bytes, {actual} available")]
    Truncated { expected: usize, actual: usize },

    #[error("Page {page} does not begin with the key announced by its descriptor")]
    PageKeyMismatch { page: usize },

    #[error("Config parser syntax error")]
    ConfigSyntax,

    #[error("Config parser parameter type mismatch")]
    ConfigTypeMismatch,

    #[error("Build descriptor is missing the '{0}' column")]
    MissingField(&'static str),
}
